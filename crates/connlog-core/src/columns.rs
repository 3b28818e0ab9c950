//! Per-column text of the connection table.
//!
//! Each [`Column`] hands out a [`CellFormatter`] that renders one decoded
//! connection for a [`CellRole`]. Host names and application names come from
//! lookups passed in through a [`FormatContext`]; nothing here reaches for
//! global state.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::RwLock;

use crate::row::ConnInfo;

/// Which text a cell is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellRole {
    /// The text shown in the cell.
    Display,
    /// The tooltip of the cell.
    ToolTip,
}

/// Resolves address text to a host name.
pub trait HostNameLookup: Send + Sync {
    /// Returns the host name known for `address`, if any.
    fn host_name(&self, address: &str) -> Option<String>;

    /// Forgets every known host name.
    fn clear(&self);
}

/// Resolves an application path to a display name.
pub trait AppNameLookup: Send + Sync {
    /// Returns the display name of the application at `app_path`.
    fn app_name(&self, app_path: &str) -> String;
}

/// In-memory host name table.
#[derive(Debug, Default)]
pub struct HostNameCache {
    names: RwLock<HashMap<String, String>>,
}

impl HostNameCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `host_name` for `address`.
    pub fn insert(&self, address: impl Into<String>, host_name: impl Into<String>) {
        self.names
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(address.into(), host_name.into());
    }

    /// Number of known host names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns true if no host name is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(String, String)> for HostNameCache {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            names: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl HostNameLookup for HostNameCache {
    fn host_name(&self, address: &str) -> Option<String> {
        self.names
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(address)
            .filter(|name| !name.is_empty())
            .cloned()
    }

    fn clear(&self) {
        self.names
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

/// Names applications after the file name of their path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathAppNames;

impl AppNameLookup for PathAppNames {
    fn app_name(&self, app_path: &str) -> String {
        // Stored paths may come from another platform; split on both.
        let file_name = app_path
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(app_path);
        Path::new(file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(file_name)
            .to_string()
    }
}

/// Everything a formatter may consult besides the row itself.
#[derive(Clone, Copy)]
pub struct FormatContext<'a> {
    /// Replace addresses by known host names.
    pub resolve_address: bool,
    /// Host name lookup.
    pub host_names: &'a dyn HostNameLookup,
    /// Application name lookup.
    pub app_names: &'a dyn AppNameLookup,
}

/// Renders one column of a decoded connection.
pub trait CellFormatter: Sync {
    /// Text for `role`, or `None` when the cell has none.
    fn text(&self, info: &ConnInfo, cx: &FormatContext<'_>, role: CellRole) -> Option<String>;
}

/// Columns of the connection table, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// Owning application.
    Program,
    /// Process id.
    ProcessId,
    /// IP protocol.
    Protocol,
    /// Local address and port.
    LocalAddress,
    /// Remote address and port.
    RemoteAddress,
    /// Inbound or outbound.
    Direction,
    /// Blocked or allowed.
    Action,
    /// Decision reason.
    Reason,
    /// Connection time.
    Time,
}

impl Column {
    /// All columns in display order.
    pub const ALL: [Self; 9] = [
        Self::Program,
        Self::ProcessId,
        Self::Protocol,
        Self::LocalAddress,
        Self::RemoteAddress,
        Self::Direction,
        Self::Action,
        Self::Reason,
        Self::Time,
    ];

    /// Number of columns.
    pub const COUNT: usize = Self::ALL.len();

    /// Column at a display position.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Header label; `None` for icon-only columns.
    #[must_use]
    pub const fn header_text(self) -> Option<&'static str> {
        match self {
            Self::Direction | Self::Action | Self::Reason => None,
            other => Some(other.header_tooltip()),
        }
    }

    /// Header tooltip.
    #[must_use]
    pub const fn header_tooltip(self) -> &'static str {
        match self {
            Self::Program => "Program",
            Self::ProcessId => "Process ID",
            Self::Protocol => "Protocol",
            Self::LocalAddress => "Local IP and Port",
            Self::RemoteAddress => "Remote IP and Port",
            Self::Direction => "Direction",
            Self::Action => "Action",
            Self::Reason => "Reason",
            Self::Time => "Time",
        }
    }

    /// The formatter rendering this column.
    #[must_use]
    pub fn formatter(self) -> &'static dyn CellFormatter {
        match self {
            Self::Program => &ProgramCell,
            Self::ProcessId => &ProcessIdCell,
            Self::Protocol => &ProtocolCell,
            Self::LocalAddress => &AddressCell { remote: false },
            Self::RemoteAddress => &AddressCell { remote: true },
            Self::Direction => &DirectionCell,
            Self::Action => &ActionCell,
            Self::Reason => &ReasonCell,
            Self::Time => &TimeCell,
        }
    }

    /// Shorthand for `self.formatter().text(..)`.
    #[must_use]
    pub fn text(self, info: &ConnInfo, cx: &FormatContext<'_>, role: CellRole) -> Option<String> {
        self.formatter().text(info, cx, role)
    }
}

/// Formats `address:port`, bracketing IPv6 and optionally substituting a
/// known host name for the address.
#[must_use]
pub fn format_ip_port(
    address: IpAddr,
    port: u16,
    resolve_address: bool,
    host_names: &dyn HostNameLookup,
) -> String {
    let mut text = address.to_string();
    if let Some(host_name) = resolve_address
        .then(|| host_names.host_name(&text))
        .flatten()
    {
        text = host_name;
    }
    if address.is_ipv6() {
        text = format!("[{text}]");
    }
    format!("{text}:{port}")
}

/// Well-known name of an IP protocol number.
#[must_use]
pub fn protocol_name(ip_proto: u8) -> String {
    match ip_proto {
        1 => "ICMP".to_string(),
        2 => "IGMP".to_string(),
        6 => "TCP".to_string(),
        17 => "UDP".to_string(),
        58 => "ICMPv6".to_string(),
        other => other.to_string(),
    }
}

struct ProgramCell;

impl CellFormatter for ProgramCell {
    fn text(&self, info: &ConnInfo, cx: &FormatContext<'_>, _role: CellRole) -> Option<String> {
        Some(cx.app_names.app_name(&info.app_path))
    }
}

struct ProcessIdCell;

impl CellFormatter for ProcessIdCell {
    fn text(&self, info: &ConnInfo, _cx: &FormatContext<'_>, _role: CellRole) -> Option<String> {
        Some(info.pid.to_string())
    }
}

struct ProtocolCell;

impl CellFormatter for ProtocolCell {
    fn text(&self, info: &ConnInfo, _cx: &FormatContext<'_>, _role: CellRole) -> Option<String> {
        Some(protocol_name(info.ip_proto))
    }
}

struct AddressCell {
    remote: bool,
}

impl CellFormatter for AddressCell {
    fn text(&self, info: &ConnInfo, cx: &FormatContext<'_>, _role: CellRole) -> Option<String> {
        let (address, port) = if self.remote {
            (info.addrs.remote(), info.remote_port)
        } else {
            (info.addrs.local(), info.local_port)
        };
        Some(format_ip_port(
            address,
            port,
            cx.resolve_address,
            cx.host_names,
        ))
    }
}

struct DirectionCell;

impl CellFormatter for DirectionCell {
    fn text(&self, info: &ConnInfo, _cx: &FormatContext<'_>, role: CellRole) -> Option<String> {
        let text = if info.inbound { "In" } else { "Out" };
        (role == CellRole::ToolTip).then(|| text.to_string())
    }
}

struct ActionCell;

impl CellFormatter for ActionCell {
    fn text(&self, info: &ConnInfo, _cx: &FormatContext<'_>, role: CellRole) -> Option<String> {
        let text = if info.blocked { "Blocked" } else { "Allowed" };
        (role == CellRole::ToolTip).then(|| text.to_string())
    }
}

struct ReasonCell;

impl CellFormatter for ReasonCell {
    fn text(&self, info: &ConnInfo, _cx: &FormatContext<'_>, role: CellRole) -> Option<String> {
        if role != CellRole::ToolTip {
            return None;
        }
        let mut text = info.reason.text().to_string();
        if info.inherited {
            text.push_str(" (Inherited)");
        }
        Some(text)
    }
}

struct TimeCell;

impl CellFormatter for TimeCell {
    fn text(&self, info: &ConnInfo, _cx: &FormatContext<'_>, _role: CellRole) -> Option<String> {
        info.conn_time_utc()
            .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}
