//! Connection rows: the raw record read from storage and its decoded form.

// Storage hands back every integer as i64; the narrowing casts below mirror
// the column widths of the connection table.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use tracing::warn;

/// Width of a stored IPv6 address.
pub const IPV6_LEN: usize = 16;

/// A connection record exactly as the storage collaborator returns it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawConnRecord {
    /// Connection identifier.
    pub conn_id: i64,
    /// Owning application identifier.
    pub app_id: i64,
    /// Connection time in seconds since the Unix epoch.
    pub conn_time: i64,
    /// Process id.
    pub pid: i64,
    /// Reason code.
    pub reason: i64,
    /// Whether the connection was blocked.
    pub blocked: bool,
    /// Whether the decision was inherited from a parent process.
    pub inherited: bool,
    /// Whether the connection was inbound.
    pub inbound: bool,
    /// IP protocol number.
    pub ip_proto: i64,
    /// Local port.
    pub local_port: i64,
    /// Remote port.
    pub remote_port: i64,
    /// Address family discriminant for both addresses.
    pub is_ipv6: bool,
    /// Local IPv4 address, meaningful when `is_ipv6` is false.
    pub local_ip4: i64,
    /// Remote IPv4 address, meaningful when `is_ipv6` is false.
    pub remote_ip4: i64,
    /// Local IPv6 address bytes, meaningful when `is_ipv6` is true.
    pub local_ip6: Vec<u8>,
    /// Remote IPv6 address bytes, meaningful when `is_ipv6` is true.
    pub remote_ip6: Vec<u8>,
    /// Filesystem path of the owning application.
    pub app_path: String,
}

/// Why the firewall took its decision on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnReason {
    /// Internet address.
    IpInet,
    /// Old connection re-authorized.
    Reauth,
    /// The program's own action.
    Program,
    /// Application group.
    AppGroup,
    /// Global filter mode.
    FilterMode,
    /// LAN only.
    LanOnly,
    /// Address zone.
    Zone,
    /// Application rule.
    Rule,
    /// Global rule evaluated before application rules.
    RuleGlobalBeforeApps,
    /// Global rule evaluated after application rules.
    RuleGlobalAfterApps,
    /// Limit of "ask to connect" prompts reached.
    AskLimit,
    /// Any code outside the known set.
    Unknown(i64),
}

impl ConnReason {
    /// Maps a stored reason code.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::IpInet,
            2 => Self::Reauth,
            3 => Self::Program,
            4 => Self::AppGroup,
            5 => Self::FilterMode,
            6 => Self::LanOnly,
            7 => Self::Zone,
            8 => Self::Rule,
            9 => Self::RuleGlobalBeforeApps,
            10 => Self::RuleGlobalAfterApps,
            11 => Self::AskLimit,
            other => Self::Unknown(other),
        }
    }

    /// The stored reason code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::IpInet => 1,
            Self::Reauth => 2,
            Self::Program => 3,
            Self::AppGroup => 4,
            Self::FilterMode => 5,
            Self::LanOnly => 6,
            Self::Zone => 7,
            Self::Rule => 8,
            Self::RuleGlobalBeforeApps => 9,
            Self::RuleGlobalAfterApps => 10,
            Self::AskLimit => 11,
            Self::Unknown(code) => code,
        }
    }

    /// Human readable description.
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::IpInet => "Internet address",
            Self::Reauth => "Old connection",
            Self::Program => "Program's action",
            Self::AppGroup => "App. Group",
            Self::FilterMode => "Filter Mode",
            Self::LanOnly => "LAN only",
            Self::Zone => "Zone",
            Self::Rule => "Rule",
            Self::RuleGlobalBeforeApps => "Global Rule before App Rules",
            Self::RuleGlobalAfterApps => "Global Rule after App Rules",
            Self::AskLimit => "Limit of Ask to Connect",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for ConnReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Local and remote addresses of a connection.
///
/// A row is entirely IPv4 or entirely IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAddrs {
    /// IPv4 connection.
    V4 {
        /// Local address.
        local: Ipv4Addr,
        /// Remote address.
        remote: Ipv4Addr,
    },
    /// IPv6 connection.
    V6 {
        /// Local address.
        local: Ipv6Addr,
        /// Remote address.
        remote: Ipv6Addr,
    },
}

impl ConnAddrs {
    /// Returns true for an IPv6 connection.
    #[must_use]
    pub const fn is_ipv6(&self) -> bool {
        matches!(self, Self::V6 { .. })
    }

    /// The local address.
    #[must_use]
    pub fn local(&self) -> IpAddr {
        match *self {
            Self::V4 { local, .. } => IpAddr::V4(local),
            Self::V6 { local, .. } => IpAddr::V6(local),
        }
    }

    /// The remote address.
    #[must_use]
    pub fn remote(&self) -> IpAddr {
        match *self {
            Self::V4 { remote, .. } => IpAddr::V4(remote),
            Self::V6 { remote, .. } => IpAddr::V6(remote),
        }
    }
}

/// A decoded connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    /// Connection identifier.
    pub conn_id: i64,
    /// Owning application identifier.
    pub app_id: i64,
    /// Connection time in seconds since the Unix epoch.
    pub conn_time: i64,
    /// Process id.
    pub pid: u32,
    /// Decision reason.
    pub reason: ConnReason,
    /// Whether the connection was blocked.
    pub blocked: bool,
    /// Whether the decision was inherited from a parent process.
    pub inherited: bool,
    /// Whether the connection was inbound.
    pub inbound: bool,
    /// IP protocol number.
    pub ip_proto: u8,
    /// Local port.
    pub local_port: u16,
    /// Remote port.
    pub remote_port: u16,
    /// Local and remote addresses.
    pub addrs: ConnAddrs,
    /// Filesystem path of the owning application.
    pub app_path: String,
}

impl ConnInfo {
    /// Connection time as a UTC timestamp, if representable.
    #[must_use]
    pub fn conn_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.conn_time, 0)
    }
}

/// A row of the connection table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnRow {
    /// Not decoded: the record within bounds could not be materialized.
    #[default]
    Null,
    /// A decoded connection.
    Conn(Box<ConnInfo>),
}

impl ConnRow {
    /// Returns true for the null row.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The decoded connection, if any.
    #[must_use]
    pub fn info(&self) -> Option<&ConnInfo> {
        match self {
            Self::Null => None,
            Self::Conn(info) => Some(&**info),
        }
    }

    /// The connection identifier, if any.
    #[must_use]
    pub fn conn_id(&self) -> Option<i64> {
        self.info().map(|info| info.conn_id)
    }
}

/// Decodes a raw record into a connection row.
///
/// Both addresses are decoded according to the record's single `is_ipv6`
/// discriminant.
#[must_use]
pub fn decode(raw: &RawConnRecord) -> ConnRow {
    let addrs = if raw.is_ipv6 {
        ConnAddrs::V6 {
            local: ip6_from_bytes(raw.conn_id, &raw.local_ip6),
            remote: ip6_from_bytes(raw.conn_id, &raw.remote_ip6),
        }
    } else {
        ConnAddrs::V4 {
            local: Ipv4Addr::from(raw.local_ip4 as u32),
            remote: Ipv4Addr::from(raw.remote_ip4 as u32),
        }
    };

    ConnRow::Conn(Box::new(ConnInfo {
        conn_id: raw.conn_id,
        app_id: raw.app_id,
        conn_time: raw.conn_time,
        pid: raw.pid as u32,
        reason: ConnReason::from_code(raw.reason),
        blocked: raw.blocked,
        inherited: raw.inherited,
        inbound: raw.inbound,
        ip_proto: raw.ip_proto as u8,
        local_port: raw.local_port as u16,
        remote_port: raw.remote_port as u16,
        addrs,
        app_path: raw.app_path.clone(),
    }))
}

/// Reads a fixed-width IPv6 address, zero-padding or truncating odd blobs.
fn ip6_from_bytes(conn_id: i64, bytes: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; IPV6_LEN];
    if bytes.len() != IPV6_LEN {
        warn!(conn_id, len = bytes.len(), "malformed IPv6 address blob");
    }
    let n = bytes.len().min(IPV6_LEN);
    octets[..n].copy_from_slice(&bytes[..n]);
    Ipv6Addr::from(octets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_v4() -> RawConnRecord {
        RawConnRecord {
            conn_id: 42,
            app_id: 3,
            conn_time: 1_700_000_000,
            pid: 4321,
            reason: 8,
            blocked: true,
            inherited: false,
            inbound: false,
            ip_proto: 6,
            local_port: 50_000,
            remote_port: 443,
            is_ipv6: false,
            local_ip4: i64::from(u32::from(Ipv4Addr::new(192, 168, 1, 10))),
            remote_ip4: i64::from(u32::from(Ipv4Addr::new(93, 184, 216, 34))),
            local_ip6: Vec::new(),
            remote_ip6: Vec::new(),
            app_path: r"C:\Program Files\Browser\browser.exe".to_string(),
        }
    }

    #[test]
    fn test_decode_ipv4() {
        let row = decode(&raw_v4());
        let info = row.info().expect("decoded row");

        assert_eq!(info.conn_id, 42);
        assert_eq!(info.app_id, 3);
        assert_eq!(info.pid, 4321);
        assert_eq!(info.reason, ConnReason::Rule);
        assert!(info.blocked);
        assert!(!info.inbound);
        assert_eq!(info.ip_proto, 6);
        assert_eq!(info.local_port, 50_000);
        assert_eq!(info.remote_port, 443);
        assert_eq!(
            info.addrs,
            ConnAddrs::V4 {
                local: Ipv4Addr::new(192, 168, 1, 10),
                remote: Ipv4Addr::new(93, 184, 216, 34),
            }
        );
        assert_eq!(info.app_path, r"C:\Program Files\Browser\browser.exe");
    }

    #[test]
    fn test_decode_ipv4_from_signed_storage() {
        // 32-bit addresses stored as signed integers come back negative.
        let mut raw = raw_v4();
        raw.local_ip4 = -1;
        let row = decode(&raw);

        assert_eq!(
            row.info().unwrap().addrs.local(),
            IpAddr::V4(Ipv4Addr::BROADCAST)
        );
    }

    #[test]
    fn test_decode_ipv6_ignores_ipv4_fields() {
        let local = Ipv6Addr::LOCALHOST;
        let remote: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let raw = RawConnRecord {
            is_ipv6: true,
            local_ip4: 7,
            local_ip6: local.octets().to_vec(),
            remote_ip6: remote.octets().to_vec(),
            ..raw_v4()
        };

        let row = decode(&raw);
        let addrs = row.info().unwrap().addrs;
        assert!(addrs.is_ipv6());
        assert_eq!(addrs, ConnAddrs::V6 { local, remote });
    }

    #[test]
    fn test_decode_short_ipv6_blob_is_padded() {
        let raw = RawConnRecord {
            is_ipv6: true,
            local_ip6: vec![0x20, 0x01],
            remote_ip6: vec![0xff; 20],
            ..raw_v4()
        };

        let row = decode(&raw);
        let addrs = row.info().unwrap().addrs;
        assert_eq!(addrs.local(), IpAddr::V6("2001::".parse().unwrap()));
        assert_eq!(
            addrs.remote(),
            IpAddr::V6(Ipv6Addr::from([0xff; IPV6_LEN]))
        );
    }

    #[test]
    fn test_reason_codes() {
        for code in 1..=11 {
            let reason = ConnReason::from_code(code);
            assert!(!matches!(reason, ConnReason::Unknown(_)));
            assert_eq!(reason.code(), code);
        }
        assert_eq!(ConnReason::from_code(0), ConnReason::Unknown(0));
        assert_eq!(ConnReason::from_code(12).text(), "Unknown");
        assert_eq!(ConnReason::AskLimit.to_string(), "Limit of Ask to Connect");
    }

    #[test]
    fn test_null_row() {
        let row = ConnRow::default();
        assert!(row.is_null());
        assert_eq!(row.conn_id(), None);
        assert_eq!(decode(&raw_v4()).conn_id(), Some(42));
    }

    #[test]
    fn test_conn_time_utc() {
        let info = decode(&raw_v4()).info().cloned().unwrap();
        assert_eq!(
            info.conn_time_utc().unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }
}
