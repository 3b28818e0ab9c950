//! Connection list model.
//!
//! [`ConnListModel`] is the table-facing surface of the crate. It polls a
//! [`ConnIdRangeSource`] for the log bounds, feeds them to a
//! [`WindowProjection`], queues the resulting notifications, and renders
//! cells through [`Column`] formatters. Every collaborator arrives through
//! [`ConnListDeps`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::columns::{AppNameLookup, CellRole, Column, FormatContext, HostNameLookup};
use crate::projection::{ProjectionError, ProjectionEvent, RowFetcher, WindowProjection};
use crate::range::{ConnIdRangeSource, EditPlan, IdentifierRange, StructuralEdit};
use crate::row::ConnRow;

/// Errors returned by [`ConnListModel`].
#[derive(Debug, Error)]
pub enum ModelError {
    /// The identifier range could not be read.
    #[error("failed to read connection id range")]
    Range(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A row could not be projected.
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Collaborators of a [`ConnListModel`].
pub struct ConnListDeps<S> {
    /// Storage serving both the range and single records.
    pub source: Arc<S>,
    /// Host name lookup used when addresses are resolved.
    pub host_names: Arc<dyn HostNameLookup>,
    /// Application display names.
    pub app_names: Arc<dyn AppNameLookup>,
}

impl<S> Clone for ConnListDeps<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            host_names: Arc::clone(&self.host_names),
            app_names: Arc::clone(&self.app_names),
        }
    }
}

impl<S> std::fmt::Debug for ConnListDeps<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnListDeps").finish_non_exhaustive()
    }
}

/// Table model over the connection log.
pub struct ConnListModel<S> {
    projection: WindowProjection<Arc<S>>,
    host_names: Arc<dyn HostNameLookup>,
    app_names: Arc<dyn AppNameLookup>,
    resolve_address: bool,
    pending: Vec<ProjectionEvent>,
}

impl<S> std::fmt::Debug for ConnListModel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnListModel")
            .field("resolve_address", &self.resolve_address)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<S> ConnListModel<S>
where
    S: RowFetcher + ConnIdRangeSource,
{
    /// Creates a model showing an empty window.
    ///
    /// Call [`initialize`](Self::initialize) to load the current bounds.
    #[must_use]
    pub fn new(deps: ConnListDeps<S>, resolve_address: bool) -> Self {
        Self {
            projection: WindowProjection::new(deps.source),
            host_names: deps.host_names,
            app_names: deps.app_names,
            resolve_address,
            pending: Vec::new(),
        }
    }

    /// Performs the first range update.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Range`] if the bounds cannot be read.
    pub fn initialize(&mut self) -> Result<EditPlan, ModelError> {
        let plan = self.update_conn_id_range()?;
        info!(range = %self.range(), "connection list initialized");
        Ok(plan)
    }

    /// Re-reads the log bounds and applies any change to the window.
    ///
    /// Notifications are queued for [`take_events`](Self::take_events). An
    /// unchanged range leaves the model untouched; a range that became empty
    /// also forgets every known host name.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Range`] if the bounds cannot be read. The model
    /// is left unchanged in that case.
    pub fn update_conn_id_range(&mut self) -> Result<EditPlan, ModelError> {
        let new = self
            .projection
            .fetcher()
            .conn_id_range()
            .map_err(|err| ModelError::Range(Box::new(err)))?;

        if new == self.projection.range() {
            return Ok(EditPlan::single(StructuralEdit::NoChange));
        }

        if new.is_empty() {
            debug!("connection log emptied, clearing host names");
            self.host_names.clear();
        }

        Ok(self.projection.on_range_observed(new, &mut self.pending))
    }

    /// Drops the cached row and queues a content change for every row.
    ///
    /// Used when application or host names changed without the log itself
    /// changing.
    pub fn refresh(&mut self) {
        self.projection.invalidate_cache();

        let row_count = self.row_count();
        if row_count > 0 {
            self.pending.push(ProjectionEvent::DataChanged {
                first_row: 0,
                last_row: row_count - 1,
            });
        }
    }

    /// Whether address columns show host names.
    #[must_use]
    pub const fn resolve_address(&self) -> bool {
        self.resolve_address
    }

    /// Switches host name display, refreshing only on an actual change.
    pub fn set_resolve_address(&mut self, resolve_address: bool) {
        if self.resolve_address == resolve_address {
            return;
        }
        self.resolve_address = resolve_address;
        self.refresh();
    }

    /// The projected identifier range.
    #[must_use]
    pub const fn range(&self) -> IdentifierRange {
        self.projection.range()
    }

    /// Number of rows in the table.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.projection.row_count()
    }

    /// Connection identifier shown at `row`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::OutOfRange`] unless `row < row_count()`.
    pub fn conn_id_for_row(&self, row: usize) -> Result<i64, ModelError> {
        Ok(self.projection.identifier_for_row(row)?)
    }

    /// Decoded connection at `row`.
    ///
    /// # Errors
    ///
    /// Returns the projection error for an invalid row or a failed fetch.
    pub fn row(&mut self, row: usize) -> Result<&ConnRow, ModelError> {
        Ok(self.projection.row(row)?)
    }

    /// Text of one cell, or `None` where the cell is blank.
    ///
    /// Rows whose record could not be materialized render blank in every
    /// column.
    ///
    /// # Errors
    ///
    /// Returns the projection error for an invalid row or a failed fetch.
    pub fn cell_text(
        &mut self,
        row: usize,
        column: Column,
        role: CellRole,
    ) -> Result<Option<String>, ModelError> {
        let cx = FormatContext {
            resolve_address: self.resolve_address,
            host_names: &*self.host_names,
            app_names: &*self.app_names,
        };
        let text = self
            .projection
            .row(row)?
            .info()
            .and_then(|info| column.text(info, &cx, role));
        Ok(text)
    }

    /// Drains the queued notifications in emission order.
    pub fn take_events(&mut self) -> Vec<ProjectionEvent> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::columns::{HostNameCache, PathAppNames};
    use crate::row::{ConnAddrs, ConnReason};
    use crate::store::{ConnStore, NewConn};

    fn model_with_hosts(
        store: &Arc<ConnStore>,
        hosts: Arc<HostNameCache>,
    ) -> ConnListModel<ConnStore> {
        let deps = ConnListDeps {
            source: Arc::clone(store),
            host_names: hosts,
            app_names: Arc::new(PathAppNames),
        };
        ConnListModel::new(deps, false)
    }

    fn append(store: &ConnStore, app_path: &str, remote: Ipv4Addr) -> i64 {
        let app_id = store.add_app(app_path).expect("add app");
        store
            .append_conn(&NewConn {
                app_id,
                conn_time: 1_700_000_000,
                pid: 42,
                reason: ConnReason::AppGroup,
                blocked: true,
                inherited: false,
                inbound: false,
                ip_proto: 6,
                local_port: 50_000,
                remote_port: 443,
                addrs: ConnAddrs::V4 {
                    local: Ipv4Addr::new(192, 168, 0, 10),
                    remote,
                },
            })
            .expect("append")
    }

    #[test]
    fn test_initialize_on_empty_log() {
        let store = Arc::new(ConnStore::in_memory().expect("store"));
        let mut model = model_with_hosts(&store, Arc::new(HostNameCache::new()));

        let plan = model.initialize().expect("initialize");

        assert!(plan.is_no_change());
        assert_eq!(model.row_count(), 0);
        assert!(model.take_events().is_empty());
    }

    #[test]
    fn test_append_then_prune_queues_edits() {
        let store = Arc::new(ConnStore::in_memory().expect("store"));
        let remote = Ipv4Addr::new(1, 1, 1, 1);
        let first = append(&store, "/usr/bin/curl", remote);
        append(&store, "/usr/bin/curl", remote);

        let mut model = model_with_hosts(&store, Arc::new(HostNameCache::new()));
        model.initialize().expect("initialize");
        assert_eq!(model.take_events(), vec![ProjectionEvent::Reset]);
        assert_eq!(model.row_count(), 2);

        append(&store, "/usr/bin/wget", remote);
        model.update_conn_id_range().expect("update");
        assert_eq!(
            model.take_events(),
            vec![ProjectionEvent::RowsInserted { start: 2, count: 1 }]
        );

        store.prune_before(first + 1).expect("prune");
        model.update_conn_id_range().expect("update");
        assert_eq!(
            model.take_events(),
            vec![ProjectionEvent::RowsRemoved { start: 0, count: 1 }]
        );
        assert_eq!(model.row_count(), 2);
        assert_eq!(model.conn_id_for_row(0).expect("row 0"), first + 1);
    }

    #[test]
    fn test_unchanged_range_is_no_change() {
        let store = Arc::new(ConnStore::in_memory().expect("store"));
        append(&store, "/usr/bin/curl", Ipv4Addr::LOCALHOST);
        let mut model = model_with_hosts(&store, Arc::new(HostNameCache::new()));
        model.initialize().expect("initialize");
        model.take_events();

        let plan = model.update_conn_id_range().expect("update");

        assert!(plan.is_no_change());
        assert!(model.take_events().is_empty());
    }

    #[test]
    fn test_cell_text_renders_columns() {
        let store = Arc::new(ConnStore::in_memory().expect("store"));
        append(&store, "/usr/bin/curl", Ipv4Addr::new(93, 184, 216, 34));
        let hosts = Arc::new(HostNameCache::new());
        hosts.insert("93.184.216.34", "example.com");
        let mut model = model_with_hosts(&store, hosts);
        model.initialize().expect("initialize");

        let text = |model: &mut ConnListModel<ConnStore>, column| {
            model
                .cell_text(0, column, CellRole::Display)
                .expect("cell")
        };

        assert_eq!(text(&mut model, Column::Program).as_deref(), Some("curl"));
        assert_eq!(text(&mut model, Column::ProcessId).as_deref(), Some("42"));
        assert_eq!(text(&mut model, Column::Protocol).as_deref(), Some("TCP"));
        assert_eq!(
            text(&mut model, Column::RemoteAddress).as_deref(),
            Some("93.184.216.34:443")
        );

        model.set_resolve_address(true);
        assert_eq!(
            model.take_events().last(),
            Some(&ProjectionEvent::DataChanged {
                first_row: 0,
                last_row: 0
            })
        );
        assert_eq!(
            text(&mut model, Column::RemoteAddress).as_deref(),
            Some("example.com:443")
        );
    }

    #[test]
    fn test_set_resolve_address_same_value_is_silent() {
        let store = Arc::new(ConnStore::in_memory().expect("store"));
        append(&store, "/usr/bin/curl", Ipv4Addr::LOCALHOST);
        let mut model = model_with_hosts(&store, Arc::new(HostNameCache::new()));
        model.initialize().expect("initialize");
        model.take_events();

        model.set_resolve_address(false);

        assert!(!model.resolve_address());
        assert!(model.take_events().is_empty());
    }

    #[test]
    fn test_refresh_on_empty_model_queues_nothing() {
        let store = Arc::new(ConnStore::in_memory().expect("store"));
        let mut model = model_with_hosts(&store, Arc::new(HostNameCache::new()));

        model.refresh();

        assert!(model.take_events().is_empty());
    }

    #[test]
    fn test_null_row_renders_blank() {
        let store = Arc::new(ConnStore::in_memory().expect("store"));
        // Connection whose application row does not exist.
        store
            .append_conn(&NewConn {
                app_id: 99,
                conn_time: 0,
                pid: 1,
                reason: ConnReason::IpInet,
                blocked: false,
                inherited: false,
                inbound: true,
                ip_proto: 17,
                local_port: 1,
                remote_port: 2,
                addrs: ConnAddrs::V4 {
                    local: Ipv4Addr::LOCALHOST,
                    remote: Ipv4Addr::LOCALHOST,
                },
            })
            .expect("append");
        let mut model = model_with_hosts(&store, Arc::new(HostNameCache::new()));
        model.initialize().expect("initialize");

        assert!(model.row(0).expect("row").is_null());
        for column in Column::ALL {
            assert_eq!(
                model.cell_text(0, column, CellRole::Display).expect("cell"),
                None
            );
        }
    }

    #[test]
    fn test_clear_forgets_host_names() {
        let store = Arc::new(ConnStore::in_memory().expect("store"));
        append(&store, "/usr/bin/curl", Ipv4Addr::LOCALHOST);
        let hosts = Arc::new(HostNameCache::new());
        hosts.insert("127.0.0.1", "localhost");
        let mut model = model_with_hosts(&store, Arc::clone(&hosts));
        model.initialize().expect("initialize");

        store.clear().expect("clear");
        model.update_conn_id_range().expect("update");

        assert!(hosts.is_empty());
        assert_eq!(model.row_count(), 0);
        assert_eq!(model.take_events().last(), Some(&ProjectionEvent::Reset));
    }

    #[test]
    fn test_out_of_range_row() {
        let store = Arc::new(ConnStore::in_memory().expect("store"));
        let mut model = model_with_hosts(&store, Arc::new(HostNameCache::new()));
        model.initialize().expect("initialize");

        let err = model.cell_text(0, Column::Program, CellRole::Display);
        assert!(matches!(
            err,
            Err(ModelError::Projection(ProjectionError::OutOfRange { .. }))
        ));
    }
}
