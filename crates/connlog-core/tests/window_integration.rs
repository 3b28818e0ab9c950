//! End-to-end tests of the windowed connection list over an on-disk log.
//!
//! A writer appends, prunes and clears the log while a reader polls it
//! through its own read-only connection, mirroring how a viewer follows a
//! log owned by another process.
//!
//! ```text
//! writer ConnStore --(sqlite file)--> read-only ConnStore
//!                                          |
//!                                          v
//!                                    ConnListModel
//! ```

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;

use connlog_core::columns::{HostNameCache, PathAppNames};
use connlog_core::{
    CellRole, Column, ConnAddrs, ConnListDeps, ConnListModel, ConnReason, ConnStore, NewConn,
    ProjectionEvent,
};
use tempfile::TempDir;

fn conn(app_id: i64, conn_time: i64, addrs: ConnAddrs) -> NewConn {
    NewConn {
        app_id,
        conn_time,
        pid: 4321,
        reason: ConnReason::Rule,
        blocked: false,
        inherited: false,
        inbound: false,
        ip_proto: 6,
        local_port: 41_000,
        remote_port: 443,
        addrs,
    }
}

fn v4(remote: Ipv4Addr) -> ConnAddrs {
    ConnAddrs::V4 {
        local: Ipv4Addr::new(10, 1, 1, 5),
        remote,
    }
}

fn open_reader(path: &Path) -> ConnListModel<ConnStore> {
    let reader = ConnStore::open_read_only(path).expect("open read-only");
    let deps = ConnListDeps {
        source: Arc::new(reader),
        host_names: Arc::new(HostNameCache::new()),
        app_names: Arc::new(PathAppNames),
    };
    ConnListModel::new(deps, false)
}

#[test]
fn test_reader_follows_writer() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("conn.db");
    let writer = ConnStore::open(&path).expect("open writer");
    let firefox = writer.add_app("/usr/lib/firefox/firefox").expect("add app");

    let ids: Vec<i64> = (0..3)
        .map(|i| {
            writer
                .append_conn(&conn(firefox, 1_700_000_000 + i, v4(Ipv4Addr::new(1, 2, 3, 4))))
                .expect("append")
        })
        .collect();

    let mut model = open_reader(&path);
    model.initialize().expect("initialize");
    assert_eq!(model.take_events(), vec![ProjectionEvent::Reset]);
    assert_eq!(model.row_count(), 3);
    assert_eq!(
        model
            .cell_text(2, Column::Program, CellRole::Display)
            .expect("cell")
            .as_deref(),
        Some("firefox")
    );

    // Append two and prune one between polls: trim, then grow.
    for _ in 0..2 {
        writer
            .append_conn(&conn(firefox, 1_700_000_100, v4(Ipv4Addr::new(8, 8, 8, 8))))
            .expect("append");
    }
    writer.prune_before(ids[1]).expect("prune");

    model.update_conn_id_range().expect("update");
    assert_eq!(
        model.take_events(),
        vec![
            ProjectionEvent::RowsRemoved { start: 0, count: 1 },
            ProjectionEvent::RowsInserted { start: 2, count: 2 },
        ]
    );
    assert_eq!(model.row_count(), 4);
    assert_eq!(model.conn_id_for_row(0).expect("row 0"), ids[1]);
    assert_eq!(
        model
            .cell_text(3, Column::RemoteAddress, CellRole::Display)
            .expect("cell")
            .as_deref(),
        Some("8.8.8.8:443")
    );
}

#[test]
fn test_clear_and_refill_resets_window() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("conn.db");
    let writer = ConnStore::open(&path).expect("open writer");
    let app = writer.add_app("/usr/bin/ssh").expect("add app");
    writer
        .append_conn(&conn(app, 0, v4(Ipv4Addr::LOCALHOST)))
        .expect("append");

    let mut model = open_reader(&path);
    model.initialize().expect("initialize");
    model.take_events();

    writer.clear().expect("clear");
    model.update_conn_id_range().expect("update");
    assert_eq!(model.take_events(), vec![ProjectionEvent::Reset]);
    assert_eq!(model.row_count(), 0);

    let app = writer.add_app("/usr/bin/ssh").expect("add app");
    let local: Ipv6Addr = "::1".parse().expect("ipv6");
    let remote: Ipv6Addr = "2001:db8::7".parse().expect("ipv6");
    writer
        .append_conn(&conn(app, 0, ConnAddrs::V6 { local, remote }))
        .expect("append");

    model.update_conn_id_range().expect("update");
    assert_eq!(model.take_events(), vec![ProjectionEvent::Reset]);
    assert_eq!(model.row_count(), 1);
    assert_eq!(
        model
            .cell_text(0, Column::RemoteAddress, CellRole::Display)
            .expect("cell")
            .as_deref(),
        Some("[2001:db8::7]:443")
    );
}

#[test]
fn test_pruned_rows_are_not_served_from_cache() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("conn.db");
    let writer = ConnStore::open(&path).expect("open writer");
    let curl = writer.add_app("/usr/bin/curl").expect("add app");
    let wget = writer.add_app("/usr/bin/wget").expect("add app");
    let first = writer
        .append_conn(&conn(curl, 0, v4(Ipv4Addr::LOCALHOST)))
        .expect("append");
    writer
        .append_conn(&conn(wget, 0, v4(Ipv4Addr::LOCALHOST)))
        .expect("append");

    let mut model = open_reader(&path);
    model.initialize().expect("initialize");
    assert_eq!(
        model
            .cell_text(0, Column::Program, CellRole::Display)
            .expect("cell")
            .as_deref(),
        Some("curl")
    );

    writer.prune_before(first + 1).expect("prune");
    model.update_conn_id_range().expect("update");

    // Row 0 now maps to the next identifier.
    assert_eq!(
        model
            .cell_text(0, Column::Program, CellRole::Display)
            .expect("cell")
            .as_deref(),
        Some("wget")
    );
}
