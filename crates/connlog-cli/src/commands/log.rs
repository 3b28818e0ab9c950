//! Writing commands: `seed` and `prune`.

use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::{Context, Result};
use chrono::Utc;
use connlog_core::{ConnAddrs, ConnLogConfig, ConnReason, NewConn};
use tracing::info;

use super::open_for_writing;

const SEED_APPS: [&str; 4] = [
    "/usr/bin/curl",
    "/usr/lib/firefox/firefox",
    "/usr/sbin/sshd",
    r"C:\Windows\System32\svchost.exe",
];

/// Appends `count` synthetic connections.
pub fn seed(config: &ConnLogConfig, count: u32, ipv6: bool) -> Result<()> {
    let store = open_for_writing(config)?;
    let app_ids = SEED_APPS
        .iter()
        .map(|path| store.add_app(path))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to register seed applications")?;

    let now = Utc::now().timestamp();
    let mut last = None;
    for i in 0..count {
        let new = synthetic_conn(&app_ids, now, i, ipv6);
        last = Some(
            store
                .append_conn(&new)
                .context("failed to append connection")?,
        );
    }

    info!(count, ?last, "seeded connection log");
    match last {
        Some(conn_id) => println!("appended {count} connections, last id {conn_id}"),
        None => println!("appended 0 connections"),
    }
    Ok(())
}

/// Deletes every connection with an identifier below `before`.
pub fn prune(config: &ConnLogConfig, before: i64) -> Result<()> {
    let store = open_for_writing(config)?;
    let removed = store
        .prune_before(before)
        .context("failed to prune connection log")?;
    println!("removed {removed} connections");
    Ok(())
}

fn synthetic_conn(app_ids: &[i64], now: i64, i: u32, ipv6: bool) -> NewConn {
    let octets = i.to_be_bytes();
    let index = usize::try_from(i).unwrap_or_default();
    let addrs = if ipv6 {
        let suffix = u16::try_from(i % 0xffff).unwrap_or_default() + 1;
        ConnAddrs::V6 {
            local: Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
            remote: Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, suffix),
        }
    } else {
        ConnAddrs::V4 {
            local: Ipv4Addr::new(192, 168, 1, 10),
            remote: Ipv4Addr::new(203, 0, octets[2], octets[3]),
        }
    };

    NewConn {
        app_id: app_ids[index % app_ids.len()],
        conn_time: now + i64::from(i),
        pid: 1000 + i % 500,
        reason: ConnReason::from_code(i64::from(i % 11) + 1),
        blocked: i % 3 == 0,
        inherited: i % 5 == 0,
        inbound: i % 4 == 0,
        ip_proto: if i % 2 == 0 { 6 } else { 17 },
        local_port: 40_000 + u16::try_from(i % 20_000).unwrap_or_default(),
        remote_port: [443, 80, 53, 22][index % 4],
        addrs,
    }
}
