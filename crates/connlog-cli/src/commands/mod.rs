//! Subcommand implementations.

pub mod log;
pub mod view;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use connlog_core::columns::{HostNameCache, PathAppNames};
use connlog_core::{ConnListDeps, ConnListModel, ConnLogConfig, ConnStore};

/// Opens the store for reading, honoring `store.read_only`.
fn open_for_reading(config: &ConnLogConfig) -> Result<ConnStore> {
    let path = &config.store.path;
    let store = if config.store.read_only {
        ConnStore::open_read_only(path)
    } else {
        ConnStore::open(path)
    };
    store.with_context(|| format!("failed to open connection log {}", path.display()))
}

/// Opens the store for writing.
fn open_for_writing(config: &ConnLogConfig) -> Result<ConnStore> {
    if config.store.read_only {
        bail!("connection log is configured read-only");
    }
    let path = &config.store.path;
    ConnStore::open(path)
        .with_context(|| format!("failed to open connection log {}", path.display()))
}

/// Builds an initialized connection list model over the configured store.
fn open_model(config: &ConnLogConfig, resolve_address: bool) -> Result<ConnListModel<ConnStore>> {
    let host_names: HostNameCache = config
        .view
        .host_names
        .iter()
        .map(|(address, name)| (address.clone(), name.clone()))
        .collect();

    let deps = ConnListDeps {
        source: Arc::new(open_for_reading(config)?),
        host_names: Arc::new(host_names),
        app_names: Arc::new(PathAppNames),
    };
    let mut model = ConnListModel::new(deps, resolve_address);
    model
        .initialize()
        .context("failed to read connection log bounds")?;
    Ok(model)
}
