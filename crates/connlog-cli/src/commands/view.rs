//! Read-only commands: `range`, `list` and `watch`.

use std::io::{self, Write};

use anyhow::{Context, Result};
use connlog_core::{CellRole, Column, ConnListModel, ConnLogConfig, ConnStore, ProjectionEvent};
use tracing::info;

use super::open_model;

/// Prints `id_min id_max rows`.
pub fn range(config: &ConnLogConfig) -> Result<()> {
    let model = open_model(config, false)?;
    let range = model.range();
    println!("{} {} {}", range.id_min, range.id_max, model.row_count());
    Ok(())
}

/// Prints a header and up to `limit` rows starting at `offset`.
pub fn list(
    config: &ConnLogConfig,
    offset: usize,
    limit: Option<usize>,
    resolve: bool,
) -> Result<()> {
    let mut model = open_model(config, resolve || config.view.resolve_address)?;
    let end = limit.map_or(model.row_count(), |limit| {
        offset.saturating_add(limit).min(model.row_count())
    });

    let mut out = io::stdout().lock();
    write_header(&mut out)?;
    for row in offset..end {
        write_row(&mut out, &mut model, row)?;
    }
    out.flush()?;
    Ok(())
}

/// Polls the log bounds and prints every notification.
///
/// Runs until `iterations` polls have been made, or forever.
pub fn watch(config: &ConnLogConfig, iterations: Option<u64>) -> Result<()> {
    let mut model = open_model(config, config.view.resolve_address)?;
    let interval = config.view.poll_interval();
    info!(range = %model.range(), ?interval, "watching connection log");

    let mut out = io::stdout().lock();
    writeln!(out, "window {} ({} rows)", model.range(), model.row_count())?;
    out.flush()?;

    let mut polls = 0_u64;
    while iterations.is_none_or(|limit| polls < limit) {
        if polls > 0 {
            std::thread::sleep(interval);
        }
        polls += 1;

        model
            .update_conn_id_range()
            .context("failed to read connection log bounds")?;
        for event in model.take_events() {
            write_event(&mut out, &mut model, event)?;
        }
        out.flush()?;
    }
    Ok(())
}

fn write_event(
    out: &mut impl Write,
    model: &mut ConnListModel<ConnStore>,
    event: ProjectionEvent,
) -> Result<()> {
    match event {
        ProjectionEvent::Reset => {
            writeln!(out, "reset {} ({} rows)", model.range(), model.row_count())?;
        },
        ProjectionEvent::RowsRemoved { start, count } => {
            writeln!(out, "removed {count} rows at {start}")?;
        },
        ProjectionEvent::RowsInserted { start, count } => {
            writeln!(out, "inserted {count} rows at {start}")?;
            let end = start.saturating_add(count).min(model.row_count());
            for row in start..end {
                write_row(out, model, row)?;
            }
        },
        ProjectionEvent::DataChanged {
            first_row,
            last_row,
        } => {
            writeln!(out, "changed rows {first_row}..={last_row}")?;
        },
    }
    Ok(())
}

fn write_header(out: &mut impl Write) -> Result<()> {
    let header: Vec<&str> = Column::ALL
        .iter()
        .map(|column| column.header_text().unwrap_or(column.header_tooltip()))
        .collect();
    writeln!(out, "Id\t{}", header.join("\t"))?;
    Ok(())
}

fn write_row(
    out: &mut impl Write,
    model: &mut ConnListModel<ConnStore>,
    row: usize,
) -> Result<()> {
    let conn_id = model.conn_id_for_row(row)?;
    let mut cells = Vec::with_capacity(Column::COUNT);
    for column in Column::ALL {
        // Icon columns carry their text only as a tooltip.
        let mut text = None;
        for role in [CellRole::Display, CellRole::ToolTip] {
            text = model
                .cell_text(row, column, role)
                .with_context(|| format!("failed to render connection {conn_id}"))?;
            if text.is_some() {
                break;
            }
        }
        cells.push(text.unwrap_or_default());
    }
    writeln!(out, "{conn_id}\t{}", cells.join("\t"))?;
    Ok(())
}
