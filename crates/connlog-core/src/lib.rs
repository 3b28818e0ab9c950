//! # connlog-core
//!
//! Presents an append-mostly connection log as a finite, scrollable table
//! without loading the whole log into memory.
//!
//! The log is keyed by a monotonically increasing connection identifier. At
//! any point in time only the inclusive `[id_min, id_max]` range of that log
//! is known; row `i` of the table is simply identifier `id_min + i`.
//!
//! ```text
//! range changed --> range::classify --> WindowProjection --> notifications
//!                                           |
//!                        row(i) --> RowCache --> RowFetcher + row::decode
//! ```
//!
//! ## Components
//!
//! - [`range`]: classifies a change of the identifier range into the
//!   structural edits a view must apply (reset, trim from the front, grow at
//!   the back).
//! - [`projection`]: owns the current range, applies edits, and lazily decodes
//!   rows through a single-entry cache.
//! - [`row`]: the raw record returned by storage and its decoded form.
//! - [`store`]: the `SQLite` connection log used as fetcher and range source.
//! - [`columns`]: per-column text formatting of decoded rows.
//! - [`model`]: the connection list model wiring the above to injected
//!   collaborators.
//! - [`config`]: TOML configuration.
//!
//! ## Example
//!
//! ```rust
//! use connlog_core::projection::{ProjectionEvent, WindowProjection};
//! use connlog_core::range::IdentifierRange;
//! use connlog_core::store::ConnStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ConnStore::in_memory()?;
//! let mut projection = WindowProjection::new(&store);
//!
//! let mut events = Vec::new();
//! projection.on_range_observed(IdentifierRange::new(5, 10), &mut events);
//! assert_eq!(events, vec![ProjectionEvent::Reset]);
//! assert_eq!(projection.row_count(), 6);
//! assert_eq!(projection.identifier_for_row(0)?, 5);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]

pub mod columns;
pub mod config;
pub mod model;
pub mod projection;
pub mod range;
pub mod row;
pub mod store;

pub use columns::{CellRole, Column};
pub use config::{ConfigError, ConnLogConfig};
pub use model::{ConnListDeps, ConnListModel, ModelError};
pub use projection::{ProjectionError, ProjectionEvent, RowFetcher, WindowProjection};
pub use range::{ConnIdRangeSource, EditPlan, IdentifierRange, StructuralEdit, classify};
pub use row::{ConnAddrs, ConnInfo, ConnReason, ConnRow, RawConnRecord};
pub use store::{ConnStore, NewConn, StoreError};
