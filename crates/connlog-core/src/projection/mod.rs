//! Incremental windowed projection of the connection log.
//!
//! A [`WindowProjection`] presents the live identifier range of the log as a
//! table of `row_count()` rows, where row `i` is identifier `id_min + i`.
//! Range changes are classified by [`crate::range::classify`] and applied as
//! structural edits, each reported to a [`ProjectionSink`] as a
//! [`ProjectionEvent`]. Rows are decoded lazily through a single-entry
//! [`RowCache`].
//!
//! # Cache discipline
//!
//! Every bound-changing edit drops the cached row before its notification is
//! emitted: a decode keyed by row position is never valid across a trim or a
//! grow because the identifier a position maps to shifts.
//!
//! # Threading
//!
//! The projection is exclusively owned by one consumer and performs no
//! locking. A cache miss issues exactly one synchronous
//! [`RowFetcher::fetch`].

mod cache;


use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

pub use cache::RowCache;

use crate::range::{EditPlan, IdentifierRange, StructuralEdit, classify};
use crate::row::{self, ConnRow, RawConnRecord};

/// Errors returned by [`WindowProjection`].
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The row index is outside `[0, row_count)`.
    #[error("row {row} out of range (row count {row_count})")]
    OutOfRange {
        /// Requested row.
        row: usize,
        /// Row count at the time of the request.
        row_count: usize,
    },

    /// The storage collaborator failed to fetch a record.
    #[error("failed to fetch connection {conn_id}")]
    FetchFailed {
        /// Identifier being fetched.
        conn_id: i64,
        /// The collaborator's error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Reads single connection records from storage.
pub trait RowFetcher {
    /// Storage-level error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches the record with identifier `conn_id`.
    ///
    /// Returns `Ok(None)` when the identifier is within the log's bounds but
    /// no record can be materialized for it.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the read fails.
    fn fetch(&self, conn_id: i64) -> Result<Option<RawConnRecord>, Self::Error>;
}

impl<T: RowFetcher + ?Sized> RowFetcher for &T {
    type Error = T::Error;

    fn fetch(&self, conn_id: i64) -> Result<Option<RawConnRecord>, Self::Error> {
        (**self).fetch(conn_id)
    }
}

impl<T: RowFetcher + ?Sized> RowFetcher for Arc<T> {
    type Error = T::Error;

    fn fetch(&self, conn_id: i64) -> Result<Option<RawConnRecord>, Self::Error> {
        (**self).fetch(conn_id)
    }
}

/// Notification describing how previously held row positions map onto the
/// current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionEvent {
    /// No previously held row position is valid any more.
    Reset,
    /// `count` rows starting at `start` were removed.
    RowsRemoved {
        /// First removed row.
        start: usize,
        /// Number of removed rows.
        count: usize,
    },
    /// `count` rows starting at `start` were inserted.
    RowsInserted {
        /// First inserted row.
        start: usize,
        /// Number of inserted rows.
        count: usize,
    },
    /// Content of rows `[first_row, last_row]` changed; positions did not.
    DataChanged {
        /// First changed row.
        first_row: usize,
        /// Last changed row.
        last_row: usize,
    },
}

/// Receiver of projection notifications.
pub trait ProjectionSink {
    /// Delivers one notification.
    fn notify(&mut self, event: ProjectionEvent);
}

impl ProjectionSink for Vec<ProjectionEvent> {
    fn notify(&mut self, event: ProjectionEvent) {
        self.push(event);
    }
}

/// Discards every notification.
impl ProjectionSink for () {
    fn notify(&mut self, _event: ProjectionEvent) {}
}

/// Windowed view over the connection log.
#[derive(Debug)]
pub struct WindowProjection<F> {
    fetcher: F,
    range: IdentifierRange,
    cache: RowCache,
}

impl<F: RowFetcher> WindowProjection<F> {
    /// Creates a projection over an empty log.
    #[must_use]
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            range: IdentifierRange::EMPTY,
            cache: RowCache::Empty,
        }
    }

    /// The currently projected identifier range.
    #[must_use]
    pub const fn range(&self) -> IdentifierRange {
        self.range
    }

    /// The row cache.
    #[must_use]
    pub const fn cache(&self) -> &RowCache {
        &self.cache
    }

    /// The fetcher used for cache misses.
    #[must_use]
    pub const fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Number of rows in the current window.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.range.row_count()
    }

    /// Applies a newly observed range.
    ///
    /// Each edit of the resulting plan updates the stored range, drops the
    /// cached row and then emits exactly one notification to `sink`. Returns
    /// the plan that was applied.
    pub fn on_range_observed(
        &mut self,
        new: IdentifierRange,
        sink: &mut impl ProjectionSink,
    ) -> EditPlan {
        let old = self.range;
        let plan = classify(old, new);
        if plan.is_no_change() {
            return plan;
        }

        debug!(%old, %new, ?plan, "identifier range changed");
        for edit in plan.edits() {
            self.apply_edit(edit, sink);
        }
        plan
    }

    fn apply_edit(&mut self, edit: StructuralEdit, sink: &mut impl ProjectionSink) {
        self.range = self.range.apply(edit);
        self.cache.invalidate();

        let event = match edit {
            StructuralEdit::NoChange => return,
            StructuralEdit::Reset(_) => ProjectionEvent::Reset,
            StructuralEdit::Trim { removed, .. } => ProjectionEvent::RowsRemoved {
                start: 0,
                count: to_rows(removed),
            },
            StructuralEdit::Grow {
                insert_at_row,
                added,
                ..
            } => ProjectionEvent::RowsInserted {
                start: to_rows(insert_at_row),
                count: to_rows(added),
            },
        };

        debug!(range = %self.range, ?event, "applied structural edit");
        sink.notify(event);
    }

    /// Drops the cached row without changing bounds.
    ///
    /// Used when row content, not the range, may have changed upstream.
    pub fn invalidate_cache(&mut self) {
        self.cache.invalidate();
    }

    /// Maps a row position to its connection identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::OutOfRange`] unless `row < row_count()`.
    pub fn identifier_for_row(&self, row: usize) -> Result<i64, ProjectionError> {
        let row_count = self.row_count();
        let out_of_range = ProjectionError::OutOfRange { row, row_count };
        if row >= row_count {
            return Err(out_of_range);
        }
        i64::try_from(row)
            .ok()
            .and_then(|offset| self.range.id_min.checked_add(offset))
            .ok_or(out_of_range)
    }

    /// Returns the decoded row at `row`.
    ///
    /// A cache hit is served without touching storage. On a miss the record
    /// is fetched and decoded; a record that cannot be materialized yields
    /// [`ConnRow::Null`], which is cached like any other value.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::OutOfRange`] for an invalid row and
    /// [`ProjectionError::FetchFailed`] if storage fails. A failed fetch
    /// caches nothing.
    pub fn row(&mut self, row: usize) -> Result<&ConnRow, ProjectionError> {
        let conn_id = self.identifier_for_row(row)?;

        if self.cache.holds(row, conn_id) {
            trace!(row, conn_id, "row cache hit");
        } else {
            trace!(row, conn_id, "row cache miss");
            let value = self.load(conn_id)?;
            self.cache.store(row, conn_id, value);
        }

        Ok(self.cache.current())
    }

    fn load(&self, conn_id: i64) -> Result<ConnRow, ProjectionError> {
        match self.fetcher.fetch(conn_id) {
            Ok(Some(raw)) => Ok(row::decode(&raw)),
            Ok(None) => {
                debug!(conn_id, "connection record absent");
                Ok(ConnRow::Null)
            },
            Err(err) => {
                warn!(conn_id, error = %err, "failed to fetch connection record");
                Err(ProjectionError::FetchFailed {
                    conn_id,
                    source: Box::new(err),
                })
            },
        }
    }
}

fn to_rows(count: u64) -> usize {
    usize::try_from(count).unwrap_or(usize::MAX)
}
