//! Single-entry memoization of the last decoded row.

use crate::row::ConnRow;

static NULL_ROW: ConnRow = ConnRow::Null;

/// Cache of the most recently read row.
///
/// An entry is keyed by both its row position and the identifier that
/// position mapped to when it was decoded, so an entry that outlived a
/// window change is never served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RowCache {
    /// Nothing cached.
    #[default]
    Empty,
    /// The decode of `row`, which mapped to `conn_id`.
    Valid {
        /// Row position.
        row: usize,
        /// Identifier the row mapped to.
        conn_id: i64,
        /// Decoded value, possibly the null row.
        value: ConnRow,
    },
}

impl RowCache {
    /// Returns true if nothing is cached.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns true if the cache holds `row` decoded under `conn_id`.
    #[must_use]
    pub fn holds(&self, row: usize, conn_id: i64) -> bool {
        matches!(
            self,
            Self::Valid { row: r, conn_id: id, .. } if *r == row && *id == conn_id
        )
    }

    /// The cached value, or the null row when empty.
    #[must_use]
    pub fn current(&self) -> &ConnRow {
        match self {
            Self::Empty => &NULL_ROW,
            Self::Valid { value, .. } => value,
        }
    }

    /// Replaces the cached entry.
    pub fn store(&mut self, row: usize, conn_id: i64, value: ConnRow) {
        *self = Self::Valid {
            row,
            conn_id,
            value,
        };
    }

    /// Drops the cached entry.
    pub fn invalidate(&mut self) {
        *self = Self::Empty;
    }
}
