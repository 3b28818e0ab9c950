//! Identifier range tracking.
//!
//! The connection log only ever exposes its inclusive `[id_min, id_max]`
//! bounds. Whenever those bounds change, [`classify`] turns the old/new pair
//! into the smallest [`EditPlan`] a view has to apply: nothing, a full reset,
//! or a trim from the front and/or a grow at the back.
//!
//! Classification is total: every pair of ranges yields a plan, and applying
//! the plan to the old range always produces the new one.

use std::fmt;

/// Inclusive bounds of the identifiers currently present in the log.
///
/// `id_max == 0` means "empty log" regardless of `id_min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IdentifierRange {
    /// Smallest live identifier.
    pub id_min: i64,
    /// Largest live identifier, `0` when the log is empty.
    pub id_max: i64,
}

impl IdentifierRange {
    /// The empty range `(0, 0)`.
    pub const EMPTY: Self = Self::new(0, 0);

    /// Creates a range from its bounds.
    #[must_use]
    pub const fn new(id_min: i64, id_max: i64) -> Self {
        Self { id_min, id_max }
    }

    /// Returns true if the range denotes an empty log.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.id_max <= 0
    }

    /// Number of identifiers in the range.
    ///
    /// A non-empty range whose minimum exceeds its maximum counts as zero.
    #[must_use]
    pub const fn len(&self) -> u64 {
        if self.is_empty() || self.id_min > self.id_max {
            return 0;
        }
        self.id_max.abs_diff(self.id_min).saturating_add(1)
    }

    /// Number of rows a view of this range shows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        usize::try_from(self.len()).unwrap_or(usize::MAX)
    }

    /// Returns the range obtained by applying `edit` to `self`.
    #[must_use]
    pub const fn apply(self, edit: StructuralEdit) -> Self {
        match edit {
            StructuralEdit::NoChange => self,
            StructuralEdit::Reset(range) => range,
            StructuralEdit::Trim { new_id_min, .. } => Self::new(new_id_min, self.id_max),
            StructuralEdit::Grow { new_id_max, .. } => Self::new(self.id_min, new_id_max),
        }
    }
}

impl fmt::Display for IdentifierRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.id_min, self.id_max)
    }
}

/// A description of how a view's row set changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralEdit {
    /// The visible window is unchanged.
    NoChange,

    /// Previously held row positions no longer map onto the new window.
    Reset(IdentifierRange),

    /// Rows `[0, removed - 1]` are dropped from the front.
    Trim {
        /// The new minimum identifier.
        new_id_min: i64,
        /// Number of rows removed.
        removed: u64,
    },

    /// Rows are appended starting at `insert_at_row`.
    Grow {
        /// The new maximum identifier.
        new_id_max: i64,
        /// Row position of the first inserted row.
        insert_at_row: u64,
        /// Number of rows inserted.
        added: u64,
    },
}

/// The edits produced by one range change, in application order.
///
/// Holds a single edit, or a trim followed by a grow when the window moved
/// at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditPlan {
    first: StructuralEdit,
    then: Option<StructuralEdit>,
}

impl EditPlan {
    /// A plan consisting of exactly one edit.
    #[must_use]
    pub const fn single(edit: StructuralEdit) -> Self {
        Self {
            first: edit,
            then: None,
        }
    }

    const fn pair(first: StructuralEdit, then: StructuralEdit) -> Self {
        Self {
            first,
            then: Some(then),
        }
    }

    /// The first edit of the plan.
    #[must_use]
    pub const fn first(&self) -> StructuralEdit {
        self.first
    }

    /// The second edit, present only for trim-then-grow.
    #[must_use]
    pub const fn then(&self) -> Option<StructuralEdit> {
        self.then
    }

    /// Returns true if nothing has to change.
    #[must_use]
    pub const fn is_no_change(&self) -> bool {
        matches!(self.first, StructuralEdit::NoChange)
    }

    /// Iterates the edits in the order they must be applied.
    pub fn edits(&self) -> impl Iterator<Item = StructuralEdit> {
        std::iter::once(self.first)
            .chain(self.then)
            .filter(|edit| *edit != StructuralEdit::NoChange)
    }
}

/// Classifies a change from `old` to `new` into an [`EditPlan`].
///
/// A reset is produced whenever the new window cannot be expressed as a trim
/// from the front plus a grow at the back of the old one: the new minimum
/// falls outside the old window, the maximum went backwards, or the old
/// window was empty.
#[must_use]
pub fn classify(old: IdentifierRange, new: IdentifierRange) -> EditPlan {
    if old == new {
        return EditPlan::single(StructuralEdit::NoChange);
    }

    let min_out = new.id_min < old.id_min || new.id_min >= old.id_max;
    let max_out = new.id_max < old.id_max || old.id_max == 0;
    if min_out || max_out {
        return EditPlan::single(StructuralEdit::Reset(new));
    }

    // Both differences are non-negative past the reset checks.
    let removed = new.id_min.abs_diff(old.id_min);
    let added = new.id_max.abs_diff(old.id_max);

    let trim = (removed > 0).then_some(StructuralEdit::Trim {
        new_id_min: new.id_min,
        removed,
    });
    let grow = (added > 0).then(|| StructuralEdit::Grow {
        new_id_max: new.id_max,
        insert_at_row: old.id_max.abs_diff(new.id_min) + 1,
        added,
    });

    match (trim, grow) {
        (Some(trim), Some(grow)) => EditPlan::pair(trim, grow),
        (Some(edit), None) | (None, Some(edit)) => EditPlan::single(edit),
        (None, None) => EditPlan::single(StructuralEdit::NoChange),
    }
}

/// Source of the current identifier range of the log.
pub trait ConnIdRangeSource {
    /// Error raised when the bounds cannot be read.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Queries the current bounds.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the bounds cannot be read.
    fn conn_id_range(&self) -> Result<IdentifierRange, Self::Error>;
}

impl<T: ConnIdRangeSource + ?Sized> ConnIdRangeSource for &T {
    type Error = T::Error;

    fn conn_id_range(&self) -> Result<IdentifierRange, Self::Error> {
        (**self).conn_id_range()
    }
}

impl<T: ConnIdRangeSource + ?Sized> ConnIdRangeSource for std::sync::Arc<T> {
    type Error = T::Error;

    fn conn_id_range(&self) -> Result<IdentifierRange, Self::Error> {
        (**self).conn_id_range()
    }
}
