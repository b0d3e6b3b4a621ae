//! Immutable sets of source identifiers fixed at process start.

use std::collections::BTreeSet;

/// Set of permitted source identifiers. An empty list permits everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    ids: BTreeSet<i64>,
}

impl AllowList {
    /// List that permits every source.
    #[must_use]
    pub const fn open() -> Self {
        Self {
            ids: BTreeSet::new(),
        }
    }

    /// Whether `source_id` passes the gate.
    #[must_use]
    pub fn permits(&self, source_id: i64) -> bool {
        self.ids.is_empty() || self.ids.contains(&source_id)
    }

    /// Whether the list is unrestricted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of explicitly listed sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

impl FromIterator<i64> for AllowList {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
