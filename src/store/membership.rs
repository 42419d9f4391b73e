//! Big segment membership
//!
//! Resolves the include/exclude reference sets stored for one user into a
//! lookup by segment reference.

use std::collections::HashMap;

/// Membership of one user across big segments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentMembership {
    refs: HashMap<String, bool>,
}

impl SegmentMembership {
    /// Combine included and excluded segment refs. A ref present in both
    /// sets counts as excluded.
    pub fn from_segment_refs<I, E>(included: I, excluded: E) -> Self
    where
        I: IntoIterator<Item = String>,
        E: IntoIterator<Item = String>,
    {
        let mut refs: HashMap<String, bool> =
            included.into_iter().map(|r| (r, true)).collect();
        for r in excluded {
            refs.insert(r, false);
        }
        Self { refs }
    }

    /// `Some(true)` if included, `Some(false)` if excluded, `None` if the
    /// user is not mentioned by that segment
    pub fn check(&self, segment_ref: &str) -> Option<bool> {
        self.refs.get(segment_ref).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }
}
