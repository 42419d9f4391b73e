//! Optimistic concurrency
//!
//! Compare-and-swap emulated over WATCH/MULTI/EXEC: each attempt watches,
//! reads, compares and commits; a conflicting writer makes the commit abort
//! and the attempt is retried, up to a fixed bound.

use crate::error::{Result, StoreError};

/// Upper bound on attempts for one upsert
pub const MAX_ATTEMPTS: usize = 10;

/// Outcome of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The attempt reached a decision; stop retrying
    Done(T),

    /// A concurrent writer interfered; nothing was written
    Conflict,
}

/// Run `attempt` until it decides, at most `max_attempts` times.
///
/// Errors from an attempt are returned immediately and not retried.
/// Running out of attempts is `StoreError::ConcurrentModification`.
pub fn retry<T, F>(max_attempts: usize, mut attempt: F) -> Result<T>
where
    F: FnMut(usize) -> Result<Attempt<T>>,
{
    for number in 1..=max_attempts {
        match attempt(number)? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Conflict => continue,
        }
    }

    Err(StoreError::ConcurrentModification {
        attempts: max_attempts,
    })
}

/// Whether an item at `proposed` replaces whatever is stored.
///
/// Absent items are older than any version. Equal versions never replace.
pub fn supersedes(current: Option<u64>, proposed: u64) -> bool {
    match current {
        None => true,
        Some(current) => proposed > current,
    }
}
