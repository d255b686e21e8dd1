//! Entity identifiers and the monotone ID allocator.
//!
//! Every entity kind (subject, belief, state, mind) is identified by a
//! `NonZeroU64` newtype so that `Option<Id>` is the same size as `Id` (the
//! niche optimization lets the compiler use 0 as the `None` discriminant).
//! A single [`AtomicIdAllocator`] issues all of them, so an ID is unique
//! across entity kinds as well as within one.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{DoxaResult, MindError};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Create from a raw `u64`. Returns `None` if `raw` is zero.
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map($name)
            }

            /// Get the underlying `u64` value.
            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Subject ID: the stable identity of a thing across versions and minds.
    Sid,
    "sid"
);
id_type!(
    /// Identifier of one versioned valuation of a subject.
    BeliefId,
    "belief"
);
id_type!(
    /// Identifier of a (tt, vt) snapshot in a mind.
    StateId,
    "state"
);
id_type!(
    /// Identifier of a timeline of states belonging to one observer.
    MindId,
    "mind"
);

/// Thread-safe allocator for all entity IDs.
///
/// Produces monotonically increasing IDs starting from 1. One allocator
/// serves every entity kind; after a load it is advanced past the maximum
/// observed ID so freshly created entities never collide with loaded ones.
#[derive(Debug)]
pub struct AtomicIdAllocator {
    next: AtomicU64,
}

impl AtomicIdAllocator {
    /// Create a new allocator that starts from ID 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next raw ID.
    ///
    /// Returns an error if the ID space is exhausted (after 2^64 - 1 allocations).
    fn next_raw(&self) -> DoxaResult<NonZeroU64> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        NonZeroU64::new(raw).ok_or_else(|| MindError::IdsExhausted.into())
    }

    /// Allocate a subject ID.
    pub fn next_sid(&self) -> DoxaResult<Sid> {
        self.next_raw().map(Sid)
    }

    /// Allocate a belief ID.
    pub fn next_belief(&self) -> DoxaResult<BeliefId> {
        self.next_raw().map(BeliefId)
    }

    /// Allocate a state ID.
    pub fn next_state(&self) -> DoxaResult<StateId> {
        self.next_raw().map(StateId)
    }

    /// Allocate a mind ID.
    pub fn next_mind(&self) -> DoxaResult<MindId> {
        self.next_raw().map(MindId)
    }

    /// Ensure the next allocation lands strictly above `observed`.
    ///
    /// Used after a load: the allocator resumes above the maximum `_id`
    /// present in the payload. Never moves the counter backwards.
    pub fn advance_past(&self, observed: u64) {
        self.next.fetch_max(observed.saturating_add(1), Ordering::Relaxed);
    }

    /// Return the next ID that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Reset the counter to 1. Only `World::reset` calls this.
    pub(crate) fn reset(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

impl Default for AtomicIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_niche_optimization() {
        // Option<Sid> should be the same size as Sid thanks to NonZeroU64.
        assert_eq!(
            std::mem::size_of::<Option<Sid>>(),
            std::mem::size_of::<Sid>()
        );
    }

    #[test]
    fn zero_is_none() {
        assert!(Sid::new(0).is_none());
        assert!(BeliefId::new(1).is_some());
        assert_eq!(StateId::new(42).unwrap().get(), 42);
    }

    #[test]
    fn allocator_is_monotone_across_kinds() {
        let alloc = AtomicIdAllocator::new();
        let a = alloc.next_sid().unwrap();
        let b = alloc.next_belief().unwrap();
        let c = alloc.next_state().unwrap();
        let d = alloc.next_mind().unwrap();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(c.get(), 3);
        assert_eq!(d.get(), 4);
    }

    #[test]
    fn advance_past_resumes_above_observed() {
        let alloc = AtomicIdAllocator::new();
        alloc.advance_past(100);
        assert_eq!(alloc.next_sid().unwrap().get(), 101);
    }

    #[test]
    fn advance_past_never_rewinds() {
        let alloc = AtomicIdAllocator::new();
        alloc.advance_past(50);
        alloc.advance_past(10);
        assert_eq!(alloc.peek_next(), 51);
    }

    #[test]
    fn display_prefixes() {
        assert_eq!(Sid::new(7).unwrap().to_string(), "sid:7");
        assert_eq!(BeliefId::new(7).unwrap().to_string(), "belief:7");
        assert_eq!(StateId::new(7).unwrap().to_string(), "state:7");
        assert_eq!(MindId::new(7).unwrap().to_string(), "mind:7");
    }
}
