#![forbid(unsafe_code)]

//! Monotonic id generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Issues strictly increasing ids starting at zero.
///
/// Each generator is independent; [`get_id`] draws from one process-wide
/// instance so ids handed out across forms never collide.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a generator whose first id is `0`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Take the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

static GLOBAL_IDS: IdGenerator = IdGenerator::new();

/// Take the next process-wide id.
pub fn get_id() -> u64 {
    GLOBAL_IDS.next_id()
}
