//! Read-Copy-Update Grace Periods
//!
//! Lets readers traverse shared data without taking a lock, while writers
//! replace it and wait until no reader can still see the old copy.
//!
//! # Design
//! - Two reader counters indexed by the low bit of a phase word
//! - A reader bumps the counter of the current phase for the duration of
//!   its critical section
//! - `synchronize` flips the phase and waits for the old counter to drain,
//!   then flips and drains again; after both flips every reader that began
//!   before the call has finished
//!
//! Writers must be serialized by the caller. All counter traffic is
//! `SeqCst` so that a reader's increment and its subsequent pointer load
//! are totally ordered against the writer's pointer swap and phase flip.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Grace-period tracker for one RCU-protected structure.
#[derive(Debug, Default)]
pub struct GracePeriod {
    phase: AtomicUsize,
    readers: [AtomicUsize; 2],
}

impl GracePeriod {
    pub const fn new() -> Self {
        Self {
            phase: AtomicUsize::new(0),
            readers: [AtomicUsize::new(0), AtomicUsize::new(0)],
        }
    }

    /// Enter a read-side critical section.
    ///
    /// Never blocks. Pointers loaded while the guard lives stay valid until
    /// it is dropped.
    #[inline]
    pub fn read(&self) -> ReadGuard<'_> {
        let idx = self.phase.load(Ordering::SeqCst) & 1;
        self.readers[idx].fetch_add(1, Ordering::SeqCst);
        ReadGuard { gp: self, idx }
    }

    /// Wait until every read-side critical section that started before this
    /// call has ended.
    pub fn synchronize(&self) {
        for _ in 0..2 {
            let old = self.phase.fetch_add(1, Ordering::SeqCst) & 1;
            while self.readers[old].load(Ordering::SeqCst) != 0 {
                core::hint::spin_loop();
            }
        }
    }

    /// Readers currently inside a critical section.
    pub fn active_readers(&self) -> usize {
        self.readers[0].load(Ordering::SeqCst) + self.readers[1].load(Ordering::SeqCst)
    }
}

/// Read-side critical section. Ends on drop.
#[derive(Debug)]
pub struct ReadGuard<'a> {
    gp: &'a GracePeriod,
    idx: usize,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.gp.readers[self.idx].fetch_sub(1, Ordering::SeqCst);
    }
}
