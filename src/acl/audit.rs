//! Audit Log
//!
//! Fixed-capacity ring of access decisions.
//!
//! # Design
//! - The write position is a single atomic sequence counter; each writer
//!   claims a unique sequence number with `fetch_add` and owns the slot
//!   `seq % capacity` for that write
//! - Each slot is guarded by its own spinlock held only for the copy in
//! - A record never replaces a newer one in the same slot, so a writer that
//!   was preempted for a full lap cannot resurrect stale data
//!
//! Recording never fails and never waits on readers. Once the ring is full
//! the oldest records are overwritten.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::engine::{ObjectId, OpCode, SubjectId};

/// One access decision.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AuditRecord {
    /// Position in the global decision order.
    pub seq: u64,
    pub subject: SubjectId,
    pub op: OpCode,
    pub object: ObjectId,
    pub allowed: bool,
}

/// Lossy, append-only decision ring.
#[derive(Debug)]
pub struct AuditLog {
    slots: Box<[Mutex<Option<AuditRecord>>]>,
    head: AtomicU64,
}

impl AuditLog {
    /// Create a ring holding `capacity` records (at least one).
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Mutex::new(None)).collect();
        Self {
            slots,
            head: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of records ever written, including overwritten ones.
    #[inline]
    pub fn total(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    /// Append a decision.
    pub fn record(&self, subject: SubjectId, op: OpCode, object: ObjectId, allowed: bool) {
        let seq = self.head.fetch_add(1, Ordering::AcqRel);
        let record = AuditRecord {
            seq,
            subject,
            op,
            object,
            allowed,
        };

        let mut slot = self.slots[self.index(seq)].lock();
        match *slot {
            Some(existing) if existing.seq > seq => {}
            _ => *slot = Some(record),
        }
    }

    /// The retained records, oldest first.
    ///
    /// Slots still being written when the snapshot runs are skipped.
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        let total = self.total();
        let start = total.saturating_sub(self.capacity() as u64);
        (start..total)
            .filter_map(|seq| {
                let slot = self.slots[self.index(seq)].lock();
                (*slot).filter(|record| record.seq == seq)
            })
            .collect()
    }

    /// The most recent record.
    pub fn last(&self) -> Option<AuditRecord> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let seq = total - 1;
        let slot = self.slots[self.index(seq)].lock();
        (*slot).filter(|record| record.seq == seq)
    }

    /// Forget everything. Caller must ensure no concurrent writers.
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            *slot.lock() = None;
        }
        self.head.store(0, Ordering::Release);
    }

    #[inline]
    fn index(&self, seq: u64) -> usize {
        (seq % self.slots.len() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn obj(n: u128) -> ObjectId {
        ObjectId(n)
    }

    #[test]
    fn test_empty() {
        let log = AuditLog::new(4);
        assert!(log.snapshot().is_empty());
        assert_eq!(log.last(), None);
    }

    #[test]
    fn test_keeps_most_recent_in_order() {
        let log = AuditLog::new(3);
        for i in 0..5u128 {
            log.record(SubjectId(1), OpCode::READ, obj(i), i % 2 == 0);
        }
        let objects: Vec<u128> = log.snapshot().iter().map(|r| r.object.0).collect();
        assert_eq!(objects, [2, 3, 4]);
        assert_eq!(log.total(), 5);
        assert_eq!(log.last().map(|r| r.object), Some(obj(4)));
    }

    #[test]
    fn test_clear() {
        let log = AuditLog::new(2);
        log.record(SubjectId(1), OpCode::WRITE, obj(1), false);
        log.clear();
        assert_eq!(log.total(), 0);
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_writers_lose_nothing_within_capacity() {
        use std::sync::Arc;
        use std::thread;

        let log = Arc::new(AuditLog::new(4 * 250));
        let workers: Vec<_> = (0..4u64)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..250u128 {
                        log.record(SubjectId(t), OpCode::READ, ObjectId(i), true);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let records = log.snapshot();
        assert_eq!(records.len(), 1000);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.seq, i as u64);
        }
    }

    proptest! {
        #[test]
        fn prop_ring_retains_last_k(capacity in 1usize..16, writes in 0usize..64) {
            let log = AuditLog::new(capacity);
            for i in 0..writes {
                log.record(SubjectId(0), OpCode::READ, ObjectId(i as u128), true);
            }
            let kept: Vec<u128> = log.snapshot().iter().map(|r| r.object.0).collect();
            let expected: Vec<u128> =
                (writes.saturating_sub(capacity)..writes).map(|i| i as u128).collect();
            prop_assert_eq!(kept, expected);
        }
    }
}
