//! Per-Owner Capability Tables
//!
//! A table is the bounded set of capability handles one owner holds.
//!
//! # Design
//! - Fixed capacity, fixed at creation
//! - One coarse spinlock around the handle array
//! - The lock covers only the array mutation; reference counting happens
//!   in the registry before/after the critical section
//! - Draining closes the table; later inserts fail so a racing add cannot
//!   leave a reference in a table nobody will release

use alloc::vec::Vec;

use spin::Mutex;

use super::capability::{Handle, OwnerId};
use super::registry::CapError;

/// Capability table for one owner.
#[derive(Debug)]
pub struct CapTable {
    owner: OwnerId,
    capacity: usize,
    slots: Mutex<Slots>,
}

#[derive(Debug)]
struct Slots {
    handles: Vec<Handle>,
    closed: bool,
}

impl CapTable {
    /// Create an empty table.
    pub fn new(owner: OwnerId, capacity: usize) -> Self {
        Self {
            owner,
            capacity,
            slots: Mutex::new(Slots {
                handles: Vec::with_capacity(capacity),
                closed: false,
            }),
        }
    }

    #[inline]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slots.lock().handles.contains(&handle)
    }

    /// Copy of the handles currently held.
    pub fn handles(&self) -> Vec<Handle> {
        self.slots.lock().handles.clone()
    }

    /// Append a handle.
    ///
    /// Fails with `NotFound` once the table has been drained, `TableFull`
    /// when at capacity and `InvalidArgument` when the handle is already
    /// present; the table is unchanged in every case.
    pub(crate) fn insert(&self, handle: Handle) -> Result<(), CapError> {
        let mut slots = self.slots.lock();
        if slots.closed {
            return Err(CapError::NotFound);
        }
        if slots.handles.contains(&handle) {
            return Err(CapError::InvalidArgument);
        }
        if slots.handles.len() >= self.capacity {
            return Err(CapError::TableFull);
        }
        slots.handles.push(handle);
        Ok(())
    }

    /// Remove a handle.
    pub(crate) fn remove(&self, handle: Handle) -> Result<(), CapError> {
        let mut slots = self.slots.lock();
        let pos = slots
            .handles
            .iter()
            .position(|&h| h == handle)
            .ok_or(CapError::NotFound)?;
        slots.handles.swap_remove(pos);
        Ok(())
    }

    /// Empty and close the table, returning what it held.
    pub(crate) fn drain(&self) -> Vec<Handle> {
        let mut slots = self.slots.lock();
        slots.closed = true;
        core::mem::take(&mut slots.handles)
    }
}
