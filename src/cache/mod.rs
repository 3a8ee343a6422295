//! Capability Lookup Cache
//!
//! Maps an object path to a previously resolved capability so repeated
//! resolution skips the registry.
//!
//! # Design
//! - Fixed array of bucket pointers, bucket chosen by a rolling path hash
//! - Entries keep their full path; the hash only picks the bucket, so
//!   colliding paths never answer for each other
//! - Buckets are immutable once published; writers build a replacement,
//!   swap the pointer and retire the old bucket after an RCU grace period
//! - Readers never lock: they enter a [`GracePeriod`] read section, load the
//!   bucket pointer and scan it
//! - Writers (insert, evict, invalidate) serialize behind one cache-wide lock
//! - FIFO eviction once `capacity` entries are cached
//!
//! # Security Properties
//! - The cache is never authoritative. Entries hold only a weak reference
//!   and revocation does not scrub them; [`CapabilityCache::resolve`]
//!   re-validates every hit against the registry before returning it

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use log::debug;
use spin::Mutex;

use crate::cap::{CapError, CapObject, Capability, Handle, Registry};
use crate::clock::Clock;
use crate::sync::GracePeriod;

/// Deterministic rolling hash of an object path.
pub fn path_hash(path: &str) -> u64 {
    path.bytes()
        .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)))
}

/// One cached resolution.
#[derive(Debug)]
pub struct CacheEntry {
    key: u64,
    path: Arc<str>,
    handle: Handle,
    capability: Weak<CapObject>,
    /// Registry epoch at insertion.
    epoch: u64,
    last_access: AtomicU64,
    hits: AtomicU32,
}

impl CacheEntry {
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn is(&self, key: u64, path: &str) -> bool {
        self.key == key && *self.path == *path
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::Relaxed)
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            path: Arc::clone(&self.path),
            handle: self.handle,
            capability: self.capability.clone(),
            epoch: self.epoch,
            last_access: AtomicU64::new(self.last_access()),
            hits: AtomicU32::new(self.hits()),
        }
    }
}

/// A cache hit. Must be validated before use.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub handle: Handle,
    pub capability: Weak<CapObject>,
    pub epoch: u64,
}

struct Bucket {
    entries: Vec<CacheEntry>,
}

impl Bucket {
    fn find(&self, key: u64, path: &str) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.is(key, path))
    }
}

struct WriterState {
    /// Cached paths in insertion order, for eviction.
    fifo: VecDeque<Arc<str>>,
}

impl WriterState {
    fn position(&self, path: &str) -> Option<usize> {
        self.fifo.iter().position(|p| **p == *path)
    }
}

/// The capability lookup cache.
pub struct CapabilityCache {
    buckets: Box<[AtomicPtr<Bucket>]>,
    writer: Mutex<WriterState>,
    gp: GracePeriod,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl CapabilityCache {
    pub fn new(buckets: usize, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let buckets = (0..buckets.max(1))
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            buckets,
            writer: Mutex::new(WriterState {
                fifo: VecDeque::with_capacity(capacity),
            }),
            gp: GracePeriod::new(),
            capacity: capacity.max(1),
            clock,
        }
    }

    #[inline]
    fn bucket_index(&self, key: u64) -> usize {
        ((key ^ (key >> 32)) % self.buckets.len() as u64) as usize
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.writer.lock().fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a path without validating the result.
    pub fn lookup(&self, path: &str) -> Option<CacheHit> {
        let key = path_hash(path);
        let _guard = self.gp.read();
        let bucket = self.buckets[self.bucket_index(key)].load(Ordering::Acquire);
        if bucket.is_null() {
            return None;
        }
        // SAFETY: non-null bucket pointers come from `Box::into_raw` in
        // `publish` and are only freed after a grace period, which cannot
        // complete while `_guard` is held.
        let bucket = unsafe { &*bucket };
        let entry = bucket.find(key, path)?;
        entry.last_access.store(self.clock.now(), Ordering::Relaxed);
        entry.hits.fetch_add(1, Ordering::Relaxed);
        Some(CacheHit {
            handle: entry.handle,
            capability: entry.capability.clone(),
            epoch: entry.epoch,
        })
    }

    /// Look up a path and validate the hit against the registry.
    ///
    /// A hit whose capability was revoked, expired or freed is dropped from
    /// the cache and reported as a miss.
    pub fn resolve(&self, path: &str, registry: &Registry) -> Option<Capability> {
        let hit = self.lookup(path)?;
        let object = hit.capability.upgrade();

        let valid = match object {
            // nothing was revoked, transferred or freed since insertion
            Some(ref object) if hit.epoch == registry.epoch() => object.is_live(self.clock.now()),
            Some(ref object) => registry
                .resolve(hit.handle)
                .map(|current| Arc::ptr_eq(&current, object))
                .unwrap_or(false),
            None => false,
        };

        match object {
            Some(object) if valid => Some(object.snapshot()),
            _ => {
                // only drop the entry we judged; a fresh insert may have
                // replaced it meanwhile
                if self.remove(path, |e| e.handle == hit.handle && e.epoch == hit.epoch) {
                    debug!("[CACHE] stale entry for {} dropped", hit.handle);
                }
                None
            }
        }
    }

    /// Resolve `handle` in the registry and cache it under `path`.
    ///
    /// Replaces an existing entry for the same path. Evicts the oldest entry
    /// when the cache is full.
    pub fn insert(
        &self,
        path: &str,
        registry: &Registry,
        handle: Handle,
    ) -> Result<Capability, CapError> {
        let epoch = registry.epoch();
        let object = registry.resolve(handle)?;
        let key = path_hash(path);
        let path: Arc<str> = Arc::from(path);
        let entry = CacheEntry {
            key,
            path: Arc::clone(&path),
            handle,
            capability: Arc::downgrade(&object),
            epoch,
            last_access: AtomicU64::new(self.clock.now()),
            hits: AtomicU32::new(0),
        };

        let mut writer = self.writer.lock();
        let mut retired = Vec::new();

        let present = writer.position(&path).is_some();
        if !present && writer.fifo.len() >= self.capacity {
            if let Some(victim) = writer.fifo.pop_front() {
                retired.extend(self.publish_without(&victim));
                debug!("[CACHE] evicted entry {}", victim);
            }
        }

        let idx = self.bucket_index(key);
        let mut entries = self.current_entries(idx);
        entries.retain(|e| !e.is(key, &path));
        entries.push(entry);
        retired.extend(self.publish(idx, entries));
        if !present {
            writer.fifo.push_back(path);
        }

        self.retire(retired);
        drop(writer);
        Ok(object.snapshot())
    }

    /// Drop the entry for `path`. Returns whether one existed.
    pub fn invalidate(&self, path: &str) -> bool {
        self.remove(path, |_| true)
    }

    /// Drop the entry for `path` if `pred` still holds for it under the
    /// writer lock.
    fn remove(&self, path: &str, pred: impl Fn(&CacheEntry) -> bool) -> bool {
        let key = path_hash(path);
        let mut writer = self.writer.lock();
        let idx = self.bucket_index(key);
        let matches = self
            .current_entries(idx)
            .iter()
            .any(|e| e.is(key, path) && pred(e));
        if !matches {
            return false;
        }
        if let Some(pos) = writer.position(path) {
            writer.fifo.remove(pos);
        }
        let retired = self.publish_without(path);
        self.retire(retired);
        true
    }

    /// Drop every entry whose capability is no longer valid in the registry.
    /// Returns how many were dropped.
    pub fn purge_stale(&self, registry: &Registry) -> usize {
        let mut writer = self.writer.lock();
        let mut retired = Vec::new();
        let mut dropped = Vec::new();

        for idx in 0..self.buckets.len() {
            let entries = self.current_entries(idx);
            let before = entries.len();
            let (keep, stale): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| {
                e.capability
                    .upgrade()
                    .map(|object| object.is_valid() && registry.resolve(e.handle).is_ok())
                    .unwrap_or(false)
            });
            if keep.len() != before {
                dropped.extend(stale.into_iter().map(|e| e.path));
                retired.extend(self.publish(idx, keep));
            }
        }

        writer.fifo.retain(|p| !dropped.contains(p));
        self.retire(retired);
        if !dropped.is_empty() {
            debug!("[CACHE] purged {} stale entries", dropped.len());
        }
        dropped.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut writer = self.writer.lock();
        let retired: Vec<_> = (0..self.buckets.len())
            .filter_map(|idx| self.publish(idx, Vec::new()))
            .collect();
        writer.fifo.clear();
        self.retire(retired);
    }

    /// Copy of the entries in bucket `idx`. Writer lock must be held.
    fn current_entries(&self, idx: usize) -> Vec<CacheEntry> {
        let bucket = self.buckets[idx].load(Ordering::Acquire);
        if bucket.is_null() {
            return Vec::new();
        }
        // SAFETY: the caller holds the writer lock, so no other thread can
        // retire this bucket while we copy it.
        unsafe { (*bucket).entries.clone() }
    }

    /// Rebuild the bucket holding `path` without it.
    fn publish_without(&self, path: &str) -> Option<*mut Bucket> {
        let key = path_hash(path);
        let idx = self.bucket_index(key);
        let mut entries = self.current_entries(idx);
        entries.retain(|e| !e.is(key, path));
        self.publish(idx, entries)
    }

    /// Swap in a new bucket and hand back the old pointer for retirement.
    /// Writer lock must be held.
    fn publish(&self, idx: usize, entries: Vec<CacheEntry>) -> Option<*mut Bucket> {
        let new = if entries.is_empty() {
            ptr::null_mut()
        } else {
            Box::into_raw(Box::new(Bucket { entries }))
        };
        let old = self.buckets[idx].swap(new, Ordering::AcqRel);
        (!old.is_null()).then_some(old)
    }

    /// Wait out readers, then free retired buckets.
    fn retire(&self, retired: impl IntoIterator<Item = *mut Bucket>) {
        let retired: Vec<*mut Bucket> = retired.into_iter().collect();
        if retired.is_empty() {
            return;
        }
        self.gp.synchronize();
        for bucket in retired {
            // SAFETY: `bucket` was unlinked by `publish` before the grace
            // period began, so no reader can still hold it.
            drop(unsafe { Box::from_raw(bucket) });
        }
    }
}

impl Drop for CapabilityCache {
    fn drop(&mut self) {
        for slot in self.buckets.iter() {
            let bucket = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !bucket.is_null() {
                // SAFETY: `&mut self` rules out concurrent readers.
                drop(unsafe { Box::from_raw(bucket) });
            }
        }
    }
}

impl fmt::Debug for CapabilityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityCache")
            .field("buckets", &self.buckets.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
