//! Capability Registry
//!
//! Owns every capability object and every per-owner table.
//!
//! # Design
//! - Handles come from a monotonically increasing counter; never reused
//! - Storage is a handle-keyed map behind a reader/writer spinlock
//! - `revoke` controls logical validity, `release` controls storage lifetime
//! - `epoch` is bumped whenever a previously valid answer may have changed
//!
//! # Security Properties
//! - Unknown, revoked, expired and freed handles all look the same (`Invalid`)
//! - Revocation is immediate and irreversible

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use log::{debug, info, warn};
use spin::{Mutex, RwLock};

use super::capability::{CapFlags, CapObject, Capability, CapabilityKind, Handle, OwnerId, Permissions};
use super::table::CapTable;
use crate::clock::Clock;
use crate::config::Config;

/// Error type for registry and table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapError {
    /// Unknown, revoked, expired or freed handle.
    Invalid,
    /// The registry holds its maximum number of capabilities.
    Exhausted,
    /// The owner's table is at capacity.
    TableFull,
    /// The capability lacks the transferable flag.
    NotTransferable,
    /// The handle is not in the owner's table, or the owner has no table.
    NotFound,
    /// Malformed request (invalid kind, duplicate entry, existing table).
    InvalidArgument,
}

impl fmt::Display for CapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid capability"),
            Self::Exhausted => write!(f, "capability registry exhausted"),
            Self::TableFull => write!(f, "capability table full"),
            Self::NotTransferable => write!(f, "capability not transferable"),
            Self::NotFound => write!(f, "capability not found"),
            Self::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

/// The capability registry.
pub struct Registry {
    caps: RwLock<HashMap<Handle, Arc<CapObject>>>,
    tables: Mutex<HashMap<OwnerId, Arc<CapTable>>>,
    next_handle: AtomicU64,
    epoch: AtomicU64,
    max_capabilities: usize,
    table_capacity: usize,
    clock: Arc<dyn Clock>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            caps: RwLock::new(HashMap::with_capacity(config.max_capabilities)),
            tables: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            max_capabilities: config.max_capabilities,
            table_capacity: config.table_capacity,
            clock,
        }
    }

    /// Drop every capability and table.
    ///
    /// The handle counter is not rewound, so handles issued before the reset
    /// stay dead.
    pub fn init(&self) {
        self.caps.write().clear();
        self.tables.lock().clear();
        self.bump_epoch();
        info!("[CAP] registry initialized ({} slots)", self.max_capabilities);
    }

    /// Current registry generation.
    ///
    /// Changes after every revoke, transfer and free. A consumer that cached
    /// an answer at generation `e` may keep trusting it while `epoch() == e`.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of capabilities with live storage (revoked ones included).
    pub fn len(&self) -> usize {
        self.caps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a kernel-owned capability with no expiry.
    pub fn create(
        &self,
        kind: CapabilityKind,
        object_id: u64,
        permissions: Permissions,
        flags: CapFlags,
    ) -> Result<Handle, CapError> {
        self.create_owned(OwnerId::KERNEL, kind, object_id, permissions, flags, 0)
    }

    /// Create a capability for `owner`.
    ///
    /// `expires_at` is an absolute clock tick, `0` for never. The new
    /// capability starts with one reference.
    pub fn create_owned(
        &self,
        owner: OwnerId,
        kind: CapabilityKind,
        object_id: u64,
        permissions: Permissions,
        flags: CapFlags,
        expires_at: u64,
    ) -> Result<Handle, CapError> {
        if !kind.is_valid() {
            return Err(CapError::InvalidArgument);
        }

        let now = self.clock.now();
        let mut caps = self.caps.write();
        if caps.len() >= self.max_capabilities {
            warn!("[CAP] create rejected: registry exhausted");
            return Err(CapError::Exhausted);
        }

        let handle = Handle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let flags = if expires_at != 0 {
            flags | CapFlags::TEMPORARY
        } else {
            flags
        };
        let object = CapObject::new(
            handle, kind, permissions, object_id, owner, now, expires_at, flags,
        );
        caps.insert(handle, Arc::new(object));
        drop(caps);

        debug!("[CAP] created {} kind={:?} object={:#x}", handle, kind, object_id);
        Ok(handle)
    }

    /// Fetch the backing object of a live capability.
    ///
    /// This is what the lookup cache holds a weak reference to.
    pub fn resolve(&self, handle: Handle) -> Result<Arc<CapObject>, CapError> {
        let object = self
            .caps
            .read()
            .get(&handle)
            .cloned()
            .ok_or(CapError::Invalid)?;
        if object.is_live(self.clock.now()) {
            Ok(object)
        } else {
            Err(CapError::Invalid)
        }
    }

    /// Look up a capability.
    pub fn lookup(&self, handle: Handle) -> Result<Capability, CapError> {
        self.resolve(handle).map(|object| object.snapshot())
    }

    /// Test a permission bit set. `false` for any invalid handle.
    pub fn has_permission(&self, handle: Handle, required: Permissions) -> bool {
        self.resolve(handle)
            .map(|object| object.permissions().contains(required))
            .unwrap_or(false)
    }

    /// Move a capability to a new owner.
    ///
    /// The owner word is swapped in one atomic store, so readers observe
    /// either the old or the new owner.
    pub fn transfer(&self, handle: Handle, new_owner: OwnerId) -> Result<(), CapError> {
        let object = self.resolve(handle)?;
        if !object.flags().contains(CapFlags::TRANSFERABLE) {
            warn!("[CAP] transfer of {} rejected: not transferable", handle);
            return Err(CapError::NotTransferable);
        }
        object.set_owner(new_owner);
        self.bump_epoch();
        debug!("[CAP] transferred {} to owner {}", handle, new_owner.0);
        Ok(())
    }

    /// Revoke a capability.
    ///
    /// Idempotent, and answers the same way for handles that never existed.
    /// Storage stays until the last reference is released.
    pub fn revoke(&self, handle: Handle) -> Result<(), CapError> {
        let object = self.caps.read().get(&handle).cloned();
        if let Some(object) = object {
            if object.invalidate() {
                self.bump_epoch();
                debug!("[CAP] revoked {}", handle);
            }
        }
        Ok(())
    }

    /// Revoke every capability of `kind` targeting `object_id`. Returns how
    /// many were newly revoked. Object ids are only unique within a kind.
    pub fn revoke_object(&self, kind: CapabilityKind, object_id: u64) -> usize {
        let targets: Vec<Arc<CapObject>> = self
            .caps
            .read()
            .values()
            .filter(|object| object.kind() == kind && object.object_id() == object_id)
            .cloned()
            .collect();

        let revoked = targets.iter().filter(|object| object.invalidate()).count();
        if revoked > 0 {
            self.bump_epoch();
            debug!(
                "[CAP] revoked {} {:?} capabilities on object {:#x}",
                revoked, kind, object_id
            );
        }
        revoked
    }

    /// Take an additional reference on a valid capability.
    pub fn addref(&self, handle: Handle) -> Result<u32, CapError> {
        self.resolve(handle)?.try_addref().ok_or(CapError::Invalid)
    }

    /// Drop a reference. Storage is freed when the count reaches zero,
    /// whether or not the capability was revoked.
    pub fn release(&self, handle: Handle) -> Result<u32, CapError> {
        let object = self
            .caps
            .read()
            .get(&handle)
            .cloned()
            .ok_or(CapError::Invalid)?;
        let remaining = object.try_release().ok_or(CapError::Invalid)?;
        if remaining == 0 {
            self.caps.write().remove(&handle);
            self.bump_epoch();
            debug!("[CAP] freed {}", handle);
        }
        Ok(remaining)
    }

    /// Create the capability table for `owner`.
    pub fn table_init(&self, owner: OwnerId) -> Result<Arc<CapTable>, CapError> {
        let mut tables = self.tables.lock();
        if tables.contains_key(&owner) {
            return Err(CapError::InvalidArgument);
        }
        let table = Arc::new(CapTable::new(owner, self.table_capacity));
        tables.insert(owner, Arc::clone(&table));
        Ok(table)
    }

    /// The table for `owner`, if one exists.
    pub fn table(&self, owner: OwnerId) -> Option<Arc<CapTable>> {
        self.tables.lock().get(&owner).cloned()
    }

    /// Put a capability into the owner's table, taking a reference on it.
    ///
    /// Fails with `NotFound` if the table is destroyed before the insert
    /// lands; the reference is given back in that case too.
    pub fn table_add(&self, owner: OwnerId, handle: Handle) -> Result<(), CapError> {
        let table = self.table(owner).ok_or(CapError::NotFound)?;
        self.addref(handle)?;
        if let Err(e) = table.insert(handle) {
            self.release_held(handle);
            warn!("[CAP] table_add {} for owner {} failed: {}", handle, owner.0, e);
            return Err(e);
        }
        Ok(())
    }

    /// Take a capability out of the owner's table, dropping its reference.
    pub fn table_remove(&self, owner: OwnerId, handle: Handle) -> Result<(), CapError> {
        let table = self.table(owner).ok_or(CapError::NotFound)?;
        table.remove(handle)?;
        self.release_held(handle);
        Ok(())
    }

    /// Tear down the owner's table, releasing every reference it held.
    pub fn table_destroy(&self, owner: OwnerId) -> Result<(), CapError> {
        let table = self.tables.lock().remove(&owner).ok_or(CapError::NotFound)?;
        for handle in table.drain() {
            self.release_held(handle);
        }
        debug!("[CAP] destroyed table of owner {}", owner.0);
        Ok(())
    }
}

impl Registry {
    /// Drop a reference a table was holding. Failure means the count no
    /// longer matches the holders.
    fn release_held(&self, handle: Handle) {
        if let Err(e) = self.release(handle) {
            warn!("[CAP] table reference on {} could not be released: {}", handle, e);
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .field("epoch", &self.epoch())
            .field("max_capabilities", &self.max_capabilities)
            .finish()
    }
}
