//! Capability Types and Permissions
//!
//! Defines the core capability primitives for the object-capability model.
//!
//! # Capability Structure
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       CapObject                          │
//! ├──────────────────────────────────────────────────────────┤
//! │  handle: Handle          - Opaque, never reused          │
//! │  kind: CapabilityKind    - Invalid once revoked          │
//! │  permissions: Permissions- Permitted operations          │
//! │  object_id: u64          - Target kernel object          │
//! │  owner: OwnerId          - Swapped atomically on transfer│
//! │  flags: CapFlags         - Transfer/revoke/delegate bits │
//! │  refcount: u32           - Memory lifetime only          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Validity and lifetime are independent: `kind` going to
//! [`CapabilityKind::Invalid`] is what makes a capability unusable, while the
//! reference count only decides when the registry drops its storage.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Operations a capability grants on its target object.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const CREATE = 1 << 3;
        const DELETE = 1 << 4;
        const ADMIN = 1 << 5;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// Independent policy bits attached to a capability.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CapFlags: u32 {
        /// Ownership may move to another owner.
        const TRANSFERABLE = 1 << 0;
        const REVOCABLE = 1 << 1;
        const DELEGATABLE = 1 << 2;
        /// Created with an expiry stamp.
        const TEMPORARY = 1 << 3;
    }
}

/// Types of kernel objects that can be referenced by capabilities.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum CapabilityKind {
    /// Revoked or never valid. Terminal.
    Invalid = 0,
    Memory = 1,
    Ipc = 2,
    Device = 3,
    File = 4,
    Network = 5,
    Process = 6,
    Scheduler = 7,
    System = 8,
}

impl CapabilityKind {
    /// Decode a raw kind tag. Unknown tags decode as `Invalid`.
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Memory,
            2 => Self::Ipc,
            3 => Self::Device,
            4 => Self::File,
            5 => Self::Network,
            6 => Self::Process,
            7 => Self::Scheduler,
            8 => Self::System,
            _ => Self::Invalid,
        }
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

/// Opaque capability handle.
///
/// Handles are allocated from a monotonically increasing counter and never
/// reused, so a stale handle can only ever resolve to `INVALID`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Handle(u64);

impl Handle {
    /// The null handle. Never allocated.
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identifier of a capability owner (a process or the kernel).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct OwnerId(pub u64);

impl OwnerId {
    /// Owner of capabilities minted without an explicit owner.
    pub const KERNEL: Self = Self(0);
}

/// Registry-owned capability storage.
///
/// Shared between the registry (strong reference) and the lookup cache
/// (weak reference). Every field a concurrent reader may observe while it
/// changes is atomic.
#[derive(Debug)]
pub struct CapObject {
    handle: Handle,
    kind: AtomicU8,
    permissions: Permissions,
    object_id: u64,
    owner: AtomicU64,
    created_at: u64,
    expires_at: u64,
    flags: CapFlags,
    refcount: AtomicU32,
}

impl CapObject {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handle: Handle,
        kind: CapabilityKind,
        permissions: Permissions,
        object_id: u64,
        owner: OwnerId,
        created_at: u64,
        expires_at: u64,
        flags: CapFlags,
    ) -> Self {
        Self {
            handle,
            kind: AtomicU8::new(kind as u8),
            permissions,
            object_id,
            owner: AtomicU64::new(owner.0),
            created_at,
            expires_at,
            flags,
            refcount: AtomicU32::new(1),
        }
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub fn kind(&self) -> CapabilityKind {
        CapabilityKind::from_raw(self.kind.load(Ordering::Acquire))
    }

    #[inline]
    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    #[inline]
    pub fn owner(&self) -> OwnerId {
        OwnerId(self.owner.load(Ordering::Acquire))
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Check whether the capability has not been revoked.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.kind().is_valid()
    }

    /// Valid and not past its expiry stamp at `now`.
    #[inline]
    pub fn is_live(&self, now: u64) -> bool {
        self.is_valid() && (self.expires_at == 0 || now < self.expires_at)
    }

    /// Mark the capability invalid. Returns `true` on the first call only.
    pub(crate) fn invalidate(&self) -> bool {
        self.kind.swap(CapabilityKind::Invalid as u8, Ordering::AcqRel)
            != CapabilityKind::Invalid as u8
    }

    pub(crate) fn set_owner(&self, owner: OwnerId) {
        self.owner.store(owner.0, Ordering::Release);
    }

    /// Take a reference unless the count already dropped to zero.
    pub(crate) fn try_addref(&self) -> Option<u32> {
        let mut cur = self.refcount.load(Ordering::Acquire);
        loop {
            if cur == 0 || cur == u32::MAX {
                return None;
            }
            match self.refcount.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(cur + 1),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Drop a reference. Returns the remaining count, or `None` if it was
    /// already zero.
    pub(crate) fn try_release(&self) -> Option<u32> {
        let mut cur = self.refcount.load(Ordering::Acquire);
        loop {
            if cur == 0 {
                return None;
            }
            match self.refcount.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(cur - 1),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Copy the current state out.
    pub fn snapshot(&self) -> Capability {
        Capability {
            handle: self.handle,
            kind: self.kind(),
            permissions: self.permissions,
            object_id: self.object_id,
            owner: self.owner(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            flags: self.flags,
            refcount: self.refcount(),
        }
    }

    #[inline]
    pub(crate) fn permissions(&self) -> Permissions {
        self.permissions
    }

    #[inline]
    pub(crate) fn flags(&self) -> CapFlags {
        self.flags
    }
}

/// Point-in-time copy of a capability, as handed out by lookup.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Capability {
    pub handle: Handle,
    pub kind: CapabilityKind,
    pub permissions: Permissions,
    pub object_id: u64,
    pub owner: OwnerId,
    pub created_at: u64,
    /// Expiry tick, `0` for never.
    pub expires_at: u64,
    pub flags: CapFlags,
    pub refcount: u32,
}

impl Capability {
    /// Check if this capability has all of the specified permissions.
    #[inline]
    pub fn has(&self, required: Permissions) -> bool {
        self.permissions.contains(required)
    }

    #[inline]
    pub fn is_transferable(&self) -> bool {
        self.flags.contains(CapFlags::TRANSFERABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object() -> CapObject {
        CapObject::new(
            Handle::from_raw(7),
            CapabilityKind::File,
            Permissions::READ,
            42,
            OwnerId(1),
            10,
            0,
            CapFlags::empty(),
        )
    }

    #[test]
    fn test_kind_round_trips_raw_tag() {
        assert_eq!(CapabilityKind::from_raw(CapabilityKind::Device as u8), CapabilityKind::Device);
        assert_eq!(CapabilityKind::from_raw(200), CapabilityKind::Invalid);
    }

    #[test]
    fn test_invalidate_is_one_shot() {
        let cap = object();
        assert!(cap.is_valid());
        assert!(cap.invalidate());
        assert!(!cap.invalidate());
        assert_eq!(cap.kind(), CapabilityKind::Invalid);
    }

    #[test]
    fn test_refcount_stops_at_zero() {
        let cap = object();
        assert_eq!(cap.try_addref(), Some(2));
        assert_eq!(cap.try_release(), Some(1));
        assert_eq!(cap.try_release(), Some(0));
        assert_eq!(cap.try_release(), None);
        assert_eq!(cap.try_addref(), None);
    }

    #[test]
    fn test_expiry() {
        let cap = CapObject::new(
            Handle::from_raw(1),
            CapabilityKind::Memory,
            Permissions::READ_WRITE,
            0,
            OwnerId::KERNEL,
            0,
            100,
            CapFlags::TEMPORARY,
        );
        assert!(cap.is_live(99));
        assert!(!cap.is_live(100));
    }

    #[test]
    fn test_snapshot_permission_test() {
        let snap = object().snapshot();
        assert!(snap.has(Permissions::READ));
        assert!(!snap.has(Permissions::WRITE));
        assert!(!snap.is_transferable());
    }
}
