//! PantherOS Authorization Core
//!
//! Capability-based authorization and IOMMU resource mapping for the
//! PantherOS microkernel.
//!
//! # Components
//! - Capability registry and per-owner capability tables
//! - Access-control decision engine with an audit ring
//! - Capability lookup cache with lock-free (RCU) reads
//! - IOMMU domain manager with epoch-versioned mapping tables
//!
//! # Security Features
//! - Default-deny, exact-match authorization; every decision is audited
//! - Immediate, irreversible revocation independent of reference counts
//! - Cached lookups are always re-validated against the registry
//! - Per-domain spinlocks; no global IOMMU lock
//!
//! All state lives in one [`AuthCore`] value built at startup. Nothing is
//! global, so independent instances can coexist.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod acl;
pub mod cache;
pub mod cap;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod iommu;
pub mod sync;

use alloc::sync::Arc;

use log::info;

use acl::{AccessControl, AclError, ObjectId, OpCode, SubjectId};
use cache::CapabilityCache;
use cap::{CapError, CapFlags, Capability, CapabilityKind, Handle, OwnerId, Permissions, Registry};
use clock::{Clock, TickClock};
use iommu::{BulkMapError, DomainId, DomainManager, IommuError, Iova, MapPerms, NoTlb, PhysAddr, TlbInvalidator};

pub use config::Config;
pub use dispatch::{dispatch, Status};

/// The authorization subsystem: every table, list, ring and domain.
pub struct AuthCore {
    config: Config,
    registry: Registry,
    acl: Arc<AccessControl>,
    cache: CapabilityCache,
    domains: DomainManager,
}

impl AuthCore {
    /// Build a core with a logical clock and no TLB hardware.
    pub fn new(config: Config) -> Self {
        Self::with_hooks(config, Arc::new(TickClock::new()), Arc::new(NoTlb))
    }

    /// Build a core with platform-supplied time and invalidation hooks.
    pub fn with_hooks(config: Config, clock: Arc<dyn Clock>, tlb: Arc<dyn TlbInvalidator>) -> Self {
        let config = config.normalized();
        let acl = Arc::new(AccessControl::new(config.acl_capacity, config.audit_capacity));
        let core = Self {
            config,
            registry: Registry::new(&config, Arc::clone(&clock)),
            cache: CapabilityCache::new(config.cache_buckets, config.cache_capacity, clock),
            domains: DomainManager::new(acl.clone(), tlb),
            acl,
        };
        info!(
            "[CORE] up: {} caps, {} acl entries, {} audit records, {}x{} cache",
            config.max_capabilities,
            config.acl_capacity,
            config.audit_capacity,
            config.cache_buckets,
            config.cache_capacity
        );
        core
    }

    /// Reset every component to its empty state.
    ///
    /// Caller must ensure no operation is in flight.
    pub fn init(&self) {
        self.cache.clear();
        self.registry.init();
        self.acl.init();
        self.domains.init();
        info!("[CORE] state reset");
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub fn acl(&self) -> &AccessControl {
        &self.acl
    }

    #[inline]
    pub fn cache(&self) -> &CapabilityCache {
        &self.cache
    }

    #[inline]
    pub fn domains(&self) -> &DomainManager {
        &self.domains
    }

    pub fn cap_create(
        &self,
        kind: CapabilityKind,
        object_id: u64,
        permissions: Permissions,
        flags: CapFlags,
    ) -> Result<Handle, CapError> {
        self.registry.create(kind, object_id, permissions, flags)
    }

    pub fn cap_lookup(&self, handle: Handle) -> Result<Capability, CapError> {
        self.registry.lookup(handle)
    }

    pub fn cap_has_permission(&self, handle: Handle, perm: Permissions) -> bool {
        self.registry.has_permission(handle, perm)
    }

    pub fn cap_transfer(&self, handle: Handle, new_owner: OwnerId) -> Result<(), CapError> {
        self.registry.transfer(handle, new_owner)
    }

    pub fn cap_revoke(&self, handle: Handle) -> Result<(), CapError> {
        self.registry.revoke(handle)
    }

    pub fn cap_addref(&self, handle: Handle) -> Result<u32, CapError> {
        self.registry.addref(handle)
    }

    pub fn cap_release(&self, handle: Handle) -> Result<u32, CapError> {
        self.registry.release(handle)
    }

    /// Resolve a path through the cache, validated against the registry.
    pub fn cap_resolve_path(&self, path: &str) -> Option<Capability> {
        self.cache.resolve(path, &self.registry)
    }

    /// Remember that `path` resolves to `handle`.
    pub fn cap_cache_path(&self, path: &str, handle: Handle) -> Result<Capability, CapError> {
        self.cache.insert(path, &self.registry, handle)
    }

    pub fn acl_add(&self, subject: SubjectId, op: OpCode, object: ObjectId) -> Result<(), AclError> {
        self.acl.acl_add(subject, op, object)
    }

    pub fn authorize(&self, subject: SubjectId, op: OpCode, object: ObjectId) -> bool {
        self.acl.authorize(subject, op, object)
    }

    pub fn iommu_map(
        &self,
        subject: SubjectId,
        domain: DomainId,
        iova: Iova,
        pa: PhysAddr,
        len: u64,
        perms: MapPerms,
    ) -> Result<(), IommuError> {
        self.domains.map(subject, domain, iova, pa, len, perms)
    }

    pub fn iommu_unmap(&self, subject: SubjectId, domain: DomainId, iova: Iova, len: u64) -> Result<(), IommuError> {
        self.domains.unmap(subject, domain, iova, len)
    }

    pub fn iommu_bulk_map(
        &self,
        subject: SubjectId,
        domain: DomainId,
        iovas: &[Iova],
        pas: &[PhysAddr],
        lens: &[u64],
        perms: &[MapPerms],
    ) -> Result<usize, BulkMapError> {
        self.domains.bulk_map(subject, domain, iovas, pas, lens, perms)
    }

    /// Drop every mapping of `domain` and revoke every device capability
    /// naming it.
    ///
    /// Returns `(mappings removed, capabilities revoked)`.
    pub fn iommu_revoke_domain(&self, subject: SubjectId, domain: DomainId) -> Result<(usize, usize), IommuError> {
        let removed = self.domains.revoke_all(subject, domain)?;
        let revoked = self.registry.revoke_object(CapabilityKind::Device, domain.0);
        info!(
            "[CORE] domain {} revoked: {} mappings, {} capabilities",
            domain.0, removed, revoked
        );
        Ok((removed, revoked))
    }
}

impl Default for AuthCore {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl core::fmt::Debug for AuthCore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthCore")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .field("domains", &self.domains)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iommu::{Asid, DomainFlags};

    #[test]
    fn test_independent_instances() {
        let a = AuthCore::default();
        let b = AuthCore::default();
        let h = a
            .cap_create(CapabilityKind::Memory, 1, Permissions::READ, CapFlags::empty())
            .unwrap();
        assert!(a.cap_lookup(h).is_ok());
        assert_eq!(b.registry().len(), 0);
    }

    #[test]
    fn test_init_resets_all_components() {
        let core = AuthCore::default();
        let h = core
            .cap_create(CapabilityKind::File, 1, Permissions::READ, CapFlags::empty())
            .unwrap();
        core.cap_cache_path("/f", h).unwrap();
        core.acl_add(SubjectId(1), OpCode::READ, ObjectId(1)).unwrap();
        core.authorize(SubjectId(1), OpCode::READ, ObjectId(1));
        core.domains().create_domain(PhysAddr::new(0), Asid(1), DomainFlags::empty());

        core.init();
        assert!(core.registry().is_empty());
        assert!(core.cache().is_empty());
        assert!(core.acl().is_empty());
        assert_eq!(core.acl().audit().total(), 0);
        assert!(core.domains().is_empty());
        assert!(core.cap_lookup(h).is_err());
    }

    #[test]
    fn test_path_cache_never_answers_for_colliding_path() {
        let core = AuthCore::default();
        let admin = core
            .cap_create(CapabilityKind::System, 1, Permissions::ADMIN, CapFlags::empty())
            .unwrap();
        core.cap_cache_path("Aa", admin).unwrap();
        assert!(core.cap_resolve_path("BB").is_none());
        assert_eq!(core.cap_resolve_path("Aa").unwrap().handle, admin);
    }

    #[test]
    fn test_revoke_domain_also_revokes_capabilities() {
        let core = AuthCore::default();
        let s = SubjectId(1);
        let id = core.domains().create_domain(PhysAddr::new(0), Asid(9), DomainFlags::empty());
        core.acl_add(s, OpCode::IOMMU_MAP, ObjectId::domain(id.0)).unwrap();
        core.acl_add(s, OpCode::IOMMU_REVOKE, ObjectId::domain(id.0)).unwrap();
        let dev = core
            .cap_create(CapabilityKind::Device, id.0, Permissions::ADMIN, CapFlags::empty())
            .unwrap();

        core.iommu_map(s, id, Iova::new(0x1000), PhysAddr::new(0x2000), 4096, MapPerms::RW)
            .unwrap();
        assert_eq!(core.iommu_revoke_domain(s, id), Ok((1, 1)));
        assert!(core.cap_lookup(dev).is_err());
    }

    #[test]
    fn test_revoke_domain_spares_other_kinds_with_same_id() {
        let core = AuthCore::default();
        let s = SubjectId(1);
        let id = core.domains().create_domain(PhysAddr::new(0), Asid(9), DomainFlags::empty());
        core.acl_add(s, OpCode::IOMMU_REVOKE, ObjectId::domain(id.0)).unwrap();
        let file = core
            .cap_create(CapabilityKind::File, id.0, Permissions::READ, CapFlags::empty())
            .unwrap();
        let process = core
            .cap_create(CapabilityKind::Process, id.0, Permissions::ADMIN, CapFlags::empty())
            .unwrap();

        assert_eq!(core.iommu_revoke_domain(s, id), Ok((0, 0)));
        assert!(core.cap_lookup(file).is_ok());
        assert!(core.cap_lookup(process).is_ok());
    }

    #[test]
    fn test_denied_revoke_touches_nothing() {
        let core = AuthCore::default();
        let id = core.domains().create_domain(PhysAddr::new(0), Asid(9), DomainFlags::empty());
        let dev = core
            .cap_create(CapabilityKind::Device, id.0, Permissions::ADMIN, CapFlags::empty())
            .unwrap();
        assert_eq!(
            core.iommu_revoke_domain(SubjectId(5), id),
            Err(IommuError::PermissionDenied)
        );
        assert!(core.cap_lookup(dev).is_ok());
    }
}
