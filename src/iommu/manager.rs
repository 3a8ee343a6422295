//! IOMMU Domain Manager
//!
//! Front door for every mapping change. For each request it
//! 1. validates arguments (no lock, no side effect on failure)
//! 2. asks the [`AccessGate`] whether the subject may perform the operation
//! 3. applies the change under the target domain's spinlock
//! 4. signals the [`TlbInvalidator`] for the domain's ASID after the lock
//!    is released
//!
//! Distinct domains never contend: the domain table lock is held only long
//! enough to clone the domain's `Arc`.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use log::{debug, info, warn};
use spin::RwLock;

use super::address::{Asid, Iova, PhysAddr};
use super::domain::{check_range, DomainFlags, DomainId, IommuDomain, IommuError, MapPerms};
use crate::acl::{AccessControl, ObjectId, OpCode, SubjectId};

/// Authorization check consulted before any mapping change.
pub trait AccessGate: Send + Sync {
    fn authorize(&self, subject: SubjectId, op: OpCode, object: ObjectId) -> bool;
}

impl AccessGate for AccessControl {
    fn authorize(&self, subject: SubjectId, op: OpCode, object: ObjectId) -> bool {
        AccessControl::authorize(self, subject, op, object)
    }
}

/// Hook that flushes cached translations for an address space.
///
/// Called outside every lock. Best effort; it may trail the epoch bump.
pub trait TlbInvalidator: Send + Sync {
    fn invalidate(&self, asid: Asid);
}

/// Invalidator for configurations without translation caching hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTlb;

impl TlbInvalidator for NoTlb {
    fn invalidate(&self, _asid: Asid) {}
}

/// `bulk_map` stopped early.
///
/// Mappings for the first `applied` elements remain in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkMapError {
    pub applied: usize,
    pub error: IommuError,
}

impl fmt::Display for BulkMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bulk map failed at element {}: {}", self.applied, self.error)
    }
}

/// Owner of all IOMMU domains.
pub struct DomainManager {
    domains: RwLock<HashMap<DomainId, Arc<IommuDomain>>>,
    next_id: AtomicU64,
    gate: Arc<dyn AccessGate>,
    tlb: Arc<dyn TlbInvalidator>,
}

impl DomainManager {
    pub fn new(gate: Arc<dyn AccessGate>, tlb: Arc<dyn TlbInvalidator>) -> Self {
        Self {
            domains: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            gate,
            tlb,
        }
    }

    /// Drop every domain and its mappings.
    pub fn init(&self) {
        let drained: alloc::vec::Vec<_> = self.domains.write().drain().map(|(_, d)| d).collect();
        for domain in drained {
            self.tlb.invalidate(domain.asid());
        }
    }

    /// Create an empty domain at epoch 0.
    pub fn create_domain(&self, root: PhysAddr, asid: Asid, flags: DomainFlags) -> DomainId {
        let id = DomainId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let domain = Arc::new(IommuDomain::new(id, root, asid, flags));
        self.domains.write().insert(id, domain);
        info!("[IOMMU] domain {} created (asid {}, root {})", id.0, asid.0, root);
        id
    }

    /// Remove a domain. Its mappings die with it.
    pub fn destroy_domain(&self, id: DomainId) -> Result<(), IommuError> {
        let domain = self
            .domains
            .write()
            .remove(&id)
            .ok_or(IommuError::InvalidArgument)?;
        self.tlb.invalidate(domain.asid());
        info!("[IOMMU] domain {} destroyed", id.0);
        Ok(())
    }

    pub fn domain(&self, id: DomainId) -> Option<Arc<IommuDomain>> {
        self.domains.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.domains.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, id: DomainId) -> Result<Arc<IommuDomain>, IommuError> {
        if id.is_null() {
            return Err(IommuError::InvalidArgument);
        }
        self.domain(id).ok_or(IommuError::InvalidArgument)
    }

    fn check_gate(&self, subject: SubjectId, op: OpCode, id: DomainId) -> Result<(), IommuError> {
        if self.gate.authorize(subject, op, ObjectId::domain(id.0)) {
            Ok(())
        } else {
            warn!("[IOMMU] op {:#x} on domain {} denied for subject {}", op.0, id.0, subject.0);
            Err(IommuError::PermissionDenied)
        }
    }

    /// Map `len` bytes at `iova` to `pa`.
    pub fn map(
        &self,
        subject: SubjectId,
        id: DomainId,
        iova: Iova,
        pa: PhysAddr,
        len: u64,
        perms: MapPerms,
    ) -> Result<(), IommuError> {
        check_range(iova, pa, len)?;
        let domain = self.lookup(id)?;
        self.check_gate(subject, OpCode::IOMMU_MAP, id)?;

        let epoch = domain.map(iova, pa, len, perms)?;
        self.tlb.invalidate(domain.asid());
        debug!("[IOMMU] map {} -> {} len {:#x} domain {} epoch {}", iova, pa, len, id.0, epoch);
        Ok(())
    }

    /// Remove the mapping with exactly this `(iova, len)`.
    pub fn unmap(&self, subject: SubjectId, id: DomainId, iova: Iova, len: u64) -> Result<(), IommuError> {
        if len == 0 {
            return Err(IommuError::InvalidArgument);
        }
        let domain = self.lookup(id)?;
        self.check_gate(subject, OpCode::IOMMU_UNMAP, id)?;

        let epoch = domain.unmap(iova, len)?;
        self.tlb.invalidate(domain.asid());
        debug!("[IOMMU] unmap {} len {:#x} domain {} epoch {}", iova, len, id.0, epoch);
        Ok(())
    }

    /// Apply `map` element by element.
    ///
    /// Stops at the first failure. Elements before it stay mapped; the error
    /// reports how many were applied. Mismatched slice lengths are rejected
    /// before anything is applied.
    pub fn bulk_map(
        &self,
        subject: SubjectId,
        id: DomainId,
        iovas: &[Iova],
        pas: &[PhysAddr],
        lens: &[u64],
        perms: &[MapPerms],
    ) -> Result<usize, BulkMapError> {
        let count = iovas.len();
        if pas.len() != count || lens.len() != count || perms.len() != count {
            return Err(BulkMapError {
                applied: 0,
                error: IommuError::InvalidArgument,
            });
        }

        for i in 0..count {
            if let Err(error) = self.map(subject, id, iovas[i], pas[i], lens[i], perms[i]) {
                warn!("[IOMMU] bulk map on domain {} stopped at {}/{}: {}", id.0, i, count, error);
                return Err(BulkMapError { applied: i, error });
            }
        }
        Ok(count)
    }

    /// Drop every mapping of a domain. Returns how many were removed.
    pub fn revoke_all(&self, subject: SubjectId, id: DomainId) -> Result<usize, IommuError> {
        let domain = self.lookup(id)?;
        self.check_gate(subject, OpCode::IOMMU_REVOKE, id)?;

        let removed = domain.clear();
        if removed > 0 {
            self.tlb.invalidate(domain.asid());
        }
        debug!("[IOMMU] revoked {} mappings in domain {}", removed, id.0);
        Ok(removed)
    }
}

impl fmt::Debug for DomainManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainManager")
            .field("domains", &self.len())
            .finish()
    }
}
