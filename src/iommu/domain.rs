//! IOMMU Domains
//!
//! A domain is one device-visible address space: a page-table root, an
//! ASID, and the set of IOVA ranges currently mapped into it.
//!
//! # Design
//! - The mapping list is owned by exactly one domain and guarded by that
//!   domain's spinlock; there is no cross-domain lock
//! - `epoch` goes up by exactly one per successful map or unmap, inside the
//!   critical section, so it totally orders the mutations
//! - Failed calls leave both the list and the epoch untouched
//! - New mappings are prepended; translation prefers the most recent one

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use spin::mutex::SpinMutex;

use super::address::{Asid, Iova, PhysAddr};

bitflags! {
    /// Device access rights on a mapped range.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MapPerms: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;

        const RW = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// Domain attributes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DomainFlags: u32 {
        /// DMA is cache-coherent; no explicit flush on unmap.
        const COHERENT = 1 << 0;
        /// Owned by a single device.
        const ISOLATED = 1 << 1;
    }
}

/// Domain identifier. Zero is the null domain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct DomainId(pub u64);

impl DomainId {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Error type for IOMMU operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IommuError {
    /// Null/unknown domain, zero length, or an address range that overflows.
    InvalidArgument,
    /// No mapping with exactly that `(iova, len)`.
    NotFound,
    /// The access gate refused the operation.
    PermissionDenied,
}

impl fmt::Display for IommuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotFound => write!(f, "mapping not found"),
            Self::PermissionDenied => write!(f, "permission denied"),
        }
    }
}

/// One IOVA → physical translation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Mapping {
    pub iova: Iova,
    pub pa: PhysAddr,
    pub len: u64,
    pub perms: MapPerms,
}

impl Mapping {
    /// Check if `iova` falls inside this range.
    #[inline]
    pub fn contains(&self, iova: Iova) -> bool {
        let start = self.iova.as_u64();
        iova.as_u64() >= start && iova.as_u64() - start < self.len
    }
}

/// An IOMMU translation domain.
pub struct IommuDomain {
    id: DomainId,
    root: PhysAddr,
    asid: Asid,
    flags: DomainFlags,
    epoch: AtomicU64,
    mappings: SpinMutex<VecDeque<Mapping>>,
}

impl IommuDomain {
    pub fn new(id: DomainId, root: PhysAddr, asid: Asid, flags: DomainFlags) -> Self {
        Self {
            id,
            root,
            asid,
            flags,
            epoch: AtomicU64::new(0),
            mappings: SpinMutex::new(VecDeque::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> DomainId {
        self.id
    }

    /// Page-table root handed to the hardware.
    #[inline]
    pub fn root(&self) -> PhysAddr {
        self.root
    }

    #[inline]
    pub fn asid(&self) -> Asid {
        self.asid
    }

    #[inline]
    pub fn flags(&self) -> DomainFlags {
        self.flags
    }

    /// Mutation counter.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.mappings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the mapping list, most recent first.
    pub fn mappings(&self) -> Vec<Mapping> {
        self.mappings.lock().iter().copied().collect()
    }

    /// Add a mapping. Returns the new epoch.
    ///
    /// Arguments are checked before the lock is taken.
    pub fn map(&self, iova: Iova, pa: PhysAddr, len: u64, perms: MapPerms) -> Result<u64, IommuError> {
        check_range(iova, pa, len)?;

        let mapping = Mapping {
            iova,
            pa,
            len,
            perms,
        };
        let mut mappings = self.mappings.lock();
        mappings.push_front(mapping);
        Ok(self.epoch.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Remove the mapping with exactly this `(iova, len)`. Returns the new
    /// epoch.
    pub fn unmap(&self, iova: Iova, len: u64) -> Result<u64, IommuError> {
        let mut mappings = self.mappings.lock();
        let pos = mappings
            .iter()
            .position(|m| m.iova == iova && m.len == len)
            .ok_or(IommuError::NotFound)?;
        mappings.remove(pos);
        Ok(self.epoch.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Drop every mapping. Bumps the epoch once if anything was removed.
    /// Returns how many mappings were dropped.
    pub fn clear(&self) -> usize {
        let mut mappings = self.mappings.lock();
        let removed = mappings.len();
        if removed > 0 {
            mappings.clear();
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    /// Translate a device address through the most recent covering mapping.
    pub fn translate(&self, iova: Iova) -> Option<(PhysAddr, MapPerms)> {
        let mappings = self.mappings.lock();
        let m = mappings.iter().find(|m| m.contains(iova))?;
        let offset = iova.as_u64() - m.iova.as_u64();
        Some((m.pa.checked_add(offset)?, m.perms))
    }
}

impl fmt::Debug for IommuDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IommuDomain")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("asid", &self.asid)
            .field("flags", &self.flags)
            .field("epoch", &self.epoch())
            .finish()
    }
}

/// Reject empty ranges and ranges that wrap either address space.
pub(super) fn check_range(iova: Iova, pa: PhysAddr, len: u64) -> Result<(), IommuError> {
    if len == 0 {
        return Err(IommuError::InvalidArgument);
    }
    if iova.checked_end(len).is_none() || pa.checked_add(len).is_none() {
        return Err(IommuError::InvalidArgument);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn domain() -> IommuDomain {
        IommuDomain::new(DomainId(1), PhysAddr::new(0x8000_0000), Asid(1), DomainFlags::empty())
    }

    #[test]
    fn test_map_unmap_epoch() {
        let d = domain();
        assert_eq!(d.epoch(), 0);
        assert_eq!(d.map(Iova::new(0x1000), PhysAddr::new(0x2000), 4096, MapPerms::RW), Ok(1));
        assert_eq!(
            d.mappings(),
            [Mapping {
                iova: Iova::new(0x1000),
                pa: PhysAddr::new(0x2000),
                len: 4096,
                perms: MapPerms::RW,
            }]
        );
        assert_eq!(d.unmap(Iova::new(0x1000), 4096), Ok(2));
        assert!(d.is_empty());
        assert_eq!(d.unmap(Iova::new(0x1000), 4096), Err(IommuError::NotFound));
        assert_eq!(d.epoch(), 2);
    }

    #[test]
    fn test_rejected_map_changes_nothing() {
        let d = domain();
        assert_eq!(
            d.map(Iova::new(0x1000), PhysAddr::new(0x2000), 0, MapPerms::READ),
            Err(IommuError::InvalidArgument)
        );
        assert_eq!(
            d.map(Iova::new(u64::MAX), PhysAddr::new(0), 2, MapPerms::READ),
            Err(IommuError::InvalidArgument)
        );
        assert_eq!(d.epoch(), 0);
        assert!(d.is_empty());
    }

    #[test]
    fn test_unmap_requires_exact_length() {
        let d = domain();
        d.map(Iova::new(0x1000), PhysAddr::new(0x2000), 8192, MapPerms::READ).unwrap();
        assert_eq!(d.unmap(Iova::new(0x1000), 4096), Err(IommuError::NotFound));
        assert_eq!(d.epoch(), 1);
    }

    #[test]
    fn test_prepend_and_translate() {
        let d = domain();
        d.map(Iova::new(0x1000), PhysAddr::new(0xa000), 0x2000, MapPerms::READ).unwrap();
        d.map(Iova::new(0x1000), PhysAddr::new(0xf000), 0x1000, MapPerms::RW).unwrap();
        assert_eq!(d.mappings()[0].pa, PhysAddr::new(0xf000));
        assert_eq!(d.translate(Iova::new(0x1010)), Some((PhysAddr::new(0xf010), MapPerms::RW)));
        assert_eq!(d.translate(Iova::new(0x2010)), Some((PhysAddr::new(0xb010), MapPerms::READ)));
        assert_eq!(d.translate(Iova::new(0x3000)), None);
    }

    #[test]
    fn test_clear() {
        let d = domain();
        assert_eq!(d.clear(), 0);
        assert_eq!(d.epoch(), 0);
        d.map(Iova::new(0x1000), PhysAddr::new(0x2000), 4096, MapPerms::RW).unwrap();
        d.map(Iova::new(0x3000), PhysAddr::new(0x4000), 4096, MapPerms::RW).unwrap();
        assert_eq!(d.clear(), 2);
        assert_eq!(d.epoch(), 3);
    }

    #[test]
    fn test_concurrent_maps_count_exactly() {
        use std::sync::Arc;
        use std::thread;

        let d = Arc::new(domain());
        let workers: Vec<_> = (0..4u64)
            .map(|t| {
                let d = Arc::clone(&d);
                thread::spawn(move || {
                    for i in 0..100u64 {
                        let iova = Iova::new((t * 100 + i) * 0x1000);
                        d.map(iova, PhysAddr::new(0x10_0000), 0x1000, MapPerms::READ).unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(d.len(), 400);
        assert_eq!(d.epoch(), 400);
    }

    proptest! {
        #[test]
        fn prop_epoch_counts_successful_mutations(ops in prop::collection::vec((any::<bool>(), 0u64..4, 0u64..3), 0..64)) {
            let d = domain();
            let mut successes = 0u64;
            for (is_map, page, len_pages) in ops {
                let iova = Iova::new(page * 0x1000);
                let len = len_pages * 0x1000;
                let before = d.epoch();
                let result = if is_map {
                    d.map(iova, PhysAddr::new(0x10_0000), len, MapPerms::READ)
                } else {
                    d.unmap(iova, len)
                };
                match result {
                    Ok(epoch) => {
                        successes += 1;
                        prop_assert_eq!(epoch, before + 1);
                    }
                    Err(_) => prop_assert_eq!(d.epoch(), before),
                }
            }
            prop_assert_eq!(d.epoch(), successes);
        }
    }
}
