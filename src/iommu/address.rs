//! I/O Virtual and Physical Address Types
//!
//! Type-safe wrappers that keep device-side (IOVA) and physical addresses
//! from being mixed at compile time.

use core::fmt;

/// IOMMU page size (4 KiB)
pub const PAGE_SIZE: u64 = 4096;
/// Page size mask
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// An I/O virtual address, as issued by a device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Iova(u64);

impl Iova {
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// End of a `len`-byte range starting here, or `None` on overflow.
    #[inline]
    pub const fn checked_end(self, len: u64) -> Option<u64> {
        self.0.checked_add(len)
    }
}

/// A physical memory address.
///
/// Physical addresses cannot be dereferenced; they only travel into
/// translation records.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    #[inline]
    pub const fn checked_add(self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

/// Address-space identifier tagging one domain's translations.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Asid(pub u16);

impl fmt::Debug for Iova {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iova({:#018x})", self.0)
    }
}

impl fmt::Display for Iova {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#018x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        assert!(Iova::new(0x1000).is_aligned());
        assert!(!Iova::new(0x1234).is_aligned());
        assert!(PhysAddr::new(0x2000).is_aligned());
    }

    #[test]
    fn test_range_overflow() {
        assert_eq!(Iova::new(0x1000).checked_end(0x1000), Some(0x2000));
        assert_eq!(Iova::new(u64::MAX - 1).checked_end(4), None);
        assert_eq!(PhysAddr::new(u64::MAX).checked_add(1), None);
    }
}
