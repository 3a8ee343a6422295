//! Dispatch Argument Validation
//!
//! Turns raw argument words into typed requests before any subsystem sees
//! them.
//!
//! # Security Principles
//! - Validate ALL inputs before use
//! - Fail-secure: anything unrecognized is rejected
//! - Unknown permission bits are an error, never silently masked
//! - Address ranges that wrap around are rejected

use super::handler::Status;
use crate::iommu::{DomainId, Iova, MapPerms, PhysAddr};

/// A validated `0xA0` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRequest {
    pub domain: DomainId,
    pub iova: Iova,
    pub pa: PhysAddr,
    pub len: u64,
    pub perms: MapPerms,
}

/// A validated `0xA1` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmapRequest {
    pub domain: DomainId,
    pub iova: Iova,
    pub len: u64,
}

/// Validate a domain argument.
pub fn validate_domain(raw: u64) -> Result<DomainId, Status> {
    let domain = DomainId(raw);
    if domain.is_null() {
        return Err(Status::InvalidArgument);
    }
    Ok(domain)
}

/// Validate a range: non-empty and not wrapping.
fn validate_range(start: u64, len: u64) -> Result<(), Status> {
    if len == 0 {
        return Err(Status::InvalidArgument);
    }
    start.checked_add(len).ok_or(Status::InvalidArgument)?;
    Ok(())
}

/// Validate permission bits.
pub fn validate_perms(raw: u64) -> Result<MapPerms, Status> {
    let bits = u32::try_from(raw).map_err(|_| Status::InvalidArgument)?;
    let perms = MapPerms::from_bits(bits).ok_or(Status::InvalidArgument)?;
    if perms.is_empty() {
        return Err(Status::InvalidArgument);
    }
    Ok(perms)
}

/// Arguments: `[domain, iova, pa, len, perms]`.
pub fn validate_map(args: &[u64; 6]) -> Result<MapRequest, Status> {
    let domain = validate_domain(args[0])?;
    let (iova, pa, len) = (args[1], args[2], args[3]);
    validate_range(iova, len)?;
    validate_range(pa, len)?;
    let perms = validate_perms(args[4])?;

    Ok(MapRequest {
        domain,
        iova: Iova::new(iova),
        pa: PhysAddr::new(pa),
        len,
        perms,
    })
}

/// Arguments: `[domain, iova, len]`.
pub fn validate_unmap(args: &[u64; 6]) -> Result<UnmapRequest, Status> {
    let domain = validate_domain(args[0])?;
    validate_range(args[1], args[2])?;

    Ok(UnmapRequest {
        domain,
        iova: Iova::new(args[1]),
        len: args[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_domain() {
        assert_eq!(validate_domain(0), Err(Status::InvalidArgument));
        assert_eq!(validate_domain(3), Ok(DomainId(3)));
    }

    #[test]
    fn test_zero_length() {
        let args = [1, 0x1000, 0x2000, 0, MapPerms::RW.bits() as u64, 0];
        assert_eq!(validate_map(&args), Err(Status::InvalidArgument));
    }

    #[test]
    fn test_overflow() {
        let args = [1, u64::MAX - 10, 0x2000, 100, MapPerms::READ.bits() as u64, 0];
        assert_eq!(validate_map(&args), Err(Status::InvalidArgument));
        let args = [1, u64::MAX - 10, 100, 0, 0, 0];
        assert_eq!(validate_unmap(&args), Err(Status::InvalidArgument));
    }

    #[test]
    fn test_unknown_perm_bits() {
        assert_eq!(validate_perms(1 << 9), Err(Status::InvalidArgument));
        assert_eq!(validate_perms(u64::MAX), Err(Status::InvalidArgument));
        assert_eq!(validate_perms(0), Err(Status::InvalidArgument));
        assert_eq!(validate_perms(3), Ok(MapPerms::RW));
    }

    #[test]
    fn test_valid_map() {
        let args = [2, 0x1000, 0x2000, 4096, 3, 0];
        let req = validate_map(&args).unwrap();
        assert_eq!(req.domain, DomainId(2));
        assert_eq!(req.iova, Iova::new(0x1000));
        assert_eq!(req.pa, PhysAddr::new(0x2000));
        assert_eq!(req.perms, MapPerms::RW);
    }
}
