//! Operation Dispatch
//!
//! Entry point for the IPC/syscall layer: decodes an operation code and its
//! raw argument words, runs the operation and returns a status word.
//!
//! # Security Considerations
//! - Only the listed operation codes are accepted
//! - Unknown codes return `Unsupported`
//! - Arguments are validated before any lookup or authorization

use core::fmt;

use log::{debug, warn};

use super::validate;
use crate::acl::{AclError, SubjectId};
use crate::cap::CapError;
use crate::iommu::{BulkMapError, DomainId, IommuError};
use crate::AuthCore;

/// Operation codes.
pub mod numbers {
    pub const OP_IOMMU_MAP: u32 = 0xA0;
    pub const OP_IOMMU_UNMAP: u32 = 0xA1;
    pub const OP_IOMMU_REVOKE: u32 = 0xA2;
}

/// Status word returned to callers.
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    /// Operation not permitted (not transferable)
    NotTransferable = -1,
    /// No such entry
    NotFound = -2,
    /// Bad handle (unknown or revoked)
    Invalid = -9,
    /// Out of capability storage
    Exhausted = -12,
    /// Permission denied
    PermissionDenied = -13,
    /// Invalid argument
    InvalidArgument = -22,
    /// No space left in a table
    TableFull = -28,
    /// Unknown operation code
    Unsupported = -38,
}

impl Status {
    #[inline]
    pub const fn code(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

impl From<CapError> for Status {
    fn from(e: CapError) -> Self {
        match e {
            CapError::Invalid => Self::Invalid,
            CapError::Exhausted => Self::Exhausted,
            CapError::TableFull => Self::TableFull,
            CapError::NotTransferable => Self::NotTransferable,
            CapError::NotFound => Self::NotFound,
            CapError::InvalidArgument => Self::InvalidArgument,
        }
    }
}

impl From<AclError> for Status {
    fn from(e: AclError) -> Self {
        match e {
            AclError::Full => Self::TableFull,
        }
    }
}

impl From<IommuError> for Status {
    fn from(e: IommuError) -> Self {
        match e {
            IommuError::InvalidArgument => Self::InvalidArgument,
            IommuError::NotFound => Self::NotFound,
            IommuError::PermissionDenied => Self::PermissionDenied,
        }
    }
}

impl From<BulkMapError> for Status {
    fn from(e: BulkMapError) -> Self {
        e.error.into()
    }
}

/// Dispatch an operation on behalf of `subject`.
///
/// # Returns
/// `0` on success, a negative [`Status`] code on failure.
pub fn dispatch(core: &AuthCore, subject: SubjectId, op: u32, args: &[u64; 6]) -> i64 {
    let result = match op {
        numbers::OP_IOMMU_MAP => op_map(core, subject, args),
        numbers::OP_IOMMU_UNMAP => op_unmap(core, subject, args),
        numbers::OP_IOMMU_REVOKE => op_revoke(core, subject, args),
        _ => {
            warn!("[DISPATCH] unknown operation {:#x}", op);
            Err(Status::Unsupported)
        }
    };

    match result {
        Ok(()) => Status::Ok.code(),
        Err(status) => {
            debug!("[DISPATCH] op {:#x} failed: {}", op, status);
            status.code()
        }
    }
}

fn op_map(core: &AuthCore, subject: SubjectId, args: &[u64; 6]) -> Result<(), Status> {
    let req = validate::validate_map(args)?;
    core.iommu_map(subject, req.domain, req.iova, req.pa, req.len, req.perms)?;
    Ok(())
}

fn op_unmap(core: &AuthCore, subject: SubjectId, args: &[u64; 6]) -> Result<(), Status> {
    let req = validate::validate_unmap(args)?;
    core.iommu_unmap(subject, req.domain, req.iova, req.len)?;
    Ok(())
}

fn op_revoke(core: &AuthCore, subject: SubjectId, args: &[u64; 6]) -> Result<(), Status> {
    let domain: DomainId = validate::validate_domain(args[0])?;
    core.iommu_revoke_domain(subject, domain)?;
    Ok(())
}
