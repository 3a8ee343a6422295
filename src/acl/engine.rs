//! Access-Control Decision Engine
//!
//! A bounded allow-list of exact `(subject, operation, object)` triples.
//!
//! # Security Model
//! - Default deny: anything not explicitly listed is refused
//! - Exact-triple match only, no wildcards
//! - Every decision is written to the [`AuditLog`] before it is returned,
//!   so no authorized side effect can happen without an audit record

use alloc::vec::Vec;
use core::fmt;

use log::{debug, warn};
use spin::RwLock;

use super::audit::AuditLog;

/// The party asking for access.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct SubjectId(pub u64);

/// Operation code carried in ACL entries and audit records.
///
/// The IOMMU codes are part of the dispatch contract and must not change.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct OpCode(pub u32);

impl OpCode {
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x02);
    pub const EXECUTE: Self = Self(0x03);

    /// Map an IOMMU range.
    pub const IOMMU_MAP: Self = Self(0xA0);
    /// Unmap an IOMMU range.
    pub const IOMMU_UNMAP: Self = Self(0xA1);
    /// Revoke all mappings and capabilities of a domain.
    pub const IOMMU_REVOKE: Self = Self(0xA2);
}

/// 128-bit object identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct ObjectId(pub u128);

impl ObjectId {
    const DOMAIN_TAG: u128 = 0x10u128 << 64;

    /// Identifier under which IOMMU domain `id` is named in ACL entries.
    pub const fn domain(id: u64) -> Self {
        Self(Self::DOMAIN_TAG | id as u128)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#034x}", self.0)
    }
}

/// One allow entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AclEntry {
    pub subject: SubjectId,
    pub op: OpCode,
    pub object: ObjectId,
}

/// Error type for ACL administration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclError {
    /// The allow-list is at capacity; the entry was not added.
    Full,
}

impl fmt::Display for AclError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "access control list full"),
        }
    }
}

/// The decision engine: allow-list plus its audit ring.
#[derive(Debug)]
pub struct AccessControl {
    entries: RwLock<Vec<AclEntry>>,
    capacity: usize,
    audit: AuditLog,
}

impl AccessControl {
    pub fn new(capacity: usize, audit_capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::with_capacity(capacity)),
            capacity,
            audit: AuditLog::new(audit_capacity),
        }
    }

    /// Drop every entry and audit record.
    pub fn init(&self) {
        self.entries.write().clear();
        self.audit.clear();
    }

    /// Add an allow entry.
    ///
    /// Adding a triple that is already listed succeeds without using a slot.
    /// A full list fails closed: the caller gets `AclError::Full` and the
    /// triple stays denied.
    pub fn acl_add(&self, subject: SubjectId, op: OpCode, object: ObjectId) -> Result<(), AclError> {
        let entry = AclEntry {
            subject,
            op,
            object,
        };
        let mut entries = self.entries.write();
        if entries.contains(&entry) {
            return Ok(());
        }
        if entries.len() >= self.capacity {
            warn!("[ACL] entry rejected, list full ({})", self.capacity);
            return Err(AclError::Full);
        }
        entries.push(entry);
        Ok(())
    }

    /// Decide, log, then return.
    pub fn authorize(&self, subject: SubjectId, op: OpCode, object: ObjectId) -> bool {
        let allowed = self
            .entries
            .read()
            .iter()
            .any(|e| e.subject == subject && e.op == op && e.object == object);

        self.audit.record(subject, op, object, allowed);
        if !allowed {
            debug!("[ACL] denied subject={} op={:#x} object={}", subject.0, op.0, object);
        }
        allowed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> Vec<AclEntry> {
        self.entries.read().clone()
    }

    #[inline]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SubjectId = SubjectId(1);
    const OBJ1: ObjectId = ObjectId(0xdead_beef_0000_0000_0000_0000_0000_0001);

    #[test]
    fn test_default_deny() {
        let acl = AccessControl::new(4, 4);
        assert!(!acl.authorize(A, OpCode::READ, OBJ1));
        assert_eq!(acl.audit().total(), 1);
        assert!(!acl.audit().last().unwrap().allowed);
    }

    #[test]
    fn test_exact_triple_match() {
        let acl = AccessControl::new(4, 8);
        acl.acl_add(A, OpCode::READ, OBJ1).unwrap();

        assert!(acl.authorize(A, OpCode::READ, OBJ1));
        let tail = acl.audit().last().unwrap();
        assert_eq!((tail.op, tail.object, tail.allowed), (OpCode::READ, OBJ1, true));

        assert!(!acl.authorize(A, OpCode::WRITE, OBJ1));
        let tail = acl.audit().last().unwrap();
        assert_eq!((tail.op, tail.object, tail.allowed), (OpCode::WRITE, OBJ1, false));

        assert!(!acl.authorize(SubjectId(2), OpCode::READ, OBJ1));
        assert!(!acl.authorize(A, OpCode::READ, ObjectId(OBJ1.0 + 1)));
        assert_eq!(acl.audit().total(), 4);
    }

    #[test]
    fn test_full_list_fails_closed() {
        let acl = AccessControl::new(1, 4);
        acl.acl_add(A, OpCode::READ, OBJ1).unwrap();
        assert_eq!(acl.acl_add(A, OpCode::WRITE, OBJ1), Err(AclError::Full));
        assert!(!acl.authorize(A, OpCode::WRITE, OBJ1));
        assert_eq!(acl.len(), 1);
    }

    #[test]
    fn test_duplicate_add_uses_no_slot() {
        let acl = AccessControl::new(1, 4);
        acl.acl_add(A, OpCode::READ, OBJ1).unwrap();
        assert!(acl.acl_add(A, OpCode::READ, OBJ1).is_ok());
        assert_eq!(acl.entries().len(), 1);
    }

    #[test]
    fn test_domain_object_ids_are_distinct() {
        assert_ne!(ObjectId::domain(1), ObjectId::domain(2));
        assert_ne!(ObjectId::domain(1), ObjectId(1));
    }
}
