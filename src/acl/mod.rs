//! Access Control
//!
//! The allow-list decision engine and the audit ring it writes to.

pub mod audit;
pub mod engine;

pub use audit::{AuditLog, AuditRecord};
pub use engine::{AccessControl, AclEntry, AclError, ObjectId, OpCode, SubjectId};
