//! IOMMU Domain Mapping
//!
//! Per-domain IOVA mapping tables with epoch versioning.
//!
//! # Security Properties
//! - Every mutation passes the access gate, so it has an audit record
//! - Mapping lists are never shared between domains
//! - The epoch moves only on success, by exactly one

pub mod address;
pub mod domain;
pub mod manager;

pub use address::{Asid, Iova, PhysAddr, PAGE_SIZE};
pub use domain::{DomainFlags, DomainId, IommuDomain, IommuError, MapPerms, Mapping};
pub use manager::{AccessGate, BulkMapError, DomainManager, NoTlb, TlbInvalidator};
