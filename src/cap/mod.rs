//! Capability-Based Security System
//!
//! Implements the object-capability model of the kernel.
//!
//! # Design
//! - The [`Registry`] owns every capability and mints opaque handles
//! - Each owner has a bounded [`CapTable`] of handles it holds
//! - Revocation flips a capability to `Invalid`; reference counts only
//!   govern when storage goes away
//!
//! # Security Properties
//! - Handles cannot be forged into validity: unknown, revoked, expired and
//!   freed handles are indistinguishable to callers
//! - Revocation is immediate for every new lookup

pub mod capability;
pub mod registry;
pub mod table;

pub use capability::{CapFlags, CapObject, Capability, CapabilityKind, Handle, OwnerId, Permissions};
pub use registry::{CapError, Registry};
pub use table::CapTable;
