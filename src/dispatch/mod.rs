//! Operation Dispatch Interface
//!
//! Wire-level entry point used by the IPC layer.
//!
//! # Current Operations
//! - `0xA0`: map(domain, iova, pa, len, perms)
//! - `0xA1`: unmap(domain, iova, len)
//! - `0xA2`: revoke(domain) - drop every mapping and capability of a domain

mod handler;
mod validate;

pub use handler::{dispatch, numbers, Status};
pub use validate::{MapRequest, UnmapRequest};
