//! Lease-based distributed mutual exclusion.
//!
//! This crate provides a single-key lock that:
//! - Grants a lease to at most one holder token at a time
//! - Lets the current holder extend the lease before it expires
//! - Releases only when the caller proves ownership with the same token
//! - Expires naturally so a crashed holder cannot wedge the fleet
//!
//! Store failures never surface as errors from [`LeaseLock`]; they are
//! logged and reported as "not held".

mod error;
mod lock;
mod memory;
mod redis_store;
mod token;

pub use error::LeaseError;
pub use lock::{
    DEFAULT_CALL_TIMEOUT, LeaseLock, LeaseOutcome, LeaseStore, MAX_LEASE_TTL, ReleaseOutcome,
};
pub use memory::{LeaseTable, MemoryLeaseStore};
pub use redis_store::RedisLeaseStore;
pub use token::HolderToken;
