//! Cache module for turnstile.
//!
//! This module provides the refreshable member directory:
//! - In-memory snapshot mapping lowercase email -> membership record
//! - Single-flight refresh coordination with stuck-refresh takeover
//! - Paginated bulk load with generation-checked commit

pub mod directory;
pub mod snapshot;

pub use directory::{CustomerSource, MemberDirectory};
pub use snapshot::{MemberSnapshot, SnapshotHolder};
