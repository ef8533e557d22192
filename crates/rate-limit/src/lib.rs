//! Rate limiting functionality for Petal.
//!
//! This crate implements the per-identity request quota engine:
//! - Fixed-window quota records keyed by caller identity
//! - Quota tiers selected per route class and credential validity
//! - A two-tier store: an in-process hot map backed by durable storage
//! - A background sweeper evicting expired windows from both tiers
//!
//! The request path only ever touches the hot tier; durable storage is
//! read in bulk at startup and written back opportunistically.

#![deny(missing_docs)]

mod error;
mod manager;
mod policy;
mod record;
mod storage;
mod sweeper;

pub use error::{RateLimitError, StorageError};
pub use manager::{Admission, QuotaManager};
pub use policy::TierPolicy;
pub use record::QuotaRecord;
pub use storage::{DurableStore, MemoryStore, RedisStore};
pub use sweeper::Sweeper;
