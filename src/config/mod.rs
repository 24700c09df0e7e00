//! Configuration model for lockutil.
//!
//! The policy constants of the locking protocol (age window, backoff, heartbeat)
//! are defaults rather than invariants, so they live in an optional YAML file.
//! Unknown fields are ignored for forward compatibility.

mod model;
mod operations;


// Re-export public API
pub use model::LockConfig;
pub use operations::{CONFIG_ENV, SYSTEM_CONFIG_PATH};
