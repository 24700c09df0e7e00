//! Least-privilege handling for the setgid lock helper.
//!
//! The helper starts with the trusted (mail) group as its effective group,
//! drops to the real group before doing anything else, and borrows the
//! trusted group back only around single filesystem mutations through an
//! [`Escalation`]. The trusted group is only lent out for the caller's own
//! mailbox lock.

mod access;
mod context;

pub use access::{AccessDecision, check_access, mode_permits};
pub use context::{Elevation, Escalation, PrivilegeContext};
