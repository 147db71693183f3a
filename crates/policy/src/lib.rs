//! Host-capability policy for executed scripts.
//!
//! Scripts reach the host only through the utility modules the harness binds
//! (filesystem, process, environment). Each of those operations asks the
//! [`Policy`] first. The default policy allows everything: script execution
//! is deliberately not sandboxed, and a tighter policy narrows what the host
//! modules will do without turning them into a security boundary.

mod capability;
mod error;
mod policy;

pub use capability::{CapabilityKind, CapabilityRequest};
pub use error::{Error, Result};
pub use policy::{AllowRules, Decision, DenyRules, Policy};
