//! The routing controller and the completion gate.
//!
//! The router turns free-form model output into a closed set of
//! directives; the gatekeeper structurally overrides premature
//! termination.

pub mod gatekeeper;
pub mod router;

pub use gatekeeper::{evaluate, GateDecision};
pub use router::Router;
