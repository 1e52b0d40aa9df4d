//! Per-kind access policies
//!
//! `PolicyEngine` resolves the effective `Policy` for a kind (stored
//! override or relay-wide default) and applies operator updates.
//! Authorization against a resolved policy lives on `Policy` itself;
//! the admin bypass is applied by callers.

mod engine;

pub use engine::{PolicyEngine, PolicyError, PolicyResult};
