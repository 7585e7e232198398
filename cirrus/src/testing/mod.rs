//! Test doubles for the backend, clock, and resolver seams.
//!
//! These are plain implementations of the public traits, useful both for
//! this crate's own tests and for downstream consumers writing tests
//! against an orchestrator without a real provisioning backend.

mod fixtures;
mod mocks;

pub use fixtures::{graph_of, three_tier_specs};
pub use mocks::{CountingResolver, ManualClock, MockBackend};
