//! End-to-end tests.
//!
//! Each test boots the real router on an ephemeral port with in-memory
//! collaborators behind the service traits, then drives it over HTTP with a
//! plain reqwest client.

mod harness;

pub use harness::{HarnessOptions, TestHarness};
