//! Scripted node kinds and mock collaborators for tests.

pub mod harness;
pub mod kinds;
pub mod mocks;

pub use harness::{run_kind, run_kind_with};
pub use kinds::{AppendKind, CountingKind, FailKind, FixedKind, HaltKind, StopKind};
pub use mocks::{MockEmbedder, MockLlm};
