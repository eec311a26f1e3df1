//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (weaving-infra) implements. The core crate never depends on any
//! specific storage technology; `memory` provides an in-process store for
//! one-shot runs and tests.

pub mod memory;
pub mod workflow;
