//! BkApp operator.
//!
//! Provides:
//! - The finalizer reconcilers guarding deletion while hooks run
//! - The hook completion checker
//! - The pipeline driver and requeue policy
//! - Resource stores (Kubernetes, in-memory)
//! - Controller wiring for the kube runtime

pub mod controller;
pub mod finalizer;
pub mod hooks;
pub mod kubernetes;
pub mod memory;
pub mod pipeline;
pub mod requeue;

#[cfg(test)]
mod test_utils;

pub use controller::Context;
pub use finalizer::{FinalizerAttacher, FinalizerReconciler};
pub use hooks::{HookCompletionChecker, PodPhase};
pub use kubernetes::KubeStore;
pub use memory::MemoryStore;
pub use pipeline::{PassOutcome, Pipeline};
pub use requeue::{BlockedAttempts, Requeue};
