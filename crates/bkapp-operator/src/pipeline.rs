//! Reconcile pipeline driver.
//!
//! Runs the registered reconcilers in order against one application and stops
//! at the first step that asks to abort.

use std::sync::Arc;
use std::time::Duration;

use bkapp_core::{BkApp, Error, ReconcileContext, Reconciler, ResourceStore};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::finalizer::{FinalizerAttacher, FinalizerReconciler};

/// Result of one pass over the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// Every step ran.
    Completed,
    /// A step is waiting on something external and asked for a later retry.
    Aborted {
        step: &'static str,
        requeue_after: Option<Duration>,
    },
    /// A step failed.
    Failed { step: &'static str, error: Error },
}

/// Ordered list of reconcile steps.
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Reconciler>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The BkApp pipeline: finalizer release first, then finalizer attachment.
    pub fn bkapp(store: Arc<dyn ResourceStore>) -> Self {
        Self::new()
            .with_step(Arc::new(FinalizerReconciler::new(store.clone())))
            .with_step(Arc::new(FinalizerAttacher::new(store)))
    }

    pub fn with_step(mut self, step: Arc<dyn Reconciler>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step against `app` until one aborts.
    pub async fn run(&self, ctx: &ReconcileContext, app: &mut BkApp) -> PassOutcome {
        for step in &self.steps {
            let step_name = step.name();
            let result = step.reconcile(ctx, app).await;
            if !result.should_abort() {
                debug!(app = %app.name_any(), step = step_name, "Step completed");
                continue;
            }

            let requeue_after = result.requeue_delay();
            return match result.into_error() {
                Some(error) => {
                    debug!(app = %app.name_any(), step = step_name, error = %error, "Step failed");
                    PassOutcome::Failed {
                        step: step_name,
                        error,
                    }
                }
                None => {
                    info!(app = %app.name_any(), step = step_name, "Pass aborted, retrying later");
                    PassOutcome::Aborted {
                        step: step_name,
                        requeue_after,
                    }
                }
            };
        }
        PassOutcome::Completed
    }
}
