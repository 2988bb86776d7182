//! Hook workload completion checks.

use std::sync::Arc;

use bkapp_core::application::{
    BKAPP_NAME_KEY, HOOK_TYPE_KEY, RESOURCE_TYPE_HOOK, RESOURCE_TYPE_KEY, is_valid_label_value,
};
use bkapp_core::{
    BkApp, HookType, LabelSelector, ObjectKey, OwnerRef, ReconcileContext, ResourceStore, Result,
};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, warn};

/// Execution phase of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Phase of `pod`. A missing or unrecognised phase reads as `Unknown`.
    pub fn of(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    /// Whether the pod has conclusively stopped executing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

/// Decides whether the hook workloads of an application have finished.
pub struct HookCompletionChecker {
    store: Arc<dyn ResourceStore>,
}

impl HookCompletionChecker {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Label selector matching every hook workload of `app`.
    pub fn selector(app: &BkApp) -> LabelSelector {
        LabelSelector::new()
            .with(BKAPP_NAME_KEY, app.name_any())
            .with(RESOURCE_TYPE_KEY, RESOURCE_TYPE_HOOK)
    }

    /// Returns true when no hook workload owned by `app` is still executing.
    ///
    /// No hook workloads at all counts as finished. Store failures are
    /// returned unchanged.
    pub async fn hooks_finished(&self, ctx: &ReconcileContext, app: &BkApp) -> Result<bool> {
        let key = ObjectKey::of(app)?;
        // No pod can carry a name label that is not a valid label value.
        if !is_valid_label_value(&key.name) {
            debug!(app = %key, "Name is not a label value, no hook can match");
            return Ok(true);
        }
        let owner = OwnerRef::of_app(app)?;
        let selector = Self::selector(app);

        let pods = ctx
            .guard(
                "list hook pods",
                self.store.list_pods(&key.namespace, &selector, Some(&owner)),
            )
            .await?;

        for pod in &pods {
            let phase = PodPhase::of(pod);
            if !phase.is_terminal() {
                debug!(
                    app = %app.name_any(),
                    pod = %pod.name_any(),
                    hook_type = hook_type_label(pod).unwrap_or("unknown"),
                    ?phase,
                    "Hook still executing"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn hook_type_label(pod: &Pod) -> Option<&str> {
    let value = pod.labels().get(HOOK_TYPE_KEY)?;
    if value.parse::<HookType>().is_err() {
        warn!(pod = %pod.name_any(), hook_type = %value, "Unrecognised hook type");
    }
    Some(value.as_str())
}
