//! Finalizer handling for BkApps.
//!
//! [`FinalizerReconciler`] holds back physical deletion of an application
//! while one of its hook workloads is still executing. Waiting is expressed by
//! aborting the pass; the driver schedules the retry.

use std::sync::Arc;

use async_trait::async_trait;
use bkapp_core::application::{CONDITION_APP_AVAILABLE, FINALIZER_NAME, REASON_TERMINATING};
use bkapp_core::{
    BkApp, ConditionStatus, NewCondition, ReconcileContext, ReconcileResult, Reconciler,
    ResourceStore,
};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::hooks::HookCompletionChecker;

pub const BLOCKED_MESSAGE: &str = "Deletion is blocked because some hooks are still running";

/// Removes the BkApp finalizer once deletion is safe.
pub struct FinalizerReconciler {
    store: Arc<dyn ResourceStore>,
    hooks: HookCompletionChecker,
}

impl FinalizerReconciler {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            hooks: HookCompletionChecker::new(store.clone()),
            store,
        }
    }

    async fn release(&self, ctx: &ReconcileContext, app: &mut BkApp) -> ReconcileResult {
        let mut updated = app.clone();
        updated.remove_finalizer(FINALIZER_NAME);
        match ctx
            .guard("remove finalizer", self.store.update_application(&updated))
            .await
        {
            Ok(stored) => {
                info!(app = %app.name_any(), "Finalizer removed");
                *app = stored;
                ReconcileResult::proceed()
            }
            Err(e) => ReconcileResult::with_error(e),
        }
    }

    async fn block(&self, ctx: &ReconcileContext, app: &mut BkApp) -> ReconcileResult {
        let mut updated = app.clone();
        let changed = updated.set_condition(NewCondition::new(
            CONDITION_APP_AVAILABLE,
            ConditionStatus::False,
            REASON_TERMINATING,
            BLOCKED_MESSAGE,
        ));
        if changed {
            match ctx
                .guard(
                    "update status",
                    self.store.update_application_status(&updated),
                )
                .await
            {
                Ok(stored) => *app = stored,
                Err(e) => return ReconcileResult::with_error(e),
            }
        }
        info!(app = %app.name_any(), "Deletion blocked by running hooks");
        ReconcileResult::abort()
    }
}

#[async_trait]
impl Reconciler for FinalizerReconciler {
    fn name(&self) -> &'static str {
        "finalizer"
    }

    async fn reconcile(&self, ctx: &ReconcileContext, app: &mut BkApp) -> ReconcileResult {
        if !app.is_being_deleted() || !app.has_finalizer(FINALIZER_NAME) {
            return ReconcileResult::proceed();
        }

        match self.hooks.hooks_finished(ctx, app).await {
            Ok(true) => self.release(ctx, app).await,
            Ok(false) => self.block(ctx, app).await,
            Err(e) => ReconcileResult::with_error(e),
        }
    }
}

/// Adds the BkApp finalizer to live applications that lack it.
pub struct FinalizerAttacher {
    store: Arc<dyn ResourceStore>,
}

impl FinalizerAttacher {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reconciler for FinalizerAttacher {
    fn name(&self) -> &'static str {
        "finalizer-attach"
    }

    async fn reconcile(&self, ctx: &ReconcileContext, app: &mut BkApp) -> ReconcileResult {
        if app.is_being_deleted() || app.has_finalizer(FINALIZER_NAME) {
            return ReconcileResult::proceed();
        }

        let mut updated = app.clone();
        updated.add_finalizer(FINALIZER_NAME);
        match ctx
            .guard("add finalizer", self.store.update_application(&updated))
            .await
        {
            Ok(stored) => {
                debug!(app = %app.name_any(), "Finalizer added");
                *app = stored;
                ReconcileResult::proceed()
            }
            Err(e) => ReconcileResult::with_error(e),
        }
    }
}
