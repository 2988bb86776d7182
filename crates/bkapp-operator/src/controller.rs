//! Controller wiring.
//!
//! Watches BkApps and their hook pods, and runs one pipeline pass per
//! application event. The kube runtime guarantees at most one pass in flight
//! per application; different applications run concurrently up to the
//! configured limit.

use std::sync::Arc;
use std::time::Duration;

use bkapp_config::{OperatorConfig, RequeuePolicy};
use bkapp_core::application::{RESOURCE_TYPE_HOOK, RESOURCE_TYPE_KEY};
use bkapp_core::{BkApp, Error, ObjectKey, ReconcileContext, ResourceStore, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::kubernetes::KubeStore;
use crate::pipeline::{PassOutcome, Pipeline};
use crate::requeue::{BlockedAttempts, Requeue, requeue_for, requeue_for_error};

/// State shared by every reconcile pass.
pub struct Context {
    store: Arc<dyn ResourceStore>,
    pipeline: Pipeline,
    policy: RequeuePolicy,
    attempts: BlockedAttempts,
    pass_timeout: Duration,
    shutdown: CancellationToken,
}

impl Context {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        pipeline: Pipeline,
        config: &OperatorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            pipeline,
            policy: config.requeue.clone(),
            attempts: BlockedAttempts::new(),
            pass_timeout: config.pass_timeout,
            shutdown,
        }
    }

    /// Run one pass for `key` against freshly fetched state.
    ///
    /// Failed passes return the step's error unchanged; the caller decides
    /// the retry from its class.
    pub async fn reconcile_pass(&self, key: &ObjectKey) -> Result<Requeue> {
        let ctx = ReconcileContext::new(self.shutdown.child_token()).with_timeout(self.pass_timeout);

        let mut app = match ctx
            .guard(
                "get application",
                self.store.get_application(&key.namespace, &key.name),
            )
            .await
        {
            Ok(app) => app,
            Err(Error::NotFound(_)) => {
                debug!(app = %key, "Application gone");
                self.attempts.reset(key);
                return Ok(Requeue::OnChange);
            }
            Err(e) => return Err(e),
        };

        match self.pipeline.run(&ctx, &mut app).await {
            PassOutcome::Failed { error, .. } => Err(error),
            outcome => Ok(requeue_for(&self.policy, &self.attempts, key, &outcome)),
        }
    }
}

fn to_action(requeue: Requeue) -> Action {
    match requeue {
        Requeue::OnChange => Action::await_change(),
        Requeue::After(delay) => Action::requeue(delay),
    }
}

async fn reconcile(app: Arc<BkApp>, ctx: Arc<Context>) -> Result<Action> {
    let key = ObjectKey::of(app.as_ref())?;
    let span = info_span!("reconcile", app = %key);
    let requeue = ctx.reconcile_pass(&key).instrument(span).await?;
    Ok(to_action(requeue))
}

fn error_policy(app: Arc<BkApp>, error: &Error, ctx: Arc<Context>) -> Action {
    let requeue = requeue_for_error(&ctx.policy, error);
    warn!(
        app = ?app.metadata.name,
        error = %error,
        retryable = error.is_retryable(),
        ?requeue,
        "Pass failed"
    );
    to_action(requeue)
}

/// Run the BkApp controller until a termination signal arrives.
pub async fn run(client: Client, config: OperatorConfig, shutdown: CancellationToken) {
    let (apps, pods): (Api<BkApp>, Api<Pod>) = match &config.namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::with_client(client));
    let pipeline = Pipeline::bkapp(store.clone());
    info!(
        namespace = config.namespace.as_deref().unwrap_or("*"),
        concurrency = config.concurrency,
        steps = ?pipeline.step_names(),
        "Starting BkApp controller"
    );
    let ctx = Arc::new(Context::new(store, pipeline, &config, shutdown));

    let hook_pods =
        watcher::Config::default().labels(&format!("{RESOURCE_TYPE_KEY}={RESOURCE_TYPE_HOOK}"));

    Controller::new(apps, watcher::Config::default())
        .owns(pods, hook_pods)
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(app = %obj, ?action, "Reconciled"),
                // Already reported by error_policy.
                Err(controller::Error::ReconcilerFailed(_, obj)) => {
                    debug!(app = %obj, "Reconcile failed")
                }
                Err(e) => warn!(error = %e, "Controller error"),
            }
        })
        .await;

    info!("BkApp controller stopped");
}
