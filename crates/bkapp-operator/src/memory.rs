//! In-memory resource store.
//!
//! Behaves like the API server for the operations reconcilers use:
//! optimistic concurrency on `resourceVersion`, status kept apart from
//! metadata updates, and physical removal of a marked object once its last
//! finalizer is gone. Failures can be injected per operation.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bkapp_core::{BkApp, Error, LabelSelector, ObjectKey, OwnerRef, ResourceStore, Result};
use chrono::Utc;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

#[derive(Default)]
struct State {
    apps: BTreeMap<ObjectKey, BkApp>,
    pods: Vec<Pod>,
    version: u64,
    writes: usize,
    failures: Failures,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// One-shot failures, consumed by the next call of the operation.
#[derive(Default)]
struct Failures {
    get: Option<Error>,
    list_pods: Option<Error>,
    update: Option<Error>,
    update_status: Option<Error>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `app` as if created through the API, returning the stored copy.
    pub fn insert_application(&self, mut app: BkApp) -> BkApp {
        let mut state = self.lock();
        let key = ObjectKey::new(app.namespace().unwrap_or_default(), app.name_any());
        app.metadata.resource_version = Some(state.next_version());
        app.metadata.generation.get_or_insert(1);
        if app.metadata.uid.is_none() {
            app.metadata.uid = Some(format!("uid-{}", key));
        }
        state.apps.insert(key, app.clone());
        app
    }

    pub fn insert_pod(&self, mut pod: Pod) {
        let mut state = self.lock();
        pod.metadata.resource_version = Some(state.next_version());
        state.pods.push(pod);
    }

    /// Move a stored pod to `phase`. Returns false if no such pod exists.
    pub fn set_pod_phase(&self, namespace: &str, name: &str, phase: &str) -> bool {
        let mut state = self.lock();
        let version = state.next_version();
        let Some(pod) = state
            .pods
            .iter_mut()
            .find(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
        else {
            return false;
        };
        pod.status.get_or_insert_with(PodStatus::default).phase = Some(phase.to_string());
        pod.metadata.resource_version = Some(version);
        true
    }

    /// Set the deletion marker, or remove the object right away if it has no
    /// finalizers. Returns the stored object while it still exists.
    pub fn mark_for_deletion(&self, namespace: &str, name: &str) -> Option<BkApp> {
        let mut state = self.lock();
        let key = ObjectKey::new(namespace, name);
        let mut app = state.apps.get(&key)?.clone();
        if app.finalizers().is_empty() {
            state.apps.remove(&key);
            return None;
        }
        app.metadata.deletion_timestamp = Some(Time(Utc::now()));
        app.metadata.resource_version = Some(state.next_version());
        state.apps.insert(key, app.clone());
        Some(app)
    }

    pub fn application(&self, namespace: &str, name: &str) -> Option<BkApp> {
        self.lock()
            .apps
            .get(&ObjectKey::new(namespace, name))
            .cloned()
    }

    /// Number of accepted writes.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn fail_get(&self, error: Error) {
        self.lock().failures.get = Some(error);
    }

    pub fn fail_list_pods(&self, error: Error) {
        self.lock().failures.list_pods = Some(error);
    }

    pub fn fail_update(&self, error: Error) {
        self.lock().failures.update = Some(error);
    }

    pub fn fail_update_status(&self, error: Error) {
        self.lock().failures.update_status = Some(error);
    }

    /// Look up the stored object and check the caller's resourceVersion.
    fn current(state: &State, app: &BkApp) -> Result<ObjectKey> {
        let key = ObjectKey::of(app)?;
        let stored = state
            .apps
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("bkapp {}", key)))?;
        if stored.metadata.resource_version != app.metadata.resource_version {
            return Err(Error::Conflict(format!(
                "bkapp {}: resourceVersion {:?} is stale",
                key, app.metadata.resource_version
            )));
        }
        Ok(key)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_application(&self, namespace: &str, name: &str) -> Result<BkApp> {
        let mut state = self.lock();
        if let Some(err) = state.failures.get.take() {
            return Err(err);
        }
        let key = ObjectKey::new(namespace, name);
        state
            .apps
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("bkapp {}", key)))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        owner: Option<&OwnerRef>,
    ) -> Result<Vec<Pod>> {
        let mut state = self.lock();
        if let Some(err) = state.failures.list_pods.take() {
            return Err(err);
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| p.namespace().as_deref() == Some(namespace))
            .filter(|p| selector.matches(p.metadata.labels.as_ref()))
            .filter(|p| owner.is_none_or(|o| o.owns(*p)))
            .cloned()
            .collect())
    }

    async fn update_application(&self, app: &BkApp) -> Result<BkApp> {
        let mut state = self.lock();
        if let Some(err) = state.failures.update.take() {
            return Err(err);
        }
        let key = Self::current(&state, app)?;
        let stored = &state.apps[&key];

        let mut updated = app.clone();
        updated.status = stored.status.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        updated.metadata.resource_version = Some(state.next_version());
        state.writes += 1;

        if updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            state.apps.remove(&key);
        } else {
            state.apps.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn update_application_status(&self, app: &BkApp) -> Result<BkApp> {
        let mut state = self.lock();
        if let Some(err) = state.failures.update_status.take() {
            return Err(err);
        }
        let key = Self::current(&state, app)?;

        let mut updated = state.apps[&key].clone();
        updated.status = app.status.clone();
        updated.metadata.resource_version = Some(state.next_version());
        state.writes += 1;
        state.apps.insert(key, updated.clone());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_app;
    use bkapp_core::application::FINALIZER_NAME;

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let app = store.insert_application(make_app());

        let mut first = app.clone();
        first.add_finalizer(FINALIZER_NAME);
        store.update_application(&first).await.unwrap();

        // Second writer still holds the old resourceVersion.
        let mut second = app.clone();
        second.add_finalizer("example.com/other");
        let err = store.update_application(&second).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_metadata_update_keeps_status() {
        let store = MemoryStore::new();
        let mut app = store.insert_application(make_app());
        app.set_condition(bkapp_core::NewCondition::new(
            "AppAvailable",
            bkapp_core::ConditionStatus::True,
            "Running",
            "",
        ));
        let app = store.update_application_status(&app).await.unwrap();

        let mut without_status = app.clone();
        without_status.status = None;
        without_status.add_finalizer(FINALIZER_NAME);
        let updated = store.update_application(&without_status).await.unwrap();

        assert!(updated.find_condition("AppAvailable").is_some());
        assert!(updated.has_finalizer(FINALIZER_NAME));
    }

    #[tokio::test]
    async fn test_removing_last_finalizer_deletes_marked_object() {
        let store = MemoryStore::new();
        let mut app = make_app();
        app.add_finalizer(FINALIZER_NAME);
        store.insert_application(app);
        let mut marked = store.mark_for_deletion("default", "bkapp-sample").unwrap();

        marked.remove_finalizer(FINALIZER_NAME);
        store.update_application(&marked).await.unwrap();

        assert!(store.application("default", "bkapp-sample").is_none());
        assert!(matches!(
            store.get_application("default", "bkapp-sample").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let store = MemoryStore::new();
        store.insert_application(make_app());
        store.fail_get(Error::Store("timeout".to_string()));

        assert!(store.get_application("default", "bkapp-sample").await.is_err());
        assert!(store.get_application("default", "bkapp-sample").await.is_ok());
    }
}
