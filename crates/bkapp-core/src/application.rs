//! The BkApp custom resource.
//!
//! A BkApp describes a deployed PaaS workload: the image it is built from and
//! the processes it runs. Reconcilers only mutate its status and finalizers;
//! the spec is read-only to them.

use std::sync::LazyLock;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, OwnerReference};
use kube::{CustomResource, Resource};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::conditions::{self, NewCondition};
use crate::Error;

pub const GROUP: &str = "paas.bk.tencent.com";
pub const VERSION: &str = "v1alpha2";
pub const KIND: &str = "BkApp";

/// Finalizer token owned by the BkApp controller.
pub const FINALIZER_NAME: &str = "bkapp.paas.bk.tencent.com/finalizer";

/// Label carrying the owning application name.
pub const BKAPP_NAME_KEY: &str = "bkapp.paas.bk.tencent.com/name";
/// Label carrying the role of a child object.
pub const RESOURCE_TYPE_KEY: &str = "bkapp.paas.bk.tencent.com/resource-type";
/// Label carrying the hook type of a hook workload.
pub const HOOK_TYPE_KEY: &str = "bkapp.paas.bk.tencent.com/hook-type";

/// `resource-type` value of hook workloads.
pub const RESOURCE_TYPE_HOOK: &str = "hook";

/// Condition type reporting whether the application is available.
pub const CONDITION_APP_AVAILABLE: &str = "AppAvailable";
/// Reason set on `AppAvailable` while deletion waits for hooks.
pub const REASON_TERMINATING: &str = "Terminating";

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").expect("valid label regex")
});

/// Desired state of a BkApp.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "paas.bk.tencent.com",
    version = "v1alpha2",
    kind = "BkApp",
    namespaced,
    status = "AppStatus",
    shortname = "bkapp",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    pub build: BuildConfig,
    #[serde(default)]
    pub processes: Vec<Process>,
}

/// Image the application runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

/// A process of the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub name: String,
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res_quota_plan: Option<String>,
    pub target_port: i32,
}

/// Observed state of a BkApp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Kind of lifecycle hook a hook workload executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookType {
    PreRelease,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::PreRelease => "pre-release",
        }
    }
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HookType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pre-release" => Ok(HookType::PreRelease),
            other => Err(Error::InvalidObject(format!("unknown hook type: {other}"))),
        }
    }
}

/// Returns true if `value` can be used as a Kubernetes label value.
pub fn is_valid_label_value(value: &str) -> bool {
    value.len() <= 63 && LABEL_VALUE.is_match(value)
}

impl BkApp {
    /// Whether a deletion marker has been set.
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, token: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|t| t == token))
    }

    /// Adds `token` unless already present. Returns true if the list changed.
    pub fn add_finalizer(&mut self, token: &str) -> bool {
        if self.has_finalizer(token) {
            return false;
        }
        self.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(token.to_string());
        true
    }

    /// Removes every occurrence of `token`. Returns true if the list changed.
    pub fn remove_finalizer(&mut self, token: &str) -> bool {
        let Some(finalizers) = self.metadata.finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|t| t != token);
        finalizers.len() != before
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }

    pub fn find_condition(&self, type_: &str) -> Option<&Condition> {
        conditions::find_condition(self.conditions(), type_)
    }

    /// Sets a status condition, stamping it with the current generation.
    /// Returns true if the status changed.
    pub fn set_condition(&mut self, condition: NewCondition) -> bool {
        let generation = self.metadata.generation;
        let status = self.status.get_or_insert_with(AppStatus::default);
        conditions::set_condition(
            &mut status.conditions,
            condition.observed_generation(generation),
        )
    }

    /// Controller owner reference pointing at this application, as carried by
    /// the children it owns.
    pub fn controller_owner_reference(&self) -> Option<OwnerReference> {
        let mut reference = self.controller_owner_ref(&())?;
        reference.block_owner_deletion = Some(true);
        Some(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn make_app() -> BkApp {
        let mut app = BkApp::new(
            "bkapp-sample",
            AppSpec {
                build: BuildConfig {
                    image: "nginx:latest".to_string(),
                    image_pull_policy: None,
                },
                processes: vec![Process {
                    name: "web".to_string(),
                    replicas: 2,
                    res_quota_plan: Some("default".to_string()),
                    target_port: 80,
                }],
            },
        );
        app.metadata.namespace = Some("default".to_string());
        app.metadata.uid = Some("0b6f6a3c-uid".to_string());
        app
    }

    #[test]
    fn test_finalizer_add_remove() {
        let mut app = make_app();
        assert!(!app.has_finalizer(FINALIZER_NAME));

        assert!(app.add_finalizer(FINALIZER_NAME));
        assert!(!app.add_finalizer(FINALIZER_NAME));
        assert!(app.has_finalizer(FINALIZER_NAME));
        assert_eq!(app.metadata.finalizers.as_ref().unwrap().len(), 1);

        assert!(app.remove_finalizer(FINALIZER_NAME));
        assert!(!app.remove_finalizer(FINALIZER_NAME));
        assert!(!app.has_finalizer(FINALIZER_NAME));
    }

    #[test]
    fn test_remove_finalizer_keeps_foreign_tokens() {
        let mut app = make_app();
        app.add_finalizer("example.com/other");
        app.add_finalizer(FINALIZER_NAME);

        app.remove_finalizer(FINALIZER_NAME);
        assert_eq!(
            app.metadata.finalizers,
            Some(vec!["example.com/other".to_string()])
        );
    }

    #[test]
    fn test_deletion_marker() {
        let mut app = make_app();
        assert!(!app.is_being_deleted());
        app.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(app.is_being_deleted());
    }

    #[test]
    fn test_hook_type_round_trip() {
        assert_eq!("pre-release".parse::<HookType>().unwrap(), HookType::PreRelease);
        assert_eq!(HookType::PreRelease.to_string(), "pre-release");
        assert!("post-release".parse::<HookType>().is_err());
    }

    #[test]
    fn test_label_value_validation() {
        assert!(is_valid_label_value("bkapp-sample"));
        assert!(is_valid_label_value(""));
        assert!(!is_valid_label_value("-leading-dash"));
        assert!(!is_valid_label_value("has space"));
        assert!(!is_valid_label_value(&"a".repeat(64)));
    }

    #[test]
    fn test_controller_owner_reference() {
        let app = make_app();
        let reference = app.controller_owner_reference().unwrap();
        assert_eq!(reference.kind, KIND);
        assert_eq!(reference.api_version, format!("{GROUP}/{VERSION}"));
        assert_eq!(reference.name, "bkapp-sample");
        assert_eq!(reference.uid, "0b6f6a3c-uid");
        assert_eq!(reference.controller, Some(true));
    }

    #[test]
    fn test_wire_format() {
        let app: BkApp = serde_json::from_value(serde_json::json!({
            "apiVersion": "paas.bk.tencent.com/v1alpha2",
            "kind": "BkApp",
            "metadata": {"name": "bkapp-sample", "namespace": "default"},
            "spec": {
                "build": {"image": "nginx:latest"},
                "processes": [{"name": "web", "replicas": 1, "targetPort": 80}]
            },
            "status": {
                "conditions": [],
                "observedGeneration": 3
            }
        }))
        .unwrap();

        assert_eq!(app.spec.processes[0].target_port, 80);
        assert_eq!(app.status.as_ref().unwrap().observed_generation, Some(3));

        let value = serde_json::to_value(&app).unwrap();
        assert_eq!(value["spec"]["processes"][0]["targetPort"], 80);
        assert!(value["spec"]["build"].get("imagePullPolicy").is_none());
    }
}
