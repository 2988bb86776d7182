//! Fixtures shared by the operator tests.

use std::collections::BTreeMap;

use bkapp_core::application::{
    BKAPP_NAME_KEY, BuildConfig, HOOK_TYPE_KEY, Process, RESOURCE_TYPE_HOOK, RESOURCE_TYPE_KEY,
};
use bkapp_core::{AppSpec, BkApp, HookType};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

pub fn make_app() -> BkApp {
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
    app
}

/// A pre-release hook pod owned by `app`.
pub fn hook_pod(app: &BkApp, name: &str, phase: Option<&str>) -> Pod {
    let labels = BTreeMap::from([
        (BKAPP_NAME_KEY.to_string(), app.name_any()),
        (RESOURCE_TYPE_KEY.to_string(), RESOURCE_TYPE_HOOK.to_string()),
        (
            HOOK_TYPE_KEY.to_string(),
            HookType::PreRelease.as_str().to_string(),
        ),
    ]);
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: app.namespace(),
            labels: Some(labels),
            owner_references: app.controller_owner_reference().map(|r| vec![r]),
            ..ObjectMeta::default()
        },
        spec: None,
        status: phase.map(|p| PodStatus {
            phase: Some(p.to_string()),
            ..PodStatus::default()
        }),
    }
}
