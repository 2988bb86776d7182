//! Resource store abstraction.
//!
//! Reconcilers never talk to the cluster directly; they receive a
//! [`ResourceStore`] at construction time. The kube-backed implementation and
//! an in-memory one live in the operator crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use serde::{Deserialize, Serialize};

use crate::application::{BkApp, KIND};
use crate::{Error, Result};

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Whether every requirement is present in `labels`.
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.0
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)).is_some_and(|actual| actual == v))
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

/// Reference to an owning object, as recorded on its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
    pub uid: Option<String>,
}

impl OwnerRef {
    pub fn of_app(app: &BkApp) -> Result<Self> {
        let meta = app.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| Error::InvalidObject("application has no name".to_string()))?;
        Ok(Self {
            kind: KIND.to_string(),
            name,
            uid: meta.uid.clone().filter(|u| !u.is_empty()),
        })
    }

    /// Whether `reference` points at this owner. The uid decides when both
    /// sides carry one; otherwise kind and name must match.
    pub fn is_referenced_by(&self, reference: &OwnerReference) -> bool {
        match &self.uid {
            Some(uid) if !reference.uid.is_empty() => &reference.uid == uid,
            _ => reference.kind == self.kind && reference.name == self.name,
        }
    }

    /// Whether any owner reference of `obj` points at this owner.
    pub fn owns<K: Resource>(&self, obj: &K) -> bool {
        obj.meta()
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| self.is_referenced_by(r)))
    }
}

/// Access to BkApps and their children.
///
/// Updates are optimistic: an object whose `resourceVersion` no longer
/// matches the stored one is rejected with [`Error::Conflict`].
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an application.
    async fn get_application(&self, namespace: &str, name: &str) -> Result<BkApp>;

    /// List pods in `namespace` matching `selector`, optionally restricted to
    /// those owned by `owner`.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        owner: Option<&OwnerRef>,
    ) -> Result<Vec<Pod>>;

    /// Persist metadata and spec of an application.
    async fn update_application(&self, app: &BkApp) -> Result<BkApp>;

    /// Persist the status subresource of an application.
    async fn update_application_status(&self, app: &BkApp) -> Result<BkApp>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_selector_display_is_sorted() {
        let selector = LabelSelector::new()
            .with("b-key", "2")
            .with("a-key", "1");
        assert_eq!(selector.to_string(), "a-key=1,b-key=2");
        assert_eq!(LabelSelector::new().to_string(), "");
    }

    #[test]
    fn test_selector_matches() {
        let selector = LabelSelector::new()
            .with("name", "bkapp-sample")
            .with("resource-type", "hook");

        let hook = labels(&[
            ("name", "bkapp-sample"),
            ("resource-type", "hook"),
            ("hook-type", "pre-release"),
        ]);
        let process = labels(&[("name", "bkapp-sample"), ("resource-type", "process")]);

        assert!(selector.matches(Some(&hook)));
        assert!(!selector.matches(Some(&process)));
        assert!(!selector.matches(None));
        assert!(LabelSelector::new().matches(None));
    }

    fn reference(kind: &str, name: &str, uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "paas.bk.tencent.com/v1alpha2".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn test_owner_matches_by_uid() {
        let owner = OwnerRef {
            kind: KIND.to_string(),
            name: "bkapp-sample".to_string(),
            uid: Some("uid-1".to_string()),
        };

        assert!(owner.is_referenced_by(&reference(KIND, "bkapp-sample", "uid-1")));
        // Same name, recreated object.
        assert!(!owner.is_referenced_by(&reference(KIND, "bkapp-sample", "uid-2")));
    }

    #[test]
    fn test_owner_falls_back_to_kind_and_name() {
        let owner = OwnerRef {
            kind: KIND.to_string(),
            name: "bkapp-sample".to_string(),
            uid: None,
        };

        assert!(owner.is_referenced_by(&reference(KIND, "bkapp-sample", "uid-1")));
        assert!(!owner.is_referenced_by(&reference("Deployment", "bkapp-sample", "uid-1")));
        assert!(!owner.is_referenced_by(&reference(KIND, "other", "uid-1")));
    }
}
