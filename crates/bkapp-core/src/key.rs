//! Object identities.

use derive_more::Display;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Namespace-scoped identity of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{namespace}/{name}")]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object. Fails when either part is missing.
    pub fn of<K: Resource>(obj: &K) -> Result<Self> {
        let name = obj
            .meta()
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidObject("object has no name".to_string()))?;
        let namespace = obj
            .namespace()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| Error::InvalidObject(format!("object {name} has no namespace")))?;
        Ok(Self { namespace, name })
    }
}

impl std::str::FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(Error::InvalidObject(format!(
                "expected <namespace>/<name>, got '{s}'"
            ))),
        }
    }
}
