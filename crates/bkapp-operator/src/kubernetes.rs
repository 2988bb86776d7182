//! Kubernetes-backed resource store.

use async_trait::async_trait;
use bkapp_core::{BkApp, Error, LabelSelector, OwnerRef, ResourceStore, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};

/// Resource store talking to the API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn apps(&self, namespace: &str) -> Api<BkApp> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespace_of(app: &BkApp) -> Result<String> {
        app.namespace()
            .ok_or_else(|| Error::InvalidObject(format!("bkapp {} has no namespace", app.name_any())))
    }
}

/// Classify a kube client error.
pub fn map_kube_error(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => Error::NotFound(resp.message),
            409 => Error::Conflict(resp.message),
            400 | 422 => Error::InvalidObject(resp.message),
            _ => Error::Store(format!("{} ({})", resp.message, resp.code)),
        },
        other => Error::Store(other.to_string()),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_application(&self, namespace: &str, name: &str) -> Result<BkApp> {
        self.apps(namespace).get(name).await.map_err(map_kube_error)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        owner: Option<&OwnerRef>,
    ) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&selector.to_string());
        let pods = api.list(&params).await.map_err(map_kube_error)?;
        Ok(pods
            .items
            .into_iter()
            .filter(|p| owner.is_none_or(|o| o.owns(p)))
            .collect())
    }

    async fn update_application(&self, app: &BkApp) -> Result<BkApp> {
        let namespace = Self::namespace_of(app)?;
        self.apps(&namespace)
            .replace(&app.name_any(), &PostParams::default(), app)
            .await
            .map_err(map_kube_error)
    }

    async fn update_application_status(&self, app: &BkApp) -> Result<BkApp> {
        let namespace = Self::namespace_of(app)?;
        let data = serde_json::to_vec(app).map_err(|e| Error::Internal(e.to_string()))?;
        self.apps(&namespace)
            .replace_status(&app.name_any(), &PostParams::default(), data)
            .await
            .map_err(map_kube_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} happened"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_conflict_maps_to_conflict() {
        assert_eq!(
            map_kube_error(api_error(409, "Conflict")),
            Error::Conflict("Conflict happened".to_string())
        );
    }

    #[test]
    fn test_not_found_and_invalid() {
        assert!(matches!(
            map_kube_error(api_error(404, "NotFound")),
            Error::NotFound(_)
        ));
        assert!(matches!(
            map_kube_error(api_error(422, "Invalid")),
            Error::InvalidObject(_)
        ));
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = map_kube_error(api_error(503, "ServiceUnavailable"));
        assert_eq!(err.class(), bkapp_core::ErrorClass::Transient);
    }
}
