use kube::api::{Api, PostParams};
use std::marker::PhantomData;
use trellis_controller_k8s_api::HasStatus;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The object changed since it was read.
    #[error("the object has been modified")]
    Conflict,

    #[error("the object no longer exists")]
    NotFound,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reads objects and replaces their status subresource.
#[async_trait::async_trait]
pub trait StatusClient<K: HasStatus>: Send + Sync + 'static {
    async fn get(&self, namespace: &str, name: &str) -> Result<K, WriteError>;

    /// Replaces the status of `live`, failing with [`WriteError::Conflict`]
    /// if it has been modified since it was read.
    async fn replace_status(&self, live: &K, status: K::Status) -> Result<(), WriteError>;
}

#[derive(Clone)]
pub struct KubeStatusClient<K> {
    client: kube::Client,
    field_manager: String,
    _kind: PhantomData<fn() -> K>,
}

// === impl KubeStatusClient ===

impl<K> KubeStatusClient<K> {
    pub fn new(client: kube::Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            _kind: PhantomData,
        }
    }
}

impl<K> std::fmt::Debug for KubeStatusClient<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStatusClient")
            .field("field_manager", &self.field_manager)
            .finish()
    }
}

#[async_trait::async_trait]
impl<K: HasStatus> StatusClient<K> for KubeStatusClient<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<K, WriteError> {
        let api = Api::<K>::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(WriteError::from)
    }

    async fn replace_status(&self, live: &K, status: K::Status) -> Result<(), WriteError> {
        let meta = live.meta();
        let namespace = meta.namespace.as_deref().unwrap_or_default();
        let name = meta.name.as_deref().unwrap_or_default();

        // The resource version makes the write conditional on the object
        // being unchanged since it was read.
        let body = serde_json::json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "metadata": {
                "name": name,
                "namespace": namespace,
                "resourceVersion": meta.resource_version,
            },
            "status": status,
        });
        let data = serde_json::to_vec(&body).map_err(anyhow::Error::from)?;

        let api = Api::<K>::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        api.replace_status(name, &params, data)
            .await
            .map_err(WriteError::from)?;
        Ok(())
    }
}

// === impl WriteError ===

impl From<kube::Error> for WriteError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 409 => Self::Conflict,
            kube::Error::Api(response) if response.code == 404 => Self::NotFound,
            error => Self::Other(error.into()),
        }
    }
}
