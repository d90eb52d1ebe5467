use std::collections::BTreeMap;
use std::io::Write;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::Api;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("failed to read secret '{name}': {source}")]
    Fetch {
        name: String,
        source: Box<kube::Error>,
    },
}

/// Registry credentials collected from a Pod's `imagePullSecrets`, merged
/// into a single docker-config `auths` map.
#[derive(Debug, Default, Serialize)]
pub struct ImagePullSecrets {
    auths: BTreeMap<String, Value>,
}

impl ImagePullSecrets {
    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }

    fn extend_from_docker_config(&mut self, secret_name: &str, config: &Value) {
        match config.get("auths").and_then(Value::as_object) {
            Some(auths) => {
                for (registry, entry) in auths {
                    self.auths.insert(registry.clone(), entry.clone());
                }
            }
            None => warn!(secret = secret_name, "docker config carries no auths"),
        }
    }

    /// Materializes the credentials as an on-disk auth file the copy tool can
    /// consume, or `None` when there are no credentials. The file is deleted
    /// when the returned handle drops, on every exit path.
    pub fn auth_file(&self) -> std::io::Result<Option<NamedTempFile>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut file = NamedTempFile::new()?;
        serde_json::to_writer(&mut file, self).map_err(std::io::Error::other)?;
        file.flush()?;
        Ok(Some(file))
    }
}

#[async_trait]
pub trait ImagePullSecretsProvider: Send + Sync {
    async fn image_pull_secrets(&self, pod: &Pod) -> Result<ImagePullSecrets, SecretsError>;
}

/// Provider for clusters where source registries need no credentials.
pub struct NoopSecretsProvider;

#[async_trait]
impl ImagePullSecretsProvider for NoopSecretsProvider {
    async fn image_pull_secrets(&self, _pod: &Pod) -> Result<ImagePullSecrets, SecretsError> {
        Ok(ImagePullSecrets::default())
    }
}

/// Reads `kubernetes.io/dockerconfigjson` secrets referenced by the Pod's
/// `imagePullSecrets` from the API server.
pub struct KubeSecretsProvider {
    client: kube::Client,
}

impl KubeSecretsProvider {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImagePullSecretsProvider for KubeSecretsProvider {
    async fn image_pull_secrets(&self, pod: &Pod) -> Result<ImagePullSecrets, SecretsError> {
        let mut secrets = ImagePullSecrets::default();

        let Some(spec) = pod.spec.as_ref() else {
            return Ok(secrets);
        };
        let Some(references) = spec.image_pull_secrets.as_ref() else {
            return Ok(secrets);
        };

        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        for reference in references {
            let name = reference.name.as_str();
            if name.is_empty() {
                continue;
            }

            let secret = api.get(name).await.map_err(|source| SecretsError::Fetch {
                name: name.to_string(),
                source: Box::new(source),
            })?;

            let Some(raw) = secret
                .data
                .as_ref()
                .and_then(|data| data.get(DOCKER_CONFIG_KEY))
            else {
                warn!(secret = name, namespace, "secret has no docker config entry");
                continue;
            };

            match serde_json::from_slice::<Value>(&raw.0) {
                Ok(config) => secrets.extend_from_docker_config(name, &config),
                Err(err) => warn!(secret = name, namespace, %err, "unparseable docker config"),
            }
        }

        Ok(secrets)
    }
}
