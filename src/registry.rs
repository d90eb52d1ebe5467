use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use aws_sdk_ecr::types::{ImageScanningConfiguration, ImageTagMutability, Tag};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::metrics::{MirrorMetrics, RenewalLabels};
use crate::skopeo::Skopeo;

/// Tokens are replaced this long before their expiration.
const RENEWAL_LEAD: Duration = Duration::from_secs(2 * 60);
const RENEWAL_BACKOFF_MIN: Duration = Duration::from_secs(5);
const RENEWAL_BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

/// Upper bound on tracked existence entries. The cache is a latency
/// optimization only; the remote registry stays authoritative.
const CACHE_CAPACITY: u64 = 100_000;

const CREATED_BY_TAG: &str = "k8s-mirror";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to obtain authorization token: {0}")]
    TokenRequest(String),
    #[error("authorization token is malformed: {0}")]
    TokenDecode(String),
    #[error("failed to create repository '{name}': {message}")]
    CreateRepository { name: String, message: String },
}

/// The target registry the mirror writes to.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Canonical domain of the registry, used for the self-registry
    /// short-circuit.
    fn endpoint(&self) -> &str;

    /// Currently valid `username:password`. Safe to call concurrently with
    /// token renewal; every caller sees a consistent snapshot.
    async fn credentials(&self) -> String;

    /// Whether `reference` is present in the registry. Consults the cache
    /// first; a failed probe returns false and caches nothing.
    async fn image_exists(&self, reference: &str) -> bool;

    /// Ensures a repository exists. Idempotent: "already exists" is success.
    async fn create_repository(&self, name: &str) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone)]
struct RegistryCredential {
    token: String,
    expires_at: SystemTime,
}

pub struct EcrClient {
    client: aws_sdk_ecr::Client,
    domain: String,
    credential: RwLock<Arc<RegistryCredential>>,
    cache: moka::future::Cache<String, ()>,
    skopeo: Skopeo,
    metrics: Arc<MirrorMetrics>,
}

impl EcrClient {
    /// Connects to ECR in `region`, performs the initial token fetch, and
    /// starts the detached renewal task. Fails when no token can be obtained,
    /// so a misconfigured target aborts startup instead of failing per
    /// admission.
    pub async fn new(
        region: &str,
        domain: &str,
        metrics: Arc<MirrorMetrics>,
    ) -> Result<Arc<Self>, RegistryError> {
        let aws = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_ecr::Client::new(&aws);

        let initial = request_token(&client).await?;
        debug!(domain, expires_at = ?initial.expires_at, "obtained initial registry token");

        let ecr = Arc::new(Self {
            client,
            domain: domain.to_string(),
            credential: RwLock::new(Arc::new(initial)),
            cache: moka::future::Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .build(),
            skopeo: Skopeo::default(),
            metrics,
        });
        ecr.spawn_renewal();
        Ok(ecr)
    }

    /// Renews the token shortly before expiration, retrying with bounded
    /// backoff. The previous credential stays in effect while retrying, so an
    /// outage longer than the remaining validity yields auth failures on
    /// copies until renewal succeeds again.
    fn spawn_renewal(self: &Arc<Self>) {
        let ecr = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = RENEWAL_BACKOFF_MIN;
            loop {
                let expires_at = ecr.credential.read().await.expires_at;
                let renew_at = expires_at - RENEWAL_LEAD;
                if let Ok(wait) = renew_at.duration_since(SystemTime::now()) {
                    tokio::time::sleep(wait).await;
                }

                match request_token(&ecr.client).await {
                    Ok(cred) => {
                        debug!(expires_at = ?cred.expires_at, "registry token renewed");
                        *ecr.credential.write().await = Arc::new(cred);
                        ecr.renewal_metric("success");
                        backoff = RENEWAL_BACKOFF_MIN;
                    }
                    Err(err) => {
                        error!(%err, "registry token renewal failed, retrying");
                        ecr.renewal_metric("failure");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(RENEWAL_BACKOFF_MAX);
                    }
                }
            }
        });
    }

    fn renewal_metric(&self, result: &'static str) {
        self.metrics
            .credential_renewals_total
            .get_or_create(&RenewalLabels { result })
            .inc();
    }

    #[cfg(test)]
    fn mock(domain: &str, token: &str, skopeo: Skopeo) -> Self {
        let config = aws_sdk_ecr::Config::builder()
            .behavior_version(aws_sdk_ecr::config::BehaviorVersion::latest())
            .build();
        Self {
            client: aws_sdk_ecr::Client::from_conf(config),
            domain: domain.to_string(),
            credential: RwLock::new(Arc::new(RegistryCredential {
                token: token.to_string(),
                expires_at: SystemTime::now() + Duration::from_secs(3600),
            })),
            cache: moka::future::Cache::builder().max_capacity(64).build(),
            skopeo,
            metrics: Arc::new(MirrorMetrics::new(
                &mut prometheus_client::registry::Registry::default(),
            )),
        }
    }

    #[cfg(test)]
    async fn cached(&self, key: &str) -> bool {
        self.cache.get(key).await.is_some()
    }
}

#[async_trait]
impl Registry for EcrClient {
    fn endpoint(&self) -> &str {
        &self.domain
    }

    async fn credentials(&self) -> String {
        self.credential.read().await.token.clone()
    }

    async fn image_exists(&self, reference: &str) -> bool {
        if self.cache.get(reference).await.is_some() {
            return true;
        }

        let creds = self.credentials().await;
        if let Err(err) = self.skopeo.inspect(reference, Some(&creds)).await {
            debug!(reference, %err, "existence probe failed");
            return false;
        }

        self.cache.insert(reference.to_string(), ()).await;
        true
    }

    async fn create_repository(&self, name: &str) -> Result<(), RegistryError> {
        if self.cache.get(name).await.is_some() {
            return Ok(());
        }

        let result = self
            .client
            .create_repository()
            .repository_name(name)
            .image_scanning_configuration(
                ImageScanningConfiguration::builder()
                    .scan_on_push(true)
                    .build(),
            )
            .image_tag_mutability(ImageTagMutability::Mutable)
            .tags(
                Tag::builder()
                    .key("CreatedBy")
                    .value(CREATED_BY_TAG)
                    .build()
                    .expect("CreatedBy tag has key and value set"),
            )
            .send()
            .await;

        if let Err(err) = result {
            let service_err = err.into_service_error();
            if !service_err.is_repository_already_exists_exception() {
                return Err(RegistryError::CreateRepository {
                    name: name.to_string(),
                    message: service_err.to_string(),
                });
            }
        }

        self.cache.insert(name.to_string(), ()).await;
        Ok(())
    }
}

async fn request_token(client: &aws_sdk_ecr::Client) -> Result<RegistryCredential, RegistryError> {
    let output = client
        .get_authorization_token()
        .send()
        .await
        .map_err(|err| RegistryError::TokenRequest(err.to_string()))?;

    let data = output
        .authorization_data()
        .first()
        .ok_or_else(|| RegistryError::TokenDecode("no authorization data returned".to_string()))?;

    let encoded = data
        .authorization_token()
        .ok_or_else(|| RegistryError::TokenDecode("missing authorization token".to_string()))?;
    let decoded = BASE64
        .decode(encoded)
        .map_err(|err| RegistryError::TokenDecode(err.to_string()))?;
    let token = String::from_utf8(decoded).map_err(|err| RegistryError::TokenDecode(err.to_string()))?;

    let expires_at = data
        .expires_at()
        .map(|at| UNIX_EPOCH + Duration::from_secs(at.secs().max(0) as u64))
        .ok_or_else(|| RegistryError::TokenDecode("missing token expiration".to_string()))?;

    Ok(RegistryCredential { token, expires_at })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    /// In-memory registry double recording every call it sees.
    pub struct MockRegistry {
        endpoint: String,
        existing: Mutex<HashSet<String>>,
        created: Mutex<Vec<String>>,
    }

    impl MockRegistry {
        pub fn new(endpoint: &str) -> Arc<Self> {
            Arc::new(Self {
                endpoint: endpoint.to_string(),
                existing: Mutex::new(HashSet::new()),
                created: Mutex::new(Vec::new()),
            })
        }

        pub fn add_existing(&self, reference: &str) {
            self.existing.lock().unwrap().insert(reference.to_string());
        }

        pub fn created(&self) -> Vec<String> {
            self.created.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Registry for MockRegistry {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn credentials(&self) -> String {
            String::new()
        }

        async fn image_exists(&self, reference: &str) -> bool {
            self.existing.lock().unwrap().contains(reference)
        }

        async fn create_repository(&self, name: &str) -> Result<(), RegistryError> {
            self.created.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }
}
