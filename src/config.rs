use std::fmt;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// When a container image is rewritten to point at the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSwapPolicy {
    /// Rewrite regardless of mirror state.
    Always,
    /// Rewrite only when the target already exists in the mirror.
    Exists,
}

/// How the copy into the mirror is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCopyPolicy {
    /// Enqueue and return immediately.
    Delayed,
    /// Enqueue and block the admission until the copy terminates.
    Immediate,
    /// Run the copy on the admission's own stack, bypassing the pool.
    Force,
}

impl ImageCopyPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageCopyPolicy::Delayed => "delayed",
            ImageCopyPolicy::Immediate => "immediate",
            ImageCopyPolicy::Force => "force",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Apply backpressure to the admission when the copy queue is full.
    Block,
    /// Drop the copy task and record a metric.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterFailurePolicy {
    /// A broken filter lets the image be processed (fail closed).
    #[default]
    Process,
    /// A broken filter skips the container (fail open).
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Console,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Console => f.write_str("console"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JmespathFilter {
    pub jmespath: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Predicates selecting containers to leave untouched; evaluated in
    /// order, first boolean `true` wins.
    #[serde(default)]
    pub filters: Vec<JmespathFilter>,
    #[serde(default)]
    pub filter_failure: FilterFailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub account_id: String,
    pub region: String,
}

impl TargetConfig {
    pub fn ecr_domain(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account_id, self.region)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopierConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_queue_full")]
    pub queue_full: QueueFullPolicy,
}

impl Default for CopierConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_size: default_queue_size(),
            queue_full: default_queue_full(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_tls_cert_path() -> String {
    "/certs/tls.crt".to_string()
}

fn default_tls_key_path() -> String {
    "/certs/tls.key".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_swap_policy() -> ImageSwapPolicy {
    ImageSwapPolicy::Exists
}

fn default_copy_policy() -> ImageCopyPolicy {
    ImageCopyPolicy::Delayed
}

fn default_max_workers() -> usize {
    100
}

fn default_queue_size() -> usize {
    1000
}

fn default_queue_full() -> QueueFullPolicy {
    QueueFullPolicy::Block
}

fn default_copy_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_tls_cert_path")]
    pub tls_cert_path: String,
    #[serde(default = "default_tls_key_path")]
    pub tls_key_path: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default = "default_swap_policy")]
    pub image_swap_policy: ImageSwapPolicy,
    #[serde(default = "default_copy_policy")]
    pub image_copy_policy: ImageCopyPolicy,
    #[serde(default)]
    pub copier: CopierConfig,
    /// Bound on immediate waits and force executions.
    #[serde(default = "default_copy_timeout_seconds")]
    pub copy_timeout_seconds: u64,
}

impl MirrorConfig {
    pub fn load(path: &str) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("MIRROR_").split("__"))
            .extract()
            .map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_yaml(yaml: &str) -> Result<MirrorConfig, figment::Error> {
        Figment::new().merge(Yaml::string(yaml)).extract()
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config = from_yaml(
            r#"
            target:
              account_id: "123456789012"
              region: us-east-1
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:8443");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.dry_run);
        assert!(config.source.filters.is_empty());
        assert_eq!(config.source.filter_failure, FilterFailurePolicy::Process);
        assert_eq!(config.image_swap_policy, ImageSwapPolicy::Exists);
        assert_eq!(config.image_copy_policy, ImageCopyPolicy::Delayed);
        assert_eq!(config.copier.max_workers, 100);
        assert_eq!(config.copier.queue_size, 1000);
        assert_eq!(config.copier.queue_full, QueueFullPolicy::Block);
        assert_eq!(config.copy_timeout_seconds, 30);
    }

    #[test]
    fn ecr_domain_is_derived_from_account_and_region() {
        let target = TargetConfig {
            account_id: "123456789012".to_string(),
            region: "eu-west-1".to_string(),
        };
        assert_eq!(
            target.ecr_domain(),
            "123456789012.dkr.ecr.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn policies_and_filters_parse() {
        let config = from_yaml(
            r#"
            image_swap_policy: always
            image_copy_policy: immediate
            source:
              filters:
                - jmespath: "obj.metadata.namespace == 'kube-system'"
              filter_failure: skip
            copier:
              queue_full: drop
            target:
              account_id: "123456789012"
              region: us-east-1
            "#,
        )
        .unwrap();

        assert_eq!(config.image_swap_policy, ImageSwapPolicy::Always);
        assert_eq!(config.image_copy_policy, ImageCopyPolicy::Immediate);
        assert_eq!(config.source.filters.len(), 1);
        assert_eq!(config.source.filter_failure, FilterFailurePolicy::Skip);
        assert_eq!(config.copier.queue_full, QueueFullPolicy::Drop);
    }

    #[test]
    fn unknown_policy_values_are_rejected_at_load() {
        let result = from_yaml(
            r#"
            image_swap_policy: sometimes
            target:
              account_id: "123456789012"
              region: us-east-1
            "#,
        );
        assert!(result.is_err());
    }
}
