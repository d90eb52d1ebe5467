use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::AdmissionRequest;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{
    FilterFailurePolicy, ImageCopyPolicy, ImageSwapPolicy, JmespathFilter, MirrorConfig,
};
use crate::copier::{Copier, SubmitOutcome};
use crate::filter::{self, FilterContext};
use crate::metrics::{CopyTaskLabels, MirrorMetrics};
use crate::reference::ImageReference;
use crate::registry::Registry;
use crate::secrets::ImagePullSecretsProvider;
use crate::skopeo::Skopeo;

const PULL_ALWAYS: &str = "Always";

/// What the pipeline decided for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerOutcome {
    Swapped,
    SelfRegistry,
    FilterMatch,
    InvalidReference,
    MissingInMirror,
    DryRun,
}

impl ContainerOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerOutcome::Swapped => "swapped",
            ContainerOutcome::SelfRegistry => "self_registry",
            ContainerOutcome::FilterMatch => "filter_match",
            ContainerOutcome::InvalidReference => "invalid_reference",
            ContainerOutcome::MissingInMirror => "missing_in_mirror",
            ContainerOutcome::DryRun => "dry_run",
        }
    }
}

#[derive(Debug)]
pub struct ContainerResult {
    pub name: String,
    pub outcome: ContainerOutcome,
}

#[derive(Debug, Clone)]
pub struct SwapperOptions {
    pub filters: Vec<JmespathFilter>,
    pub filter_failure: FilterFailurePolicy,
    pub swap_policy: ImageSwapPolicy,
    pub copy_policy: ImageCopyPolicy,
    pub copy_timeout: Duration,
    pub dry_run: bool,
}

impl Default for SwapperOptions {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            filter_failure: FilterFailurePolicy::Process,
            swap_policy: ImageSwapPolicy::Exists,
            copy_policy: ImageCopyPolicy::Delayed,
            copy_timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }
}

impl SwapperOptions {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            filters: config.source.filters.clone(),
            filter_failure: config.source.filter_failure,
            swap_policy: config.image_swap_policy,
            copy_policy: config.image_copy_policy,
            copy_timeout: Duration::from_secs(config.copy_timeout_seconds),
            dry_run: config.dry_run,
        }
    }
}

/// Rewrites Pod container images to point at the mirror registry and makes
/// sure the mirror carries the referenced bits. Never fails an admission:
/// every error degrades to "leave the container untouched".
pub struct ImageSwapper {
    registry: Arc<dyn Registry>,
    secrets: Arc<dyn ImagePullSecretsProvider>,
    copier: Arc<Copier>,
    skopeo: Skopeo,
    metrics: Arc<MirrorMetrics>,
    options: SwapperOptions,
}

#[derive(Debug, Clone, Copy)]
enum ListKind {
    Init,
    Containers,
    Ephemeral,
}

struct Slot {
    list: ListKind,
    index: usize,
    name: String,
    image: String,
    pull_always: bool,
    value: Value,
}

impl ImageSwapper {
    pub fn new(
        registry: Arc<dyn Registry>,
        secrets: Arc<dyn ImagePullSecretsProvider>,
        copier: Arc<Copier>,
        skopeo: Skopeo,
        metrics: Arc<MirrorMetrics>,
        options: SwapperOptions,
    ) -> Self {
        Self {
            registry,
            secrets,
            copier,
            skopeo,
            metrics,
            options,
        }
    }

    /// Runs the per-container pipeline over init, regular and ephemeral
    /// containers in spec order, mutating `pod` in place. The returned
    /// results carry one outcome per container that had an image.
    pub async fn mutate(
        &self,
        request: &AdmissionRequest<Pod>,
        pod: &mut Pod,
    ) -> Vec<ContainerResult> {
        // The API server's own dry-run admissions must not cause copies.
        let dry_run = self.options.dry_run || request.dry_run;
        let pod_value = filter_object(request, pod);
        let pod_shared = Arc::new(pod.clone());

        let mut results = Vec::new();
        for slot in collect_slots(pod) {
            let (outcome, new_image) = self
                .process(&slot, &pod_value, &pod_shared, dry_run)
                .await;
            if let Some(image) = new_image {
                set_image(pod, slot.list, slot.index, image);
            }
            results.push(ContainerResult {
                name: slot.name,
                outcome,
            });
        }
        results
    }

    async fn process(
        &self,
        slot: &Slot,
        pod_value: &Value,
        pod: &Arc<Pod>,
        dry_run: bool,
    ) -> (ContainerOutcome, Option<String>) {
        let source = match ImageReference::parse(&format!("docker://{}", slot.image)) {
            Ok(reference) => reference,
            Err(err) => {
                warn!(container = %slot.name, image = %slot.image, %err, "invalid source image, skipping container");
                return (ContainerOutcome::InvalidReference, None);
            }
        };

        // Already served from the mirror.
        if source.domain() == self.registry.endpoint() {
            return (ContainerOutcome::SelfRegistry, None);
        }

        let ctx = FilterContext {
            obj: pod_value,
            container: &slot.value,
        };
        if filter::matches(&ctx, &self.options.filters, self.options.filter_failure) {
            debug!(container = %slot.name, "skip due to filter condition");
            return (ContainerOutcome::FilterMatch, None);
        }

        let target = format!("{}/{}", self.registry.endpoint(), source.canonical());

        if dry_run {
            info!(source = %source.canonical(), target = %target, "dry run, not copying");
        } else {
            self.dispatch_copy(&source, &target, slot.pull_always, pod)
                .await;
        }

        let swap = match self.options.swap_policy {
            ImageSwapPolicy::Always => true,
            ImageSwapPolicy::Exists => self.registry.image_exists(&target).await,
        };

        if !swap {
            debug!(image = %target, "image not in target registry, not swapping");
            return (ContainerOutcome::MissingInMirror, None);
        }
        if dry_run {
            info!(container = %slot.name, image = %target, "dry run, would set new container image");
            return (ContainerOutcome::DryRun, None);
        }
        debug!(container = %slot.name, image = %target, "set new container image");
        (ContainerOutcome::Swapped, Some(target))
    }

    async fn dispatch_copy(
        &self,
        source: &ImageReference,
        target: &str,
        pull_always: bool,
        pod: &Arc<Pod>,
    ) {
        let task = self.copy_task(source.clone(), target.to_string(), pull_always, Arc::clone(pod));

        match self.options.copy_policy {
            ImageCopyPolicy::Delayed => match self.copier.submit(target, task).await {
                SubmitOutcome::Queued => {}
                SubmitOutcome::Coalesced => self.copy_metric("coalesced"),
                SubmitOutcome::Dropped => self.copy_metric("dropped"),
            },
            ImageCopyPolicy::Immediate => {
                let wait = self.copier.submit_and_wait(target, task);
                if tokio::time::timeout(self.options.copy_timeout, wait)
                    .await
                    .is_err()
                {
                    warn!(target, "timed out waiting for image copy");
                }
            }
            ImageCopyPolicy::Force => {
                let _guard = self.copier.track(target);
                if tokio::time::timeout(self.options.copy_timeout, task)
                    .await
                    .is_err()
                {
                    warn!(target, "image copy timed out");
                }
            }
        }
    }

    fn copy_task(
        &self,
        source: ImageReference,
        target: String,
        pull_always: bool,
        pod: Arc<Pod>,
    ) -> impl Future<Output = ()> + Send + 'static {
        let registry = Arc::clone(&self.registry);
        let secrets = Arc::clone(&self.secrets);
        let skopeo = self.skopeo.clone();
        let metrics = Arc::clone(&self.metrics);
        let policy = self.options.copy_policy;

        async move {
            run_copy(
                registry,
                secrets,
                skopeo,
                metrics,
                policy,
                source,
                target,
                pull_always,
                pod,
            )
            .await;
        }
    }

    fn copy_metric(&self, outcome: &'static str) {
        self.metrics
            .copy_tasks_total
            .get_or_create(&CopyTaskLabels {
                policy: self.options.copy_policy.as_str(),
                outcome,
            })
            .inc();
    }
}

/// One copy task: make the mirror carry `source` under `target`. Errors are
/// logged, never propagated; the admission this task belongs to has already
/// been answered (or is deliberately waiting without caring about the result).
#[allow(clippy::too_many_arguments)]
async fn run_copy(
    registry: Arc<dyn Registry>,
    secrets: Arc<dyn ImagePullSecretsProvider>,
    skopeo: Skopeo,
    metrics: Arc<MirrorMetrics>,
    policy: ImageCopyPolicy,
    source: ImageReference,
    target: String,
    pull_always: bool,
    pod: Arc<Pod>,
) {
    // Mutable tags stay fresh: under PullAlways the mirror is refreshed even
    // when the target is already present.
    if registry.image_exists(&target).await && !pull_always {
        return;
    }

    let repository = source.trimmed();
    debug!(repository = %repository, "create repository");
    if let Err(err) = registry.create_repository(&repository).await {
        error!(%err, repository = %repository, "failed to create repository");
    }

    let pull_secrets = match secrets.image_pull_secrets(&pod).await {
        Ok(secrets) => secrets,
        Err(err) => {
            error!(%err, "failed to read image pull secrets");
            Default::default()
        }
    };
    // The temp file is deleted when `auth_file` drops, on every exit path.
    let auth_file = match pull_secrets.auth_file() {
        Ok(file) => file,
        Err(err) => {
            error!(%err, "failed to materialize auth file");
            None
        }
    };

    let creds = registry.credentials().await;
    debug!(source = %source.canonical(), target = %target, "copy image");
    let start = Instant::now();
    let result = skopeo
        .copy(
            &source.canonical(),
            auth_file.as_ref().map(|file| file.path()),
            &target,
            (!creds.is_empty()).then_some(creds.as_str()),
        )
        .await;
    metrics
        .copy_duration_seconds
        .observe(start.elapsed().as_secs_f64());

    let outcome = match result {
        Ok(()) => "completed",
        Err(err) => {
            error!(%err, source = %source.canonical(), target = %target, "copying image to target registry failed");
            "failed"
        }
    };
    metrics
        .copy_tasks_total
        .get_or_create(&CopyTaskLabels {
            policy: policy.as_str(),
            outcome,
        })
        .inc();
}

/// The Pod as the filter language sees it, with the namespace defaulted from
/// the admission request (Pods created through controllers often reach the
/// webhook without one).
fn filter_object(request: &AdmissionRequest<Pod>, pod: &Pod) -> Value {
    let mut value = serde_json::to_value(pod).unwrap_or(Value::Null);
    let namespace_missing = value
        .pointer("/metadata/namespace")
        .is_none_or(Value::is_null);
    if namespace_missing {
        if let (Some(namespace), Some(metadata)) =
            (request.namespace.as_deref(), value.get_mut("metadata"))
        {
            metadata["namespace"] = Value::String(namespace.to_string());
        }
    }
    value
}

fn collect_slots(pod: &Pod) -> Vec<Slot> {
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };
    let mut slots = Vec::new();

    if let Some(init) = spec.init_containers.as_ref() {
        for (index, container) in init.iter().enumerate() {
            let Some(image) = container.image.clone() else {
                continue;
            };
            slots.push(Slot {
                list: ListKind::Init,
                index,
                name: container.name.clone(),
                image,
                pull_always: container.image_pull_policy.as_deref() == Some(PULL_ALWAYS),
                value: serde_json::to_value(container).unwrap_or(Value::Null),
            });
        }
    }

    for (index, container) in spec.containers.iter().enumerate() {
        let Some(image) = container.image.clone() else {
            continue;
        };
        slots.push(Slot {
            list: ListKind::Containers,
            index,
            name: container.name.clone(),
            image,
            pull_always: container.image_pull_policy.as_deref() == Some(PULL_ALWAYS),
            value: serde_json::to_value(container).unwrap_or(Value::Null),
        });
    }

    if let Some(ephemeral) = spec.ephemeral_containers.as_ref() {
        for (index, container) in ephemeral.iter().enumerate() {
            let Some(image) = container.image.clone() else {
                continue;
            };
            slots.push(Slot {
                list: ListKind::Ephemeral,
                index,
                name: container.name.clone(),
                image,
                pull_always: container.image_pull_policy.as_deref() == Some(PULL_ALWAYS),
                value: serde_json::to_value(container).unwrap_or(Value::Null),
            });
        }
    }

    slots
}

fn set_image(pod: &mut Pod, list: ListKind, index: usize, image: String) {
    let Some(spec) = pod.spec.as_mut() else {
        return;
    };
    match list {
        ListKind::Init => {
            if let Some(container) = spec
                .init_containers
                .as_mut()
                .and_then(|containers| containers.get_mut(index))
            {
                container.image = Some(image);
            }
        }
        ListKind::Containers => {
            if let Some(container) = spec.containers.get_mut(index) {
                container.image = Some(image);
            }
        }
        ListKind::Ephemeral => {
            if let Some(container) = spec
                .ephemeral_containers
                .as_mut()
                .and_then(|containers| containers.get_mut(index))
            {
                container.image = Some(image);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use kube::core::admission::AdmissionReview;
    use prometheus_client::registry::Registry as MetricsRegistry;
    use serde_json::json;
    use tokio::time::sleep;

    use crate::config::QueueFullPolicy;
    use crate::registry::testing::MockRegistry;
    use crate::secrets::NoopSecretsProvider;

    fn build_swapper(registry: Arc<MockRegistry>, options: SwapperOptions) -> ImageSwapper {
        ImageSwapper::new(
            registry,
            Arc::new(NoopSecretsProvider),
            Arc::new(Copier::new(4, 16, QueueFullPolicy::Block)),
            Skopeo::with_binary("true"),
            Arc::new(MirrorMetrics::new(&mut MetricsRegistry::default())),
            options,
        )
    }

    fn pod_with_containers(containers: Value) -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": "web", "labels": {"app": "web"}},
            "spec": {"containers": containers},
        }))
        .unwrap()
    }

    fn admission_request(namespace: &str, pod: &Pod, dry_run: bool) -> AdmissionRequest<Pod> {
        let review: AdmissionReview<Pod> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "web",
                "namespace": namespace,
                "operation": "CREATE",
                "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
                "dryRun": dry_run,
                "object": serde_json::to_value(pod).unwrap(),
            },
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    fn container_image(pod: &Pod, index: usize) -> &str {
        pod.spec.as_ref().unwrap().containers[index]
            .image
            .as_deref()
            .unwrap()
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn image_already_in_mirror_registry_is_left_alone() {
        let registry = MockRegistry::new("123456789012.dkr.ecr.us-east-1.amazonaws.com");
        let swapper = build_swapper(
            Arc::clone(&registry),
            SwapperOptions {
                swap_policy: ImageSwapPolicy::Always,
                ..Default::default()
            },
        );
        let mut pod = pod_with_containers(json!([{
            "name": "nginx",
            "image": "123456789012.dkr.ecr.us-east-1.amazonaws.com/docker.io/library/nginx:1.25",
        }]));
        let request = admission_request("default", &pod, false);

        let results = swapper.mutate(&request, &mut pod).await;

        assert_eq!(results[0].outcome, ContainerOutcome::SelfRegistry);
        assert_eq!(
            container_image(&pod, 0),
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/docker.io/library/nginx:1.25"
        );
        sleep(Duration::from_millis(50)).await;
        assert!(registry.created().is_empty());
    }

    #[tokio::test]
    async fn bare_image_is_rewritten_and_a_copy_is_scheduled() {
        let registry = MockRegistry::new("r.example.com");
        let swapper = build_swapper(
            Arc::clone(&registry),
            SwapperOptions {
                swap_policy: ImageSwapPolicy::Always,
                ..Default::default()
            },
        );
        let mut pod = pod_with_containers(json!([{"name": "nginx", "image": "nginx:latest"}]));
        let request = admission_request("default", &pod, false);

        let results = swapper.mutate(&request, &mut pod).await;

        assert_eq!(results[0].outcome, ContainerOutcome::Swapped);
        assert_eq!(
            container_image(&pod, 0),
            "r.example.com/docker.io/library/nginx:latest"
        );
        eventually(|| registry.created() == vec!["docker.io/library/nginx".to_string()]).await;
    }

    #[tokio::test]
    async fn exists_policy_leaves_missing_images_untouched_but_still_copies() {
        let registry = MockRegistry::new("r.example.com");
        let swapper = build_swapper(Arc::clone(&registry), SwapperOptions::default());
        let mut pod =
            pod_with_containers(json!([{"name": "nginx", "image": "docker.io/library/nginx:1.25"}]));
        let request = admission_request("default", &pod, false);

        let results = swapper.mutate(&request, &mut pod).await;

        assert_eq!(results[0].outcome, ContainerOutcome::MissingInMirror);
        assert_eq!(container_image(&pod, 0), "docker.io/library/nginx:1.25");
        eventually(|| !registry.created().is_empty()).await;
    }

    #[tokio::test]
    async fn matching_filter_skips_container_and_copy() {
        let registry = MockRegistry::new("r.example.com");
        let swapper = build_swapper(
            Arc::clone(&registry),
            SwapperOptions {
                filters: vec![JmespathFilter {
                    jmespath: "obj.metadata.namespace == 'kube-system'".to_string(),
                }],
                swap_policy: ImageSwapPolicy::Always,
                ..Default::default()
            },
        );
        // The Pod carries no namespace of its own; it must be defaulted from
        // the admission request before filters run.
        let mut pod = pod_with_containers(json!([{"name": "nginx", "image": "nginx"}]));
        let request = admission_request("kube-system", &pod, false);

        let results = swapper.mutate(&request, &mut pod).await;

        assert_eq!(results[0].outcome, ContainerOutcome::FilterMatch);
        assert_eq!(container_image(&pod, 0), "nginx");
        sleep(Duration::from_millis(50)).await;
        assert!(registry.created().is_empty());
    }

    #[tokio::test]
    async fn pull_always_refreshes_an_existing_mirror_image() {
        let registry = MockRegistry::new("r.example.com");
        registry.add_existing("r.example.com/docker.io/library/nginx:latest");
        let swapper = build_swapper(Arc::clone(&registry), SwapperOptions::default());
        let mut pod = pod_with_containers(json!([{
            "name": "nginx",
            "image": "nginx:latest",
            "imagePullPolicy": "Always",
        }]));
        let request = admission_request("default", &pod, false);

        let results = swapper.mutate(&request, &mut pod).await;

        assert_eq!(results[0].outcome, ContainerOutcome::Swapped);
        assert_eq!(
            container_image(&pod, 0),
            "r.example.com/docker.io/library/nginx:latest"
        );
        // The copy task's existence short-circuit is bypassed by PullAlways.
        eventually(|| !registry.created().is_empty()).await;
    }

    #[tokio::test]
    async fn existing_mirror_image_without_pull_always_skips_the_copy_work() {
        let registry = MockRegistry::new("r.example.com");
        registry.add_existing("r.example.com/docker.io/library/nginx:latest");
        let swapper = build_swapper(Arc::clone(&registry), SwapperOptions::default());
        let mut pod = pod_with_containers(json!([{"name": "nginx", "image": "nginx:latest"}]));
        let request = admission_request("default", &pod, false);

        let results = swapper.mutate(&request, &mut pod).await;

        assert_eq!(results[0].outcome, ContainerOutcome::Swapped);
        sleep(Duration::from_millis(50)).await;
        assert!(registry.created().is_empty());
    }

    #[tokio::test]
    async fn invalid_image_skips_only_that_container() {
        let registry = MockRegistry::new("r.example.com");
        let swapper = build_swapper(
            Arc::clone(&registry),
            SwapperOptions {
                swap_policy: ImageSwapPolicy::Always,
                ..Default::default()
            },
        );
        let mut pod = pod_with_containers(json!([
            {"name": "a", "image": "nginx:1"},
            {"name": "b", "image": "bad$$image"},
            {"name": "c", "image": "redis:7"},
        ]));
        let request = admission_request("default", &pod, false);

        let results = swapper.mutate(&request, &mut pod).await;

        assert_eq!(results[0].outcome, ContainerOutcome::Swapped);
        assert_eq!(results[1].outcome, ContainerOutcome::InvalidReference);
        assert_eq!(results[2].outcome, ContainerOutcome::Swapped);
        assert_eq!(container_image(&pod, 0), "r.example.com/docker.io/library/nginx:1");
        assert_eq!(container_image(&pod, 1), "bad$$image");
        assert_eq!(container_image(&pod, 2), "r.example.com/docker.io/library/redis:7");
        assert_eq!(
            pod.metadata.labels.as_ref().unwrap().get("app"),
            Some(&"web".to_string())
        );
    }

    #[tokio::test]
    async fn init_containers_are_processed_like_regular_ones() {
        let registry = MockRegistry::new("r.example.com");
        let swapper = build_swapper(
            Arc::clone(&registry),
            SwapperOptions {
                swap_policy: ImageSwapPolicy::Always,
                ..Default::default()
            },
        );
        let mut pod: Pod = serde_json::from_value(json!({
            "metadata": {"name": "web"},
            "spec": {
                "initContainers": [{"name": "setup", "image": "busybox:1.36"}],
                "containers": [{"name": "nginx", "image": "nginx:latest"}],
            },
        }))
        .unwrap();
        let request = admission_request("default", &pod, false);

        let results = swapper.mutate(&request, &mut pod).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "setup");
        assert_eq!(results[0].outcome, ContainerOutcome::Swapped);
        let init_image = pod.spec.as_ref().unwrap().init_containers.as_ref().unwrap()[0]
            .image
            .as_deref()
            .unwrap();
        assert_eq!(init_image, "r.example.com/docker.io/library/busybox:1.36");
    }

    #[tokio::test]
    async fn immediate_policy_finishes_the_copy_before_returning() {
        let registry = MockRegistry::new("r.example.com");
        let swapper = build_swapper(
            Arc::clone(&registry),
            SwapperOptions {
                swap_policy: ImageSwapPolicy::Always,
                copy_policy: ImageCopyPolicy::Immediate,
                ..Default::default()
            },
        );
        let mut pod = pod_with_containers(json!([{"name": "nginx", "image": "nginx:latest"}]));
        let request = admission_request("default", &pod, false);

        swapper.mutate(&request, &mut pod).await;

        // No waiting: the copy task must have run by the time mutate returns.
        assert_eq!(registry.created(), vec!["docker.io/library/nginx".to_string()]);
    }

    #[tokio::test]
    async fn force_policy_runs_the_copy_inline() {
        let registry = MockRegistry::new("r.example.com");
        let swapper = build_swapper(
            Arc::clone(&registry),
            SwapperOptions {
                swap_policy: ImageSwapPolicy::Always,
                copy_policy: ImageCopyPolicy::Force,
                ..Default::default()
            },
        );
        let mut pod = pod_with_containers(json!([{"name": "redis", "image": "redis:7"}]));
        let request = admission_request("default", &pod, false);

        swapper.mutate(&request, &mut pod).await;

        assert_eq!(registry.created(), vec!["docker.io/library/redis".to_string()]);
    }

    #[tokio::test]
    async fn dry_run_admissions_cause_no_copies_or_mutations() {
        let registry = MockRegistry::new("r.example.com");
        let swapper = build_swapper(
            Arc::clone(&registry),
            SwapperOptions {
                swap_policy: ImageSwapPolicy::Always,
                ..Default::default()
            },
        );
        let mut pod = pod_with_containers(json!([{"name": "nginx", "image": "nginx:latest"}]));
        let request = admission_request("default", &pod, true);

        let results = swapper.mutate(&request, &mut pod).await;

        assert_eq!(results[0].outcome, ContainerOutcome::DryRun);
        assert_eq!(container_image(&pod, 0), "nginx:latest");
        sleep(Duration::from_millis(50)).await;
        assert!(registry.created().is_empty());
    }
}
