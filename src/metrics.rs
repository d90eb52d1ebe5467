use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub operation: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ContainerLabels {
    pub outcome: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CopyTaskLabels {
    pub policy: &'static str,
    pub outcome: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RenewalLabels {
    pub result: &'static str,
}

pub struct MirrorMetrics {
    pub admission_requests_total: Family<RequestLabels, Counter>,
    pub admission_request_duration_seconds: Histogram,
    pub containers_total: Family<ContainerLabels, Counter>,
    pub copy_tasks_total: Family<CopyTaskLabels, Counter>,
    pub copy_duration_seconds: Histogram,
    pub credential_renewals_total: Family<RenewalLabels, Counter>,
}

const REQUEST_DURATION_BUCKETS: [f64; 11] = [
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

// Copies of large images routinely take minutes.
const COPY_DURATION_BUCKETS: [f64; 10] =
    [0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

impl MirrorMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let admission_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "mirror_admission_requests",
            "Total number of admission requests received",
            admission_requests_total.clone(),
        );

        let admission_request_duration_seconds =
            Histogram::new(REQUEST_DURATION_BUCKETS.iter().copied());
        registry.register(
            "mirror_admission_request_duration_seconds",
            "Duration of admission request processing in seconds",
            admission_request_duration_seconds.clone(),
        );

        let containers_total = Family::<ContainerLabels, Counter>::default();
        registry.register(
            "mirror_containers",
            "Containers seen by the mutation pipeline, by outcome",
            containers_total.clone(),
        );

        let copy_tasks_total = Family::<CopyTaskLabels, Counter>::default();
        registry.register(
            "mirror_copy_tasks",
            "Image copy tasks, by copy policy and outcome",
            copy_tasks_total.clone(),
        );

        let copy_duration_seconds = Histogram::new(COPY_DURATION_BUCKETS.iter().copied());
        registry.register(
            "mirror_copy_duration_seconds",
            "Duration of image copies into the mirror in seconds",
            copy_duration_seconds.clone(),
        );

        let credential_renewals_total = Family::<RenewalLabels, Counter>::default();
        registry.register(
            "mirror_credential_renewals",
            "Registry credential renewal attempts, by result",
            credential_renewals_total.clone(),
        );

        Self {
            admission_requests_total,
            admission_request_duration_seconds,
            containers_total,
            copy_tasks_total,
            copy_duration_seconds,
            credential_renewals_total,
        }
    }
}
