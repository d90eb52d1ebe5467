use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::Json;
use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use tracing::{debug, error, warn};

use crate::metrics::{ContainerLabels, MirrorMetrics, RequestLabels};
use crate::swapper::ImageSwapper;

pub struct AppState {
    pub swapper: ImageSwapper,
    pub metrics: Arc<MirrorMetrics>,
}

pub type SharedState = Arc<AppState>;

/// Mutating admission endpoint. A review that cannot be decoded gets an
/// "invalid" response; everything past decoding is always allowed — a broken
/// mirror must never block Pod admission.
pub async fn handle_mutate(
    State(state): State<SharedState>,
    body: Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let start = Instant::now();

    let review: AdmissionReview<Pod> = match serde_json::from_value(body.0) {
        Ok(review) => review,
        Err(err) => {
            warn!("failed to deserialize AdmissionReview: {err}");
            let resp = AdmissionResponse::invalid(format!("failed to deserialize request: {err}"));
            return review_to_json(resp.into_review());
        }
    };

    let request: AdmissionRequest<Pod> = match review.try_into() {
        Ok(request) => request,
        Err(err) => {
            warn!("AdmissionReview missing request field: {err}");
            let resp = AdmissionResponse::invalid("missing request field in AdmissionReview");
            return review_to_json(resp.into_review());
        }
    };

    state
        .metrics
        .admission_requests_total
        .get_or_create(&RequestLabels {
            operation: format!("{:?}", request.operation).to_uppercase(),
        })
        .inc();

    let Some(original) = request.object.clone() else {
        debug!(uid = %request.uid, "admission without object, nothing to mutate");
        return review_to_json(AdmissionResponse::from(&request).into_review());
    };

    let mut pod = original.clone();
    let results = state.swapper.mutate(&request, &mut pod).await;
    for result in &results {
        state
            .metrics
            .containers_total
            .get_or_create(&ContainerLabels {
                outcome: result.outcome.as_str(),
            })
            .inc();
    }

    let response = build_response(&request, &original, &pod);

    state
        .metrics
        .admission_request_duration_seconds
        .observe(start.elapsed().as_secs_f64());

    review_to_json(response.into_review())
}

fn build_response(
    request: &AdmissionRequest<Pod>,
    original: &Pod,
    mutated: &Pod,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    let (before, after) = match (
        serde_json::to_value(original),
        serde_json::to_value(mutated),
    ) {
        (Ok(before), Ok(after)) => (before, after),
        _ => {
            error!(uid = %request.uid, "failed to serialize pod for patch computation");
            return response;
        }
    };

    let patch: Patch = json_patch::diff(&before, &after);
    if patch.0.is_empty() {
        return response;
    }

    match response.with_patch(patch) {
        Ok(patched) => patched,
        Err(err) => {
            error!(uid = %request.uid, "failed to serialize patch: {err}");
            AdmissionResponse::from(request)
        }
    }
}

fn review_to_json(review: AdmissionReview<DynamicObject>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(review).expect("AdmissionReview serialization is infallible"))
}
