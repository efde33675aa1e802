//! Pod Mutation Webhook
//!
//! Handles AdmissionReview requests for Pods, injecting the configured
//! environment variables into pods that opt in.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use tracing::{debug, error, info, instrument, warn};

use crate::{patch, policy, Error, Result};

use super::WebhookState;

/// Handle mutating admission review for Pods
///
/// This handler:
/// 1. Requires an `application/json` body
/// 2. Decodes the AdmissionReview, answering malformed reviews with an
///    invalid response that still carries the request UID when readable
/// 3. Delegates to [`mutate_pods`] and wraps the result as a review
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json(&headers) {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<none>");
        error!(content_type = %content_type, "Expected application/json");
        let e = Error::envelope(format!("content type {content_type}, expected application/json"));
        return invalid_review(e, &body);
    }

    let request = match decode_review(&body) {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return invalid_review(e, &body);
        }
    };

    let response = mutate_pods(&state, &request).await;
    Json(response.into_review()).into_response()
}

/// Answer an undecodable request with an invalid review, echoing the UID if readable
fn invalid_review(e: Error, body: &[u8]) -> Response {
    let mut response = AdmissionResponse::invalid(e.to_string());
    response.uid = request_uid(body).unwrap_or_default();
    Json(response.into_review()).into_response()
}

/// Process a single pod mutation request
///
/// Every failure after the resource check is reported in the response or
/// logged; none of them is propagated to the caller.
#[instrument(skip_all, fields(uid = %request.uid))]
pub async fn mutate_pods(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let unchanged = AdmissionResponse::from(request);

    if !is_pod_resource(request) {
        error!(
            group = %request.resource.group,
            version = %request.resource.version,
            resource = %request.resource.resource,
            "Expected resource to be v1/pods"
        );
        return unchanged.deny(format!(
            "expected resource v1/pods, got {}/{}/{}",
            request.resource.group, request.resource.version, request.resource.resource
        ));
    }

    let obj = match &request.object {
        Some(obj) => obj,
        None => {
            debug!("No pod object in request, allowing unchanged");
            return unchanged;
        }
    };

    let pod = match decode_pod(obj) {
        Ok(pod) => pod,
        Err(e) => {
            error!(error = %e, "Failed to decode pod");
            return unchanged.deny(e.to_string());
        }
    };

    let namespace = request
        .namespace
        .as_deref()
        .or(pod.metadata.namespace.as_deref())
        .unwrap_or_default();

    if !policy::should_mutate(&pod, namespace, state.namespaces.as_ref()).await {
        debug!(namespace = %namespace, "Injection not requested, allowing unchanged");
        return unchanged;
    }

    let injection = if state.reload_on_mutate {
        match state.injection.reload().await {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "Unable to reload injection config, using previous");
                state.injection.snapshot().await
            }
        }
    } else {
        state.injection.snapshot().await
    };

    let mutation = match patch::apply(&pod, &injection) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "Unable to compute pod patch, allowing unchanged");
            return unchanged;
        }
    };

    info!(
        namespace = %namespace,
        pod = ?pod.metadata.name.as_ref().or(pod.metadata.generate_name.as_ref()),
        variables = injection.len(),
        patch_ops = mutation.patch.0.len(),
        "Injecting environment into pod"
    );
    debug!(pod = %mutation.object, "Mutated pod");

    match with_patch(unchanged.clone(), mutation.patch) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Failed to attach patch, allowing unchanged");
            unchanged
        }
    }
}

fn with_patch(response: AdmissionResponse, patch: json_patch::Patch) -> Result<AdmissionResponse> {
    response
        .with_patch(patch)
        .map_err(|e| Error::patch(e.to_string()))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

fn is_pod_resource(request: &AdmissionRequest<DynamicObject>) -> bool {
    let gvr = &request.resource;
    gvr.group.is_empty() && gvr.version == "v1" && gvr.resource == "pods"
}

fn decode_review(body: &[u8]) -> Result<AdmissionRequest<DynamicObject>> {
    let review: AdmissionReview<DynamicObject> =
        serde_json::from_slice(body).map_err(|e| Error::envelope(e.to_string()))?;
    TryInto::<AdmissionRequest<DynamicObject>>::try_into(review)
        .map_err(|e| Error::envelope(e.to_string()))
}

/// Best-effort UID extraction from a body that failed to decode
fn request_uid(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .pointer("/request/uid")
        .and_then(|uid| uid.as_str())
        .map(String::from)
}

fn decode_pod(obj: &DynamicObject) -> Result<Pod> {
    let value = serde_json::to_value(obj)?;
    Ok(serde_json::from_value(value)?)
}
