//! Mutating Admission Webhook for env-injector
//!
//! This module provides the HTTP surface the API server calls for Pod
//! create/update operations. The handler only translates between
//! `AdmissionReview` envelopes and the core:
//! - [`crate::policy`] decides whether the pod opts in
//! - [`crate::patch`] computes the JSON Patch
//!
//! TLS termination and binding happen in the binary.

pub mod pods;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::config::SharedInjectionSet;
use crate::policy::NamespaceLookup;
use crate::MUTATE_PODS_PATH;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Current injection set, reloadable from its source file
    pub injection: SharedInjectionSet,
    /// Namespace label lookup used when the pod expresses no preference
    pub namespaces: Arc<dyn NamespaceLookup>,
    /// Re-read the injection config before each mutation
    pub reload_on_mutate: bool,
}

impl WebhookState {
    /// Create a new webhook state; reload-on-mutate is enabled by default
    pub fn new(injection: SharedInjectionSet, namespaces: Arc<dyn NamespaceLookup>) -> Self {
        Self {
            injection,
            namespaces,
            reload_on_mutate: true,
        }
    }

    /// Enable or disable re-reading the injection config before each mutation
    pub fn with_reload_on_mutate(mut self, enabled: bool) -> Self {
        self.reload_on_mutate = enabled;
        self
    }
}

/// Create the webhook router with all mutation endpoints
///
/// Currently supports:
/// - POST /mutating-pods - Inject environment variables into Pods
/// - GET /healthz - Liveness probe
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_PODS_PATH, post(pods::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
