//! env-injector - mutating admission webhook that injects environment variables into pods
//!
//! The Kubernetes API server calls this webhook before persisting a Pod. Pods
//! that opt in (directly through an annotation, or through a label on their
//! namespace) get a configured set of environment variables appended to every
//! container and init-container, without overriding variables the pod already
//! defines.
//!
//! # Architecture
//!
//! - The webhook adapter decodes the `AdmissionReview` and guards the resource type
//! - The mutation policy decides whether the pod should be injected
//! - The patch engine injects into a copy of the pod and diffs it into a JSON Patch
//!
//! # Modules
//!
//! - [`config`] - Injection set loading and the hot-reloadable shared handle
//! - [`policy`] - Mutation decision and the namespace lookup collaborator
//! - [`patch`] - Environment injection and JSON Patch generation
//! - [`webhook`] - Axum router and AdmissionReview handling
//! - [`error`] - Error types for the webhook

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod patch;
pub mod policy;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Reserved Keys
// =============================================================================
// Annotation keys are shared between the policy (which reads them) and the
// patch engine (which writes the status key). The inject key is also read as
// a namespace label.

/// Annotation (and namespace label) requesting injection
pub const INJECT_ANNOTATION: &str = "env-injector-webhook.hardt.io/inject";

/// Annotation recording that a pod has already been processed
pub const STATUS_ANNOTATION: &str = "env-injector-webhook.hardt.io/status";

/// Value of [`STATUS_ANNOTATION`] once a pod has been injected
pub const STATUS_INJECTED: &str = "injected";

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default path of the injection config file (mounted from a ConfigMap)
pub const DEFAULT_CONFIG_PATH: &str = "/etc/webhook/config/envvarconfig.yaml";

/// Default port for the webhook HTTPS server
pub const DEFAULT_WEBHOOK_PORT: u16 = 443;

/// Path the MutatingWebhookConfiguration points at
pub const MUTATE_PODS_PATH: &str = "/mutating-pods";
