//! Mutation policy
//!
//! Decides whether a pod should have environment variables injected. Rules are
//! evaluated in order and the first match wins:
//!
//! 1. Status annotation is `injected` (any case) - already processed, skip
//! 2. Inject annotation is truthy (`y`, `yes`, `true`, `on`) - inject
//! 3. Inject annotation is falsy (`n`, `no`, `false`, `off`) - skip
//! 4. Otherwise the namespace label under the inject key decides; only a
//!    truthy value injects
//!
//! Pod-level intent always overrides the namespace default. Unset or
//! unrecognized values never inject, and a failed namespace lookup is treated
//! as "do not inject" (fail-closed).

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{Api, Client};
use tracing::{debug, error};

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result, INJECT_ANNOTATION, STATUS_ANNOTATION, STATUS_INJECTED};

/// Trait abstracting namespace label lookups
///
/// The lookup is a pure read; implementations must not cache or mutate
/// anything visible to concurrent evaluations.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NamespaceLookup: Send + Sync {
    /// Fetch the labels of a namespace
    ///
    /// A namespace without labels yields an empty map.
    async fn labels(&self, namespace: &str) -> Result<BTreeMap<String, String>>;
}

/// Namespace lookup backed by the Kubernetes API
pub struct KubeNamespaceLookup {
    client: Client,
}

impl KubeNamespaceLookup {
    /// Create a new lookup wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceLookup for KubeNamespaceLookup {
    async fn labels(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api
            .get(namespace)
            .await
            .map_err(|e| lookup_error(namespace, e))?;
        Ok(ns.metadata.labels.unwrap_or_default())
    }
}

/// A missing namespace is a lookup failure; anything else stays a kube error
fn lookup_error(namespace: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(e) if e.code == 404 => {
            Error::lookup(format!("namespace '{namespace}' not found"))
        }
        other => Error::Kube(other),
    }
}

/// Normalize an inject flag value
///
/// Returns `Some(true)` for `y`/`yes`/`true`/`on`, `Some(false)` for
/// `n`/`no`/`false`/`off` (both compared case-insensitively) and `None` for
/// anything else.
pub fn parse_inject_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "y" | "yes" | "true" | "on" => Some(true),
        "n" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Whether the status annotation marks the pod as already injected
pub fn is_injected(annotations: Option<&BTreeMap<String, String>>) -> bool {
    annotations
        .and_then(|a| a.get(STATUS_ANNOTATION))
        .is_some_and(|v| v.eq_ignore_ascii_case(STATUS_INJECTED))
}

/// Decide whether the pod should be mutated
///
/// The namespace is only looked up when the pod itself expresses no
/// recognizable preference.
pub async fn should_mutate(pod: &Pod, namespace: &str, lookup: &dyn NamespaceLookup) -> bool {
    let annotations = pod.metadata.annotations.as_ref();

    if is_injected(annotations) {
        debug!(namespace = %namespace, "Pod already injected");
        return false;
    }

    let pod_flag = annotations
        .and_then(|a| a.get(INJECT_ANNOTATION))
        .and_then(|v| parse_inject_flag(v));

    match pod_flag {
        Some(true) => {
            debug!(namespace = %namespace, "Injection enabled at pod level");
            return true;
        }
        Some(false) => {
            debug!(namespace = %namespace, "Injection disabled at pod level");
            return false;
        }
        None => {}
    }

    debug!(namespace = %namespace, "No pod-level preference, checking namespace");

    let labels = match lookup.labels(namespace).await {
        Ok(labels) => labels,
        Err(e) => {
            error!(namespace = %namespace, error = %e, "Unable to get namespace");
            return false;
        }
    };

    let enabled = labels
        .get(INJECT_ANNOTATION)
        .and_then(|v| parse_inject_flag(v))
        .unwrap_or(false);

    debug!(namespace = %namespace, enabled, "Namespace-level injection decision");
    enabled
}
