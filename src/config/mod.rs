//! Injection config
//!
//! The set of environment variables to inject is read from a YAML file,
//! normally a ConfigMap mounted into the webhook pod:
//!
//! ```yaml
//! envVars:
//!   - name: CLUSTER_NAME
//!     value: prod-east
//!   - name: POD_IP
//!     valueFrom:
//!       fieldRef:
//!         fieldPath: status.podIP
//! ```
//!
//! An [`InjectionSet`] is immutable once built. Hot reload goes through
//! [`SharedInjectionSet`], which parses a complete new set before swapping it
//! in, so readers only ever observe a whole snapshot.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use k8s_openapi::api::core::v1::EnvVar;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{Error, Result};

/// On-disk shape of the injection config file
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvConfig {
    #[serde(default)]
    env_vars: Vec<EnvVar>,
}

// ============================================================================
// InjectionSet
// ============================================================================

/// Ordered environment variables to inject, with a lowercased name index
///
/// The index is derived from the variables in the constructor and never
/// modified afterwards, so the two can not drift apart.
#[derive(Debug, Clone, Default)]
pub struct InjectionSet {
    env_vars: Vec<EnvVar>,
    names_lower: HashSet<String>,
}

impl InjectionSet {
    /// Build an injection set, rejecting empty or duplicate names
    ///
    /// Duplicates are checked case-sensitively, as supplied.
    pub fn new(env_vars: Vec<EnvVar>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(env_vars.len());
        for var in &env_vars {
            if var.name.is_empty() {
                return Err(Error::config("env var with empty name"));
            }
            if !seen.insert(var.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate env var name '{}'",
                    var.name
                )));
            }
        }

        let names_lower = env_vars.iter().map(|v| v.name.to_lowercase()).collect();

        Ok(Self {
            env_vars,
            names_lower,
        })
    }

    /// Parse an injection set from YAML config contents
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let cfg: EnvConfig = serde_yaml::from_str(contents)
            .map_err(|e| Error::config(format!("failed to parse injection config: {e}")))?;
        Self::new(cfg.env_vars)
    }

    /// Read and parse an injection set from a file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading injection config");

        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;

        let set = Self::from_yaml(&contents).map_err(|e| match e {
            Error::Config(msg) => Error::config(format!("{}: {msg}", path.display())),
            other => other,
        })?;

        debug!(path = %path.display(), count = set.len(), "Loaded injection config");
        Ok(set)
    }

    /// Variables in injection order
    pub fn env_vars(&self) -> &[EnvVar] {
        &self.env_vars
    }

    /// Whether a variable with this name (any case) is part of the set
    pub fn contains(&self, name: &str) -> bool {
        self.names_lower.contains(&name.to_lowercase())
    }

    /// Number of variables in the set
    pub fn len(&self) -> usize {
        self.env_vars.len()
    }

    /// Whether the set has no variables
    pub fn is_empty(&self) -> bool {
        self.env_vars.is_empty()
    }
}

// ============================================================================
// SharedInjectionSet
// ============================================================================

/// Process-wide handle to the current injection set
///
/// Readers take a [`snapshot`](Self::snapshot) and release the lock right
/// away; the snapshot stays valid for the whole request even if a reload
/// happens meanwhile.
#[derive(Clone)]
pub struct SharedInjectionSet {
    current: Arc<RwLock<Arc<InjectionSet>>>,
    source: Option<PathBuf>,
}

impl SharedInjectionSet {
    /// Wrap an already-built set with no backing file
    ///
    /// [`reload`](Self::reload) is a no-op for such a handle.
    pub fn new(set: InjectionSet) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(set))),
            source: None,
        }
    }

    /// Load the initial set from a file and remember the path for reloads
    pub async fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let set = InjectionSet::load(&path).await?;
        info!(path = %path.display(), count = set.len(), "Injection config loaded");
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(set))),
            source: Some(path),
        })
    }

    /// Current set
    pub async fn snapshot(&self) -> Arc<InjectionSet> {
        self.current.read().await.clone()
    }

    /// Re-read the source file and swap in the new set
    ///
    /// On failure the previous set stays in place and the error is returned.
    pub async fn reload(&self) -> Result<Arc<InjectionSet>> {
        let Some(path) = &self.source else {
            return Ok(self.snapshot().await);
        };

        let fresh = Arc::new(InjectionSet::load(path).await?);
        *self.current.write().await = fresh.clone();
        debug!(path = %path.display(), count = fresh.len(), "Injection config reloaded");
        Ok(fresh)
    }
}
