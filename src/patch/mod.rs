//! Environment injection and JSON Patch generation
//!
//! The pod is injected as a copy, marked with the status annotation, and both
//! versions are serialized and diffed. The resulting [`json_patch::Patch`] is
//! what the API server applies, so existing variables are never replaced and
//! new ones are appended after them.

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::core::v1::{EnvVar, Pod};
use tracing::debug;

use crate::config::InjectionSet;
use crate::{Result, STATUS_ANNOTATION, STATUS_INJECTED};

/// Result of mutating a pod
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Serialized mutated pod
    pub object: serde_json::Value,
    /// Operations turning the original pod into the mutated one
    pub patch: json_patch::Patch,
}

/// Append the missing injection variables to one container's env
///
/// A variable is missing when no existing entry has the same name ignoring
/// case. Existing entries keep their position and value. The env list is
/// created if anything needs appending. Returns the number of appended
/// variables.
pub fn inject_container_env(env: &mut Option<Vec<EnvVar>>, set: &InjectionSet) -> usize {
    let skip: HashSet<String> = env
        .iter()
        .flatten()
        .map(|v| v.name.to_lowercase())
        .filter(|name| set.contains(name))
        .collect();

    let missing: Vec<EnvVar> = set
        .env_vars()
        .iter()
        .filter(|v| !skip.contains(&v.name.to_lowercase()))
        .cloned()
        .collect();

    let appended = missing.len();
    if appended > 0 {
        env.get_or_insert_with(Vec::new).extend(missing);
    }
    appended
}

/// Inject into every container and init-container, then mark the pod
///
/// Each container is checked against its own variables only.
pub fn inject(pod: &mut Pod, set: &InjectionSet) {
    if let Some(spec) = pod.spec.as_mut() {
        for container in spec.init_containers.iter_mut().flatten() {
            let appended = inject_container_env(&mut container.env, set);
            debug!(container = %container.name, appended, "Injected init container env");
        }
        for container in spec.containers.iter_mut() {
            let appended = inject_container_env(&mut container.env, set);
            debug!(container = %container.name, appended, "Injected container env");
        }
    }

    pod.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(STATUS_ANNOTATION.to_string(), STATUS_INJECTED.to_string());
}

/// Inject into a copy of the pod and diff it against the original
///
/// The original is left untouched. Both sides go through the same
/// serializer, so the patch only carries the injected changes.
pub fn apply(pod: &Pod, set: &InjectionSet) -> Result<Mutation> {
    let original = serde_json::to_value(pod)?;

    let mut mutated = pod.clone();
    inject(&mut mutated, set);
    let object = serde_json::to_value(&mutated)?;

    let patch = json_patch::diff(&original, &object);
    debug!(operations = patch.0.len(), "Computed pod patch");

    Ok(Mutation { object, patch })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, EnvVarSource, ObjectFieldSelector, PodSpec};
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }
    }

    fn set(vars: &[(&str, &str)]) -> InjectionSet {
        InjectionSet::new(vars.iter().map(|(n, v)| env(n, v)).collect()).unwrap()
    }

    fn container(name: &str, vars: Option<Vec<EnvVar>>) -> Container {
        Container {
            name: name.to_string(),
            image: Some("nginx:latest".to_string()),
            env: vars,
            ..Default::default()
        }
    }

    fn pod(containers: Vec<Container>, init_containers: Option<Vec<Container>>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers,
                init_containers,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn names(vars: &[EnvVar]) -> Vec<&str> {
        vars.iter().map(|v| v.name.as_str()).collect()
    }

    fn patch_json(mutation: &Mutation) -> Vec<serde_json::Value> {
        serde_json::to_value(&mutation.patch)
            .unwrap()
            .as_array()
            .cloned()
            .unwrap()
    }

    // =========================================================================
    // Unit Tests
    // =========================================================================

    #[test]
    fn test_append_preserves_existing_order() {
        let mut vars = Some(vec![env("A", "0")]);
        let appended = inject_container_env(&mut vars, &set(&[("A", "1"), ("B", "2")]));

        assert_eq!(appended, 1);
        assert_eq!(vars, Some(vec![env("A", "0"), env("B", "2")]));
    }

    #[test]
    fn test_existing_name_in_other_case_is_not_overridden() {
        let mut vars = Some(vec![env("FOO", "mine")]);
        let appended = inject_container_env(&mut vars, &set(&[("foo", "injected")]));

        assert_eq!(appended, 0);
        assert_eq!(vars, Some(vec![env("FOO", "mine")]));
    }

    #[test]
    fn test_missing_env_list_is_created() {
        let mut vars = None;
        let appended = inject_container_env(&mut vars, &set(&[("A", "1"), ("B", "2")]));

        assert_eq!(appended, 2);
        assert_eq!(vars, Some(vec![env("A", "1"), env("B", "2")]));
    }

    #[test]
    fn test_empty_set_leaves_env_absent() {
        let mut vars = None;
        assert_eq!(inject_container_env(&mut vars, &InjectionSet::default()), 0);
        assert!(vars.is_none());
    }

    #[test]
    fn test_unrelated_existing_vars_are_kept() {
        let mut vars = Some(vec![env("HOME", "/root"), env("PATH", "/bin")]);
        inject_container_env(&mut vars, &set(&[("REGION", "eu")]));

        let vars = vars.unwrap();
        assert_eq!(names(&vars), vec!["HOME", "PATH", "REGION"]);
    }

    #[test]
    fn test_value_from_entries_are_injected_as_is() {
        let pod_ip = EnvVar {
            name: "POD_IP".to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "status.podIP".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        };
        let set = InjectionSet::new(vec![pod_ip.clone()]).unwrap();
        let mut vars = None;
        inject_container_env(&mut vars, &set);

        assert_eq!(vars, Some(vec![pod_ip]));
    }

    #[test]
    fn test_inject_sets_status_annotation() {
        let mut p = pod(vec![container("app", None)], None);
        inject(&mut p, &set(&[("A", "1")]));

        let annotations = p.metadata.annotations.unwrap();
        assert_eq!(annotations.get(STATUS_ANNOTATION).unwrap(), STATUS_INJECTED);
    }

    #[test]
    fn test_inject_keeps_existing_annotations() {
        let mut p = pod(vec![], None);
        p.metadata.annotations = Some(BTreeMap::from([(
            "team".to_string(),
            "payments".to_string(),
        )]));
        inject(&mut p, &InjectionSet::default());

        let annotations = p.metadata.annotations.unwrap();
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations.get("team").unwrap(), "payments");
    }

    // =========================================================================
    // Story Tests
    // =========================================================================

    /// Story: Containers are evaluated against their own variables
    #[test]
    fn story_each_container_has_its_own_skip_set() {
        let mut p = pod(
            vec![
                container("app", Some(vec![env("region", "local")])),
                container("sidecar", None),
            ],
            Some(vec![container("init", Some(vec![env("ZONE", "z1")]))]),
        );
        inject(&mut p, &set(&[("REGION", "eu"), ("ZONE", "z9")]));

        let spec = p.spec.unwrap();
        let app = spec.containers[0].env.as_ref().unwrap();
        let sidecar = spec.containers[1].env.as_ref().unwrap();
        let init = spec.init_containers.unwrap()[0].env.clone().unwrap();

        assert_eq!(app, &vec![env("region", "local"), env("ZONE", "z9")]);
        assert_eq!(sidecar, &vec![env("REGION", "eu"), env("ZONE", "z9")]);
        assert_eq!(init, vec![env("ZONE", "z1"), env("REGION", "eu")]);
    }

    /// Story: The original pod is untouched and the patch reproduces the mutation
    #[test]
    fn story_patch_applies_to_original() {
        let p = pod(vec![container("app", Some(vec![env("A", "0")]))], None);
        let mutation = apply(&p, &set(&[("A", "1"), ("B", "2")])).unwrap();

        assert!(p.metadata.annotations.is_none());
        assert_eq!(p.spec.as_ref().unwrap().containers[0].env.as_ref().unwrap().len(), 1);

        let mut doc = serde_json::to_value(&p).unwrap();
        json_patch::patch(&mut doc, &mutation.patch).unwrap();
        assert_eq!(doc, mutation.object);

        let env = &mutation.object["spec"]["containers"][0]["env"];
        assert_eq!(
            env,
            &json!([{"name": "A", "value": "0"}, {"name": "B", "value": "2"}])
        );
    }

    /// Story: New env entries are appended, never replacing existing ones
    #[test]
    fn story_patch_only_adds() {
        let p = pod(vec![container("app", Some(vec![env("A", "0")]))], None);
        let mutation = apply(&p, &set(&[("A", "1"), ("B", "2")])).unwrap();

        let ops = patch_json(&mutation);
        assert!(ops.iter().all(|op| op["op"] == "add"), "ops: {ops:?}");
        assert!(ops.contains(&json!({
            "op": "add",
            "path": "/spec/containers/0/env/1",
            "value": {"name": "B", "value": "2"}
        })));
    }

    /// Story: A pod without containers only gets the status annotation
    #[test]
    fn story_no_containers_only_marks_status() {
        let p = pod(vec![], None);
        let mutation = apply(&p, &set(&[("A", "1")])).unwrap();

        let ops = patch_json(&mutation);
        assert_eq!(
            ops,
            vec![json!({
                "op": "add",
                "path": "/metadata/annotations",
                "value": {STATUS_ANNOTATION: STATUS_INJECTED}
            })]
        );
    }

    /// Story: An empty injection set still marks the pod as processed
    #[test]
    fn story_empty_set_still_marks_status() {
        let mut p = pod(vec![container("app", None)], None);
        p.metadata.annotations = Some(BTreeMap::from([(
            "team".to_string(),
            "payments".to_string(),
        )]));
        let mutation = apply(&p, &InjectionSet::default()).unwrap();

        let ops = patch_json(&mutation);
        assert_eq!(
            ops,
            vec![json!({
                "op": "add",
                "path": "/metadata/annotations/env-injector-webhook.hardt.io~1status",
                "value": STATUS_INJECTED
            })]
        );
    }

    /// Story: The same input always yields the same patch
    #[test]
    fn story_patch_is_deterministic() {
        let p = pod(
            vec![container("app", None), container("sidecar", None)],
            Some(vec![container("init", None)]),
        );
        let injection = set(&[("A", "1"), ("B", "2"), ("C", "3")]);

        let first = patch_json(&apply(&p, &injection).unwrap());
        let second = patch_json(&apply(&p, &injection).unwrap());
        assert_eq!(first, second);
    }
}
