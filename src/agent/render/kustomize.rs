use kube::api::DynamicObject;
use kube::ResourceExt;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::manifest::parse_objects;
use crate::error::{FleetError, FleetResult};

/// The subset of `kustomization.yaml` honoured by the agent: explicit
/// resource lists, a namespace override, common labels and strategic-merge
/// patches targeted by GVK+name.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Kustomization {
    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default, rename = "commonLabels")]
    pub common_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub patches: Vec<KustomizePatch>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct KustomizePatch {
    /// Strategic-merge patch, inline YAML
    pub patch: String,

    #[serde(default)]
    pub target: Option<PatchTarget>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PatchTarget {
    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}

pub const KUSTOMIZATION_FILE: &str = "kustomization.yaml";

/// Run the kustomize build over decoded bundle files rooted at `dir`.
pub fn render_kustomize(
    files: &BTreeMap<String, Vec<u8>>,
    dir: &str,
) -> FleetResult<Vec<DynamicObject>> {
    let root = if dir.is_empty() || dir == "." {
        String::new()
    } else {
        format!("{}/", dir.trim_end_matches('/'))
    };

    let kustomization_path = format!("{root}{KUSTOMIZATION_FILE}");
    let raw = files.get(&kustomization_path).ok_or_else(|| {
        FleetError::InvalidBundle(format!("missing {kustomization_path}"))
    })?;
    let kustomization: Kustomization = serde_yaml::from_slice(raw)?;

    let mut objects = Vec::new();
    for resource in &kustomization.resources {
        let path = format!("{root}{resource}");
        let raw = files.get(&path).ok_or_else(|| {
            FleetError::InvalidBundle(format!("kustomization references missing file {path}"))
        })?;
        let content = std::str::from_utf8(raw).map_err(|_| {
            FleetError::InvalidBundle(format!("{path} is not valid UTF-8"))
        })?;
        objects.extend(parse_objects(content)?);
    }

    for obj in objects.iter_mut() {
        if let Some(namespace) = &kustomization.namespace {
            obj.metadata.namespace = Some(namespace.clone());
        }
        if !kustomization.common_labels.is_empty() {
            let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
            for (k, v) in &kustomization.common_labels {
                labels.insert(k.clone(), v.clone());
            }
        }
    }

    for patch in &kustomization.patches {
        apply_patch(&mut objects, patch)?;
    }

    Ok(objects)
}

fn apply_patch(objects: &mut [DynamicObject], patch: &KustomizePatch) -> FleetResult<()> {
    let patch_value: serde_yaml::Value = serde_yaml::from_str(&patch.patch)?;
    let patch_json = serde_json::to_value(&patch_value)?;

    let patch_kind = patch_json
        .get("kind")
        .and_then(|k| k.as_str())
        .map(str::to_string);
    let patch_name = patch_json
        .pointer("/metadata/name")
        .and_then(|n| n.as_str())
        .map(str::to_string);

    let target_kind = patch
        .target
        .as_ref()
        .and_then(|t| t.kind.clone())
        .or(patch_kind);
    let target_name = patch
        .target
        .as_ref()
        .and_then(|t| t.name.clone())
        .or(patch_name);

    for obj in objects.iter_mut() {
        let kind_matches = target_kind
            .as_deref()
            .map(|k| obj.types.as_ref().map(|t| t.kind == k).unwrap_or(false))
            .unwrap_or(true);
        let name_matches = target_name
            .as_deref()
            .map(|n| obj.name_any() == n)
            .unwrap_or(true);

        if kind_matches && name_matches {
            let mut merged = serde_json::to_value(&obj.data)?;
            strategic_merge(&mut merged, &patch_json);
            obj.data = merged;
        }
    }

    Ok(())
}

/// Plain recursive merge; the strategic list-merge keys of full kustomize
/// are out of scope, whole lists replace.
fn strategic_merge(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                if key == "apiVersion" || key == "kind" || key == "metadata" {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => strategic_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn builds_resources_with_namespace_and_labels() {
        let files = files(&[
            (
                "kustomization.yaml",
                indoc! {"
                    resources:
                      - deployment.yaml
                    namespace: web
                    commonLabels:
                      team: platform
                "},
            ),
            (
                "deployment.yaml",
                indoc! {"
                    apiVersion: apps/v1
                    kind: Deployment
                    metadata:
                      name: sleeper
                "},
            ),
        ]);

        let objects = render_kustomize(&files, "").expect("render");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].metadata.namespace.as_deref(), Some("web"));
        assert_eq!(
            objects[0]
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("team"))
                .map(String::as_str),
            Some("platform")
        );
    }

    #[test]
    fn patches_merge_onto_matching_objects() {
        let files = files(&[
            (
                "base/kustomization.yaml",
                indoc! {"
                    resources:
                      - deployment.yaml
                    patches:
                      - patch: |
                          kind: Deployment
                          metadata:
                            name: sleeper
                          spec:
                            replicas: 5
                "},
            ),
            (
                "base/deployment.yaml",
                indoc! {"
                    apiVersion: apps/v1
                    kind: Deployment
                    metadata:
                      name: sleeper
                    spec:
                      replicas: 1
                      paused: false
                "},
            ),
        ]);

        let objects = render_kustomize(&files, "base").expect("render");
        assert_eq!(objects[0].data["spec"]["replicas"], 5);
        assert_eq!(objects[0].data["spec"]["paused"], false);
    }

    #[test]
    fn missing_resource_is_an_input_error() {
        let files = files(&[(
            "kustomization.yaml",
            "resources:\n  - absent.yaml\n",
        )]);
        assert!(matches!(
            render_kustomize(&files, ""),
            Err(FleetError::InvalidBundle(_))
        ));
    }
}
