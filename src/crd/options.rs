use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The deployment-shaping half of a Bundle spec. The same shape travels on
/// `BundleDeployment.spec.options` after per-cluster overlay resolution, so
/// the options hash over this struct is what keys the `deploymentID`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BundleDeploymentOptions {
    /// Namespace used for resources that carry none of their own
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "defaultNamespace"
    )]
    pub default_namespace: Option<String>,

    /// Namespace forced onto all namespaced resources
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "targetNamespace"
    )]
    pub target_namespace: Option<String>,

    /// Labels applied when the agent creates the target namespace
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "namespaceLabels"
    )]
    pub namespace_labels: Option<BTreeMap<String, String>>,

    /// Annotations applied when the agent creates the target namespace
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "namespaceAnnotations"
    )]
    pub namespace_annotations: Option<BTreeMap<String, String>>,

    /// When set, the target namespace must pre-exist downstream and match
    /// this selector; when unset the agent creates missing namespaces.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "allowedTargetNamespaceSelector"
    )]
    pub allowed_target_namespace_selector: Option<LabelSelector>,

    /// Overlay file sets resolved by the target matcher, merged over the
    /// base resources by the agent in list order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kustomize: Option<KustomizeOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffOptions>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "serviceAccount"
    )]
    pub service_account: Option<String>,

    /// Bumped by users to force a re-apply without a content change
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "forceSyncGeneration"
    )]
    pub force_sync_generation: Option<i64>,

    /// Abandon (instead of delete) downstream objects on removal
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "keepResources"
    )]
    pub keep_resources: bool,

    /// Delete the target namespace on removal (protected namespaces excepted)
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "deleteNamespace"
    )]
    pub delete_namespace: bool,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "correctDrift")]
    pub correct_drift: Option<CorrectDrift>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<IgnoreOptions>,
}

/// Helm rendering options.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct HelmOptions {
    /// Chart name, path within the bundle, or full URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,

    /// Helm repository URL the chart is fetched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,

    /// Concrete version or semver constraint; empty or `*` selects the
    /// highest available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Values merged over the chart's own, before per-cluster templating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<serde_json::Map<String, serde_json::Value>>,

    /// Additional values files from the chart, merged in list order
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "valuesFiles")]
    pub values_files: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "releaseName")]
    pub release_name: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "timeoutSeconds"
    )]
    pub timeout_seconds: Option<i32>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,

    /// Adopt objects that already exist but belong to no release
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "takeOwnership"
    )]
    pub take_ownership: bool,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "maxHistory")]
    pub max_history: Option<i32>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub atomic: bool,

    /// Skip per-cluster templating of values
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "disablePreProcess"
    )]
    pub disable_pre_process: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not", rename = "disableDNS")]
    pub disable_dns: bool,

    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "skipSchemaValidation"
    )]
    pub skip_schema_validation: bool,

    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "disableDependencyUpdate"
    )]
    pub disable_dependency_update: bool,

    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "waitForJobs"
    )]
    pub wait_for_jobs: bool,
}

/// Kustomize rendering options.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct KustomizeOptions {
    /// Directory containing `kustomization.yaml`, relative to the bundle root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

/// Fields masked out before drift comparison.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DiffOptions {
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        rename = "comparePatches"
    )]
    pub compare_patches: Vec<ComparePatch>,
}

/// One masking rule: ignore the listed JSON pointers (or whole operations)
/// on objects matching the GVK+name coordinates.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ComparePatch {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "apiVersion")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// JSON pointers removed from both sides before comparison
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "jsonPointers")]
    pub json_pointers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<PatchOperation>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PatchOperation {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Drift correction policy.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct CorrectDrift {
    #[serde(default)]
    pub enabled: bool,

    /// Delete-and-recreate when a plain re-apply cannot converge
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,

    /// Keep failed helm releases around for inspection
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "keepFailHistory"
    )]
    pub keep_fail_history: bool,
}

/// Condition patterns excluded from readiness evaluation downstream.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct IgnoreOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_serialize_to_empty_object() {
        let options = BundleDeploymentOptions::default();
        let json = serde_json::to_string(&options).expect("serialize");
        assert_eq!(json, "{}");
    }

    #[test]
    fn helm_options_keep_wire_names() {
        let helm = HelmOptions {
            chart: Some("nginx".into()),
            release_name: Some("frontend".into()),
            timeout_seconds: Some(300),
            take_ownership: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&helm).expect("serialize");
        assert_eq!(json["releaseName"], "frontend");
        assert_eq!(json["timeoutSeconds"], 300);
        assert_eq!(json["takeOwnership"], true);
        assert!(json.get("force").is_none());
    }
}
