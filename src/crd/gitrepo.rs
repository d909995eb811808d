use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::options::CorrectDrift;
use super::summary::{BundleSummary, ResourceCounts};

/// Selects the clusters a GitRepo's bundles are delivered to. Copied onto
/// every Bundle the repo produces.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct GitTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "clusterName")]
    pub cluster_name: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "clusterSelector"
    )]
    pub cluster_selector: Option<LabelSelector>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "clusterGroup"
    )]
    pub cluster_group: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "clusterGroupSelector"
    )]
    pub cluster_group_selector: Option<LabelSelector>,
}

/// The GitRepo CustomResource: a request to track a Git repository and
/// deliver the bundles found under `paths`.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "GitRepo",
    shortname = "gr",
    namespaced,
    schema = "disabled",
    status = "GitRepoStatus",
    printcolumn = r#"{"name":"Repo", "jsonPath":".spec.repo", "type":"string"}"#,
    printcolumn = r#"{"name":"Commit", "jsonPath":".status.commit", "type":"string"}"#,
    printcolumn = r#"{"name":"BundleDeployments-Ready", "jsonPath":".status.display.readyBundleDeployments", "type":"string"}"#,
    printcolumn = r#"{"name":"Status", "jsonPath":".status.display.message", "type":"string"}"#
)]
pub struct GitRepoSpec {
    /// Git repository URL (https or ssh)
    pub repo: String,

    /// Branch to poll; mutually exclusive with `revision`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Pin to an exact revision instead of polling a branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Subdirectories scanned for bundles; empty means the repo root
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    /// Poll interval in seconds; the effective interval is capped by the
    /// system default
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "pollingInterval"
    )]
    pub polling_interval: Option<String>,

    /// Suppress polling entirely; webhook commits and forced syncs still
    /// advance the revision
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "disablePolling"
    )]
    pub disable_polling: bool,

    /// Secret with git credentials (basic-auth or ssh)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "clientSecretName"
    )]
    pub client_secret_name: Option<String>,

    /// Secret with helm repo credentials used for charts referenced by
    /// bundles in this repo
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "helmSecretName"
    )]
    pub helm_secret_name: Option<String>,

    /// Secret mapping bundle paths to helm credentials
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "helmSecretNameForPaths"
    )]
    pub helm_secret_name_for_paths: Option<String>,

    /// PEM CA bundle for the git endpoint
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "caBundle")]
    pub ca_bundle: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "insecureSkipTLSVerify"
    )]
    pub insecure_skip_tls_verify: bool,

    /// Resolve bundle resources to an OCI artifact instead of a Content blob
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "ociRegistry"
    )]
    pub oci_registry: Option<OCIRegistrySpec>,

    /// Namespace forced onto all delivered resources
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "targetNamespace"
    )]
    pub target_namespace: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "serviceAccount"
    )]
    pub service_account: Option<String>,

    /// Abandon downstream objects instead of deleting on removal
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "keepResources"
    )]
    pub keep_resources: bool,

    /// Delete created target namespaces on removal
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "deleteNamespace"
    )]
    pub delete_namespace: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,

    /// Bumped to force a re-apply at the latest branch HEAD
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "forceSyncGeneration"
    )]
    pub force_sync_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "correctDrift")]
    pub correct_drift: Option<CorrectDrift>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<GitTarget>,
}

/// OCI delivery settings; when set, rendered resources are pushed to the
/// registry and the Bundle carries a reference instead of a Content blob.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct OCIRegistrySpec {
    pub reference: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "authSecretName"
    )]
    pub auth_secret_name: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "basicHTTP"
    )]
    pub basic_http: bool,

    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        rename = "insecureSkipTLS"
    )]
    pub insecure_skip_tls: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct GitRepoStatus {
    /// Commit the bundles were last built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    /// Commit pushed by the webhook receiver; wins while polling is disabled
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "webhookCommit"
    )]
    pub webhook_commit: Option<String>,

    /// Incremented when forceSyncGeneration moves, so children can observe it
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "updateGeneration"
    )]
    pub update_generation: Option<i64>,

    /// Outcome of the last bundle build from this repo
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "gitJobStatus"
    )]
    pub git_job_status: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "observedGeneration"
    )]
    pub observed_generation: Option<i64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "desiredReadyClusters"
    )]
    pub desired_ready_clusters: Option<i32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "readyClusters"
    )]
    pub ready_clusters: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BundleSummary>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "resourceCounts"
    )]
    pub resource_counts: Option<ResourceCounts>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<GitRepoDisplay>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct GitRepoDisplay {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "readyBundleDeployments"
    )]
    pub ready_bundle_deployments: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl GitRepo {
    /// The commit reconciliation should build from: the webhook commit wins
    /// while polling is disabled, otherwise the polled commit.
    pub fn effective_commit(&self) -> Option<String> {
        let status = self.status.as_ref()?;
        if self.spec.disable_polling {
            status
                .webhook_commit
                .clone()
                .or_else(|| status.commit.clone())
        } else {
            status.commit.clone()
        }
    }

    pub fn force_sync_generation(&self) -> i64 {
        self.spec.force_sync_generation.unwrap_or(0)
    }
}
