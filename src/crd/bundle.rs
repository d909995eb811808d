use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::options::BundleDeploymentOptions;
use super::summary::BundleSummary;

/// One file of a bundle's resource set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct BundleResource {
    /// Path relative to the bundle root
    pub name: String,

    /// File content; base64 when `encoding` says so
    #[serde(default)]
    pub content: String,

    /// Empty for plain text, `base64` or `base64+gz` otherwise
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encoding: String,
}

/// A target entry: which clusters, and how the deployment options change for
/// them. `overlays` names file sets merged over the base resources for
/// matching clusters.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BundleTarget {
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

    /// Overlay names merged onto the base resource set, in order; later
    /// entries override earlier ones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<String>,

    /// Option overrides for clusters matched by this target
    #[serde(flatten)]
    pub options: BundleDeploymentOptions,
}

/// Rollout pacing: clusters are partitioned and promoted partition by
/// partition, gated on the previous partition's readiness.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RolloutStrategy {
    /// Count or percentage of clusters that may be unavailable inside a
    /// partition before promotion pauses
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "maxUnavailable"
    )]
    pub max_unavailable: Option<String>,

    /// Count or percentage of partitions that may be unavailable at once
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "maxUnavailablePartitions"
    )]
    pub max_unavailable_partitions: Option<String>,

    /// Size of an automatic partition, as a count or percentage of clusters
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "autoPartitionSize"
    )]
    pub auto_partition_size: Option<String>,
}

/// Reference to a bundle this one depends on. The planner withholds a
/// cluster's deployment until the dependency is ready on that same cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BundleRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

/// The Bundle CustomResource: the immutable-per-deploymentID unit of
/// delivery produced from a source tree.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "Bundle",
    namespaced,
    schema = "disabled",
    status = "BundleStatus",
    printcolumn = r#"{"name":"BundleDeployments-Ready", "jsonPath":".status.display.readyClusters", "type":"string"}"#,
    printcolumn = r#"{"name":"Status", "jsonPath":".status.conditions[?(@.type==\"Ready\")].message", "type":"string"}"#
)]
pub struct BundleSpec {
    /// The resource set; empty when delivered via OCI
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<BundleResource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<BundleTarget>,

    /// Deny list evaluated after `targets`; same selector vocabulary
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        rename = "targetRestrictions"
    )]
    pub target_restrictions: Vec<BundleTarget>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "rolloutStrategy"
    )]
    pub rollout_strategy: Option<RolloutStrategy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "dependsOn")]
    pub depends_on: Vec<BundleRef>,

    /// While paused, new deploymentIDs stage without promoting
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,

    /// Name of a pre-created Content resource to deploy instead of hashing
    /// `resources`
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "contentsId")]
    pub contents_id: Option<String>,

    /// Base deployment options; targets override per cluster
    #[serde(flatten)]
    pub options: BundleDeploymentOptions,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BundleStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BundleSummary>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<BundleDisplay>,

    /// SHA-256 over the canonical serialization of `spec.resources`; names
    /// the shared Content blob
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "resourcesSHA256Sum"
    )]
    pub resources_sha256_sum: Option<String>,

    /// Set instead of a Content reference when delivering via OCI
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "ociReference"
    )]
    pub oci_reference: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "observedGeneration"
    )]
    pub observed_generation: Option<i64>,

    /// Resolved maxUnavailable for the current cluster count
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "maxUnavailable"
    )]
    pub max_unavailable: Option<i32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "maxUnavailablePartitions"
    )]
    pub max_unavailable_partitions: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<i32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "unavailablePartitions"
    )]
    pub unavailable_partitions: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionStatus>,

    /// How many deployments the last reconcile created
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "newlyCreated"
    )]
    pub newly_created: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BundleDisplay {
    /// `"<ready>/<desired>"`
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "readyClusters"
    )]
    pub ready_clusters: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Rollout bookkeeping for one partition of clusters.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PartitionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub count: i32,

    #[serde(default, rename = "maxUnavailable")]
    pub max_unavailable: i32,

    #[serde(default)]
    pub unavailable: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BundleSummary>,
}

impl Bundle {
    pub fn force_sync_generation(&self) -> i64 {
        self.spec.options.force_sync_generation.unwrap_or(0)
    }

    /// Name of the Content blob backing this bundle, if resources have been
    /// hashed.
    pub fn content_name(&self) -> Option<String> {
        self.status
            .as_ref()
            .and_then(|s| s.resources_sha256_sum.as_deref())
            .map(crate::content::content_name_for_sha)
    }
}
