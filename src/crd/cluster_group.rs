use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::summary::BundleSummary;

/// A named label selector over Clusters, usable as a delivery target and
/// carrying aggregated counts.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "ClusterGroup",
    shortname = "cg",
    namespaced,
    schema = "disabled",
    status = "ClusterGroupStatus",
    printcolumn = r#"{"name":"Clusters-Ready", "jsonPath":".status.display.readyClusters", "type":"string"}"#,
    printcolumn = r#"{"name":"Status", "jsonPath":".status.display.state", "type":"string"}"#
)]
pub struct ClusterGroupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClusterGroupStatus {
    #[serde(default, rename = "clusterCount")]
    pub cluster_count: i32,

    #[serde(default, rename = "nonReadyClusterCount")]
    pub non_ready_cluster_count: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BundleSummary>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<ClusterGroupDisplay>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ClusterGroupDisplay {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "readyClusters"
    )]
    pub ready_clusters: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}
