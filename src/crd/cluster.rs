use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::condition::Condition;
use super::summary::{BundleSummary, ResourceCounts};

/// Inventory record of a downstream cluster. Registration creates it; the
/// first status reconcile allocates its scoped namespace.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    schema = "disabled",
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Bundles-Ready", "jsonPath":".status.display.readyBundles", "type":"string"}"#,
    printcolumn = r#"{"name":"Last-Seen", "jsonPath":".status.agentLastSeen", "type":"string"}"#,
    printcolumn = r#"{"name":"Status", "jsonPath":".status.display.state", "type":"string"}"#
)]
pub struct ClusterSpec {
    /// Pause delivery to this cluster; new IDs stage without promoting
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,

    /// Pre-shared identifier an agent presents at registration to claim this
    /// Cluster record
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "clientID")]
    pub client_id: Option<String>,

    /// Bumped to make the agent redeploy itself
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "redeployAgentGeneration"
    )]
    pub redeploy_agent_generation: Option<i64>,

    /// Namespace the agent runs in downstream
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "agentNamespace"
    )]
    pub agent_namespace: Option<String>,

    /// Extra environment for the agent deployment
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "agentEnvVars"
    )]
    pub agent_env_vars: Option<Vec<BTreeMap<String, String>>>,

    /// Values substituted into helm values as `${ .ClusterValues.<path> }`
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "templateValues"
    )]
    pub template_values: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClusterStatus {
    /// The scoped namespace in the upstream API where this cluster's
    /// BundleDeployments live
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "agentLastSeen"
    )]
    pub agent_last_seen: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "agentRedeployGeneration"
    )]
    pub agent_redeploy_generation: Option<i64>,

    /// Set once the agent runs a chart generation that understands the
    /// current wire contract
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "agentMigrated"
    )]
    pub agent_migrated: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BundleSummary>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "resourceCounts"
    )]
    pub resource_counts: Option<ResourceCounts>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "desiredReadyGitRepos"
    )]
    pub desired_ready_git_repos: Option<i32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "readyGitRepos"
    )]
    pub ready_git_repos: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<ClusterDisplay>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ClusterDisplay {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "readyBundles"
    )]
    pub ready_bundles: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Cluster {
    /// The scoped namespace, once allocated.
    pub fn scoped_namespace(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.namespace.as_deref())
    }
}
