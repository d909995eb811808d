use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::options::{BundleDeploymentOptions, CorrectDrift};
use super::summary::{BundleState, ModifiedStatus, NonReadyStatus};

/// The per-(Bundle, Cluster) deployment record, living in the owning
/// cluster's scoped namespace. The agent is its only writer downstream.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "BundleDeployment",
    shortname = "bd",
    namespaced,
    schema = "disabled",
    status = "BundleDeploymentStatus",
    printcolumn = r#"{"name":"Deployed", "jsonPath":".status.display.deployed", "type":"string"}"#,
    printcolumn = r#"{"name":"Monitored", "jsonPath":".status.display.monitored", "type":"string"}"#,
    printcolumn = r#"{"name":"Status", "jsonPath":".status.display.state", "type":"string"}"#
)]
pub struct BundleDeploymentSpec {
    /// `<content-name>:<options-hash>`; changes iff content or options change
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "deploymentID"
    )]
    pub deployment_id: Option<String>,

    /// Staging slot written while a rollout is paused or pacing withholds
    /// promotion
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "stagedDeploymentID"
    )]
    pub staged_deployment_id: Option<String>,

    #[serde(default)]
    pub options: BundleDeploymentOptions,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "stagedOptions")]
    pub staged_options: Option<BundleDeploymentOptions>,

    /// Names of bundles that must be ready on the same cluster first
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "dependsOn")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "correctDrift")]
    pub correct_drift: Option<CorrectDrift>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,

    /// Resources live in an OCI artifact rather than a Content blob
    #[serde(default, skip_serializing_if = "std::ops::Not::not", rename = "ociContents")]
    pub oci_contents: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BundleDeploymentStatus {
    /// The deploymentID last applied downstream
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "appliedDeploymentID"
    )]
    pub applied_deployment_id: Option<String>,

    /// Mirrors `options.forceSyncGeneration` once the re-apply happened
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "syncGeneration"
    )]
    pub sync_generation: Option<i64>,

    #[serde(default)]
    pub ready: bool,

    /// False while any owned object has drifted
    #[serde(default, rename = "nonModified")]
    pub non_modified: bool,

    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        rename = "modifiedStatus"
    )]
    pub modified_status: Vec<ModifiedStatus>,

    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        rename = "nonReadyStatus"
    )]
    pub non_ready_status: Vec<NonReadyStatus>,

    /// Objects applied downstream, for resource count rollup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<DeployedResource>,

    /// Name of the helm release backing the deployment, if helm rendered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<BundleDeploymentDisplay>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BundleDeploymentDisplay {
    /// e.g. `Deployed` or the apply error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed: Option<String>,

    /// e.g. `OK` or the drift summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitored: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Coordinates of one object applied downstream.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeployedResource {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "apiVersion")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "createdAt")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl BundleDeployment {
    /// True once the applied ID matches the desired ID and the downstream
    /// objects are ready.
    pub fn is_ready(&self) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        status.ready && status.applied_deployment_id == self.spec.deployment_id
    }

    /// The coarse state used for summaries, mirroring the agent's state
    /// machine.
    pub fn state(&self) -> BundleState {
        let Some(status) = &self.status else {
            return BundleState::Pending;
        };

        if status.applied_deployment_id.is_none() {
            return BundleState::Pending;
        }

        if status.applied_deployment_id != self.spec.deployment_id {
            // Staged but unpromoted IDs are WaitApplied, promoted-but-not-yet
            // applied are OutOfSync.
            return if self.spec.staged_deployment_id != self.spec.deployment_id {
                BundleState::WaitApplied
            } else {
                BundleState::OutOfSync
            };
        }

        if super::condition::get_condition(&status.conditions, super::condition::CONDITION_DEPLOYED)
            .map(|c| !c.is_true())
            .unwrap_or(false)
        {
            return BundleState::ErrApplied;
        }

        if !status.non_modified {
            return BundleState::Modified;
        }

        if status.ready {
            BundleState::Ready
        } else {
            BundleState::NotReady
        }
    }

    /// Content blob name embedded in the deploymentID.
    pub fn content_name(&self) -> Option<&str> {
        self.spec
            .deployment_id
            .as_deref()
            .and_then(|id| id.split(':').next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bd(deployment_id: &str, applied: Option<&str>, ready: bool) -> BundleDeployment {
        let mut bd = BundleDeployment::new(
            "test",
            BundleDeploymentSpec {
                deployment_id: Some(deployment_id.to_string()),
                staged_deployment_id: Some(deployment_id.to_string()),
                ..Default::default()
            },
        );
        bd.status = Some(BundleDeploymentStatus {
            applied_deployment_id: applied.map(str::to_string),
            ready,
            non_modified: true,
            ..Default::default()
        });
        bd
    }

    #[test]
    fn state_tracks_applied_id() {
        assert_eq!(bd("s-abc:1", None, false).state(), BundleState::Pending);
        assert_eq!(
            bd("s-abc:1", Some("s-old:1"), true).state(),
            BundleState::OutOfSync
        );
        assert_eq!(bd("s-abc:1", Some("s-abc:1"), true).state(), BundleState::Ready);
        assert_eq!(
            bd("s-abc:1", Some("s-abc:1"), false).state(),
            BundleState::NotReady
        );
    }

    #[test]
    fn staged_but_unpromoted_is_wait_applied() {
        let mut b = bd("s-new:1", Some("s-old:1"), true);
        b.spec.staged_deployment_id = Some("s-newer:1".to_string());
        assert_eq!(b.state(), BundleState::WaitApplied);
    }

    #[test]
    fn drift_flips_state_to_modified() {
        let mut b = bd("s-abc:1", Some("s-abc:1"), true);
        if let Some(status) = b.status.as_mut() {
            status.non_modified = false;
        }
        assert_eq!(b.state(), BundleState::Modified);
    }

    #[test]
    fn content_name_is_the_id_prefix() {
        let b = bd("s-abc123:deadbeef", None, false);
        assert_eq!(b.content_name(), Some("s-abc123"));
    }
}
