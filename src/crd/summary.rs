use serde::{Deserialize, Serialize};

/// Coarse per-deployment state, ordered worst-first so aggregation can pick
/// the most alarming state for display.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum BundleState {
    ErrApplied,
    WaitApplied,
    Modified,
    OutOfSync,
    Pending,
    NotReady,
    Ready,
}

impl BundleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleState::ErrApplied => "ErrApplied",
            BundleState::WaitApplied => "WaitApplied",
            BundleState::Modified => "Modified",
            BundleState::OutOfSync => "OutOfSync",
            BundleState::Pending => "Pending",
            BundleState::NotReady => "NotReady",
            BundleState::Ready => "Ready",
        }
    }
}

/// Counts of BundleDeployments by state, rolled up into Bundle, GitRepo,
/// Cluster and ClusterGroup status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct BundleSummary {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ready: i32,

    #[serde(default, skip_serializing_if = "is_zero", rename = "notReady")]
    pub not_ready: i32,

    #[serde(default, skip_serializing_if = "is_zero", rename = "waitApplied")]
    pub wait_applied: i32,

    #[serde(default, skip_serializing_if = "is_zero", rename = "errApplied")]
    pub err_applied: i32,

    #[serde(default, skip_serializing_if = "is_zero", rename = "outOfSync")]
    pub out_of_sync: i32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub modified: i32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub pending: i32,

    #[serde(default, skip_serializing_if = "is_zero", rename = "desiredReady")]
    pub desired_ready: i32,

    /// Up to a handful of non-ready resources for display; the full detail
    /// lives on the individual BundleDeployments.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        rename = "nonReadyResources"
    )]
    pub non_ready_resources: Vec<NonReadyResource>,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl BundleSummary {
    /// Count one deployment in the given state.
    pub fn increment(&mut self, state: BundleState) {
        self.desired_ready += 1;
        match state {
            BundleState::Ready => self.ready += 1,
            BundleState::NotReady => self.not_ready += 1,
            BundleState::WaitApplied => self.wait_applied += 1,
            BundleState::ErrApplied => self.err_applied += 1,
            BundleState::OutOfSync => self.out_of_sync += 1,
            BundleState::Modified => self.modified += 1,
            BundleState::Pending => self.pending += 1,
        }
    }

    /// Fold another summary into this one.
    pub fn add(&mut self, other: &BundleSummary) {
        self.ready += other.ready;
        self.not_ready += other.not_ready;
        self.wait_applied += other.wait_applied;
        self.err_applied += other.err_applied;
        self.out_of_sync += other.out_of_sync;
        self.modified += other.modified;
        self.pending += other.pending;
        self.desired_ready += other.desired_ready;
        self.non_ready_resources
            .extend(other.non_ready_resources.iter().cloned());
        self.non_ready_resources.truncate(10);
    }

    pub fn is_ready(&self) -> bool {
        self.desired_ready == self.ready
    }

    /// Worst state present in the summary, for display rollup.
    pub fn worst_state(&self) -> BundleState {
        if self.err_applied > 0 {
            BundleState::ErrApplied
        } else if self.wait_applied > 0 {
            BundleState::WaitApplied
        } else if self.modified > 0 {
            BundleState::Modified
        } else if self.out_of_sync > 0 {
            BundleState::OutOfSync
        } else if self.pending > 0 {
            BundleState::Pending
        } else if self.not_ready > 0 {
            BundleState::NotReady
        } else {
            BundleState::Ready
        }
    }
}

/// One non-ready deployment surfaced in a summary.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NonReadyResource {
    /// Name of the BundleDeployment (or Bundle, one level up)
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "bundleState")]
    pub bundle_state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

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
}

/// A downstream object that drifted from its applied state.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ModifiedStatus {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "apiVersion")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Object is expected but absent downstream
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub missing: bool,

    /// Object exists downstream but is not part of the applied set
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delete: bool,

    /// JSON patch describing the live divergence from the applied state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

/// A downstream object that has not reached readiness.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NonReadyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "apiVersion")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReadinessSummary>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReadinessSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transitioning: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message: Vec<String>,
}

/// Per-object resource counts rolled up into GitRepo and Cluster status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResourceCounts {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ready: i32,

    #[serde(default, skip_serializing_if = "is_zero", rename = "desiredReady")]
    pub desired_ready: i32,

    #[serde(default, skip_serializing_if = "is_zero", rename = "waitApplied")]
    pub wait_applied: i32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub modified: i32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub orphaned: i32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub missing: i32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub unknown: i32,

    #[serde(default, skip_serializing_if = "is_zero", rename = "notReady")]
    pub not_ready: i32,
}
