use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status condition attached to every user-touchable resource.
///
/// `lastTransitionTime` only moves when `status` flips, so watchers can tell
/// a flapping condition from a stable one.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Condition {
    /// Condition type, e.g. `Ready`, `Accepted`, `Stalled`
    #[serde(rename = "type")]
    pub type_: String,

    /// `True`, `False` or `Unknown`
    pub status: String,

    /// Machine-readable reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message; short, stable, free of secrets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "lastTransitionTime"
    )]
    pub last_transition_time: Option<DateTime<Utc>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "lastUpdateTime"
    )]
    pub last_update_time: Option<DateTime<Utc>>,
}

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_ACCEPTED: &str = "Accepted";
pub const CONDITION_STALLED: &str = "Stalled";
pub const CONDITION_RECONCILING: &str = "Reconciling";
pub const CONDITION_GIT_POLLING: &str = "GitPolling";
pub const CONDITION_DEPLOYED: &str = "Deployed";
pub const CONDITION_MONITORED: &str = "Monitored";
pub const CONDITION_INSTALLED: &str = "Installed";

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Upsert a condition, preserving `lastTransitionTime` when the status is
/// unchanged.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
) {
    let now = Utc::now();
    let status_str = if status { "True" } else { "False" };

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let transitioned = existing.status != status_str;
        existing.status = status_str.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = if message.is_empty() {
            None
        } else {
            Some(message.to_string())
        };
        existing.last_update_time = Some(now);
        if transitioned {
            existing.last_transition_time = Some(now);
        }
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status_str.to_string(),
            reason: Some(reason.to_string()),
            message: if message.is_empty() {
                None
            } else {
                Some(message.to_string())
            },
            last_transition_time: Some(now),
            last_update_time: Some(now),
        });
    }
}

/// Find a condition by type.
pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True iff the condition exists and its status is `True`.
pub fn condition_is_true(conditions: &[Condition], type_: &str) -> bool {
    get_condition(conditions, type_).map(|c| c.is_true()).unwrap_or(false)
}
