use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::condition::Condition;

/// Credential template for registering new downstream clusters. Reduced to a
/// service-account-backed bearer token emitted in a secret the agent
/// bootstrap consumes.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "ClusterRegistrationToken",
    shortname = "crt",
    namespaced,
    schema = "disabled",
    status = "ClusterRegistrationTokenStatus",
    printcolumn = r#"{"name":"Secret-Name", "jsonPath":".status.secretName", "type":"string"}"#,
    printcolumn = r#"{"name":"Expires", "jsonPath":".status.expires", "type":"string"}"#
)]
pub struct ClusterRegistrationTokenSpec {
    /// Seconds until the token (and its secret) expire; 0 or absent means no
    /// expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClusterRegistrationTokenStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<chrono::DateTime<chrono::Utc>>,

    /// Secret holding the bearer token for agent bootstrap
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "secretName")]
    pub secret_name: Option<String>,
}

/// The registration handshake record an agent POSTs at bootstrap. The
/// upstream allocates (or adopts) a Cluster and answers with scoped
/// credentials.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "ClusterRegistration",
    namespaced,
    schema = "disabled",
    status = "ClusterRegistrationStatus",
    printcolumn = r#"{"name":"Cluster-Name", "jsonPath":".status.clusterName", "type":"string"}"#,
    printcolumn = r#"{"name":"Granted", "jsonPath":".status.granted", "type":"boolean"}"#
)]
pub struct ClusterRegistrationSpec {
    /// Stable identifier linking re-registrations to the same Cluster
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "clientID")]
    pub client_id: Option<String>,

    /// Per-registration nonce, names the credential secret
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "clientRandom"
    )]
    pub client_random: Option<String>,

    /// Labels the agent requests for its Cluster record
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "clusterLabels"
    )]
    pub cluster_labels: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClusterRegistrationStatus {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "clusterName"
    )]
    pub cluster_name: Option<String>,

    /// True once credentials have been issued
    #[serde(default)]
    pub granted: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
