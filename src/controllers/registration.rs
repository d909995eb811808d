use chrono::Utc;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::ControllerContext;
use crate::crd::cluster::ClusterSpec;
use crate::crd::registration::{
    ClusterRegistration, ClusterRegistrationToken, ClusterRegistrationTokenStatus,
};
use crate::crd::{Cluster, GROUP, MANAGED_LABEL};
use crate::error::{format_error_chain, FleetError, FleetResult};
use crate::scheduler::token_time_to_expiry;

/// The reconciliation function for ClusterRegistrationToken resources:
/// reduce the token to a service-account-backed bearer token in a secret,
/// and delete the whole thing at `createdAt + TTL`.
pub async fn reconcile_token(
    token: Arc<ClusterRegistrationToken>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, FleetError> {
    let ns = token.namespace().unwrap_or_else(|| "default".to_string());
    let name = token.name_any();
    let api: Api<ClusterRegistrationToken> = Api::namespaced(ctx.client.clone(), &ns);

    log::debug!("Reconciling ClusterRegistrationToken {}/{}", ns, name);

    if token.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let created = token
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or_else(Utc::now);

    match token_time_to_expiry(created, token.spec.ttl, Utc::now()) {
        Some(remaining) if remaining.is_zero() => {
            log::info!("ClusterRegistrationToken {}/{} expired, deleting", ns, name);
            match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(Action::await_change());
        }
        remaining => {
            let secret_name = format!("import-token-{name}");
            let sa_name = format!("import-{name}");

            ensure_service_account(&ctx, &ns, &sa_name).await?;
            ensure_token_secret(&ctx, &ns, &secret_name, &sa_name).await?;

            let status = ClusterRegistrationTokenStatus {
                expires: token
                    .spec
                    .ttl
                    .filter(|t| *t > 0)
                    .map(|t| created + chrono::Duration::seconds(t)),
                secret_name: Some(secret_name),
            };
            api.patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(&serde_json::json!({ "status": status })),
            )
            .await?;

            ctx.limiter.forget(&format!("{ns}/{name}"));
            match remaining {
                Some(remaining) => Ok(Action::requeue(remaining)),
                None => Ok(Action::await_change()),
            }
        }
    }
}

pub fn token_error_policy(
    token: Arc<ClusterRegistrationToken>,
    error: &FleetError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = format!("{}/{}", token.namespace().unwrap_or_default(), token.name_any());
    log::error!(
        "Error reconciling ClusterRegistrationToken {}: {}",
        key,
        format_error_chain(error)
    );
    Action::requeue(ctx.limiter.when(&key))
}

/// The reconciliation function for ClusterRegistration resources: allocate
/// (or adopt) the Cluster, grant narrowly-scoped credentials, and answer
/// with the credential secret the agent polls for.
pub async fn reconcile_registration(
    registration: Arc<ClusterRegistration>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, FleetError> {
    let ns = registration.namespace().unwrap_or_else(|| "default".to_string());
    let name = registration.name_any();
    let api: Api<ClusterRegistration> = Api::namespaced(ctx.client.clone(), &ns);

    log::debug!("Reconciling ClusterRegistration {}/{}", ns, name);

    if registration.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    if registration
        .status
        .as_ref()
        .map(|s| s.granted)
        .unwrap_or(false)
    {
        return Ok(Action::await_change());
    }

    let client_id = registration
        .spec
        .client_id
        .clone()
        .ok_or_else(|| FleetError::InvalidInput("registration has no clientID".to_string()))?;

    let cluster = ensure_cluster(&ctx, &ns, &client_id, &registration).await?;
    let cluster_name = cluster.name_any();

    // The scoped namespace is allocated by the cluster reconciler; wait for
    // it rather than racing it.
    let Some(scoped_ns) = cluster.scoped_namespace().map(str::to_string) else {
        log::debug!(
            "ClusterRegistration {}/{} waiting for scoped namespace of {}",
            ns,
            name,
            cluster_name
        );
        return Ok(Action::requeue(Duration::from_secs(5)));
    };

    // Agent identity: a service account allowed to touch exactly its own
    // scoped namespace, plus read access to content blobs by name.
    let sa_name = format!("agent-{cluster_name}");
    ensure_service_account(&ctx, &scoped_ns, &sa_name).await?;
    grant_scoped_access(&ctx, &scoped_ns, &sa_name, &cluster_name).await?;

    let token_secret = format!("agent-token-{cluster_name}");
    ensure_token_secret(&ctx, &scoped_ns, &token_secret, &sa_name).await?;

    let client_random = registration
        .spec
        .client_random
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    emit_credential_secret(
        &ctx,
        &ns,
        &format!("c-{client_random}"),
        &cluster_name,
        &scoped_ns,
        &token_secret,
    )
    .await?;

    api.patch_status(
        &name,
        &PatchParams::default(),
        &Patch::Merge(&serde_json::json!({
            "status": { "clusterName": cluster_name, "granted": true }
        })),
    )
    .await?;

    log::info!(
        "ClusterRegistration {}/{} granted as cluster {}",
        ns,
        name,
        cluster_name
    );

    ctx.limiter.forget(&format!("{ns}/{name}"));
    Ok(Action::await_change())
}

pub fn registration_error_policy(
    registration: Arc<ClusterRegistration>,
    error: &FleetError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = format!(
        "{}/{}",
        registration.namespace().unwrap_or_default(),
        registration.name_any()
    );
    log::error!(
        "Error reconciling ClusterRegistration {}: {}",
        key,
        format_error_chain(error)
    );
    Action::requeue(ctx.limiter.when(&key))
}

/// Find the Cluster this registration belongs to by clientID, or allocate a
/// new record with the requested labels.
async fn ensure_cluster(
    ctx: &ControllerContext,
    ns: &str,
    client_id: &str,
    registration: &ClusterRegistration,
) -> FleetResult<Cluster> {
    let api: Api<Cluster> = Api::namespaced(ctx.client.clone(), ns);

    let clusters = api.list(&ListParams::default()).await?;
    if let Some(existing) = clusters
        .items
        .into_iter()
        .find(|c| c.spec.client_id.as_deref() == Some(client_id))
    {
        return Ok(existing);
    }

    let cluster_name =
        crate::bundlereader::read::normalize_name(&format!("cluster-{client_id}"));
    let mut cluster = Cluster::new(
        &cluster_name,
        ClusterSpec {
            client_id: Some(client_id.to_string()),
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(ns.to_string());
    cluster.metadata.labels = registration.spec.cluster_labels.clone();

    match api.create(&PostParams::default(), &cluster).await {
        Ok(created) => {
            log::info!("Registered new Cluster {}/{}", ns, cluster_name);
            Ok(created)
        }
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(api.get(&cluster_name).await?),
        Err(e) => Err(e.into()),
    }
}

async fn ensure_service_account(ctx: &ControllerContext, ns: &str, name: &str) -> FleetResult<()> {
    let api: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), ns);
    let sa = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        ..Default::default()
    };

    match api.create(&PostParams::default(), &sa).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Role over the scoped namespace plus a ClusterRole for content reads;
/// never cluster-wide list/watch.
async fn grant_scoped_access(
    ctx: &ControllerContext,
    scoped_ns: &str,
    sa_name: &str,
    cluster_name: &str,
) -> FleetResult<()> {
    let role_name = "fleet-bundle-deployment";
    let roles: Api<Role> = Api::namespaced(ctx.client.clone(), scoped_ns);
    let role = Role {
        metadata: ObjectMeta {
            name: Some(role_name.to_string()),
            namespace: Some(scoped_ns.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec![GROUP.to_string()]),
                resources: Some(vec![
                    "bundledeployments".to_string(),
                    "bundledeployments/status".to_string(),
                ]),
                verbs: vec![
                    "get".to_string(),
                    "list".to_string(),
                    "watch".to_string(),
                    "patch".to_string(),
                    "update".to_string(),
                ],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["".to_string()]),
                resources: Some(vec!["secrets".to_string()]),
                verbs: vec!["get".to_string()],
                ..Default::default()
            },
        ]),
    };
    match roles.create(&PostParams::default(), &role).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(e) => return Err(e.into()),
    }

    let bindings: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), scoped_ns);
    let binding = RoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("{role_name}-{sa_name}")),
            namespace: Some(scoped_ns.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role_name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: sa_name.to_string(),
            namespace: Some(scoped_ns.to_string()),
            ..Default::default()
        }]),
    };
    match bindings.create(&PostParams::default(), &binding).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(e) => return Err(e.into()),
    }

    // Contents are cluster-scoped; reads are granted per cluster so the
    // scope stays get-by-name.
    let cluster_role_name = format!("fleet-content-{cluster_name}");
    let cluster_roles: Api<ClusterRole> = Api::all(ctx.client.clone());
    let cluster_role = ClusterRole {
        metadata: ObjectMeta {
            name: Some(cluster_role_name.clone()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![GROUP.to_string()]),
            resources: Some(vec!["contents".to_string()]),
            verbs: vec!["get".to_string()],
            ..Default::default()
        }]),
        ..Default::default()
    };
    match cluster_roles.create(&PostParams::default(), &cluster_role).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(e) => return Err(e.into()),
    }

    let cluster_bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let cluster_binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("{cluster_role_name}-binding")),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role_name,
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: sa_name.to_string(),
            namespace: Some(scoped_ns.to_string()),
            ..Default::default()
        }]),
    };
    match cluster_bindings
        .create(&PostParams::default(), &cluster_binding)
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Legacy service-account-token secret; the control plane fills in the
/// token and CA.
async fn ensure_token_secret(
    ctx: &ControllerContext,
    ns: &str,
    secret_name: &str,
    sa_name: &str,
) -> FleetResult<()> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);

    let mut annotations = BTreeMap::new();
    annotations.insert(
        "kubernetes.io/service-account.name".to_string(),
        sa_name.to_string(),
    );

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: Some(ns.to_string()),
            annotations: Some(annotations),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        type_: Some("kubernetes.io/service-account-token".to_string()),
        ..Default::default()
    };

    match api.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The secret the agent polls for: everything it needs for subsequent
/// scoped operation.
async fn emit_credential_secret(
    ctx: &ControllerContext,
    ns: &str,
    secret_name: &str,
    cluster_name: &str,
    scoped_ns: &str,
    token_secret: &str,
) -> FleetResult<()> {
    // The SA token is minted asynchronously; read it through so the agent
    // gets a ready-to-use credential.
    let token_api: Api<Secret> = Api::namespaced(ctx.client.clone(), scoped_ns);
    let minted = token_api.get(token_secret).await?;
    let token = minted
        .data
        .as_ref()
        .and_then(|d| d.get("token"))
        .map(|t| t.0.clone());
    let ca = minted.data.as_ref().and_then(|d| d.get("ca.crt")).map(|c| c.0.clone());

    let Some(token) = token else {
        return Err(FleetError::NotFound(format!(
            "token secret {scoped_ns}/{token_secret} not yet populated"
        )));
    };

    let mut data: BTreeMap<String, ByteString> = BTreeMap::new();
    data.insert("token".to_string(), ByteString(token));
    if let Some(ca) = ca {
        data.insert("apiServerCA".to_string(), ByteString(ca));
    }
    if let Ok(url) = std::env::var("API_SERVER_URL") {
        data.insert("apiServerURL".to_string(), ByteString(url.into_bytes()));
    }
    data.insert(
        "clusterNamespace".to_string(),
        ByteString(scoped_ns.as_bytes().to_vec()),
    );
    data.insert(
        "clusterName".to_string(),
        ByteString(cluster_name.as_bytes().to_vec()),
    );

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: Some(ns.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("fleet.cattle.io/cluster-credential".to_string()),
        ..Default::default()
    };

    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    match api.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn managed_labels() -> BTreeMap<String, String> {
    [(MANAGED_LABEL.to_string(), "true".to_string())]
        .into_iter()
        .collect()
}
