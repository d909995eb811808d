use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::ControllerContext;
use crate::crd::cluster::ClusterDisplay;
use crate::crd::condition::{set_condition, CONDITION_READY};
use crate::crd::{
    BundleDeployment, Cluster, ClusterStatus, CLUSTER_ANNOTATION, CLUSTER_NAMESPACE_ANNOTATION,
    MANAGED_LABEL, REPO_LABEL,
};
use crate::error::{format_error_chain, FleetError, FleetResult};
use crate::planner;
use crate::status;

/// Deterministic scoped-namespace name for a cluster. Hash-suffixed so
/// renamed or re-created clusters never collide with a leftover namespace.
pub fn scoped_namespace_name(cluster_ns: &str, cluster_name: &str) -> String {
    let digest = crate::content::sha256_hex(format!("{cluster_ns}/{cluster_name}").as_bytes());
    let base = crate::bundlereader::read::normalize_name(&format!(
        "cluster-{cluster_ns}-{cluster_name}"
    ));
    format!("{base}-{}", &digest[..8])
}

/// The reconciliation function for Cluster resources: allocate the scoped
/// namespace on first sight, then keep the per-cluster summary current.
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<ControllerContext>) -> Result<Action, FleetError> {
    let ns = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let name = cluster.name_any();
    let api: Api<Cluster> = Api::namespaced(ctx.client.clone(), &ns);

    log::debug!("Reconciling Cluster {}/{}", ns, name);

    if cluster.metadata.deletion_timestamp.is_some() {
        // Deployment cleanup cascades through the namespace deletion.
        if let Some(scoped) = cluster.scoped_namespace() {
            let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
            match namespaces.delete(scoped, &Default::default()).await {
                Ok(_) => log::info!("Deleted scoped namespace {}", scoped),
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        return Ok(Action::await_change());
    }

    let mut cluster_status = cluster.status.clone().unwrap_or_default();

    let scoped = match cluster.scoped_namespace() {
        Some(scoped) => scoped.to_string(),
        None => {
            let scoped = scoped_namespace_name(&ns, &name);
            ensure_scoped_namespace(&ctx, &scoped, &ns, &name).await?;
            log::info!("Allocated scoped namespace {} for Cluster {}/{}", scoped, ns, name);
            scoped
        }
    };
    cluster_status.namespace = Some(scoped.clone());

    // Summaries over the deployments living in the scoped namespace.
    let deployments: Api<BundleDeployment> = Api::namespaced(ctx.client.clone(), &scoped);
    let deployments = deployments.list(&ListParams::default()).await?.items;

    let summary = planner::summarize(&deployments);
    let is_ready = summary.is_ready();

    let (ready_repos, desired_repos) = repo_readiness(&deployments);
    cluster_status.ready_git_repos = Some(ready_repos);
    cluster_status.desired_ready_git_repos = Some(desired_repos);
    cluster_status.resource_counts = Some(status::resource_counts(&deployments));

    cluster_status.display = Some(ClusterDisplay {
        ready_bundles: Some(status::ready_display(summary.ready, summary.desired_ready)),
        state: Some(summary.worst_state().as_str().to_string()),
    });
    cluster_status.summary = Some(summary);

    set_condition(
        &mut cluster_status.conditions,
        CONDITION_READY,
        is_ready,
        if is_ready { "Ready" } else { "NotReady" },
        "",
    );

    patch_status(&api, &name, &cluster_status).await?;

    ctx.limiter.forget(&format!("{ns}/{name}"));
    Ok(Action::requeue(Duration::from_secs(60)))
}

/// Error handler for the cluster controller
pub fn error_policy(cluster: Arc<Cluster>, error: &FleetError, ctx: Arc<ControllerContext>) -> Action {
    let key = format!("{}/{}", cluster.namespace().unwrap_or_default(), cluster.name_any());
    log::error!("Error reconciling Cluster {}: {}", key, format_error_chain(error));
    Action::requeue(ctx.limiter.when(&key))
}

/// A repo is ready on this cluster when every one of its deployments here
/// is ready.
fn repo_readiness(deployments: &[BundleDeployment]) -> (i32, i32) {
    let mut per_repo: BTreeMap<String, bool> = BTreeMap::new();
    for bd in deployments {
        let Some(repo) = bd.metadata.labels.as_ref().and_then(|l| l.get(REPO_LABEL)) else {
            continue;
        };
        let entry = per_repo.entry(repo.clone()).or_insert(true);
        *entry &= bd.is_ready();
    }

    let desired = per_repo.len() as i32;
    let ready = per_repo.values().filter(|r| **r).count() as i32;
    (ready, desired)
}

async fn ensure_scoped_namespace(
    ctx: &ControllerContext,
    scoped: &str,
    cluster_ns: &str,
    cluster_name: &str,
) -> FleetResult<()> {
    let api: Api<Namespace> = Api::all(ctx.client.clone());

    let mut annotations = BTreeMap::new();
    annotations.insert(CLUSTER_ANNOTATION.to_string(), cluster_name.to_string());
    annotations.insert(
        CLUSTER_NAMESPACE_ANNOTATION.to_string(),
        cluster_ns.to_string(),
    );

    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(scoped.to_string()),
            annotations: Some(annotations),
            labels: Some(
                [(MANAGED_LABEL.to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    };

    match api.create(&PostParams::default(), &namespace).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn patch_status(api: &Api<Cluster>, name: &str, status: &ClusterStatus) -> FleetResult<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::BundleDeploymentSpec;

    #[test]
    fn scoped_namespace_names_are_stable_and_distinct() {
        let a = scoped_namespace_name("fleet-default", "c1");
        let b = scoped_namespace_name("fleet-default", "c1");
        let c = scoped_namespace_name("fleet-default", "c2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("cluster-fleet-default-c1-"));
        assert!(a.len() <= 63);
    }

    #[test]
    fn repo_readiness_groups_by_label() {
        let mut ready = BundleDeployment::new(
            "a",
            BundleDeploymentSpec {
                deployment_id: Some("s-1:1".into()),
                ..Default::default()
            },
        );
        ready.metadata.labels = Some(
            [(REPO_LABEL.to_string(), "repo-a".to_string())].into_iter().collect(),
        );
        ready.status = Some(crate::crd::BundleDeploymentStatus {
            applied_deployment_id: Some("s-1:1".into()),
            ready: true,
            non_modified: true,
            ..Default::default()
        });

        let mut unready = ready.clone();
        unready.metadata.name = Some("b".into());
        if let Some(labels) = unready.metadata.labels.as_mut() {
            labels.insert(REPO_LABEL.to_string(), "repo-b".to_string());
        }
        if let Some(status) = unready.status.as_mut() {
            status.ready = false;
        }

        assert_eq!(repo_readiness(&[ready, unready]), (1, 2));
    }
}
