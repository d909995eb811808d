use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;

use super::ControllerContext;
use crate::crd::{Cluster, ClusterGroup};
use crate::error::{format_error_chain, FleetError};
use crate::status::group_status;
use crate::target::matcher::group_contains;

/// The reconciliation function for ClusterGroup resources: count the
/// matching clusters and sum their summaries.
pub async fn reconcile(
    group: Arc<ClusterGroup>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, FleetError> {
    let ns = group.namespace().unwrap_or_else(|| "default".to_string());
    let name = group.name_any();

    log::debug!("Reconciling ClusterGroup {}/{}", ns, name);

    let clusters: Api<Cluster> = Api::namespaced(ctx.client.clone(), &ns);
    let clusters = clusters.list(&ListParams::default()).await?.items;

    let mut members = Vec::new();
    for cluster in clusters {
        if group_contains(&group, &cluster)? {
            members.push(cluster);
        }
    }

    let status = group_status(&members);
    log::debug!(
        "ClusterGroup {}/{} has {} clusters ({} not ready)",
        ns,
        name,
        status.cluster_count,
        status.non_ready_cluster_count
    );

    let api: Api<ClusterGroup> = Api::namespaced(ctx.client.clone(), &ns);
    api.patch_status(
        &name,
        &PatchParams::default(),
        &Patch::Merge(&serde_json::json!({ "status": status })),
    )
    .await?;

    ctx.limiter.forget(&format!("{ns}/{name}"));
    Ok(Action::requeue(Duration::from_secs(60)))
}

/// Error handler for the cluster group controller
pub fn error_policy(
    group: Arc<ClusterGroup>,
    error: &FleetError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = format!("{}/{}", group.namespace().unwrap_or_default(), group.name_any());
    log::error!(
        "Error reconciling ClusterGroup {}: {}",
        key,
        format_error_chain(error)
    );
    Action::requeue(ctx.limiter.when(&key))
}
