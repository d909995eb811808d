pub mod deployer;
pub mod drift;
pub mod namespace;
pub mod register;
pub mod render;

pub use deployer::{error_policy, reconcile, AgentContext};

use futures_util::StreamExt;
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::{watcher, Controller},
};
use std::sync::Arc;

use crate::crd::{BundleDeployment, Cluster, SHARD_LABEL};

/// Watcher config for this replica's shard. Labelled resources go to the
/// matching replica; unlabelled ones to the default shard.
pub fn shard_watcher_config(shard_id: &str) -> watcher::Config {
    let config = watcher::Config::default();
    if shard_id.is_empty() {
        config.labels(&format!("!{SHARD_LABEL}"))
    } else {
        config.labels(&format!("{SHARD_LABEL}={shard_id}"))
    }
}

/// Start the agent controller and run until `shutdown` resolves. On
/// shutdown the current reconcile finishes, watches close, and the stream
/// drains; no new reconciles begin.
pub async fn start_agent(
    ctx: Arc<AgentContext>,
    shutdown: impl std::future::Future<Output = ()> + Send + Sync + 'static,
) {
    let bundle_deployments: Api<BundleDeployment> =
        Api::namespaced(ctx.upstream.clone(), &ctx.config.namespace);

    log::info!(
        "Starting BundleDeployment agent in namespace {}",
        ctx.config.namespace
    );

    Controller::new(bundle_deployments, shard_watcher_config(&ctx.config.shard_id))
        .graceful_shutdown_on(shutdown)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => log::debug!("Reconciliation completed: {:?}", o),
                Err(e) => log::debug!("Reconciliation error: {:?}", e),
            }
        })
        .await;
}

/// Periodic heartbeat: stamp `agentLastSeen` on this agent's Cluster record
/// so the upstream can tell live agents from gone ones.
pub async fn heartbeat_loop(
    upstream: kube::Client,
    cluster_namespace: String,
    cluster_name: String,
    interval: std::time::Duration,
) {
    let api: Api<Cluster> = Api::namespaced(upstream, &cluster_namespace);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let patch = serde_json::json!({
            "status": { "agentLastSeen": chrono::Utc::now() }
        });
        if let Err(e) = api
            .patch_status(&cluster_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            log::warn!(
                "failed to update agentLastSeen for {}/{}: {}",
                cluster_namespace,
                cluster_name,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shard_excludes_labelled_resources() {
        let config = shard_watcher_config("");
        assert_eq!(
            config.label_selector.as_deref(),
            Some("!fleet.cattle.io/shard-id")
        );
    }

    #[test]
    fn named_shard_selects_only_its_label() {
        let config = shard_watcher_config("shard-a");
        assert_eq!(
            config.label_selector.as_deref(),
            Some("fleet.cattle.io/shard-id=shard-a")
        );
    }
}
