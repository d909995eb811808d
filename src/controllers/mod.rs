pub mod bundle;
pub mod cluster;
pub mod cluster_group;
pub mod gitrepo;
pub mod registration;

use futures_util::StreamExt;
use kube::api::Api;
use kube::runtime::controller;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use std::sync::Arc;

use crate::agent::shard_watcher_config;
use crate::config::ControllerConfig;
use crate::content::ContentStore;
use crate::crd::{
    Bundle, BundleDeployment, Cluster, ClusterGroup, ClusterRegistration,
    ClusterRegistrationToken, GitRepo, BUNDLE_NAMESPACE_LABEL, BUNDLE_NAME_LABEL,
    CLUSTER_LABEL, CLUSTER_NAMESPACE_LABEL, REPO_LABEL,
};
use crate::scheduler::RateLimiter;

/// Context shared by every upstream reconciler.
#[derive(Clone)]
pub struct ControllerContext {
    /// Kubernetes client
    pub client: Client,
    pub config: ControllerConfig,
    pub store: ContentStore,
    /// The one failure rate limiter shared across controllers
    pub limiter: Arc<RateLimiter>,
}

fn shutdown_future(
    shutdown: &tokio::sync::watch::Receiver<bool>,
) -> impl std::future::Future<Output = ()> + Send + 'static {
    let mut rx = shutdown.clone();
    async move {
        let _ = rx.changed().await;
    }
}

/// Start every upstream controller and run until shutdown. Watches wire the
/// status rollup: BundleDeployment → Bundle and Cluster, Bundle → GitRepo.
pub async fn start_controllers(
    ctx: Arc<ControllerContext>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let client = &ctx.client;
    let shard = ctx.config.shard_id.clone();

    let gitrepos: Api<GitRepo> = Api::all(client.clone());
    let bundles: Api<Bundle> = Api::all(client.clone());
    let deployments: Api<BundleDeployment> = Api::all(client.clone());
    let clusters: Api<Cluster> = Api::all(client.clone());
    let groups: Api<ClusterGroup> = Api::all(client.clone());
    let tokens: Api<ClusterRegistrationToken> = Api::all(client.clone());
    let registrations: Api<ClusterRegistration> = Api::all(client.clone());

    log::info!(
        "Starting fleet controllers (shard {:?}, {} gitrepo / {} bundle workers)",
        shard,
        ctx.config.gitrepo_workers,
        ctx.config.bundle_workers
    );

    let workers = |count: usize| controller::Config::default().concurrency(count as u16);

    // A Bundle event re-rolls its owning GitRepo.
    let gitrepo_controller = Controller::new(gitrepos, shard_watcher_config(&shard))
        .with_config(workers(ctx.config.gitrepo_workers))
        .watches(
            bundles.clone(),
            Default::default(),
            |bundle: Bundle| -> Vec<ObjectRef<GitRepo>> {
                let Some(ns) = bundle.namespace() else {
                    return Vec::new();
                };
                bundle
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(REPO_LABEL))
                    .map(|repo| vec![ObjectRef::new(repo).within(&ns)])
                    .unwrap_or_default()
            },
        )
        .graceful_shutdown_on(shutdown_future(&shutdown))
        .run(gitrepo::reconcile, gitrepo::error_policy, ctx.clone())
        .for_each(log_result);

    // A BundleDeployment status change re-plans and re-rolls its Bundle.
    let bundle_controller = Controller::new(bundles, shard_watcher_config(&shard))
        .with_config(workers(ctx.config.bundle_workers))
        .watches(
            deployments.clone(),
            Default::default(),
            |bd: BundleDeployment| -> Vec<ObjectRef<Bundle>> {
                let labels = bd.metadata.labels.clone().unwrap_or_default();
                match (labels.get(BUNDLE_NAME_LABEL), labels.get(BUNDLE_NAMESPACE_LABEL)) {
                    (Some(name), Some(ns)) => vec![ObjectRef::new(name).within(ns)],
                    _ => Vec::new(),
                }
            },
        )
        .graceful_shutdown_on(shutdown_future(&shutdown))
        .run(bundle::reconcile, bundle::error_policy, ctx.clone())
        .for_each(log_result);

    // A BundleDeployment also enqueues its Cluster, resolved through the
    // ownership labels its namespace carries.
    let cluster_controller = Controller::new(clusters, shard_watcher_config(&shard))
        .watches(
            deployments,
            Default::default(),
            |bd: BundleDeployment| -> Vec<ObjectRef<Cluster>> {
                let labels = bd.metadata.labels.clone().unwrap_or_default();
                match (labels.get(CLUSTER_LABEL), labels.get(CLUSTER_NAMESPACE_LABEL)) {
                    (Some(name), Some(ns)) => vec![ObjectRef::new(name).within(ns)],
                    _ => Vec::new(),
                }
            },
        )
        .graceful_shutdown_on(shutdown_future(&shutdown))
        .run(cluster::reconcile, cluster::error_policy, ctx.clone())
        .for_each(log_result);

    let group_controller = Controller::new(groups, Default::default())
        .graceful_shutdown_on(shutdown_future(&shutdown))
        .run(cluster_group::reconcile, cluster_group::error_policy, ctx.clone())
        .for_each(log_result);

    let token_controller = Controller::new(tokens, Default::default())
        .graceful_shutdown_on(shutdown_future(&shutdown))
        .run(
            registration::reconcile_token,
            registration::token_error_policy,
            ctx.clone(),
        )
        .for_each(log_result);

    let registration_controller = Controller::new(registrations, Default::default())
        .graceful_shutdown_on(shutdown_future(&shutdown))
        .run(
            registration::reconcile_registration,
            registration::registration_error_policy,
            ctx.clone(),
        )
        .for_each(log_result);

    tokio::join!(
        gitrepo_controller,
        bundle_controller,
        cluster_controller,
        group_controller,
        token_controller,
        registration_controller,
    );
}

async fn log_result<T: std::fmt::Debug, E: std::fmt::Debug>(res: Result<T, E>) {
    match res {
        Ok(o) => log::debug!("Reconciliation completed: {:?}", o),
        Err(e) => log::debug!("Reconciliation error: {:?}", e),
    }
}
