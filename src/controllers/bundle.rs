use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::ControllerContext;
use crate::crd::bundle::BundleDisplay;
use crate::crd::condition::{set_condition, CONDITION_READY};
use crate::crd::{
    Bundle, BundleDeployment, BundleState, BundleStatus, Cluster, ClusterGroup, BUNDLE_FINALIZER,
    BUNDLE_NAME_LABEL,
};
use crate::error::{format_error_chain, FleetError, FleetResult};
use crate::planner::{self, ReadyDependencies};
use crate::status;
use crate::target::match_bundle;

/// The reconciliation function for Bundle resources: evaluate targets,
/// drive the per-cluster deployments, keep the content store referenced,
/// and roll status up.
pub async fn reconcile(bundle: Arc<Bundle>, ctx: Arc<ControllerContext>) -> Result<Action, FleetError> {
    let ns = bundle.namespace().unwrap_or_else(|| "default".to_string());
    let name = bundle.name_any();
    let api: Api<Bundle> = Api::namespaced(ctx.client.clone(), &ns);

    log::debug!("Reconciling Bundle {}/{}", ns, name);

    let existing = list_deployments(&ctx, &ns, &name).await?;

    if bundle.metadata.deletion_timestamp.is_some() {
        for bd in &existing {
            delete_deployment(&ctx, bd).await?;
        }
        remove_finalizer(&api, &bundle).await?;
        log::info!("Bundle {}/{} deleted with {} deployments", ns, name, existing.len());
        return Ok(Action::await_change());
    }
    ensure_finalizer(&api, &bundle).await?;

    let mut bundle_status = bundle.status.clone().unwrap_or_default();
    bundle_status.observed_generation = bundle.metadata.generation;

    // Content addressing: the resource hash names the shared blob.
    let is_oci = bundle
        .spec
        .resources
        .first()
        .map(|r| r.name.starts_with("oci://"))
        .unwrap_or(false);

    let sha = crate::bundlereader::read::resources_sha256(&bundle.spec.resources)?;
    // `contentsId` points at a pre-created blob from another producer;
    // otherwise the content is named by the resource hash.
    let external_content = bundle.spec.contents_id.is_some();
    let content_name = match &bundle.spec.contents_id {
        Some(id) => id.clone(),
        None => crate::content::content_name_for_sha(&sha),
    };
    bundle_status.resources_sha256_sum = Some(sha.clone());
    if is_oci {
        bundle_status.oci_reference = bundle.spec.resources.first().map(|r| r.name.clone());
    }

    // Inventory: clusters and groups live in the bundle's namespace.
    let clusters: Api<Cluster> = Api::namespaced(ctx.client.clone(), &ns);
    let clusters = clusters.list(&ListParams::default()).await?.items;
    let groups: Api<ClusterGroup> = Api::namespaced(ctx.client.clone(), &ns);
    let groups = groups.list(&ListParams::default()).await?.items;

    let matches = match_bundle(&bundle, &clusters, &groups)?;
    if matches.is_empty() && !bundle.spec.targets.is_empty() {
        log::debug!("Bundle {}/{} matches no clusters (bundlesWithNoDeployments)", ns, name);
    }

    let ready_dependencies = collect_ready_dependencies(&ctx, &bundle, &matches).await?;

    let mut oci_bundle = (*bundle).clone();
    oci_bundle.status = Some(bundle_status.clone());
    let plan = planner::plan(&oci_bundle, &content_name, &matches, &existing, &ready_dependencies)?;

    if !plan.withheld.is_empty() {
        log::info!(
            "Bundle {}/{} withholding deployments behind dependencies for clusters {:?}",
            ns,
            name,
            plan.withheld
        );
    }

    // Execute the plan. Content references are attached before a
    // deployment can exist and released after it is gone.
    let payload = if is_oci || external_content || plan.creates.is_empty() {
        None
    } else {
        Some(crate::content::gzip(
            &crate::bundlereader::read::canonical_resources_json(&bundle.spec.resources)?,
        )?)
    };

    for bd in &plan.creates {
        let bd_ns = bd.namespace().unwrap_or_default();
        let bd_name = bd.name_any();

        if is_oci {
            copy_oci_secret(&ctx, &bundle, &bd_ns).await?;
        } else if external_content {
            ctx.store.attach(&content_name, &bd_ns, &bd_name).await?;
        } else if let Some(payload) = &payload {
            ctx.store.put(&sha, payload.clone(), &bd_ns, &bd_name).await?;
        }

        let bds: Api<BundleDeployment> = Api::namespaced(ctx.client.clone(), &bd_ns);
        match bds.create(&PostParams::default(), bd).await {
            Ok(_) => log::info!("Created BundleDeployment {}/{}", bd_ns, bd_name),
            Err(kube::Error::Api(e)) if e.code == 409 => {}
            Err(e) => return Err(e.into()),
        }
    }

    for bd in &plan.updates {
        let bd_ns = bd.namespace().unwrap_or_default();
        let bd_name = bd.name_any();

        if !is_oci {
            // A promoted ID change moves the content reference before the
            // agent can observe the new ID.
            let new_content = bd.content_name().map(str::to_string);
            if let Some(new_content) = &new_content {
                if external_content {
                    ctx.store.attach(new_content, &bd_ns, &bd_name).await?;
                } else {
                    let compressed = crate::content::gzip(
                        &crate::bundlereader::read::canonical_resources_json(&bundle.spec.resources)?,
                    )?;
                    ctx.store.put(&sha, compressed, &bd_ns, &bd_name).await?;
                }

                let old_content = existing
                    .iter()
                    .find(|e| e.namespace() == bd.namespace())
                    .and_then(|e| e.content_name().map(str::to_string));
                if let Some(old_content) = old_content {
                    if &old_content != new_content {
                        ctx.store.release(&old_content, &bd_ns, &bd_name).await?;
                    }
                }
            }
        }

        let bds: Api<BundleDeployment> = Api::namespaced(ctx.client.clone(), &bd_ns);
        bds.patch(
            &bd_name,
            &PatchParams::default(),
            &Patch::Merge(&serde_json::json!({ "spec": bd.spec })),
        )
        .await?;
        log::debug!("Updated BundleDeployment {}/{}", bd_ns, bd_name);
    }

    for bd in &plan.deletes {
        delete_deployment(&ctx, bd).await?;
    }

    // Status rollup over the post-plan deployment set.
    let current = list_deployments(&ctx, &ns, &name).await?;
    let summary = planner::summarize(&current);

    let is_ready = summary.is_ready();
    let state = if current.is_empty() && !matches.is_empty() {
        BundleState::Pending
    } else {
        summary.worst_state()
    };

    bundle_status.display = Some(BundleDisplay {
        ready_clusters: Some(status::ready_display(summary.ready, summary.desired_ready)),
        state: Some(state.as_str().to_string()),
    });
    bundle_status.max_unavailable = plan.partitions.iter().map(|p| p.max_unavailable).max();
    bundle_status.unavailable = Some(plan.partitions.iter().map(|p| p.unavailable).sum());
    bundle_status.unavailable_partitions = Some(
        plan.partitions
            .iter()
            .filter(|p| p.unavailable > p.max_unavailable)
            .count() as i32,
    );
    bundle_status.partitions = plan.partitions;
    bundle_status.newly_created = Some(plan.creates.len() as i32);
    bundle_status.summary = Some(summary);

    set_condition(
        &mut bundle_status.conditions,
        CONDITION_READY,
        is_ready,
        if is_ready { "Ready" } else { "NotReady" },
        "",
    );

    patch_status(&api, &name, &bundle_status).await?;

    ctx.limiter.forget(&format!("{ns}/{name}"));

    // Dependencies, rollout gates and cluster inventory changes resolve
    // over time even without a triggering watch event.
    if !plan.withheld.is_empty() || !is_ready {
        Ok(Action::requeue(Duration::from_secs(15)))
    } else {
        Ok(Action::requeue(Duration::from_secs(60)))
    }
}

/// Error handler for the bundle controller
pub fn error_policy(bundle: Arc<Bundle>, error: &FleetError, ctx: Arc<ControllerContext>) -> Action {
    let key = format!("{}/{}", bundle.namespace().unwrap_or_default(), bundle.name_any());
    log::error!("Error reconciling Bundle {}: {}", key, format_error_chain(error));
    Action::requeue(ctx.limiter.when(&key))
}

async fn list_deployments(
    ctx: &ControllerContext,
    bundle_ns: &str,
    bundle_name: &str,
) -> FleetResult<Vec<BundleDeployment>> {
    let api: Api<BundleDeployment> = Api::all(ctx.client.clone());
    let selector = format!(
        "{BUNDLE_NAME_LABEL}={bundle_name},{}={bundle_ns}",
        crate::crd::BUNDLE_NAMESPACE_LABEL
    );
    Ok(api.list(&ListParams::default().labels(&selector)).await?.items)
}

/// Which (cluster namespace, dependency) pairs are ready right now.
async fn collect_ready_dependencies(
    ctx: &ControllerContext,
    bundle: &Bundle,
    matches: &[crate::target::TargetMatch<'_>],
) -> FleetResult<ReadyDependencies> {
    let mut ready = HashSet::new();
    let dependency_names: Vec<String> = bundle
        .spec
        .depends_on
        .iter()
        .filter_map(|d| d.name.clone())
        .collect();
    if dependency_names.is_empty() {
        return Ok(ready);
    }

    for m in matches {
        let Some(cluster_ns) = m.cluster.scoped_namespace() else {
            continue;
        };
        let api: Api<BundleDeployment> = Api::namespaced(ctx.client.clone(), cluster_ns);

        for dep in &dependency_names {
            let deps = api
                .list(&ListParams::default().labels(&format!("{BUNDLE_NAME_LABEL}={dep}")))
                .await?;
            if deps.items.iter().any(|bd| bd.is_ready()) {
                ready.insert((cluster_ns.to_string(), dep.clone()));
            }
        }
    }

    Ok(ready)
}

/// Delete a deployment and release its content reference.
async fn delete_deployment(ctx: &ControllerContext, bd: &BundleDeployment) -> FleetResult<()> {
    let bd_ns = bd.namespace().unwrap_or_default();
    let bd_name = bd.name_any();

    let api: Api<BundleDeployment> = Api::namespaced(ctx.client.clone(), &bd_ns);
    match api.delete(&bd_name, &DeleteParams::default()).await {
        Ok(_) => log::info!("Deleted BundleDeployment {}/{}", bd_ns, bd_name),
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(content_name) = bd.content_name() {
        if !bd.spec.oci_contents {
            ctx.store.release(content_name, &bd_ns, &bd_name).await?;
        }
    }

    Ok(())
}

/// OCI mode: the agent reads the pull secret from its own scoped namespace;
/// copy the per-bundle secret there under the deployment's name.
async fn copy_oci_secret(
    ctx: &ControllerContext,
    bundle: &Bundle,
    cluster_ns: &str,
) -> FleetResult<()> {
    let ns = bundle.namespace().unwrap_or_default();
    let source: Api<Secret> = Api::namespaced(ctx.client.clone(), &ns);
    let secret = source.get(&bundle.name_any()).await?;

    let mut copy = Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(bundle.name_any()),
            namespace: Some(cluster_ns.to_string()),
            ..Default::default()
        },
        data: secret.data.clone(),
        type_: secret.type_.clone(),
        ..Default::default()
    };
    copy.metadata.labels = Some(
        [(BUNDLE_NAME_LABEL.to_string(), bundle.name_any())]
            .into_iter()
            .collect(),
    );

    let target: Api<Secret> = Api::namespaced(ctx.client.clone(), cluster_ns);
    match target.create(&PostParams::default(), &copy).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => {
            target
                .patch(
                    &bundle.name_any(),
                    &PatchParams::default(),
                    &Patch::Merge(&copy),
                )
                .await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn ensure_finalizer(api: &Api<Bundle>, bundle: &Bundle) -> FleetResult<()> {
    let has = bundle
        .metadata
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|x| x == BUNDLE_FINALIZER))
        .unwrap_or(false);
    if has {
        return Ok(());
    }

    let mut finalizers = bundle.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(BUNDLE_FINALIZER.to_string());
    api.patch(
        &bundle.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&serde_json::json!({
            "metadata": {
                "resourceVersion": bundle.resource_version(),
                "finalizers": finalizers,
            }
        })),
    )
    .await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<Bundle>, bundle: &Bundle) -> FleetResult<()> {
    let Some(finalizers) = bundle.metadata.finalizers.clone() else {
        return Ok(());
    };
    let remaining: Vec<String> = finalizers
        .into_iter()
        .filter(|f| f != BUNDLE_FINALIZER)
        .collect();

    match api
        .patch(
            &bundle.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&serde_json::json!({
                "metadata": {
                    "resourceVersion": bundle.resource_version(),
                    "finalizers": remaining,
                }
            })),
        )
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn patch_status(api: &Api<Bundle>, name: &str, status: &BundleStatus) -> FleetResult<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
