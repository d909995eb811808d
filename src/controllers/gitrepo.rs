use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::ControllerContext;
use crate::bundlereader::{read_bundle, ReadOptions};
use crate::crd::bundle::BundleTarget;
use crate::crd::condition::{
    set_condition, CONDITION_ACCEPTED, CONDITION_GIT_POLLING, CONDITION_READY, CONDITION_STALLED,
};
use crate::crd::gitrepo::GitRepoDisplay;
use crate::crd::{
    Bundle, BundleDeployment, BundleResource, GitRepo, GitRepoStatus, FINALIZER, REPO_LABEL,
    SHARD_LABEL,
};
use crate::error::{format_error_chain, FleetError, FleetResult};
use crate::scheduler::effective_polling_interval;
use crate::source::{git, oci, SourceCredentials};
use crate::status;

/// The reconciliation function for GitRepo resources
pub async fn reconcile(repo: Arc<GitRepo>, ctx: Arc<ControllerContext>) -> Result<Action, FleetError> {
    let ns = repo.namespace().unwrap_or_else(|| "default".to_string());
    let name = repo.name_any();
    let api: Api<GitRepo> = Api::namespaced(ctx.client.clone(), &ns);

    log::debug!("Reconciling GitRepo {}/{}", ns, name);

    if repo.metadata.deletion_timestamp.is_some() {
        cascade_delete(&repo, &ctx).await?;
        remove_finalizer(&api, &repo).await?;
        log::info!("GitRepo {}/{} deleted with its bundles", ns, name);
        return Ok(Action::await_change());
    }
    ensure_finalizer(&api, &repo).await?;

    let mut status = repo.status.clone().unwrap_or_default();
    status.observed_generation = repo.metadata.generation;

    // Resolve the revision to build from.
    let commit = match resolve_commit(&repo, &ctx).await {
        Ok(commit) => {
            set_condition(&mut status.conditions, CONDITION_GIT_POLLING, true, "Polled", "");
            set_condition(&mut status.conditions, CONDITION_STALLED, false, "Active", "");
            commit
        }
        Err(e @ FleetError::Auth(_)) => {
            // Auth failures stall the repo; retried no faster than the
            // polling interval, message never carries the credentials.
            let message = e.to_string();
            set_condition(&mut status.conditions, CONDITION_STALLED, true, "AuthFailed", &message);
            patch_status(&api, &name, &status).await?;
            return Ok(Action::requeue(effective_polling_interval(
                repo.spec.polling_interval.as_deref(),
            )));
        }
        Err(e) => {
            set_condition(
                &mut status.conditions,
                CONDITION_GIT_POLLING,
                false,
                "PollFailed",
                &e.to_string(),
            );
            patch_status(&api, &name, &status).await?;
            return Err(e);
        }
    };

    let force_sync = repo.force_sync_generation();
    let needs_rebuild = Some(commit.clone()) != status.commit
        || status.update_generation.unwrap_or(0) < force_sync;

    if needs_rebuild {
        log::info!("GitRepo {}/{} building bundles from {}", ns, name, &commit[..7.min(commit.len())]);

        match build_bundles(&repo, &ctx, &commit).await {
            Ok(count) => {
                status.commit = Some(commit.clone());
                status.update_generation = Some(force_sync);
                status.git_job_status = Some("Current".to_string());
                set_condition(&mut status.conditions, CONDITION_ACCEPTED, true, "Accepted", "");
                log::info!("GitRepo {}/{} produced {} bundles", ns, name, count);
            }
            Err(e) => {
                status.git_job_status = Some("Failed".to_string());
                let reason = match &e {
                    FleetError::NoChartVersionFound { .. } => "no-chart-version-found",
                    FleetError::InvalidBundle(_) => "invalid-bundle",
                    FleetError::VersionConstraint(_) => "invalid-version-constraint",
                    _ => "build-failed",
                };
                set_condition(
                    &mut status.conditions,
                    CONDITION_ACCEPTED,
                    false,
                    reason,
                    &e.to_string(),
                );
                patch_status(&api, &name, &status).await?;
                return Err(e);
            }
        }
    }

    // Roll the owned bundles and deployments up into the repo status.
    rollup(&repo, &ctx, &mut status).await?;
    patch_status(&api, &name, &status).await?;

    ctx.limiter.forget(&format!("{ns}/{name}"));
    Ok(Action::requeue(effective_polling_interval(
        repo.spec.polling_interval.as_deref(),
    )))
}

/// Error handler for the gitrepo controller
pub fn error_policy(repo: Arc<GitRepo>, error: &FleetError, ctx: Arc<ControllerContext>) -> Action {
    let key = format!("{}/{}", repo.namespace().unwrap_or_default(), repo.name_any());
    log::error!("Error reconciling GitRepo {}: {}", key, format_error_chain(error));
    Action::requeue(ctx.limiter.when(&key))
}

/// Resolve the commit to build: webhook/pinned revision, or a poll of the
/// configured branch.
async fn resolve_commit(repo: &GitRepo, ctx: &ControllerContext) -> FleetResult<String> {
    if let Some(revision) = repo.spec.revision.as_deref().filter(|r| !r.is_empty()) {
        let creds = load_credentials(repo, ctx).await?;
        return git::resolve_branch_head(repo.spec.repo.clone(), revision.to_string(), creds).await;
    }

    if repo.spec.disable_polling {
        // Webhook commits drive the revision; a forced sync re-polls once.
        let webhook = repo
            .status
            .as_ref()
            .and_then(|s| s.webhook_commit.clone())
            .or_else(|| repo.status.as_ref().and_then(|s| s.commit.clone()));
        let force_sync_bumped = repo.force_sync_generation()
            > repo
                .status
                .as_ref()
                .and_then(|s| s.update_generation)
                .unwrap_or(0);

        if let Some(commit) = webhook.filter(|_| !force_sync_bumped) {
            return Ok(commit);
        }
    }

    let branch = repo.spec.branch.clone().unwrap_or_else(|| "master".to_string());
    let creds = load_credentials(repo, ctx).await?;
    git::resolve_branch_head(repo.spec.repo.clone(), branch, creds).await
}

async fn load_credentials(repo: &GitRepo, ctx: &ControllerContext) -> FleetResult<SourceCredentials> {
    let Some(secret_name) = &repo.spec.client_secret_name else {
        let mut creds = SourceCredentials::default();
        creds.insecure_skip_tls_verify = repo.spec.insecure_skip_tls_verify;
        creds.ca_bundle = decode_ca_bundle(repo.spec.ca_bundle.as_deref())?;
        creds.known_hosts = ctx.config.known_hosts.clone();
        return Ok(creds);
    };

    let ns = repo.namespace().unwrap_or_default();
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ns);
    let secret = secrets.get(secret_name).await.map_err(|e| match e {
        kube::Error::Api(ref api_err) if api_err.code == 404 => {
            FleetError::InvalidInput(format!("referenced secret {secret_name} not found"))
        }
        other => other.into(),
    })?;

    let mut creds = SourceCredentials::from_secret(&secret);
    creds.insecure_skip_tls_verify |= repo.spec.insecure_skip_tls_verify;
    if creds.ca_bundle.is_none() {
        creds.ca_bundle = decode_ca_bundle(repo.spec.ca_bundle.as_deref())?;
    }
    if creds.known_hosts.is_none() {
        creds.known_hosts = ctx.config.known_hosts.clone();
    }
    Ok(creds)
}

/// Credentials for helm repositories referenced by bundles in this repo.
async fn load_helm_credentials(
    repo: &GitRepo,
    ctx: &ControllerContext,
) -> FleetResult<SourceCredentials> {
    let Some(secret_name) = &repo.spec.helm_secret_name else {
        return Ok(SourceCredentials::default());
    };

    let ns = repo.namespace().unwrap_or_default();
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ns);
    let secret = secrets.get(secret_name).await.map_err(|e| match e {
        kube::Error::Api(ref api_err) if api_err.code == 404 => {
            FleetError::InvalidInput(format!("referenced secret {secret_name} not found"))
        }
        other => other.into(),
    })?;
    Ok(SourceCredentials::from_secret(&secret))
}

fn decode_ca_bundle(ca: Option<&str>) -> FleetResult<Option<Vec<u8>>> {
    match ca {
        None => Ok(None),
        Some(raw) if raw.trim().starts_with("-----BEGIN") => Ok(Some(raw.as_bytes().to_vec())),
        Some(raw) => BASE64
            .decode(raw.trim())
            .map(Some)
            .map_err(|_| FleetError::InvalidInput("caBundle is not PEM or base64".to_string())),
    }
}

/// Materialise the commit and turn each configured path into a bundle.
async fn build_bundles(repo: &GitRepo, ctx: &ControllerContext, commit: &str) -> FleetResult<usize> {
    let ns = repo.namespace().unwrap_or_default();
    let name = repo.name_any();
    let creds = load_credentials(repo, ctx).await?;

    let checkout = tempfile::tempdir()?;
    git::materialize(
        repo.spec.repo.clone(),
        commit.to_string(),
        creds.clone(),
        checkout.path().to_path_buf(),
    )
    .await?;

    let paths: Vec<String> = if repo.spec.paths.is_empty() {
        vec![".".to_string()]
    } else {
        repo.spec.paths.clone()
    };

    let mut produced = Vec::new();
    for path in &paths {
        let dir = checkout.path().join(path.trim_start_matches("./"));
        if !dir.is_dir() {
            return Err(FleetError::InvalidBundle(format!(
                "path {path:?} does not exist at {commit}"
            )));
        }

        let bundle_name = if path == "." {
            name.clone()
        } else {
            crate::bundlereader::read::normalize_name(&format!("{name}-{path}"))
        };

        let mut labels = BTreeMap::new();
        labels.insert(REPO_LABEL.to_string(), name.clone());
        if let Some(shard) = repo.metadata.labels.as_ref().and_then(|l| l.get(SHARD_LABEL)) {
            labels.insert(SHARD_LABEL.to_string(), shard.clone());
        }

        let opts = ReadOptions {
            compress: false,
            target_namespace: repo.spec.target_namespace.clone(),
            paused: repo.spec.paused,
            labels,
        };

        let mut bundle = read_bundle(&bundle_name, &dir, &opts)?;
        bundle.metadata.namespace = Some(ns.clone());
        apply_repo_defaults(&mut bundle, repo);

        // A fleet.yaml naming a chart in a helm repository means the chart
        // is not in the tree; resolve and inline it at build time.
        let remote_chart = bundle.spec.options.helm.clone().filter(|h| {
            h.repo.as_deref().map(|r| !r.is_empty()).unwrap_or(false)
                && h.chart.as_deref().map(|c| !c.is_empty()).unwrap_or(false)
        });
        if let Some(helm) = remote_chart {
            let helm_creds = load_helm_credentials(repo, ctx).await?;
            inline_remote_chart(&mut bundle, &helm, &helm_creds).await?;
        }

        if let Some(registry) = &repo.spec.oci_registry {
            to_oci_bundle(&mut bundle, registry, ctx, &ns).await?;
        }

        upsert_bundle(&ctx.client, &bundle).await?;
        produced.push(bundle.name_any());
    }

    prune_stale_bundles(&ctx.client, &ns, &name, &produced).await?;
    Ok(produced.len())
}

/// Copy repo-level delivery settings onto a produced bundle.
fn apply_repo_defaults(bundle: &mut Bundle, repo: &GitRepo) {
    bundle.spec.options.force_sync_generation = repo.spec.force_sync_generation;
    bundle.spec.options.keep_resources |= repo.spec.keep_resources;
    bundle.spec.options.delete_namespace |= repo.spec.delete_namespace;
    if bundle.spec.options.service_account.is_none() {
        bundle.spec.options.service_account = repo.spec.service_account.clone();
    }
    if bundle.spec.options.correct_drift.is_none() {
        bundle.spec.options.correct_drift = repo.spec.correct_drift.clone();
    }

    // Repo-level targets are appended after the bundle's own, so a
    // fleet.yaml customization still wins for the clusters it names.
    for target in &repo.spec.targets {
        bundle.spec.targets.push(BundleTarget {
            name: target.name.clone(),
            cluster_name: target.cluster_name.clone(),
            cluster_selector: target.cluster_selector.clone(),
            cluster_group: target.cluster_group.clone(),
            cluster_group_selector: target.cluster_group_selector.clone(),
            ..Default::default()
        });
    }
    crate::bundlereader::read::assign_target_names(&mut bundle.spec.targets);
}

/// Fetch a chart from its helm repository and inline its files into the
/// bundle's resource set, so downstream rendering never needs repository
/// access. The version constraint resolves to the highest match.
async fn inline_remote_chart(
    bundle: &mut Bundle,
    helm: &crate::crd::HelmOptions,
    creds: &SourceCredentials,
) -> FleetResult<()> {
    let repo_url = helm.repo.as_deref().unwrap_or_default();
    let chart = helm.chart.as_deref().unwrap_or_default();
    let constraint = helm.version.as_deref().unwrap_or("");

    let index = crate::source::fetch_index(repo_url, creds).await?;
    let entry = crate::source::select_version(&index, chart, constraint)?;
    log::info!(
        "Bundle {} resolved chart {} {} from {}",
        bundle.name_any(),
        chart,
        entry.version,
        repo_url
    );

    let tgz = crate::source::helm::download_chart(repo_url, entry, creds).await?;
    let unpacked = tempfile::tempdir()?;
    crate::source::helm::unpack_chart(&tgz, unpacked.path())?;

    let mut paths = Vec::new();
    collect_chart_files(unpacked.path(), unpacked.path(), &mut paths)?;
    paths.sort();

    for path in paths {
        let bytes = std::fs::read(unpacked.path().join(&path))?;
        let name = path.to_string_lossy().replace('\\', "/");
        bundle.spec.resources.push(crate::bundlereader::read::encode_resource(
            &name, &bytes, false,
        )?);
    }
    bundle.spec.resources.sort_by(|a, b| a.name.cmp(&b.name));

    // The chart now lives at the bundle root; the agent finds it there.
    if let Some(helm_options) = bundle.spec.options.helm.as_mut() {
        helm_options.version = Some(entry.version.clone());
    }

    Ok(())
}

fn collect_chart_files(
    base: &std::path::Path,
    dir: &std::path::Path,
    out: &mut Vec<std::path::PathBuf>,
) -> FleetResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_chart_files(base, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(base)
                .map_err(|e| FleetError::Internal(format!("path outside chart root: {e}")))?;
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}

/// OCI delivery: push the serialized resources to the registry, replace the
/// resource list with the single reference entry, and emit the pull secret.
async fn to_oci_bundle(
    bundle: &mut Bundle,
    registry: &crate::crd::gitrepo::OCIRegistrySpec,
    ctx: &ControllerContext,
    ns: &str,
) -> FleetResult<()> {
    let sha = crate::bundlereader::read::resources_sha256(&bundle.spec.resources)?;
    let content_name = crate::content::content_name_for_sha(&sha);

    let payload = crate::content::gzip(&crate::bundlereader::read::canonical_resources_json(
        &bundle.spec.resources,
    )?)?;

    let mut creds = SourceCredentials::default();
    creds.insecure_skip_tls_verify = registry.insecure_skip_tls;
    if let Some(secret_name) = &registry.auth_secret_name {
        let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
        creds = SourceCredentials::from_secret(&secrets.get(secret_name).await?);
        creds.insecure_skip_tls_verify |= registry.insecure_skip_tls;
    }

    let reference = oci::push_content(&registry.reference, &content_name, &payload, &creds).await?;

    bundle.spec.resources = vec![BundleResource {
        name: reference.clone(),
        content: String::new(),
        encoding: String::new(),
    }];

    let secret = oci::pull_credentials_secret(
        &bundle.name_any(),
        ns,
        &reference,
        &creds,
        registry.basic_http,
        registry.insecure_skip_tls,
    );
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    match secrets.create(&PostParams::default(), &secret).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {
            secrets
                .patch(
                    &bundle.name_any(),
                    &PatchParams::default(),
                    &Patch::Merge(&secret),
                )
                .await?;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

async fn upsert_bundle(client: &kube::Client, bundle: &Bundle) -> FleetResult<()> {
    let ns = bundle.namespace().unwrap_or_default();
    let api: Api<Bundle> = Api::namespaced(client.clone(), &ns);

    match api.create(&PostParams::default(), bundle).await {
        Ok(_) => {
            log::info!("Created Bundle {}/{}", ns, bundle.name_any());
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 409 => {
            api.patch(
                &bundle.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&serde_json::json!({
                    "metadata": { "labels": bundle.metadata.labels },
                    "spec": bundle.spec,
                })),
            )
            .await?;
            log::debug!("Updated Bundle {}/{}", ns, bundle.name_any());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Bundles labelled for this repo that were not produced this round are
/// removed; their own finalizers cascade to the deployments.
async fn prune_stale_bundles(
    client: &kube::Client,
    ns: &str,
    repo_name: &str,
    produced: &[String],
) -> FleetResult<()> {
    let api: Api<Bundle> = Api::namespaced(client.clone(), ns);
    let labelled = api
        .list(&ListParams::default().labels(&format!("{REPO_LABEL}={repo_name}")))
        .await?;

    for bundle in labelled {
        let name = bundle.name_any();
        if !produced.contains(&name) {
            log::info!("Pruning stale Bundle {}/{}", ns, name);
            match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

/// Delete every bundle this repo produced; bundle finalizers clean up the
/// deployments and content references.
async fn cascade_delete(repo: &GitRepo, ctx: &ControllerContext) -> FleetResult<()> {
    let ns = repo.namespace().unwrap_or_default();
    prune_stale_bundles(&ctx.client, &ns, &repo.name_any(), &[]).await
}

/// Sum bundle and deployment status into the repo's summary and display.
async fn rollup(repo: &GitRepo, ctx: &ControllerContext, status: &mut GitRepoStatus) -> FleetResult<()> {
    let ns = repo.namespace().unwrap_or_default();
    let name = repo.name_any();
    let selector = format!("{REPO_LABEL}={name}");

    let bundles: Api<Bundle> = Api::namespaced(ctx.client.clone(), &ns);
    let bundles = bundles.list(&ListParams::default().labels(&selector)).await?.items;

    let deployments: Api<BundleDeployment> = Api::all(ctx.client.clone());
    let deployments = deployments
        .list(&ListParams::default().labels(&selector))
        .await?
        .items;

    let summary = status::rollup_bundle_summaries(&bundles);
    let (ready, desired) = status::ready_clusters(&deployments);

    status.ready_clusters = Some(ready);
    status.desired_ready_clusters = Some(desired);
    status.resource_counts = Some(status::resource_counts(&deployments));

    let ready_deployments = summary.ready;
    let desired_deployments = summary.desired_ready;
    let is_ready = summary.is_ready();
    let state = summary.worst_state();

    status.display = Some(GitRepoDisplay {
        ready_bundle_deployments: Some(status::ready_display(ready_deployments, desired_deployments)),
        state: Some(state.as_str().to_string()),
        message: summary
            .non_ready_resources
            .first()
            .and_then(|r| r.message.clone()),
        error: summary.err_applied > 0,
    });
    status.summary = Some(summary);

    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        is_ready,
        if is_ready { "Ready" } else { "NotReady" },
        "",
    );

    Ok(())
}

async fn ensure_finalizer(api: &Api<GitRepo>, repo: &GitRepo) -> FleetResult<()> {
    let has = repo
        .metadata
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|x| x == FINALIZER))
        .unwrap_or(false);
    if has {
        return Ok(());
    }

    let mut finalizers = repo.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());
    api.patch(
        &repo.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&serde_json::json!({
            "metadata": {
                "resourceVersion": repo.resource_version(),
                "finalizers": finalizers,
            }
        })),
    )
    .await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<GitRepo>, repo: &GitRepo) -> FleetResult<()> {
    let Some(finalizers) = repo.metadata.finalizers.clone() else {
        return Ok(());
    };
    let remaining: Vec<String> = finalizers.into_iter().filter(|f| f != FINALIZER).collect();

    match api
        .patch(
            &repo.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&serde_json::json!({
                "metadata": {
                    "resourceVersion": repo.resource_version(),
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

async fn patch_status(api: &Api<GitRepo>, name: &str, status: &GitRepoStatus) -> FleetResult<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::gitrepo::GitRepoSpec;

    fn repo(spec: GitRepoSpec) -> GitRepo {
        GitRepo::new("repo", spec)
    }

    #[test]
    fn ca_bundle_accepts_pem_and_base64() {
        let pem = "-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----";
        assert_eq!(
            decode_ca_bundle(Some(pem)).expect("pem"),
            Some(pem.as_bytes().to_vec())
        );

        let encoded = BASE64.encode(pem);
        assert_eq!(
            decode_ca_bundle(Some(&encoded)).expect("base64"),
            Some(pem.as_bytes().to_vec())
        );

        assert!(decode_ca_bundle(Some("%%%")).is_err());
        assert_eq!(decode_ca_bundle(None).expect("none"), None);
    }

    #[test]
    fn repo_defaults_flow_onto_bundles() {
        let mut bundle = Bundle::new("app", Default::default());
        let repo = repo(GitRepoSpec {
            repo: "https://git.example/app".into(),
            force_sync_generation: Some(42),
            keep_resources: true,
            targets: vec![crate::crd::gitrepo::GitTarget {
                cluster_name: Some("c1".into()),
                ..Default::default()
            }],
            ..Default::default()
        });

        apply_repo_defaults(&mut bundle, &repo);
        assert_eq!(bundle.spec.options.force_sync_generation, Some(42));
        assert!(bundle.spec.options.keep_resources);
        assert_eq!(bundle.spec.targets.len(), 1);
        assert_eq!(bundle.spec.targets[0].name.as_deref(), Some("target000"));
    }

    #[test]
    fn bundle_targets_from_fleet_yaml_precede_repo_targets() {
        let mut bundle = Bundle::new("app", Default::default());
        bundle.spec.targets.push(BundleTarget {
            name: Some("custom".into()),
            cluster_name: Some("c1".into()),
            overlays: vec!["prod".into()],
            ..Default::default()
        });

        let repo = repo(GitRepoSpec {
            repo: "https://git.example/app".into(),
            targets: vec![crate::crd::gitrepo::GitTarget {
                cluster_name: Some("c1".into()),
                ..Default::default()
            }],
            ..Default::default()
        });

        apply_repo_defaults(&mut bundle, &repo);
        assert_eq!(bundle.spec.targets[0].name.as_deref(), Some("custom"));
        assert_eq!(bundle.spec.targets[1].name.as_deref(), Some("target001"));
    }
}
