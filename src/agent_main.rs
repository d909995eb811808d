use kube::api::Api;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;

use fleet::agent::render::ClusterValues;
use fleet::agent::{heartbeat_loop, register, start_agent, AgentContext};
use fleet::config::AgentConfig;
use fleet::content::ContentStore;
use fleet::crd::Cluster;
use fleet::scheduler::RateLimiter;

/// Secret the agent bootstrap reads when it has no upstream credential yet.
const BOOTSTRAP_SECRET: &str = "fleet-agent-bootstrap";

/// Secret holding the scoped upstream credential after registration.
const CREDENTIAL_SECRET: &str = "fleet-agent";

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> std::io::Result<()> {
    fleet::init_logging("fleetagent");

    let config = AgentConfig::from_env().expect("invalid agent configuration");

    // The downstream client drives the cluster the agent runs in.
    let downstream = kube::Client::try_default()
        .await
        .expect("failed to initialize downstream Kubernetes client");

    let (upstream, cluster_name, cluster_namespace, agent_namespace) =
        connect_upstream(&downstream, &config)
            .await
            .expect("failed to connect to the upstream API");

    let cluster_values = load_cluster_values(&upstream, &cluster_namespace, &cluster_name)
        .await
        .unwrap_or_else(|e| {
            log::warn!("could not load cluster values, templating will see an empty set: {e}");
            ClusterValues {
                cluster_name: cluster_name.clone(),
                ..Default::default()
            }
        });

    let ctx = Arc::new(AgentContext {
        store: ContentStore::new(upstream.clone()),
        upstream: upstream.clone(),
        downstream,
        config: AgentConfig {
            namespace: agent_namespace,
            ..config
        },
        cluster: cluster_values,
        limiter: Arc::new(RateLimiter::default()),
    });

    tokio::spawn(heartbeat_loop(
        upstream,
        cluster_namespace,
        cluster_name,
        std::time::Duration::from_secs(60),
    ));

    // Drain on SIGTERM: the running reconcile finishes, then we exit 0.
    start_agent(ctx, async {
        wait_for_shutdown_signal().await;
        log::info!("shutdown signal received, draining agent");
    })
    .await;

    log::info!("agent drained, exiting");
    Ok(())
}

/// Establish the upstream connection: reuse the stored credential if
/// registration already happened, otherwise run the bootstrap handshake.
///
/// Returns (client, cluster name, cluster namespace upstream, scoped
/// namespace the BundleDeployments live in).
async fn connect_upstream(
    downstream: &kube::Client,
    config: &AgentConfig,
) -> fleet::error::FleetResult<(kube::Client, String, String, String)> {
    let secrets: Api<k8s_openapi::api::core::v1::Secret> =
        Api::namespaced(downstream.clone(), &config.namespace);

    let credential = match secrets.get(CREDENTIAL_SECRET).await {
        Ok(secret) => secret,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            let bootstrap_secret = secrets.get(BOOTSTRAP_SECRET).await.map_err(|_| {
                fleet::error::FleetError::Config(format!(
                    "neither {CREDENTIAL_SECRET} nor {BOOTSTRAP_SECRET} secret exists in {}",
                    config.namespace
                ))
            })?;

            let bootstrap = register::BootstrapConfig::from_secret(&bootstrap_secret)?;
            let hint = std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "downstream".to_string());
            let granted = register::register(&bootstrap, &hint).await?;

            // Persist the granted credential locally for restarts.
            let mut stored = granted.clone();
            stored.metadata = kube::api::ObjectMeta {
                name: Some(CREDENTIAL_SECRET.to_string()),
                namespace: Some(config.namespace.clone()),
                ..Default::default()
            };
            // The bootstrap told us where the upstream is; carry it over.
            if let (Some(data), Some(bootstrap_data)) =
                (stored.data.as_mut(), bootstrap_secret.data.as_ref())
            {
                if !data.contains_key("apiServerURL") {
                    if let Some(url) = bootstrap_data.get("apiServerURL") {
                        data.insert("apiServerURL".to_string(), url.clone());
                    }
                }
                if !data.contains_key("apiServerCA") {
                    if let Some(ca) = bootstrap_data.get("apiServerCA") {
                        data.insert("apiServerCA".to_string(), ca.clone());
                    }
                }
            }
            match secrets
                .create(&kube::api::PostParams::default(), &stored)
                .await
            {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 409 => {}
                Err(e) => return Err(e.into()),
            }
            stored
        }
        Err(e) => return Err(e.into()),
    };

    let get = |key: &str| -> fleet::error::FleetResult<String> {
        credential
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(|v| String::from_utf8(v.0.clone()).ok())
            .ok_or_else(|| {
                fleet::error::FleetError::Config(format!("credential secret missing {key}"))
            })
    };

    let url = get("apiServerURL")?;
    let token = get("token")?;
    let scoped_namespace = get("clusterNamespace")?;
    let cluster_name = get("clusterName")?;
    let ca = credential
        .data
        .as_ref()
        .and_then(|d| d.get("apiServerCA"))
        .map(|v| v.0.clone());

    let upstream =
        register::upstream_client(&url, ca.as_deref(), &token, &scoped_namespace).await?;

    // The Cluster record lives one level up; its namespace rides in the
    // credential when the upstream provides it, else falls back to the
    // conventional default.
    let cluster_namespace = get("clusterResourceNamespace")
        .unwrap_or_else(|_| "fleet-default".to_string());

    Ok((upstream, cluster_name, cluster_namespace, scoped_namespace))
}

/// Per-cluster template values from the upstream Cluster record.
async fn load_cluster_values(
    upstream: &kube::Client,
    cluster_namespace: &str,
    cluster_name: &str,
) -> fleet::error::FleetResult<ClusterValues> {
    let api: Api<Cluster> = Api::namespaced(upstream.clone(), cluster_namespace);
    let cluster = api.get(cluster_name).await?;

    Ok(ClusterValues {
        cluster_name: cluster.name_any(),
        cluster_labels: cluster.metadata.labels.clone().unwrap_or_default(),
        cluster_annotations: cluster
            .metadata
            .annotations
            .clone()
            .unwrap_or_else(BTreeMap::new),
        cluster_values: cluster.spec.template_values.clone().unwrap_or_default(),
    })
}

#[allow(clippy::expect_used)]
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
