use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::crd::registration::{ClusterRegistration, ClusterRegistrationSpec};
use crate::error::{FleetError, FleetResult};

/// Contents of the bootstrap secret mounted into the agent: where the
/// upstream is and a registration bearer token.
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    pub api_server_url: String,
    pub ca_bundle: Option<Vec<u8>>,
    pub token: String,
    pub namespace: String,
    pub client_id: Option<String>,
    pub cluster_labels: BTreeMap<String, String>,
}

impl BootstrapConfig {
    pub fn from_secret(secret: &Secret) -> FleetResult<BootstrapConfig> {
        let get = |key: &str| -> Option<String> {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .and_then(|v| String::from_utf8(v.0.clone()).ok())
        };

        let labels = get("clusterLabels")
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?
            .unwrap_or_default();

        Ok(BootstrapConfig {
            api_server_url: get("apiServerURL")
                .ok_or_else(|| FleetError::Config("bootstrap secret missing apiServerURL".into()))?,
            ca_bundle: secret
                .data
                .as_ref()
                .and_then(|d| d.get("apiServerCA"))
                .map(|v| v.0.clone()),
            token: get("token")
                .ok_or_else(|| FleetError::Config("bootstrap secret missing token".into()))?,
            namespace: get("systemNamespace")
                .ok_or_else(|| FleetError::Config("bootstrap secret missing systemNamespace".into()))?,
            client_id: get("clientID").filter(|s| !s.is_empty()),
            cluster_labels: labels,
        })
    }
}

/// Build a client against the upstream API from a bearer token, routed
/// through a synthesized kubeconfig so TLS material is handled the normal
/// way.
pub async fn upstream_client(
    api_server_url: &str,
    ca_bundle: Option<&[u8]>,
    token: &str,
    default_namespace: &str,
) -> FleetResult<Client> {
    let ca = ca_bundle.map(|ca| {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(ca)
    });

    let kubeconfig: Kubeconfig = serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": "upstream",
            "cluster": {
                "server": api_server_url,
                "certificate-authority-data": ca,
            }
        }],
        "users": [{
            "name": "agent",
            "user": { "token": token }
        }],
        "contexts": [{
            "name": "upstream",
            "context": {
                "cluster": "upstream",
                "user": "agent",
                "namespace": default_namespace,
            }
        }],
        "current-context": "upstream",
    }))?;

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| FleetError::Config(format!("invalid upstream kubeconfig: {e}")))?;

    Ok(Client::try_from(config)?)
}

/// Run the registration handshake: POST a ClusterRegistration, wait for the
/// upstream to grant it, and return the scoped credential secret it
/// emitted.
pub async fn register(
    bootstrap: &BootstrapConfig,
    cluster_name_hint: &str,
) -> FleetResult<Secret> {
    let client = upstream_client(
        &bootstrap.api_server_url,
        bootstrap.ca_bundle.as_deref(),
        &bootstrap.token,
        &bootstrap.namespace,
    )
    .await?;

    let client_random = random_suffix();
    let registration_name =
        crate::bundlereader::read::normalize_name(&format!("request-{client_random}"));

    let registration = {
        let mut registration = ClusterRegistration::new(
            &registration_name,
            ClusterRegistrationSpec {
                client_id: bootstrap
                    .client_id
                    .clone()
                    .or_else(|| Some(cluster_name_hint.to_string())),
                client_random: Some(client_random.clone()),
                cluster_labels: Some(bootstrap.cluster_labels.clone()),
            },
        );
        registration.metadata.namespace = Some(bootstrap.namespace.clone());
        registration
    };

    let api: Api<ClusterRegistration> =
        Api::namespaced(client.clone(), &bootstrap.namespace);
    match api.create(&PostParams::default(), &registration).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(e) => return Err(e.into()),
    }

    log::info!(
        "posted cluster registration {}/{}",
        bootstrap.namespace,
        registration_name
    );

    // The upstream grants the registration and emits a credential secret
    // named after the nonce; poll until it shows up.
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &bootstrap.namespace);
    let secret_name = format!("c-{client_random}");

    loop {
        match api.get(&registration_name).await {
            Ok(r) if r.status.as_ref().map(|s| s.granted).unwrap_or(false) => {
                match secrets.get(&secret_name).await {
                    Ok(secret) => {
                        log::info!("registration granted, credentials in {}", secret.name_any());
                        return Ok(secret);
                    }
                    Err(kube::Error::Api(e)) if e.code == 404 => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(FleetError::Internal(
                    "cluster registration disappeared while waiting for grant".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

fn random_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| {
            let n: u8 = rng.gen_range(0..36);
            if n < 10 {
                (b'0' + n) as char
            } else {
                (b'a' + n - 10) as char
            }
        })
        .collect()
}
