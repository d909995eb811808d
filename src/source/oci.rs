use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

use super::auth::{http_client, SourceCredentials};
use crate::error::{FleetError, FleetResult};

/// The resource entry a bundle carries when its payload lives in an OCI
/// registry instead of a Content blob: `oci://<host>/<content-name>:latest`.
pub fn oci_resource_reference(registry_reference: &str, content_name: &str) -> String {
    let host = registry_reference
        .trim_start_matches("oci://")
        .trim_end_matches('/');
    format!("oci://{host}/{content_name}:latest")
}

/// Resolve a tag against the registry's v2 API and return the manifest
/// digest. Credential and TLS rules match the git/helm fetchers.
pub async fn resolve_digest(
    reference: &str,
    creds: &SourceCredentials,
) -> FleetResult<String> {
    let trimmed = reference.trim_start_matches("oci://");
    let (host, rest) = trimmed
        .split_once('/')
        .ok_or_else(|| FleetError::InvalidInput(format!("invalid OCI reference {reference:?}")))?;
    let (repository, tag) = match rest.rsplit_once(':') {
        Some((repo, tag)) => (repo, tag),
        None => (rest, "latest"),
    };

    let url = format!("https://{host}/v2/{repository}/manifests/{tag}");

    let client = http_client(creds)?;
    let mut request = client
        .get(&url)
        .header("Accept", "application/vnd.oci.image.manifest.v1+json");
    if let (Some(user), Some(pass)) = (&creds.username, &creds.password) {
        request = request.basic_auth(user, Some(pass));
    }

    let response = request.send().await?;
    if response.status() == reqwest::StatusCode::UNAUTHORIZED
        || response.status() == reqwest::StatusCode::FORBIDDEN
    {
        return Err(FleetError::Auth(host.to_string()));
    }
    let response = response.error_for_status()?;

    response
        .headers()
        .get("Docker-Content-Digest")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            FleetError::Internal(format!("registry {host} returned no content digest"))
        })
}

/// Push a content payload as a single-layer artifact: monolithic blob
/// upload, then the manifest under the content-name tag.
pub async fn push_content(
    registry_reference: &str,
    content_name: &str,
    payload: &[u8],
    creds: &SourceCredentials,
) -> FleetResult<String> {
    let host = registry_reference
        .trim_start_matches("oci://")
        .trim_end_matches('/');
    let digest = format!("sha256:{}", crate::content::sha256_hex(payload));

    let client = http_client(creds)?;
    let with_auth = |req: reqwest::RequestBuilder| {
        if let (Some(user), Some(pass)) = (&creds.username, &creds.password) {
            req.basic_auth(user, Some(pass))
        } else {
            req
        }
    };

    // Monolithic upload: one POST with the digest carries the whole blob.
    let upload_url = format!(
        "https://{host}/v2/{content_name}/blobs/uploads/?digest={digest}"
    );
    let response = with_auth(client.post(&upload_url))
        .header("Content-Type", "application/octet-stream")
        .body(payload.to_vec())
        .send()
        .await?;
    if response.status() == reqwest::StatusCode::UNAUTHORIZED
        || response.status() == reqwest::StatusCode::FORBIDDEN
    {
        return Err(FleetError::Auth(host.to_string()));
    }
    response.error_for_status()?;

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.empty.v1+json",
            "digest": digest,
            "size": payload.len(),
        },
        "layers": [{
            "mediaType": "application/gzip",
            "digest": digest,
            "size": payload.len(),
        }],
    });

    let manifest_url = format!("https://{host}/v2/{content_name}/manifests/latest");
    with_auth(client.put(&manifest_url))
        .header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
        .body(manifest.to_string())
        .send()
        .await?
        .error_for_status()?;

    Ok(oci_resource_reference(registry_reference, content_name))
}

/// Pull the single-layer artifact payload referenced by an OCI resource
/// entry: resolve the manifest, then fetch the first layer blob.
pub async fn pull_content(reference: &str, creds: &SourceCredentials) -> FleetResult<Vec<u8>> {
    let trimmed = reference.trim_start_matches("oci://");
    let (host, rest) = trimmed
        .split_once('/')
        .ok_or_else(|| FleetError::InvalidInput(format!("invalid OCI reference {reference:?}")))?;
    let (repository, tag) = match rest.rsplit_once(':') {
        Some((repo, tag)) => (repo, tag),
        None => (rest, "latest"),
    };

    let client = http_client(creds)?;
    let manifest_url = format!("https://{host}/v2/{repository}/manifests/{tag}");
    let mut request = client
        .get(&manifest_url)
        .header("Accept", "application/vnd.oci.image.manifest.v1+json");
    if let (Some(user), Some(pass)) = (&creds.username, &creds.password) {
        request = request.basic_auth(user, Some(pass));
    }
    let response = request.send().await?;
    if response.status() == reqwest::StatusCode::UNAUTHORIZED
        || response.status() == reqwest::StatusCode::FORBIDDEN
    {
        return Err(FleetError::Auth(host.to_string()));
    }
    let manifest: serde_json::Value = response.error_for_status()?.json().await?;

    let digest = manifest
        .pointer("/layers/0/digest")
        .and_then(|d| d.as_str())
        .ok_or_else(|| {
            FleetError::Internal(format!("artifact {reference} has no layers"))
        })?;

    let blob_url = format!("https://{host}/v2/{repository}/blobs/{digest}");
    let mut request = client.get(&blob_url);
    if let (Some(user), Some(pass)) = (&creds.username, &creds.password) {
        request = request.basic_auth(user, Some(pass));
    }
    let response = request.send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

/// The per-bundle secret carrying pull credentials for the agent; replaces
/// the Content reference counting in OCI mode.
pub fn pull_credentials_secret(
    name: &str,
    namespace: &str,
    reference: &str,
    creds: &SourceCredentials,
    basic_http: bool,
    insecure_skip_tls: bool,
) -> Secret {
    let mut data: BTreeMap<String, ByteString> = BTreeMap::new();
    data.insert(
        "reference".to_string(),
        ByteString(reference.as_bytes().to_vec()),
    );
    if let Some(username) = &creds.username {
        data.insert("username".to_string(), ByteString(username.clone().into_bytes()));
    }
    if let Some(password) = &creds.password {
        data.insert("password".to_string(), ByteString(password.clone().into_bytes()));
    }
    data.insert(
        "basicHTTP".to_string(),
        ByteString(basic_http.to_string().into_bytes()),
    );
    data.insert(
        "insecureSkipTLS".to_string(),
        ByteString(insecure_skip_tls.to_string().into_bytes()),
    );

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("fleet.cattle.io/bundle-oci".to_string()),
        ..Default::default()
    }
}
