pub mod purge;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

use crate::crd::Content;
use crate::error::{FleetError, FleetResult};

/// Kubernetes object-name limit; `s-<sha256>` is 66 characters and must be
/// cut down. The untruncated hash stays in `sha256sum` for verification.
const MAX_NAME_LENGTH: usize = 63;

/// Conflict retries for finalizer updates (standard writes).
const WRITE_CONFLICT_RETRIES: usize = 5;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `s-<sha256>`, truncated to the object-name limit.
pub fn content_name_for_sha(sha: &str) -> String {
    let name = format!("s-{sha}");
    if name.len() > MAX_NAME_LENGTH {
        name[..MAX_NAME_LENGTH].to_string()
    } else {
        name
    }
}

/// Finalizer recording one BundleDeployment consumer of a Content.
pub fn consumer_finalizer(namespace: &str, name: &str) -> String {
    format!("fleet.cattle.io/bd/{namespace}/{name}")
}

pub fn gzip(bytes: &[u8]) -> FleetResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(bytes: &[u8]) -> FleetResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// The deduplicated, reference-counted store of Content blobs. All state
/// lives in the API; finalizers are the reference count and are only moved
/// with resource-version-gated writes.
#[derive(Clone)]
pub struct ContentStore {
    api: Api<Content>,
}

impl ContentStore {
    pub fn new(client: Client) -> Self {
        ContentStore {
            api: Api::all(client),
        }
    }

    /// Write a Content blob if absent and attach the consumer's finalizer.
    /// Idempotent: an existing blob with the same name is trusted (names are
    /// content-addressed) and only gains the finalizer.
    pub async fn put(
        &self,
        sha256sum: &str,
        compressed: Vec<u8>,
        consumer_namespace: &str,
        consumer_name: &str,
    ) -> FleetResult<String> {
        let name = content_name_for_sha(sha256sum);
        let finalizer = consumer_finalizer(consumer_namespace, consumer_name);

        match self.api.get(&name).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let mut content = Content::new(&name, compressed, sha256sum);
                content.metadata.finalizers = Some(vec![finalizer.clone()]);
                match self.api.create(&PostParams::default(), &content).await {
                    Ok(_) => return Ok(name),
                    // Lost the create race; fall through to attach the
                    // finalizer to the winner.
                    Err(kube::Error::Api(e)) if e.code == 409 => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }

        self.add_finalizer(&name, &finalizer).await?;
        Ok(name)
    }

    /// Attach a consumer's finalizer to a Content that already exists, e.g.
    /// one named by a bundle's `contentsId` and written by another producer.
    pub async fn attach(
        &self,
        name: &str,
        consumer_namespace: &str,
        consumer_name: &str,
    ) -> FleetResult<()> {
        let finalizer = consumer_finalizer(consumer_namespace, consumer_name);
        self.add_finalizer(name, &finalizer).await
    }

    /// Fetch and decompress a Content by name, verifying the stored hash.
    pub async fn get(&self, name: &str) -> FleetResult<Vec<u8>> {
        let content = self.api.get(name).await?;
        let compressed = content
            .content
            .as_ref()
            .map(|ByteString(b)| b.clone())
            .ok_or_else(|| FleetError::NotFound(format!("content {name} has no payload")))?;

        let bytes = gunzip(&compressed)?;

        if let Some(expected) = &content.sha256sum {
            let actual = sha256_hex(&bytes);
            if &actual != expected {
                return Err(FleetError::CorruptContent {
                    name: name.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(bytes)
    }

    /// Drop a consumer's finalizer. The blob becomes collectable once the
    /// last one is gone; actual deletion is left to the purge sweep and the
    /// API server.
    pub async fn release(
        &self,
        name: &str,
        consumer_namespace: &str,
        consumer_name: &str,
    ) -> FleetResult<()> {
        let finalizer = consumer_finalizer(consumer_namespace, consumer_name);

        for _ in 0..=WRITE_CONFLICT_RETRIES {
            let content = match self.api.get(name).await {
                Ok(c) => c,
                Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            let mut finalizers = content.metadata.finalizers.clone().unwrap_or_default();
            let before = finalizers.len();
            finalizers.retain(|f| f != &finalizer);
            if finalizers.len() == before {
                return Ok(());
            }

            match self
                .patch_finalizers(name, content.resource_version(), finalizers)
                .await
            {
                Ok(()) => return Ok(()),
                Err(FleetError::Kubernetes(kube::Error::Api(e))) if e.code == 409 => continue,
                Err(e) => return Err(e),
            }
        }

        Err(FleetError::Internal(format!(
            "conflict releasing content {name} after {WRITE_CONFLICT_RETRIES} retries"
        )))
    }

    async fn add_finalizer(&self, name: &str, finalizer: &str) -> FleetResult<()> {
        for _ in 0..=WRITE_CONFLICT_RETRIES {
            let content = self.api.get(name).await?;
            let mut finalizers = content.metadata.finalizers.clone().unwrap_or_default();
            if finalizers.iter().any(|f| f == finalizer) {
                return Ok(());
            }
            finalizers.push(finalizer.to_string());

            match self
                .patch_finalizers(name, content.resource_version(), finalizers)
                .await
            {
                Ok(()) => return Ok(()),
                Err(FleetError::Kubernetes(kube::Error::Api(e))) if e.code == 409 => continue,
                Err(e) => return Err(e),
            }
        }

        Err(FleetError::Internal(format!(
            "conflict adding finalizer to content {name} after {WRITE_CONFLICT_RETRIES} retries"
        )))
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> FleetResult<()> {
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": resource_version,
                "finalizers": finalizers,
            }
        });
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    /// Delete a Content outright; used by the purge sweep once no finalizer
    /// remains.
    pub async fn delete(&self, name: &str) -> FleetResult<()> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn api(&self) -> &Api<Content> {
        &self.api
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_name_is_prefixed_and_truncated() {
        let sha = "a".repeat(64);
        let name = content_name_for_sha(&sha);
        assert!(name.starts_with("s-"));
        assert_eq!(name.len(), 63);

        assert_eq!(content_name_for_sha("abc"), "s-abc");
    }

    #[test]
    fn gzip_roundtrip_preserves_bytes() {
        let payload = b"kind: Deployment\nmetadata:\n  name: sleeper\n".to_vec();
        let compressed = gzip(&payload).expect("gzip");
        assert_ne!(compressed, payload);
        assert_eq!(gunzip(&compressed).expect("gunzip"), payload);
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn consumer_finalizer_encodes_both_coordinates() {
        assert_eq!(
            consumer_finalizer("cluster-ns-1", "gitrepo-bundle-a"),
            "fleet.cattle.io/bd/cluster-ns-1/gitrepo-bundle-a"
        );
    }
}
