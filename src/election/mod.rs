use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};

use crate::config::ElectionConfig;
use crate::error::{FleetError, FleetResult};

/// Lease-based leader election: exactly one replica per shard drives work.
/// `campaign` blocks until this replica holds the lease; `keep_renewing`
/// then renews it and exits the process if the lease is lost.
pub struct LeaderElector {
    api: Api<Lease>,
    lease_name: String,
    identity: String,
    config: ElectionConfig,
}

impl LeaderElector {
    pub fn new(
        client: Client,
        namespace: &str,
        shard_id: &str,
        identity: &str,
        config: ElectionConfig,
    ) -> Self {
        let lease_name = if shard_id.is_empty() {
            "fleet-controller-lock".to_string()
        } else {
            format!("fleet-controller-lock-{shard_id}")
        };

        LeaderElector {
            api: Api::namespaced(client, namespace),
            lease_name,
            identity: identity.to_string(),
            config,
        }
    }

    /// Block until this replica acquires the lease.
    pub async fn campaign(&self) -> FleetResult<()> {
        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    log::info!("acquired leader lease {} as {}", self.lease_name, self.identity);
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => log::warn!("leader election attempt failed: {e}"),
            }
            tokio::time::sleep(self.config.retry_period).await;
        }
    }

    /// Renew the held lease forever. Returns an error only when the lease
    /// was lost; callers treat that as fatal.
    pub async fn keep_renewing(&self) -> FleetResult<()> {
        loop {
            tokio::time::sleep(self.config.retry_period).await;

            let deadline = tokio::time::timeout(self.config.renew_deadline, self.renew());
            match deadline.await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    return Err(FleetError::Internal(format!(
                        "lost leader lease {}",
                        self.lease_name
                    )))
                }
                Ok(Err(e)) => log::warn!("lease renew failed, will retry: {e}"),
                Err(_) => {
                    return Err(FleetError::Internal(format!(
                        "failed to renew leader lease {} before the deadline",
                        self.lease_name
                    )))
                }
            }
        }
    }

    async fn try_acquire(&self) -> FleetResult<bool> {
        let now = MicroTime(Utc::now());

        let existing = match self.api.get(&self.lease_name).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e.into()),
        };

        let Some(lease) = existing else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.lease_name.clone()),
                    ..Default::default()
                },
                spec: Some(self.lease_spec(now)),
            };
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        let spec = lease.spec.clone().unwrap_or_default();
        let holder = spec.holder_identity.as_deref().unwrap_or_default();
        let expired = spec
            .renew_time
            .as_ref()
            .map(|renewed| {
                let duration =
                    chrono::Duration::seconds(spec.lease_duration_seconds.unwrap_or(15) as i64);
                renewed.0 + duration < Utc::now()
            })
            .unwrap_or(true);

        if holder != self.identity && !expired {
            return Ok(false);
        }

        self.replace_holder(&lease, now).await
    }

    async fn renew(&self) -> FleetResult<bool> {
        let lease = self.api.get(&self.lease_name).await?;
        let holder = lease
            .spec
            .as_ref()
            .and_then(|s| s.holder_identity.as_deref())
            .unwrap_or_default();
        if holder != self.identity {
            return Ok(false);
        }

        self.replace_holder(&lease, MicroTime(Utc::now())).await
    }

    /// Resource-version-gated handover/renewal.
    async fn replace_holder(&self, current: &Lease, now: MicroTime) -> FleetResult<bool> {
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": current.resource_version() },
            "spec": self.lease_spec(now),
        });

        match self
            .api
            .patch(&self.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn lease_spec(&self, now: MicroTime) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.config.lease_duration.as_secs() as i32),
            acquire_time: Some(now.clone()),
            renew_time: Some(now),
            ..Default::default()
        }
    }
}
