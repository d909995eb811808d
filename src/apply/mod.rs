use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, TypeMeta,
};
use kube::core::discovery::Scope;
use kube::discovery::pinned_kind;
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::crd::{BUNDLE_DEPLOYMENT_ANNOTATION, MANAGED_LABEL};
use crate::error::{FleetError, FleetResult};

/// Field manager used for server-side apply by the agent.
pub const FIELD_MANAGER: &str = "fleet-agent";

/// Page size for owned-object listings.
const LIST_PAGE_SIZE: u32 = 100;

/// `<namespace>/<name>` of a BundleDeployment, the ownership key stamped on
/// every object it applies.
pub fn deployment_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Build a GVK from the `apiVersion`/`kind` pair a status entry records.
pub fn gvk_of(api_version: &str, kind: &str) -> GroupVersionKind {
    match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    }
}

/// Applies, deletes and inventories the objects a BundleDeployment owns
/// downstream.
///
/// All object traffic goes through `DynamicObject`, so the agent can deploy
/// kinds it has never heard of; each object's API coordinates are resolved
/// through discovery once per call. Unlike a general-purpose apply helper,
/// the inventory side is scoped to the kinds a deployment is known to have
/// applied (its rendered set plus `status.resources`), never a whole-cluster
/// discovery sweep.
#[derive(Clone)]
pub struct DynamicApplier {
    client: Client,
    conflict_retries: usize,
}

impl DynamicApplier {
    pub fn new(client: Client, conflict_retries: usize) -> Self {
        DynamicApplier {
            client,
            conflict_retries,
        }
    }

    /// Resolve an object's typed API handle: discovery pins the served
    /// version and tells us whether the kind is namespaced.
    async fn api_for(&self, obj: &DynamicObject) -> FleetResult<Api<DynamicObject>> {
        let types = obj.types.as_ref().ok_or_else(|| {
            FleetError::InvalidInput(format!("object {} has no apiVersion/kind", obj.name_any()))
        })?;
        let gvk = GroupVersionKind::try_from(types).map_err(|e| {
            FleetError::InvalidInput(format!("unparseable apiVersion/kind: {e}"))
        })?;

        let (ar, caps) = pinned_kind(&self.client, &gvk).await.map_err(|e| {
            FleetError::InvalidInput(format!(
                "kind {} {} is not served by the downstream cluster: {e}",
                types.api_version, types.kind
            ))
        })?;

        match caps.scope {
            Scope::Cluster => Ok(Api::all_with(self.client.clone(), &ar)),
            Scope::Namespaced => {
                let namespace = obj.meta().namespace.clone().ok_or_else(|| {
                    FleetError::InvalidInput(format!(
                        "namespaced object {} carries no namespace",
                        obj.name_any()
                    ))
                })?;
                Ok(Api::namespaced_with(self.client.clone(), &namespace, &ar))
            }
        }
    }

    /// Server-side apply under the agent's field manager. Conflicts are
    /// forced (the agent owns what it stamps) but still retried a bounded
    /// number of times for races with other managers.
    pub async fn apply(&self, obj: &DynamicObject) -> FleetResult<DynamicObject> {
        let name = obj.meta().name.clone().ok_or_else(|| {
            FleetError::InvalidInput("cannot apply an object without metadata.name".to_string())
        })?;
        let api = self.api_for(obj).await?;
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let mut attempt = 0;
        loop {
            match api.patch(&name, &params, &Patch::Apply(obj)).await {
                Ok(applied) => return Ok(applied),
                Err(kube::Error::Api(status))
                    if status.code == 409 && attempt < self.conflict_retries =>
                {
                    attempt += 1;
                    log::debug!(
                        "conflict applying {}, retry {}/{}",
                        name,
                        attempt,
                        self.conflict_retries
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Delete an owned object; already-gone is success.
    pub async fn delete(&self, obj: &DynamicObject) -> FleetResult<()> {
        let api = self.api_for(obj).await?;
        log::debug!(
            "deleting {}/{}",
            obj.namespace().unwrap_or_else(|| "<cluster>".to_string()),
            obj.name_any()
        );

        match api.delete(&obj.name_any(), &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(status)) if status.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every live object owned by `owner` among the given kinds and
    /// namespaces.
    ///
    /// The kind list comes from what the deployment rendered and what its
    /// status says it applied earlier, so a deployment only ever reads back
    /// its own footprint. Cluster-scoped kinds are listed once, namespaced
    /// kinds once per namespace; listings are paginated and pre-filtered by
    /// the managed label before the ownership annotation is checked.
    pub async fn list_owned(
        &self,
        namespaces: &[String],
        kinds: &[GroupVersionKind],
        owner: &str,
    ) -> FleetResult<Vec<DynamicObject>> {
        let mut owned = Vec::new();

        for gvk in kinds {
            let (ar, caps) = match pinned_kind(&self.client, gvk).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    // A kind applied earlier may have been uninstalled from
                    // the cluster since; its objects are gone with it.
                    log::debug!("skipping unserved kind {}/{}: {e}", gvk.group, gvk.kind);
                    continue;
                }
            };

            let handles: Vec<Api<DynamicObject>> = match caps.scope {
                Scope::Cluster => vec![Api::all_with(self.client.clone(), &ar)],
                Scope::Namespaced => namespaces
                    .iter()
                    .map(|ns| Api::namespaced_with(self.client.clone(), ns, &ar))
                    .collect(),
            };

            let types = TypeMeta {
                api_version: ar.api_version.clone(),
                kind: ar.kind.clone(),
            };

            for api in handles {
                let mut params = ListParams::default()
                    .labels(&format!("{MANAGED_LABEL}=true"))
                    .limit(LIST_PAGE_SIZE);

                loop {
                    let page = api.list(&params).await?;

                    for mut item in page.items {
                        // List items come back without their type meta.
                        item.types.get_or_insert(types.clone());
                        if owner_key(&item).as_deref() == Some(owner) {
                            owned.push(item);
                        }
                    }

                    match page.metadata.continue_.filter(|token| !token.is_empty()) {
                        Some(token) => params.continue_token = Some(token),
                        None => break,
                    }
                }
            }
        }

        Ok(owned)
    }
}

/// Ensure the managed label is set on a resource
pub fn ensure_labels<T: Resource>(resource: &mut T) {
    let labels = resource.meta_mut().labels.get_or_insert_with(BTreeMap::new);
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
}

/// Stamp the owning BundleDeployment onto a resource. Ownership across the
/// cluster boundary is by annotation, not ownerReference.
pub fn ensure_owner_annotation<T: Resource>(resource: &mut T, bd_namespace: &str, bd_name: &str) {
    let annotations = resource
        .meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new);
    annotations.insert(
        BUNDLE_DEPLOYMENT_ANNOTATION.to_string(),
        deployment_key(bd_namespace, bd_name),
    );
}

/// The BundleDeployment key an object claims to be owned by, if any.
pub fn owner_key<T: Resource>(resource: &T) -> Option<String> {
    resource
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(BUNDLE_DEPLOYMENT_ANNOTATION))
        .cloned()
}

/// Strip the ownership annotation, abandoning the object in place. Used for
/// `keepResources` teardown.
pub fn strip_owner_annotation<T: Resource>(resource: &mut T) {
    if let Some(annotations) = resource.meta_mut().annotations.as_mut() {
        annotations.remove(BUNDLE_DEPLOYMENT_ANNOTATION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ApiResource;

    fn object(name: &str) -> DynamicObject {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", "Deployment"));
        DynamicObject::new(name, &ar)
    }

    #[test]
    fn ownership_annotation_roundtrip() {
        let mut obj = object("web");
        assert!(owner_key(&obj).is_none());

        ensure_owner_annotation(&mut obj, "cluster-ns-1", "app");
        assert_eq!(owner_key(&obj).as_deref(), Some("cluster-ns-1/app"));

        strip_owner_annotation(&mut obj);
        assert!(owner_key(&obj).is_none());
    }

    #[test]
    fn managed_label_is_stamped_once() {
        let mut obj = object("web");
        ensure_labels(&mut obj);
        ensure_labels(&mut obj);
        let labels = obj.metadata.labels.as_ref().expect("labels");
        assert_eq!(labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn gvk_parses_grouped_and_core_api_versions() {
        let grouped = gvk_of("apps/v1", "Deployment");
        assert_eq!(grouped.group, "apps");
        assert_eq!(grouped.version, "v1");
        assert_eq!(grouped.kind, "Deployment");

        let core = gvk_of("v1", "ConfigMap");
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
    }
}
