use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;

use crate::crd::options::BundleDeploymentOptions;
use crate::error::{FleetError, FleetResult};
use crate::target::selector_matches;

/// The pure half of the pre-deploy namespace gate.
///
/// With a selector set the namespace must pre-exist and match; without one
/// a missing namespace is simply "create it".
pub fn check_allowed(
    namespace: Option<&Namespace>,
    options: &BundleDeploymentOptions,
) -> FleetResult<bool> {
    let Some(selector) = &options.allowed_target_namespace_selector else {
        // No gate configured: report whether the namespace needs creating.
        return Ok(namespace.is_none());
    };

    let Some(namespace) = namespace else {
        return Err(FleetError::TargetNamespaceMissing);
    };

    if !selector_matches(selector, namespace.metadata.labels.as_ref())? {
        return Err(FleetError::TargetNamespaceMismatch(
            namespace.metadata.name.clone().unwrap_or_default(),
        ));
    }

    Ok(false)
}

/// Validate (and if allowed, create) the target namespace downstream.
pub async fn ensure_target_namespace(
    client: &Client,
    namespace_name: &str,
    options: &BundleDeploymentOptions,
) -> FleetResult<()> {
    let api: Api<Namespace> = Api::all(client.clone());

    let existing = match api.get(namespace_name).await {
        Ok(ns) => Some(ns),
        Err(kube::Error::Api(e)) if e.code == 404 => None,
        Err(e) => return Err(e.into()),
    };

    let needs_create = check_allowed(existing.as_ref(), options)?;
    if !needs_create {
        return Ok(());
    }

    log::info!("creating target namespace {}", namespace_name);
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace_name.to_string()),
            labels: options.namespace_labels.clone(),
            annotations: options.namespace_annotations.clone(),
            ..Default::default()
        },
        ..Default::default()
    };

    match api.create(&PostParams::default(), &namespace).await {
        Ok(_) => Ok(()),
        // Lost a create race with another deployment; that's fine.
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use std::collections::BTreeMap;

    fn namespace(labels: &[(&str, &str)]) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some("workloads".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn gated_options() -> BundleDeploymentOptions {
        BundleDeploymentOptions {
            allowed_target_namespace_selector: Some(LabelSelector {
                match_labels: Some(
                    [("team".to_string(), "web".to_string())].into_iter().collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn missing_namespace_without_selector_requests_creation() {
        let needs_create =
            check_allowed(None, &BundleDeploymentOptions::default()).expect("check");
        assert!(needs_create);
    }

    #[test]
    fn missing_namespace_with_selector_fails() {
        let err = check_allowed(None, &gated_options()).expect_err("expected error");
        assert!(matches!(err, FleetError::TargetNamespaceMissing));
        assert_eq!(
            err.to_string(),
            "target namespace does not exist on downstream cluster"
        );
    }

    #[test]
    fn mislabelled_namespace_fails_with_the_selector_message() {
        let ns = namespace(&[("team", "data")]);
        let err = check_allowed(Some(&ns), &gated_options()).expect_err("expected error");
        assert!(err.to_string().contains("AllowedTargetNamespaceSelector"));
    }

    #[test]
    fn matching_namespace_passes_without_creation() {
        let ns = namespace(&[("team", "web")]);
        let needs_create = check_allowed(Some(&ns), &gated_options()).expect("check");
        assert!(!needs_create);
    }
}
