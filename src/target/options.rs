use crate::crd::bundle::BundleTarget;
use crate::crd::options::{BundleDeploymentOptions, HelmOptions};
use crate::error::FleetResult;

/// Hex length of the options hash in a deploymentID. Collisions across the
/// handful of option sets one bundle produces are not a concern.
const OPTIONS_HASH_LENGTH: usize = 12;

/// Merge a winning target's option overrides over the bundle's base
/// options. Scalars are replaced when the target sets them; helm values are
/// deep-merged so a target can override a single key.
pub fn merge_options(
    base: &BundleDeploymentOptions,
    target: &BundleTarget,
) -> BundleDeploymentOptions {
    let overrides = &target.options;
    let mut merged = base.clone();

    if overrides.default_namespace.is_some() {
        merged.default_namespace = overrides.default_namespace.clone();
    }
    if overrides.target_namespace.is_some() {
        merged.target_namespace = overrides.target_namespace.clone();
    }
    if overrides.namespace_labels.is_some() {
        merged.namespace_labels = overrides.namespace_labels.clone();
    }
    if overrides.namespace_annotations.is_some() {
        merged.namespace_annotations = overrides.namespace_annotations.clone();
    }
    if overrides.allowed_target_namespace_selector.is_some() {
        merged.allowed_target_namespace_selector =
            overrides.allowed_target_namespace_selector.clone();
    }
    if overrides.service_account.is_some() {
        merged.service_account = overrides.service_account.clone();
    }
    if overrides.force_sync_generation.is_some() {
        merged.force_sync_generation = overrides.force_sync_generation;
    }
    if overrides.kustomize.is_some() {
        merged.kustomize = overrides.kustomize.clone();
    }
    if overrides.diff.is_some() {
        merged.diff = overrides.diff.clone();
    }
    if overrides.correct_drift.is_some() {
        merged.correct_drift = overrides.correct_drift.clone();
    }
    if overrides.ignore.is_some() {
        merged.ignore = overrides.ignore.clone();
    }
    merged.keep_resources |= overrides.keep_resources;
    merged.delete_namespace |= overrides.delete_namespace;

    merged.helm = match (&base.helm, &overrides.helm) {
        (Some(base_helm), Some(override_helm)) => Some(merge_helm(base_helm, override_helm)),
        (None, Some(h)) | (Some(h), None) => Some(h.clone()),
        (None, None) => None,
    };

    merged
}

fn merge_helm(base: &HelmOptions, overrides: &HelmOptions) -> HelmOptions {
    let mut merged = base.clone();

    if overrides.chart.is_some() {
        merged.chart = overrides.chart.clone();
    }
    if overrides.repo.is_some() {
        merged.repo = overrides.repo.clone();
    }
    if overrides.version.is_some() {
        merged.version = overrides.version.clone();
    }
    if overrides.release_name.is_some() {
        merged.release_name = overrides.release_name.clone();
    }
    if overrides.timeout_seconds.is_some() {
        merged.timeout_seconds = overrides.timeout_seconds;
    }
    if overrides.max_history.is_some() {
        merged.max_history = overrides.max_history;
    }
    if !overrides.values_files.is_empty() {
        merged.values_files = overrides.values_files.clone();
    }
    merged.force |= overrides.force;
    merged.take_ownership |= overrides.take_ownership;
    merged.atomic |= overrides.atomic;
    merged.disable_pre_process |= overrides.disable_pre_process;
    merged.disable_dns |= overrides.disable_dns;
    merged.skip_schema_validation |= overrides.skip_schema_validation;
    merged.disable_dependency_update |= overrides.disable_dependency_update;
    merged.wait_for_jobs |= overrides.wait_for_jobs;

    merged.values = match (&base.values, &overrides.values) {
        (Some(base_values), Some(override_values)) => {
            let mut merged_values = base_values.clone();
            deep_merge(&mut merged_values, override_values);
            Some(merged_values)
        }
        (None, Some(v)) | (Some(v), None) => Some(v.clone()),
        (None, None) => None,
    };

    merged
}

/// Recursive JSON object merge; override values win, nested objects merge
/// key by key.
pub fn deep_merge(
    base: &mut serde_json::Map<String, serde_json::Value>,
    overrides: &serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(serde_json::Value::Object(base_obj)), serde_json::Value::Object(over_obj)) => {
                deep_merge(base_obj, over_obj);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Hash of the effective options. Serde maps are ordered, so the canonical
/// JSON is deterministic for equal option sets. `forceSyncGeneration` is
/// excluded: a forced sync re-applies without minting a new deploymentID.
pub fn options_hash(options: &BundleDeploymentOptions) -> FleetResult<String> {
    let mut hashed = options.clone();
    hashed.force_sync_generation = None;
    let json = serde_json::to_vec(&hashed)?;
    let sha = crate::content::sha256_hex(&json);
    Ok(sha[..OPTIONS_HASH_LENGTH].to_string())
}

/// `<content-name>:<options-hash>` — the identity a BundleDeployment is
/// keyed on. Changes iff the content or the effective options change.
pub fn deployment_id(
    content_name: &str,
    options: &BundleDeploymentOptions,
) -> FleetResult<String> {
    Ok(format!("{content_name}:{}", options_hash(options)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_id_is_pure_in_its_inputs() {
        let options = BundleDeploymentOptions {
            default_namespace: Some("apps".into()),
            ..Default::default()
        };
        let id1 = deployment_id("s-abc", &options).expect("id");
        let id2 = deployment_id("s-abc", &options.clone()).expect("id");
        assert_eq!(id1, id2);
        assert!(id1.starts_with("s-abc:"));

        let mut changed = options.clone();
        changed.default_namespace = Some("other".into());
        assert_ne!(id1, deployment_id("s-abc", &changed).expect("id"));
        assert_ne!(id1, deployment_id("s-def", &options).expect("id"));
    }

    #[test]
    fn target_overrides_win_and_helm_values_deep_merge() {
        let base = BundleDeploymentOptions {
            default_namespace: Some("apps".into()),
            helm: Some(HelmOptions {
                values: Some(
                    serde_json::from_str(r#"{"image": {"tag": "v1", "pullPolicy": "Always"}}"#)
                        .expect("json"),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };

        let target = BundleTarget {
            options: BundleDeploymentOptions {
                target_namespace: Some("prod".into()),
                helm: Some(HelmOptions {
                    values: Some(
                        serde_json::from_str(r#"{"image": {"tag": "v2"}}"#).expect("json"),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let merged = merge_options(&base, &target);
        assert_eq!(merged.default_namespace.as_deref(), Some("apps"));
        assert_eq!(merged.target_namespace.as_deref(), Some("prod"));

        let values = merged.helm.expect("helm").values.expect("values");
        assert_eq!(values["image"]["tag"], "v2");
        assert_eq!(values["image"]["pullPolicy"], "Always");
    }

    #[test]
    fn forced_sync_does_not_change_the_deployment_id() {
        let options = BundleDeploymentOptions::default();
        let mut bumped = options.clone();
        bumped.force_sync_generation = Some(42);
        assert_eq!(
            deployment_id("s-abc", &options).expect("id"),
            deployment_id("s-abc", &bumped).expect("id"),
        );
    }

    #[test]
    fn overlays_are_part_of_the_deployment_identity() {
        let options = BundleDeploymentOptions::default();
        let mut with_overlay = options.clone();
        with_overlay.overlays = vec!["prod".to_string()];
        assert_ne!(
            deployment_id("s-abc", &options).expect("id"),
            deployment_id("s-abc", &with_overlay).expect("id"),
        );
    }

    #[test]
    fn options_hash_ignores_unset_fields() {
        // Two structurally-equal option sets hash identically even when one
        // was built through merging.
        let a = BundleDeploymentOptions::default();
        let b = merge_options(&a, &BundleTarget::default());
        assert_eq!(options_hash(&a).expect("a"), options_hash(&b).expect("b"));
    }
}
