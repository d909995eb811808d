use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crd::bundle::{BundleRef, BundleTarget, RolloutStrategy};
use crate::crd::options::{DiffOptions, HelmOptions, KustomizeOptions};

/// The per-directory bundle spec file. Everything is optional; a missing
/// `fleet.yaml` synthesizes the default.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FleetYaml {
    /// Name override for the produced bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Namespace for resources that carry none of their own
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "defaultNamespace"
    )]
    pub default_namespace: Option<String>,

    /// Namespace forced onto all namespaced resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kustomize: Option<KustomizeOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffOptions>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "dependsOn")]
    pub depends_on: Vec<BundleRef>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "rolloutStrategy"
    )]
    pub rollout_strategy: Option<RolloutStrategy>,

    /// Per-target option overrides and overlay selections
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        rename = "targetCustomizations"
    )]
    pub target_customizations: Vec<BundleTarget>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,

    /// Globs limiting which files enter the bundle; empty selects all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Globs removed from the selection after `include`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// File name the reader looks for at the bundle root.
pub const FLEET_YAML: &str = "fleet.yaml";

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn parses_a_typical_fleet_yaml() {
        let yaml = indoc! {"
            namespace: frontend
            defaultNamespace: apps
            helm:
              chart: ./chart
              releaseName: web
              values:
                replicas: 3
            dependsOn:
              - name: infra-base
            targetCustomizations:
              - name: prod
                clusterSelector:
                  matchLabels:
                    env: prod
                overlays:
                  - prod
        "};

        let parsed: FleetYaml = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(parsed.namespace.as_deref(), Some("frontend"));
        assert_eq!(parsed.default_namespace.as_deref(), Some("apps"));
        let helm = parsed.helm.expect("helm options");
        assert_eq!(helm.release_name.as_deref(), Some("web"));
        assert_eq!(parsed.depends_on[0].name.as_deref(), Some("infra-base"));
        assert_eq!(parsed.target_customizations[0].overlays, vec!["prod"]);
    }

    #[test]
    fn empty_file_is_the_default_bundle() {
        let parsed: FleetYaml = serde_yaml::from_str("{}").expect("parse");
        assert!(parsed.helm.is_none());
        assert!(parsed.target_customizations.is_empty());
        assert!(!parsed.paused);
    }
}
