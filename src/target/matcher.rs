use kube::ResourceExt;

use super::selector::selector_matches;
use crate::crd::bundle::BundleTarget;
use crate::crd::{Bundle, Cluster, ClusterGroup};
use crate::error::{FleetError, FleetResult};

/// The four ways a target can select clusters, re-expressed as a proper sum
/// type so the matcher can match exhaustively. When several of the optional
/// fields are set, the most specific wins: name, then selector, then group,
/// then group selector.
#[derive(Clone, Debug)]
pub enum TargetSelector {
    ClusterName(String),
    ClusterSelector(k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector),
    ClusterGroup(String),
    ClusterGroupSelector(k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector),
}

impl TargetSelector {
    pub fn from_target(target: &BundleTarget) -> Option<TargetSelector> {
        if let Some(name) = &target.cluster_name {
            return Some(TargetSelector::ClusterName(name.clone()));
        }
        if let Some(selector) = &target.cluster_selector {
            return Some(TargetSelector::ClusterSelector(selector.clone()));
        }
        if let Some(group) = &target.cluster_group {
            return Some(TargetSelector::ClusterGroup(group.clone()));
        }
        if let Some(selector) = &target.cluster_group_selector {
            return Some(TargetSelector::ClusterGroupSelector(selector.clone()));
        }
        None
    }

    /// Does this selector pick the given cluster, in the context of the
    /// known cluster groups?
    pub fn matches(
        &self,
        cluster: &Cluster,
        groups: &[ClusterGroup],
    ) -> FleetResult<bool> {
        match self {
            TargetSelector::ClusterName(name) => Ok(&cluster.name_any() == name),
            TargetSelector::ClusterSelector(selector) => {
                selector_matches(selector, cluster.metadata.labels.as_ref())
            }
            TargetSelector::ClusterGroup(group_name) => {
                for group in groups.iter().filter(|g| &g.name_any() == group_name) {
                    if group_contains(group, cluster)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            TargetSelector::ClusterGroupSelector(selector) => {
                for group in groups {
                    if selector_matches(selector, group.metadata.labels.as_ref())?
                        && group_contains(group, cluster)?
                    {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Membership of a cluster in a group: the group's selector, evaluated over
/// the cluster's labels. A group without a selector contains nothing.
pub fn group_contains(group: &ClusterGroup, cluster: &Cluster) -> FleetResult<bool> {
    match &group.spec.selector {
        Some(selector) => selector_matches(selector, cluster.metadata.labels.as_ref()),
        None => Ok(false),
    }
}

/// The outcome of matching one bundle against one cluster: which target won
/// and what it contributes.
#[derive(Clone, Debug)]
pub struct TargetMatch<'a> {
    pub cluster: &'a Cluster,
    /// Name of the winning target entry
    pub target_name: String,
    /// Overlay names the winning target applies, in order
    pub overlays: Vec<String>,
    /// Index of the winning target in `spec.targets`
    pub target_index: usize,
}

/// Compute the set of clusters a bundle deploys to.
///
/// Targets are evaluated in declaration order and the first match wins for
/// overlay and option selection. Target restrictions are a deny list that
/// always overrides targets. Zero matches is not an error.
pub fn match_bundle<'a>(
    bundle: &Bundle,
    clusters: &'a [Cluster],
    groups: &[ClusterGroup],
) -> FleetResult<Vec<TargetMatch<'a>>> {
    let mut matches = Vec::new();

    for cluster in clusters {
        if is_restricted(&bundle.spec.target_restrictions, cluster, groups)? {
            continue;
        }

        for (index, target) in bundle.spec.targets.iter().enumerate() {
            let Some(selector) = TargetSelector::from_target(target) else {
                continue;
            };

            if selector.matches(cluster, groups)? {
                matches.push(TargetMatch {
                    cluster,
                    target_name: target
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("target{:03}", index)),
                    overlays: target.overlays.clone(),
                    target_index: index,
                });
                break;
            }
        }
    }

    Ok(matches)
}

fn is_restricted(
    restrictions: &[BundleTarget],
    cluster: &Cluster,
    groups: &[ClusterGroup],
) -> FleetResult<bool> {
    for restriction in restrictions {
        if let Some(selector) = TargetSelector::from_target(restriction) {
            if selector.matches(cluster, groups)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

impl Bundle {
    /// Diagnostic helper: true when the bundle's targets matched nothing.
    pub fn has_no_deployments(matches: &[TargetMatch<'_>]) -> bool {
        matches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::bundle::BundleSpec;
    use crate::crd::cluster::ClusterSpec;
    use crate::crd::cluster_group::ClusterGroupSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use std::collections::BTreeMap;

    fn cluster(name: &str, labels: &[(&str, &str)]) -> Cluster {
        let mut cluster = Cluster::new(name, ClusterSpec::default());
        cluster.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        cluster
    }

    fn group(name: &str, match_labels: &[(&str, &str)]) -> ClusterGroup {
        ClusterGroup::new(
            name,
            ClusterGroupSpec {
                selector: Some(LabelSelector {
                    match_labels: Some(
                        match_labels
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    ),
                    ..Default::default()
                }),
            },
        )
    }

    fn bundle(targets: Vec<BundleTarget>, restrictions: Vec<BundleTarget>) -> Bundle {
        Bundle::new(
            "app",
            BundleSpec {
                targets,
                target_restrictions: restrictions,
                ..Default::default()
            },
        )
    }

    #[test]
    fn first_matching_target_wins() {
        let clusters = vec![cluster("c1", &[("env", "prod")])];
        let bundle = bundle(
            vec![
                BundleTarget {
                    name: Some("by-label".into()),
                    cluster_selector: Some(LabelSelector {
                        match_labels: Some(
                            [("env".to_string(), "prod".to_string())].into_iter().collect(),
                        ),
                        ..Default::default()
                    }),
                    overlays: vec!["prod".into()],
                    ..Default::default()
                },
                BundleTarget {
                    name: Some("by-name".into()),
                    cluster_name: Some("c1".into()),
                    overlays: vec!["other".into()],
                    ..Default::default()
                },
            ],
            vec![],
        );

        let matches = match_bundle(&bundle, &clusters, &[]).expect("match");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].target_name, "by-label");
        assert_eq!(matches[0].overlays, vec!["prod"]);
    }

    #[test]
    fn restrictions_subtract_even_when_a_target_matches() {
        let clusters = vec![
            cluster("c1", &[("env", "prod")]),
            cluster("c2", &[("env", "prod"), ("blocked", "true")]),
        ];
        let bundle = bundle(
            vec![BundleTarget {
                cluster_selector: Some(LabelSelector::default()),
                ..Default::default()
            }],
            vec![BundleTarget {
                cluster_selector: Some(LabelSelector {
                    match_labels: Some(
                        [("blocked".to_string(), "true".to_string())].into_iter().collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }],
        );

        let matches = match_bundle(&bundle, &clusters, &[]).expect("match");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].cluster.name_any(), "c1");
    }

    #[test]
    fn cluster_groups_resolve_through_their_selector() {
        let clusters = vec![
            cluster("c1", &[("region", "us")]),
            cluster("c2", &[("region", "eu")]),
        ];
        let groups = vec![group("us-group", &[("region", "us")])];
        let bundle = bundle(
            vec![BundleTarget {
                cluster_group: Some("us-group".into()),
                ..Default::default()
            }],
            vec![],
        );

        let matches = match_bundle(&bundle, &clusters, &groups).expect("match");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].cluster.name_any(), "c1");
    }

    #[test]
    fn zero_matches_is_not_an_error() {
        let clusters = vec![cluster("c1", &[])];
        let bundle = bundle(
            vec![BundleTarget {
                cluster_name: Some("absent".into()),
                ..Default::default()
            }],
            vec![],
        );
        let matches = match_bundle(&bundle, &clusters, &[]).expect("match");
        assert!(Bundle::has_no_deployments(&matches));
    }

    #[test]
    fn selector_precedence_prefers_cluster_name() {
        let target = BundleTarget {
            cluster_name: Some("c1".into()),
            cluster_group: Some("ignored".into()),
            ..Default::default()
        };
        match TargetSelector::from_target(&target) {
            Some(TargetSelector::ClusterName(name)) => assert_eq!(name, "c1"),
            other => panic!("expected ClusterName, got {other:?}"),
        }
    }
}
