pub mod rollout;

use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::crd::bundle::PartitionStatus;
use crate::crd::summary::BundleSummary;
use crate::crd::{
    Bundle, BundleDeployment, BundleDeploymentSpec, BUNDLE_NAMESPACE_LABEL, BUNDLE_NAME_LABEL,
    CLUSTER_LABEL, CLUSTER_NAMESPACE_LABEL, MANAGED_LABEL, REPO_LABEL,
};
use crate::error::FleetResult;
use crate::target::{deployment_id, merge_options, TargetMatch};
use rollout::{max_unavailable_for, partition_clusters, promotable_partition_count, PartitionRollout};

/// The write set that drives a cluster's scoped namespace to match the
/// matcher's output. Computed purely so it can be tested without an API
/// server; the bundle controller executes it.
#[derive(Debug, Default)]
pub struct Plan {
    pub creates: Vec<BundleDeployment>,
    pub updates: Vec<BundleDeployment>,
    pub deletes: Vec<BundleDeployment>,

    /// Clusters whose deployment is withheld behind an unready dependency
    pub withheld: Vec<String>,

    /// Rollout bookkeeping for bundle status
    pub partitions: Vec<PartitionStatus>,
}

/// Dependencies known ready, keyed by (cluster scoped namespace, bundle
/// name).
pub type ReadyDependencies = HashSet<(String, String)>;

pub fn plan(
    bundle: &Bundle,
    content_name: &str,
    matches: &[TargetMatch<'_>],
    existing: &[BundleDeployment],
    ready_dependencies: &ReadyDependencies,
) -> FleetResult<Plan> {
    let mut plan = Plan::default();
    let bundle_name = bundle.name_any();
    let bundle_namespace = bundle.namespace().unwrap_or_else(|| "default".to_string());

    let existing_by_namespace: HashMap<String, &BundleDeployment> = existing
        .iter()
        .filter_map(|bd| bd.namespace().map(|ns| (ns, bd)))
        .collect();

    // Resolve each match to its effective options and deploymentID first;
    // partitioning and promotion work over the full set.
    struct Desired<'a> {
        m: &'a TargetMatch<'a>,
        namespace: String,
        id: String,
        options: crate::crd::BundleDeploymentOptions,
    }

    let mut desired = Vec::new();
    for m in matches {
        let Some(namespace) = m.cluster.scoped_namespace() else {
            // Registration has not allocated the namespace yet; the cluster
            // status reconcile will requeue us.
            continue;
        };

        let target = &bundle.spec.targets[m.target_index];
        let mut options = merge_options(&bundle.spec.options, target);
        options.overlays = m.overlays.clone();

        let id = deployment_id(content_name, &options)?;
        desired.push(Desired {
            m,
            namespace: namespace.to_string(),
            id,
            options,
        });
    }

    // Rollout pacing: deterministic partitions over the matched clusters,
    // promotion gated on the previous partitions' availability.
    let cluster_names: Vec<String> = desired.iter().map(|d| d.m.cluster.name_any()).collect();
    let strategy = bundle.spec.rollout_strategy.as_ref();
    let partitions = partition_clusters(&cluster_names, strategy);

    let namespace_of: HashMap<String, &Desired> = desired
        .iter()
        .map(|d| (d.m.cluster.name_any(), d))
        .collect();

    let rollouts: Vec<PartitionRollout> = partitions
        .iter()
        .map(|names| {
            let unavailable = names
                .iter()
                .filter(|name| {
                    let Some(d) = namespace_of.get(*name) else {
                        return true;
                    };
                    match existing_by_namespace.get(&d.namespace) {
                        Some(bd) => {
                            !(bd.is_ready()
                                && bd.spec.deployment_id.as_deref() == Some(d.id.as_str()))
                        }
                        None => true,
                    }
                })
                .count();
            PartitionRollout {
                clusters: names.clone(),
                unavailable,
            }
        })
        .collect();

    let promotable = promotable_partition_count(&rollouts, strategy);
    let promoted_clusters: HashSet<&String> = partitions
        .iter()
        .take(promotable)
        .flatten()
        .collect();

    for (index, rollout) in rollouts.iter().enumerate() {
        plan.partitions.push(PartitionStatus {
            name: Some(format!("partition{:03}", index)),
            count: rollout.clusters.len() as i32,
            max_unavailable: max_unavailable_for(strategy, rollout.clusters.len()) as i32,
            unavailable: rollout.unavailable as i32,
            summary: None,
        });
    }

    let mut desired_namespaces = HashSet::new();
    for d in &desired {
        desired_namespaces.insert(d.namespace.clone());

        let cluster_name = d.m.cluster.name_any();
        let promote = !bundle.spec.paused
            && !d.m.cluster.spec.paused
            && promoted_clusters.contains(&cluster_name);

        match existing_by_namespace.get(&d.namespace) {
            None => {
                if !dependencies_ready(bundle, &d.namespace, ready_dependencies) {
                    plan.withheld.push(cluster_name);
                    continue;
                }

                let mut bd = BundleDeployment::new(
                    &bundle_name,
                    BundleDeploymentSpec {
                        deployment_id: Some(d.id.clone()),
                        staged_deployment_id: Some(d.id.clone()),
                        options: d.options.clone(),
                        staged_options: Some(d.options.clone()),
                        depends_on: dependency_names(bundle),
                        correct_drift: d.options.correct_drift.clone(),
                        paused: bundle.spec.paused,
                        oci_contents: bundle
                            .status
                            .as_ref()
                            .map(|s| s.oci_reference.is_some())
                            .unwrap_or(false),
                    },
                );
                bd.metadata.namespace = Some(d.namespace.clone());
                bd.metadata.labels = Some(deployment_labels(
                    bundle,
                    &bundle_namespace,
                    &cluster_name,
                    d.m.cluster.namespace().as_deref().unwrap_or_default(),
                ));
                plan.creates.push(bd);
            }
            Some(existing_bd) => {
                let mut updated = (*existing_bd).clone();
                let mut changed = false;

                if existing_bd.spec.deployment_id.as_deref() != Some(d.id.as_str()) {
                    if promote {
                        updated.spec.deployment_id = Some(d.id.clone());
                        updated.spec.options = d.options.clone();
                    }
                    updated.spec.staged_deployment_id = Some(d.id.clone());
                    updated.spec.staged_options = Some(d.options.clone());
                    changed = true;
                } else if existing_bd.spec.options != d.options {
                    // Same identity, different options: a forced sync or a
                    // behavioural knob that is excluded from the hash.
                    updated.spec.options = d.options.clone();
                    updated.spec.staged_options = Some(d.options.clone());
                    changed = true;
                }

                if existing_bd.spec.paused != bundle.spec.paused {
                    updated.spec.paused = bundle.spec.paused;
                    changed = true;
                }

                let depends = dependency_names(bundle);
                if existing_bd.spec.depends_on != depends {
                    updated.spec.depends_on = depends;
                    changed = true;
                }

                if changed {
                    plan.updates.push(updated);
                }
            }
        }
    }

    // Clusters that stopped matching lose their deployment.
    for bd in existing {
        if let Some(ns) = bd.namespace() {
            if !desired_namespaces.contains(&ns) {
                plan.deletes.push(bd.clone());
            }
        }
    }

    Ok(plan)
}

fn dependency_names(bundle: &Bundle) -> Vec<String> {
    bundle
        .spec
        .depends_on
        .iter()
        .filter_map(|d| d.name.clone())
        .collect()
}

fn dependencies_ready(
    bundle: &Bundle,
    cluster_namespace: &str,
    ready: &ReadyDependencies,
) -> bool {
    dependency_names(bundle)
        .iter()
        .all(|dep| ready.contains(&(cluster_namespace.to_string(), dep.clone())))
}

fn deployment_labels(
    bundle: &Bundle,
    bundle_namespace: &str,
    cluster_name: &str,
    cluster_namespace: &str,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(BUNDLE_NAME_LABEL.to_string(), bundle.name_any());
    labels.insert(BUNDLE_NAMESPACE_LABEL.to_string(), bundle_namespace.to_string());
    labels.insert(CLUSTER_LABEL.to_string(), cluster_name.to_string());
    labels.insert(
        CLUSTER_NAMESPACE_LABEL.to_string(),
        cluster_namespace.to_string(),
    );
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

    if let Some(repo) = bundle
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(REPO_LABEL))
    {
        labels.insert(REPO_LABEL.to_string(), repo.clone());
    }

    labels
}

/// Summarize the current deployments of a bundle, for status rollup.
pub fn summarize(existing: &[BundleDeployment]) -> BundleSummary {
    let mut summary = BundleSummary::default();
    for bd in existing {
        let state = bd.state();
        summary.increment(state);
        if state != crate::crd::BundleState::Ready {
            summary.non_ready_resources.push(crate::crd::summary::NonReadyResource {
                name: bd.name_any(),
                bundle_state: Some(state.as_str().to_string()),
                message: bd
                    .status
                    .as_ref()
                    .and_then(|s| s.display.as_ref())
                    .and_then(|d| d.state.clone()),
                modified_status: bd
                    .status
                    .as_ref()
                    .map(|s| s.modified_status.clone())
                    .unwrap_or_default(),
                non_ready_status: bd
                    .status
                    .as_ref()
                    .map(|s| s.non_ready_status.clone())
                    .unwrap_or_default(),
            });
        }
    }
    summary.non_ready_resources.truncate(10);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::bundle::{BundleRef, BundleSpec, BundleTarget, RolloutStrategy};
    use crate::crd::cluster::{ClusterSpec, ClusterStatus};
    use crate::crd::{BundleDeploymentStatus, Cluster};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

    fn cluster(name: &str, scoped_ns: &str) -> Cluster {
        let mut cluster = Cluster::new(name, ClusterSpec::default());
        cluster.metadata.namespace = Some("fleet-default".to_string());
        cluster.status = Some(ClusterStatus {
            namespace: Some(scoped_ns.to_string()),
            ..Default::default()
        });
        cluster
    }

    fn test_bundle() -> Bundle {
        let mut bundle = Bundle::new(
            "app",
            BundleSpec {
                targets: vec![BundleTarget {
                    name: Some("all".into()),
                    cluster_selector: Some(LabelSelector::default()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        bundle.metadata.namespace = Some("fleet-default".to_string());
        bundle
    }

    fn matches<'a>(bundle: &Bundle, clusters: &'a [Cluster]) -> Vec<TargetMatch<'a>> {
        crate::target::match_bundle(bundle, clusters, &[]).expect("match")
    }

    fn ready_bd(bundle: &Bundle, content: &str, cluster: &Cluster) -> BundleDeployment {
        let target = &bundle.spec.targets[0];
        let options = merge_options(&bundle.spec.options, target);
        let id = deployment_id(content, &options).expect("id");
        let mut bd = BundleDeployment::new(
            &bundle.name_any(),
            BundleDeploymentSpec {
                deployment_id: Some(id.clone()),
                staged_deployment_id: Some(id.clone()),
                options,
                ..Default::default()
            },
        );
        bd.metadata.namespace = cluster.scoped_namespace().map(str::to_string);
        bd.status = Some(BundleDeploymentStatus {
            applied_deployment_id: Some(id),
            ready: true,
            non_modified: true,
            ..Default::default()
        });
        bd
    }

    #[test]
    fn creates_set_both_ids() {
        let clusters = vec![cluster("c1", "cluster-ns-1")];
        let bundle = test_bundle();
        let m = matches(&bundle, &clusters);

        let plan = plan(&bundle, "s-abc", &m, &[], &HashSet::new()).expect("plan");
        assert_eq!(plan.creates.len(), 1);
        assert!(plan.updates.is_empty());
        assert!(plan.deletes.is_empty());

        let bd = &plan.creates[0];
        assert_eq!(bd.namespace().as_deref(), Some("cluster-ns-1"));
        assert_eq!(bd.spec.deployment_id, bd.spec.staged_deployment_id);
        let labels = bd.metadata.labels.as_ref().expect("labels");
        assert_eq!(labels.get(BUNDLE_NAME_LABEL).map(String::as_str), Some("app"));
        assert_eq!(labels.get(CLUSTER_LABEL).map(String::as_str), Some("c1"));
    }

    #[test]
    fn paused_bundle_stages_without_promoting() {
        let clusters = vec![cluster("c1", "cluster-ns-1")];
        let mut bundle = test_bundle();
        let m = matches(&bundle, &clusters);
        let existing = vec![ready_bd(&bundle, "s-old", &clusters[0])];
        let old_id = existing[0].spec.deployment_id.clone();

        bundle.spec.paused = true;
        let plan = plan(&bundle, "s-new", &m, &existing, &HashSet::new()).expect("plan");
        assert_eq!(plan.updates.len(), 1);

        let updated = &plan.updates[0];
        assert_eq!(updated.spec.deployment_id, old_id);
        assert!(updated
            .spec
            .staged_deployment_id
            .as_deref()
            .expect("staged")
            .starts_with("s-new:"));
        assert!(updated.spec.paused);
    }

    #[test]
    fn unpaused_update_promotes_both_ids() {
        let clusters = vec![cluster("c1", "cluster-ns-1")];
        let bundle = test_bundle();
        let m = matches(&bundle, &clusters);
        let existing = vec![ready_bd(&bundle, "s-old", &clusters[0])];

        let plan = plan(&bundle, "s-new", &m, &existing, &HashSet::new()).expect("plan");
        assert_eq!(plan.updates.len(), 1);
        let updated = &plan.updates[0];
        assert_eq!(updated.spec.deployment_id, updated.spec.staged_deployment_id);
        assert!(updated
            .spec
            .deployment_id
            .as_deref()
            .expect("id")
            .starts_with("s-new:"));
    }

    #[test]
    fn forced_sync_updates_options_without_new_id() {
        let clusters = vec![cluster("c1", "cluster-ns-1")];
        let mut bundle = test_bundle();
        let m = matches(&bundle, &clusters);
        let existing = vec![ready_bd(&bundle, "s-abc", &clusters[0])];
        let old_id = existing[0].spec.deployment_id.clone();

        bundle.spec.options.force_sync_generation = Some(42);
        let plan = plan(&bundle, "s-abc", &m, &existing, &HashSet::new()).expect("plan");
        assert_eq!(plan.updates.len(), 1);

        let updated = &plan.updates[0];
        assert_eq!(updated.spec.deployment_id, old_id);
        assert_eq!(updated.spec.options.force_sync_generation, Some(42));
    }

    #[test]
    fn unmatched_clusters_lose_their_deployment() {
        let clusters = vec![cluster("c1", "cluster-ns-1")];
        let mut bundle = test_bundle();
        let existing = vec![ready_bd(&bundle, "s-abc", &clusters[0])];

        bundle.spec.targets[0].cluster_selector = None;
        bundle.spec.targets[0].cluster_name = Some("other".into());
        let m = matches(&bundle, &clusters);

        let plan = plan(&bundle, "s-abc", &m, &existing, &HashSet::new()).expect("plan");
        assert!(plan.creates.is_empty());
        assert_eq!(plan.deletes.len(), 1);
    }

    #[test]
    fn unready_dependency_withholds_creation() {
        let clusters = vec![cluster("c1", "cluster-ns-1")];
        let mut bundle = test_bundle();
        bundle.spec.depends_on = vec![BundleRef {
            name: Some("infra".into()),
            selector: None,
        }];
        let m = matches(&bundle, &clusters);

        let empty = HashSet::new();
        let withheld = plan(&bundle, "s-abc", &m, &[], &empty).expect("plan");
        assert!(withheld.creates.is_empty());
        assert_eq!(withheld.withheld, vec!["c1"]);

        let mut ready = HashSet::new();
        ready.insert(("cluster-ns-1".to_string(), "infra".to_string()));
        let allowed = plan(&bundle, "s-abc", &m, &[], &ready).expect("plan");
        assert_eq!(allowed.creates.len(), 1);
        assert_eq!(allowed.creates[0].spec.depends_on, vec!["infra"]);
    }

    #[test]
    fn rollout_stages_later_partitions_while_first_is_in_flight() {
        let clusters: Vec<Cluster> = (0..4)
            .map(|i| cluster(&format!("c{i}"), &format!("cluster-ns-{i}")))
            .collect();
        let mut bundle = test_bundle();
        bundle.spec.rollout_strategy = Some(RolloutStrategy {
            max_unavailable: Some("0".into()),
            auto_partition_size: Some("2".into()),
            ..Default::default()
        });
        let m = matches(&bundle, &clusters);

        // Existing deployments are all ready at the old ID, so every
        // partition counts as unavailable for the new one.
        let existing: Vec<BundleDeployment> = clusters
            .iter()
            .map(|c| ready_bd(&bundle, "s-old", c))
            .collect();

        let plan = plan(&bundle, "s-new", &m, &existing, &HashSet::new()).expect("plan");
        assert_eq!(plan.partitions.len(), 2);
        assert_eq!(plan.updates.len(), 4);

        let promoted = plan
            .updates
            .iter()
            .filter(|bd| {
                bd.spec
                    .deployment_id
                    .as_deref()
                    .map(|id| id.starts_with("s-new:"))
                    .unwrap_or(false)
            })
            .count();
        let staged_only = plan
            .updates
            .iter()
            .filter(|bd| {
                bd.spec.deployment_id.as_deref().map(|id| id.starts_with("s-old:")).unwrap_or(false)
                    && bd
                        .spec
                        .staged_deployment_id
                        .as_deref()
                        .map(|id| id.starts_with("s-new:"))
                        .unwrap_or(false)
            })
            .count();

        // The first partition promotes, the second only stages.
        assert_eq!(promoted, 2);
        assert_eq!(staged_only, 2);
    }

    #[test]
    fn summarize_counts_states() {
        let clusters = vec![cluster("c1", "cluster-ns-1")];
        let bundle = test_bundle();
        let mut bd = ready_bd(&bundle, "s-abc", &clusters[0]);
        let summary = summarize(&[bd.clone()]);
        assert_eq!(summary.ready, 1);
        assert!(summary.is_ready());

        if let Some(status) = bd.status.as_mut() {
            status.non_modified = false;
        }
        let summary = summarize(&[bd]);
        assert_eq!(summary.modified, 1);
        assert_eq!(summary.non_ready_resources.len(), 1);
    }
}
