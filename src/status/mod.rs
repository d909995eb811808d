use kube::ResourceExt;

use crate::crd::cluster_group::ClusterGroupDisplay;
use crate::crd::summary::{BundleSummary, ResourceCounts};
use crate::crd::{Bundle, BundleDeployment, BundleState, Cluster, ClusterGroupStatus};

/// `"<ready>/<desired>"` display strings used across the status surfaces.
pub fn ready_display(ready: i32, desired: i32) -> String {
    format!("{ready}/{desired}")
}

/// Sum the summaries of a GitRepo's bundles.
pub fn rollup_bundle_summaries(bundles: &[Bundle]) -> BundleSummary {
    let mut total = BundleSummary::default();
    for bundle in bundles {
        if let Some(summary) = bundle.status.as_ref().and_then(|s| s.summary.as_ref()) {
            total.add(summary);
        }
    }
    total
}

/// Count ready clusters across a set of bundle deployments: a cluster is
/// ready for the repo when every one of its deployments is.
pub fn ready_clusters(deployments: &[BundleDeployment]) -> (i32, i32) {
    use std::collections::BTreeMap;

    let mut per_cluster: BTreeMap<String, bool> = BTreeMap::new();
    for bd in deployments {
        let cluster = bd.namespace().unwrap_or_default();
        let entry = per_cluster.entry(cluster).or_insert(true);
        *entry &= bd.state() == BundleState::Ready;
    }

    let desired = per_cluster.len() as i32;
    let ready = per_cluster.values().filter(|ready| **ready).count() as i32;
    (ready, desired)
}

/// Accumulate downstream object counts from the deployments' reported
/// resource lists and states.
pub fn resource_counts(deployments: &[BundleDeployment]) -> ResourceCounts {
    let mut counts = ResourceCounts::default();

    for bd in deployments {
        let Some(status) = &bd.status else { continue };
        let state = bd.state();

        for _resource in &status.resources {
            counts.desired_ready += 1;
            match state {
                BundleState::Ready => counts.ready += 1,
                BundleState::WaitApplied => counts.wait_applied += 1,
                BundleState::Modified => counts.modified += 1,
                BundleState::Pending | BundleState::OutOfSync => counts.unknown += 1,
                BundleState::ErrApplied | BundleState::NotReady => counts.not_ready += 1,
            }
        }

        for modified in &status.modified_status {
            if modified.missing {
                counts.missing += 1;
            }
            if modified.delete {
                counts.orphaned += 1;
            }
        }
    }

    counts
}

/// Roll a set of clusters up into a ClusterGroup status.
pub fn group_status(clusters: &[Cluster]) -> ClusterGroupStatus {
    let mut summary = BundleSummary::default();
    let mut non_ready = 0;

    for cluster in clusters {
        if let Some(cluster_summary) = cluster.status.as_ref().and_then(|s| s.summary.as_ref()) {
            summary.add(cluster_summary);
            if !cluster_summary.is_ready() {
                non_ready += 1;
            }
        }
    }

    let cluster_count = clusters.len() as i32;
    let state = summary.worst_state();

    ClusterGroupStatus {
        cluster_count,
        non_ready_cluster_count: non_ready,
        display: Some(ClusterGroupDisplay {
            ready_clusters: Some(ready_display(cluster_count - non_ready, cluster_count)),
            state: Some(state.as_str().to_string()),
        }),
        summary: Some(summary),
        conditions: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::bundle::{BundleSpec, BundleStatus};
    use crate::crd::cluster::{ClusterSpec, ClusterStatus};
    use crate::crd::{BundleDeploymentSpec, BundleDeploymentStatus};

    fn bd(ns: &str, name: &str, ready: bool, resources: usize) -> BundleDeployment {
        let mut bd = BundleDeployment::new(
            name,
            BundleDeploymentSpec {
                deployment_id: Some("s-abc:1".into()),
                staged_deployment_id: Some("s-abc:1".into()),
                ..Default::default()
            },
        );
        bd.metadata.namespace = Some(ns.to_string());
        bd.status = Some(BundleDeploymentStatus {
            applied_deployment_id: Some("s-abc:1".into()),
            ready,
            non_modified: true,
            resources: (0..resources)
                .map(|i| crate::crd::bundle_deployment::DeployedResource {
                    kind: Some("ConfigMap".into()),
                    name: Some(format!("cm-{i}")),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        });
        bd
    }

    #[test]
    fn ready_clusters_requires_all_deployments_ready() {
        let deployments = vec![
            bd("cluster-ns-1", "a", true, 0),
            bd("cluster-ns-1", "b", false, 0),
            bd("cluster-ns-2", "a", true, 0),
        ];
        assert_eq!(ready_clusters(&deployments), (1, 2));
    }

    #[test]
    fn display_string_shape() {
        assert_eq!(ready_display(1, 1), "1/1");
        assert_eq!(ready_display(0, 3), "0/3");
    }

    #[test]
    fn resource_counts_follow_deployment_state() {
        let deployments = vec![bd("ns1", "a", true, 2), bd("ns2", "b", false, 1)];
        let counts = resource_counts(&deployments);
        assert_eq!(counts.desired_ready, 3);
        assert_eq!(counts.ready, 2);
        assert_eq!(counts.not_ready, 1);
    }

    #[test]
    fn bundle_rollup_sums_summaries() {
        let mut ready_bundle = Bundle::new("a", BundleSpec::default());
        let mut summary = BundleSummary::default();
        summary.increment(BundleState::Ready);
        ready_bundle.status = Some(BundleStatus {
            summary: Some(summary),
            ..Default::default()
        });

        let total = rollup_bundle_summaries(&[ready_bundle]);
        assert_eq!(total.ready, 1);
        assert_eq!(total.desired_ready, 1);
    }

    #[test]
    fn group_status_counts_non_ready_clusters() {
        let mut ready_cluster = Cluster::new("c1", ClusterSpec::default());
        let mut summary = BundleSummary::default();
        summary.increment(BundleState::Ready);
        ready_cluster.status = Some(ClusterStatus {
            summary: Some(summary),
            ..Default::default()
        });

        let mut sad_cluster = Cluster::new("c2", ClusterSpec::default());
        let mut summary = BundleSummary::default();
        summary.increment(BundleState::Modified);
        sad_cluster.status = Some(ClusterStatus {
            summary: Some(summary),
            ..Default::default()
        });

        let status = group_status(&[ready_cluster, sad_cluster]);
        assert_eq!(status.cluster_count, 2);
        assert_eq!(status.non_ready_cluster_count, 1);
        assert_eq!(
            status.display.as_ref().and_then(|d| d.ready_clusters.as_deref()),
            Some("1/2")
        );
        assert_eq!(
            status.display.as_ref().and_then(|d| d.state.as_deref()),
            Some("Modified")
        );
    }
}
