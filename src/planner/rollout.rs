use crate::crd::bundle::RolloutStrategy;

/// Defaults mirroring the wire contract: everything may be unavailable at
/// once unless the user tightens the strategy.
const DEFAULT_MAX_UNAVAILABLE: &str = "100%";
const DEFAULT_AUTO_PARTITION_SIZE: &str = "25%";

/// Parse a count-or-percentage string against a total. Percentages round
/// up so `10%` of 5 clusters is 1, never 0.
pub fn parse_count_or_percent(value: &str, total: usize) -> Option<usize> {
    let value = value.trim();
    if let Some(percent) = value.strip_suffix('%') {
        let percent: f64 = percent.trim().parse().ok()?;
        if !(0.0..=100.0).contains(&percent) {
            return None;
        }
        Some(((total as f64) * percent / 100.0).ceil() as usize)
    } else {
        value.parse().ok()
    }
}

/// Deterministically partition clusters for a paced rollout. Clusters are
/// ordered by the hash of their name (stable across reconciles, uncorrelated
/// with naming schemes) and chunked into `autoPartitionSize` groups.
pub fn partition_clusters(cluster_names: &[String], strategy: Option<&RolloutStrategy>) -> Vec<Vec<String>> {
    if cluster_names.is_empty() {
        return Vec::new();
    }

    let mut ordered: Vec<String> = cluster_names.to_vec();
    ordered.sort_by_key(|name| crate::content::sha256_hex(name.as_bytes()));

    let size_spec = strategy
        .and_then(|s| s.auto_partition_size.as_deref())
        .unwrap_or(DEFAULT_AUTO_PARTITION_SIZE);
    let size = parse_count_or_percent(size_spec, ordered.len())
        .unwrap_or(ordered.len())
        .max(1);

    ordered.chunks(size).map(|c| c.to_vec()).collect()
}

/// Per-partition rollout inputs: how many clusters it has and how many of
/// them are currently unavailable (missing, unapplied or not ready).
#[derive(Clone, Debug)]
pub struct PartitionRollout {
    pub clusters: Vec<String>,
    pub unavailable: usize,
}

/// The resolved maxUnavailable threshold for a partition of `count`
/// clusters.
pub fn max_unavailable_for(strategy: Option<&RolloutStrategy>, count: usize) -> usize {
    let spec = strategy
        .and_then(|s| s.max_unavailable.as_deref())
        .unwrap_or(DEFAULT_MAX_UNAVAILABLE);
    parse_count_or_percent(spec, count).unwrap_or(count)
}

/// How many leading partitions may hold a promoted deploymentID right now.
///
/// Partition 0 always promotes. Each later partition promotes only while
/// every earlier partition's unavailable count is within its threshold;
/// the first partition in flight holds everything behind it.
pub fn promotable_partition_count(
    partitions: &[PartitionRollout],
    strategy: Option<&RolloutStrategy>,
) -> usize {
    let mut promotable = 0;

    for partition in partitions {
        promotable += 1;
        let threshold = max_unavailable_for(strategy, partition.clusters.len());
        if partition.unavailable > threshold {
            break;
        }
    }

    promotable
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("cluster-{i}")).collect()
    }

    #[test]
    fn count_or_percent_parses_both_forms() {
        assert_eq!(parse_count_or_percent("3", 10), Some(3));
        assert_eq!(parse_count_or_percent("50%", 10), Some(5));
        assert_eq!(parse_count_or_percent("10%", 5), Some(1));
        assert_eq!(parse_count_or_percent("0%", 10), Some(0));
        assert_eq!(parse_count_or_percent("150%", 10), None);
        assert_eq!(parse_count_or_percent("abc", 10), None);
    }

    #[test]
    fn partitioning_is_deterministic_and_complete() {
        let clusters = names(10);
        let strategy = RolloutStrategy {
            auto_partition_size: Some("3".into()),
            ..Default::default()
        };

        let first = partition_clusters(&clusters, Some(&strategy));
        let second = partition_clusters(&clusters, Some(&strategy));
        assert_eq!(first, second);

        let total: usize = first.iter().map(|p| p.len()).sum();
        assert_eq!(total, 10);
        assert_eq!(first.len(), 4);
        assert!(first.iter().take(3).all(|p| p.len() == 3));
    }

    #[test]
    fn default_partition_size_is_a_quarter() {
        let partitions = partition_clusters(&names(8), None);
        assert_eq!(partitions.len(), 4);
        assert!(partitions.iter().all(|p| p.len() == 2));
    }

    #[test]
    fn in_flight_partition_blocks_later_ones() {
        let strategy = RolloutStrategy {
            max_unavailable: Some("0".into()),
            auto_partition_size: Some("2".into()),
            ..Default::default()
        };
        let partitions = vec![
            PartitionRollout {
                clusters: vec!["a".into(), "b".into()],
                unavailable: 0,
            },
            PartitionRollout {
                clusters: vec!["c".into(), "d".into()],
                unavailable: 1,
            },
            PartitionRollout {
                clusters: vec!["e".into(), "f".into()],
                unavailable: 2,
            },
        ];

        // Partition 1 is promotable (partition 0 converged) and in flight;
        // partition 2 must wait.
        assert_eq!(promotable_partition_count(&partitions, Some(&strategy)), 2);
    }

    #[test]
    fn default_strategy_promotes_everything() {
        let partitions = vec![
            PartitionRollout {
                clusters: names(2),
                unavailable: 2,
            },
            PartitionRollout {
                clusters: names(2),
                unavailable: 2,
            },
        ];
        assert_eq!(promotable_partition_count(&partitions, None), 2);
    }
}
