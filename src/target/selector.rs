use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

use crate::error::{FleetError, FleetResult};

/// Evaluate a Kubernetes label selector against a label map. An empty
/// selector matches everything, mirroring API-server semantics.
pub fn selector_matches(
    selector: &LabelSelector,
    labels: Option<&BTreeMap<String, String>>,
) -> FleetResult<bool> {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);

    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let current = labels.get(&expr.key);
            let values = expr.values.as_deref().unwrap_or(&[]);

            let matched = match expr.operator.as_str() {
                "In" => current.map(|v| values.contains(v)).unwrap_or(false),
                "NotIn" => current.map(|v| !values.contains(v)).unwrap_or(true),
                "Exists" => current.is_some(),
                "DoesNotExist" => current.is_none(),
                op => {
                    return Err(FleetError::InvalidInput(format!(
                        "unknown selector operator {op:?}"
                    )))
                }
            };

            if !matched {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = LabelSelector::default();
        assert!(selector_matches(&selector, None).expect("eval"));
        assert!(selector_matches(&selector, Some(&labels(&[("a", "b")]))).expect("eval"));
    }

    #[test]
    fn match_labels_require_exact_values() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("env", "prod")])),
            ..Default::default()
        };
        assert!(selector_matches(&selector, Some(&labels(&[("env", "prod")]))).expect("eval"));
        assert!(!selector_matches(&selector, Some(&labels(&[("env", "dev")]))).expect("eval"));
        assert!(!selector_matches(&selector, None).expect("eval"));
    }

    #[test]
    fn expressions_cover_all_operators() {
        let selector = LabelSelector {
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "env".into(),
                    operator: "In".into(),
                    values: Some(vec!["prod".into(), "staging".into()]),
                },
                LabelSelectorRequirement {
                    key: "legacy".into(),
                    operator: "DoesNotExist".into(),
                    values: None,
                },
            ]),
            ..Default::default()
        };

        assert!(selector_matches(&selector, Some(&labels(&[("env", "prod")]))).expect("eval"));
        assert!(!selector_matches(
            &selector,
            Some(&labels(&[("env", "prod"), ("legacy", "1")]))
        )
        .expect("eval"));
        assert!(!selector_matches(&selector, Some(&labels(&[("env", "dev")]))).expect("eval"));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "a".into(),
                operator: "Near".into(),
                values: None,
            }]),
            ..Default::default()
        };
        assert!(selector_matches(&selector, None).is_err());
    }
}
