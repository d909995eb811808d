use kube::api::DynamicObject;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::manifest::parse_objects;
use super::template::{
    calls_lookup, render_template, substitute_cluster_values, ClusterValues, TemplateContext,
};
use crate::crd::options::HelmOptions;
use crate::error::{FleetError, FleetResult};
use crate::target::options::deep_merge;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChartMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,
}

/// A chart loaded out of a bundle's decoded files.
#[derive(Clone, Debug, Default)]
pub struct Chart {
    pub meta: ChartMeta,
    pub values: serde_json::Map<String, serde_json::Value>,
    /// `(relative path, source)` for everything under `templates/`
    pub templates: Vec<(String, String)>,
}

/// Locate and load the chart rooted at `chart_dir` (empty for the bundle
/// root).
pub fn load_chart(files: &BTreeMap<String, Vec<u8>>, chart_dir: &str) -> FleetResult<Chart> {
    let root = if chart_dir.is_empty() || chart_dir == "." || chart_dir == "./" {
        String::new()
    } else {
        format!("{}/", chart_dir.trim_start_matches("./").trim_end_matches('/'))
    };

    let chart_yaml = files
        .get(&format!("{root}Chart.yaml"))
        .ok_or_else(|| FleetError::InvalidBundle(format!("missing {root}Chart.yaml")))?;
    let meta: ChartMeta = serde_yaml::from_slice(chart_yaml)?;

    let values = match files.get(&format!("{root}values.yaml")) {
        Some(raw) => {
            let value: serde_yaml::Value = serde_yaml::from_slice(raw)?;
            match serde_json::to_value(&value)? {
                serde_json::Value::Object(map) => map,
                serde_json::Value::Null => serde_json::Map::new(),
                _ => {
                    return Err(FleetError::InvalidBundle(
                        "values.yaml must be a mapping".to_string(),
                    ))
                }
            }
        }
        None => serde_json::Map::new(),
    };

    let template_prefix = format!("{root}templates/");
    let mut templates = Vec::new();
    for (path, raw) in files.range(template_prefix.clone()..) {
        if !path.starts_with(&template_prefix) {
            break;
        }
        let relative = &path[template_prefix.len()..];

        // Helpers hold defines the subset renderer does not evaluate, and
        // NOTES.txt is operator chatter; neither produces objects.
        if relative.starts_with('_') || relative == "NOTES.txt" {
            continue;
        }

        let source = std::str::from_utf8(raw)
            .map_err(|_| FleetError::InvalidBundle(format!("{path} is not valid UTF-8")))?;
        templates.push((relative.to_string(), source.to_string()));
    }

    Ok(Chart {
        meta,
        values,
        templates,
    })
}

/// Render a chart into objects with the per-cluster values merged in.
///
/// Merge order (later wins): chart `values.yaml`, the chart's extra
/// `valuesFiles` in list order, then the bundle's `helm.values` after
/// cluster-value substitution (unless preprocessing is disabled).
pub fn render_chart(
    files: &BTreeMap<String, Vec<u8>>,
    options: &HelmOptions,
    cluster: &ClusterValues,
    release_namespace: &str,
) -> FleetResult<Vec<DynamicObject>> {
    let chart_dir = resolve_chart_dir(files, options.chart.as_deref().unwrap_or(""));
    let chart = load_chart(files, chart_dir)?;

    // Refuse non-idempotent charts before rendering anything.
    for (path, source) in &chart.templates {
        if calls_lookup(source) {
            return Err(FleetError::Render(format!(
                "template {path} uses the lookup function; chart is not idempotent"
            )));
        }
    }

    let mut values = chart.values.clone();

    let root = if chart_dir.is_empty() || chart_dir == "." {
        String::new()
    } else {
        format!("{}/", chart_dir.trim_end_matches('/'))
    };
    for file in &options.values_files {
        let path = format!("{root}{file}");
        let raw = files.get(&path).ok_or_else(|| {
            FleetError::InvalidBundle(format!("valuesFiles references missing file {path}"))
        })?;
        let parsed: serde_yaml::Value = serde_yaml::from_slice(raw)?;
        if let serde_json::Value::Object(map) = serde_json::to_value(&parsed)? {
            deep_merge(&mut values, &map);
        }
    }

    if let Some(overrides) = &options.values {
        let overrides = if options.disable_pre_process {
            overrides.clone()
        } else {
            preprocess_values(overrides, cluster)?
        };
        deep_merge(&mut values, &overrides);
    }

    let release_name = options
        .release_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| chart.meta.name.clone());

    let ctx = TemplateContext {
        values: serde_json::Value::Object(values),
        release_name,
        release_namespace: release_namespace.to_string(),
        chart_name: chart.meta.name.clone(),
        chart_version: chart.meta.version.clone(),
    };

    let mut objects = Vec::new();
    for (path, source) in &chart.templates {
        let rendered = render_template(source, &ctx)
            .map_err(|e| FleetError::Render(format!("template {path}: {e}")))?;
        if rendered.trim().is_empty() {
            continue;
        }
        objects.extend(parse_objects(&rendered)?);
    }

    Ok(objects)
}

/// The `helm.chart` field names either a directory in the bundle or a
/// remote chart that the controller inlined at the root; prefer whichever
/// actually holds a Chart.yaml.
fn resolve_chart_dir<'a>(files: &BTreeMap<String, Vec<u8>>, configured: &'a str) -> &'a str {
    let trimmed = configured.trim_start_matches("./").trim_end_matches('/');
    if !trimmed.is_empty() && files.contains_key(&format!("{trimmed}/Chart.yaml")) {
        return configured;
    }
    if files.contains_key("Chart.yaml") {
        return "";
    }
    configured
}

/// Substitute `${ .ClusterName }`-style expressions in every string value.
fn preprocess_values(
    values: &serde_json::Map<String, serde_json::Value>,
    cluster: &ClusterValues,
) -> FleetResult<serde_json::Map<String, serde_json::Value>> {
    fn walk(value: &serde_json::Value, cluster: &ClusterValues) -> FleetResult<serde_json::Value> {
        Ok(match value {
            serde_json::Value::String(s) => {
                serde_json::Value::String(substitute_cluster_values(s, cluster)?)
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| walk(v, cluster))
                    .collect::<FleetResult<_>>()?,
            ),
            serde_json::Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), walk(v, cluster)?);
                }
                serde_json::Value::Object(out)
            }
            other => other.clone(),
        })
    }

    match walk(&serde_json::Value::Object(values.clone()), cluster)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(FleetError::Internal("values preprocessing changed shape".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use kube::ResourceExt;

    fn chart_files() -> BTreeMap<String, Vec<u8>> {
        [
            ("Chart.yaml", "name: web\nversion: 1.0.0\n"),
            ("values.yaml", "replicas: 1\ntag: stable\n"),
            (
                "templates/deployment.yaml",
                indoc! {"
                    apiVersion: apps/v1
                    kind: Deployment
                    metadata:
                      name: {{ .Release.Name }}
                    spec:
                      replicas: {{ .Values.replicas }}
                "},
            ),
            ("templates/_helpers.tpl", "{{ define \"web.name\" }}{{ end }}"),
            ("templates/NOTES.txt", "Thanks for installing {{ .Chart.Name }}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
        .collect()
    }

    #[test]
    fn renders_templates_with_merged_values() {
        let options = HelmOptions {
            release_name: Some("sleeper".into()),
            values: Some(serde_json::from_str(r#"{"replicas": 3}"#).expect("json")),
            ..Default::default()
        };

        let objects = render_chart(
            &chart_files(),
            &options,
            &ClusterValues::default(),
            "apps",
        )
        .expect("render");

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].name_any(), "sleeper");
        assert_eq!(objects[0].data["spec"]["replicas"], 3);
    }

    #[test]
    fn cluster_values_flow_into_helm_values() {
        let options = HelmOptions {
            values: Some(
                serde_json::from_str(r#"{"tag": "${ .ClusterLabels.env }"}"#).expect("json"),
            ),
            ..Default::default()
        };
        let cluster = ClusterValues {
            cluster_name: "c1".into(),
            cluster_labels: [("env".to_string(), "prod".to_string())].into_iter().collect(),
            ..Default::default()
        };

        let mut files = chart_files();
        files.insert(
            "templates/cm.yaml".to_string(),
            indoc! {"
                apiVersion: v1
                kind: ConfigMap
                metadata:
                  name: tags
                data:
                  tag: {{ .Values.tag }}
            "}
            .as_bytes()
            .to_vec(),
        );

        let objects = render_chart(&files, &options, &cluster, "apps").expect("render");
        let cm = objects
            .iter()
            .find(|o| o.types.as_ref().map(|t| t.kind == "ConfigMap").unwrap_or(false))
            .expect("configmap");
        assert_eq!(cm.data["data"]["tag"], "prod");
    }

    #[test]
    fn disable_pre_process_skips_substitution() {
        let options = HelmOptions {
            disable_pre_process: true,
            values: Some(
                serde_json::from_str(r#"{"tag": "${ .ClusterName }"}"#).expect("json"),
            ),
            ..Default::default()
        };

        // With preprocessing disabled the raw string must survive (it would
        // otherwise fail to resolve since this ClusterValues is empty-ish,
        // but mostly: it must not be substituted).
        let mut files = chart_files();
        files.insert(
            "templates/cm.yaml".to_string(),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: t\ndata:\n  tag: '{{ .Values.tag }}'\n"
                .as_bytes()
                .to_vec(),
        );
        let objects =
            render_chart(&files, &options, &ClusterValues::default(), "apps").expect("render");
        let cm = objects
            .iter()
            .find(|o| o.types.as_ref().map(|t| t.kind == "ConfigMap").unwrap_or(false))
            .expect("configmap");
        assert_eq!(cm.data["data"]["tag"], "${ .ClusterName }");
    }

    #[test]
    fn lookup_in_any_template_refuses_the_chart() {
        let mut files = chart_files();
        files.insert(
            "templates/sneaky.yaml".to_string(),
            "{{ lookup \"v1\" \"Secret\" \"ns\" \"name\" }}".as_bytes().to_vec(),
        );

        let err = render_chart(
            &files,
            &HelmOptions::default(),
            &ClusterValues::default(),
            "apps",
        )
        .expect_err("expected error");
        assert!(matches!(err, FleetError::Render(_)));
    }

    #[test]
    fn release_name_falls_back_to_the_chart_name() {
        let objects = render_chart(
            &chart_files(),
            &HelmOptions::default(),
            &ClusterValues::default(),
            "apps",
        )
        .expect("render");
        assert_eq!(objects[0].name_any(), "web");
    }
}
