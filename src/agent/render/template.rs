use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{FleetError, FleetResult};

/// Per-cluster values available to helm values preprocessing as
/// `${ .ClusterName }`-style expressions.
#[derive(Clone, Debug, Default)]
pub struct ClusterValues {
    pub cluster_name: String,
    pub cluster_labels: BTreeMap<String, String>,
    pub cluster_annotations: BTreeMap<String, String>,
    pub cluster_values: serde_json::Map<String, Value>,
}

/// Substitute `${ ... }` expressions in a string. Unknown expressions are an
/// error rather than silently passing through, so typos surface on the
/// BundleDeployment instead of in the deployed objects.
pub fn substitute_cluster_values(input: &str, values: &ClusterValues) -> FleetResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            FleetError::Render("unterminated ${ ... } expression in values".to_string())
        })?;

        let expr = after[..end].trim();
        out.push_str(&resolve_cluster_expression(expr, values)?);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn resolve_cluster_expression(expr: &str, values: &ClusterValues) -> FleetResult<String> {
    if expr == ".ClusterName" {
        return Ok(values.cluster_name.clone());
    }
    if let Some(key) = expr.strip_prefix(".ClusterLabels.") {
        return Ok(values.cluster_labels.get(key).cloned().unwrap_or_default());
    }
    if let Some(key) = expr.strip_prefix(".ClusterAnnotations.") {
        return Ok(values
            .cluster_annotations
            .get(key)
            .cloned()
            .unwrap_or_default());
    }
    if let Some(path) = expr.strip_prefix(".ClusterValues.") {
        let mut current = Value::Object(values.cluster_values.clone());
        for segment in path.split('.') {
            current = current
                .get(segment)
                .cloned()
                .unwrap_or(Value::Null);
        }
        return Ok(scalar_to_string(&current));
    }

    Err(FleetError::Render(format!(
        "unknown template expression ${{ {expr} }}"
    )))
}

/// Context a chart template renders against.
#[derive(Clone, Debug, Default)]
pub struct TemplateContext {
    pub values: Value,
    pub release_name: String,
    pub release_namespace: String,
    pub chart_name: String,
    pub chart_version: String,
}

/// True when any template action calls `lookup` in function position.
/// `lookup` performs live API reads during render, which breaks render
/// idempotency, so such charts are refused before rendering.
pub fn calls_lookup(template: &str) -> bool {
    for action in actions(template) {
        for stage in action.split('|') {
            let stage = stage.trim().trim_start_matches('(').trim();
            if stage == "lookup" || stage.starts_with("lookup ") {
                return true;
            }
        }
    }
    false
}

fn actions(template: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        let action = after[..end].trim_start_matches('-').trim_end_matches('-');
        out.push(action.trim().to_string());
        rest = &after[end + 2..];
    }
    out
}

/// Render a chart template against the context.
///
/// This supports the template subset fleet bundles actually use: field
/// chains rooted at `.Values`, `.Release` and `.Chart`, string literals,
/// and the `default`, `quote`, `upper`, `lower`, `trim`, `indent`,
/// `nindent` and `toYaml` pipeline functions. Control-flow constructs are
/// rejected with an error naming the construct.
pub fn render_template(template: &str, ctx: &TemplateContext) -> FleetResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let mut literal = &rest[..start];
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| FleetError::Render("unterminated {{ action".to_string()))?;
        let mut action = &after[..end];

        // Whitespace control markers.
        if let Some(trimmed) = action.strip_prefix('-') {
            action = trimmed;
            literal = literal.trim_end();
        }
        out.push_str(literal);

        let mut trim_after = false;
        if let Some(trimmed) = action.strip_suffix('-') {
            action = trimmed;
            trim_after = true;
        }
        let action = action.trim();

        rest = &after[end + 2..];
        if trim_after {
            rest = rest.trim_start();
        }

        if action.starts_with("/*") {
            continue;
        }

        out.push_str(&eval_pipeline(action, ctx)?);
    }

    out.push_str(rest);
    Ok(out)
}

fn eval_pipeline(action: &str, ctx: &TemplateContext) -> FleetResult<String> {
    let stages: Vec<&str> = action.split('|').map(str::trim).collect();
    let Some((first, functions)) = stages.split_first() else {
        return Ok(String::new());
    };

    if let Some(keyword) = first.split_whitespace().next() {
        if matches!(
            keyword,
            "if" | "else" | "end" | "range" | "with" | "define" | "include" | "template" | "block"
        ) {
            return Err(FleetError::Render(format!(
                "unsupported template construct {keyword:?}"
            )));
        }
        if keyword == "lookup" {
            return Err(FleetError::Render(
                "chart uses the lookup function and is not idempotent".to_string(),
            ));
        }
    }

    let mut value = eval_expression(first, ctx)?;

    for function in functions {
        value = eval_function(function, value, ctx)?;
    }

    Ok(scalar_to_string(&value))
}

fn eval_expression(expr: &str, ctx: &TemplateContext) -> FleetResult<Value> {
    let expr = expr.trim();

    if expr.starts_with('"') && expr.ends_with('"') && expr.len() >= 2 {
        return Ok(Value::String(expr[1..expr.len() - 1].to_string()));
    }

    if let Ok(n) = expr.parse::<i64>() {
        return Ok(Value::Number(n.into()));
    }

    match expr {
        ".Release.Name" => return Ok(Value::String(ctx.release_name.clone())),
        ".Release.Namespace" => return Ok(Value::String(ctx.release_namespace.clone())),
        ".Chart.Name" => return Ok(Value::String(ctx.chart_name.clone())),
        ".Chart.Version" => return Ok(Value::String(ctx.chart_version.clone())),
        _ => {}
    }

    if let Some(path) = expr.strip_prefix(".Values") {
        let mut current = ctx.values.clone();
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = current.get(segment).cloned().unwrap_or(Value::Null);
        }
        return Ok(current);
    }

    Err(FleetError::Render(format!(
        "unsupported template expression {expr:?}"
    )))
}

fn eval_function(call: &str, piped: Value, ctx: &TemplateContext) -> FleetResult<Value> {
    let mut parts = call.split_whitespace();
    let name = parts
        .next()
        .ok_or_else(|| FleetError::Render("empty pipeline stage".to_string()))?;
    let args: Vec<&str> = parts.collect();

    match name {
        "default" => {
            let fallback = args
                .first()
                .ok_or_else(|| FleetError::Render("default requires an argument".to_string()))?;
            let is_empty = match &piped {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                Value::Number(n) => n.as_f64() == Some(0.0),
                Value::Bool(b) => !b,
                Value::Array(a) => a.is_empty(),
                Value::Object(o) => o.is_empty(),
            };
            if is_empty {
                eval_expression(fallback, ctx)
            } else {
                Ok(piped)
            }
        }
        "quote" => Ok(Value::String(format!("\"{}\"", scalar_to_string(&piped)))),
        "upper" => Ok(Value::String(scalar_to_string(&piped).to_uppercase())),
        "lower" => Ok(Value::String(scalar_to_string(&piped).to_lowercase())),
        "trim" => Ok(Value::String(scalar_to_string(&piped).trim().to_string())),
        "indent" | "nindent" => {
            let width: usize = args
                .first()
                .and_then(|a| a.parse().ok())
                .ok_or_else(|| FleetError::Render(format!("{name} requires a width")))?;
            let pad = " ".repeat(width);
            let indented = scalar_to_string(&piped)
                .lines()
                .map(|l| format!("{pad}{l}"))
                .collect::<Vec<_>>()
                .join("\n");
            if name == "nindent" {
                Ok(Value::String(format!("\n{indented}")))
            } else {
                Ok(Value::String(indented))
            }
        }
        "toYaml" => {
            let yaml = serde_yaml::to_string(&piped)
                .map_err(|e| FleetError::Render(format!("toYaml failed: {e}")))?;
            Ok(Value::String(yaml.trim_end().to_string()))
        }
        "lookup" => Err(FleetError::Render(
            "chart uses the lookup function and is not idempotent".to_string(),
        )),
        other => Err(FleetError::Render(format!(
            "unsupported template function {other:?}"
        ))),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn cluster_values() -> ClusterValues {
        ClusterValues {
            cluster_name: "downstream-1".into(),
            cluster_labels: [("env".to_string(), "prod".to_string())].into_iter().collect(),
            cluster_annotations: BTreeMap::new(),
            cluster_values: serde_json::from_str(r#"{"region": {"name": "us-east"}}"#)
                .expect("json"),
        }
    }

    #[test]
    fn cluster_expressions_substitute() {
        let values = cluster_values();
        assert_eq!(
            substitute_cluster_values("name-${ .ClusterName }", &values).expect("subst"),
            "name-downstream-1"
        );
        assert_eq!(
            substitute_cluster_values("${ .ClusterLabels.env }", &values).expect("subst"),
            "prod"
        );
        assert_eq!(
            substitute_cluster_values("${ .ClusterValues.region.name }", &values).expect("subst"),
            "us-east"
        );
        assert!(substitute_cluster_values("${ .Bogus }", &values).is_err());
    }

    fn ctx() -> TemplateContext {
        TemplateContext {
            values: serde_json::json!({
                "replicas": 3,
                "image": {"tag": ""},
                "labels": {"app": "web"},
            }),
            release_name: "frontend".into(),
            release_namespace: "apps".into(),
            chart_name: "web".into(),
            chart_version: "1.0.0".into(),
        }
    }

    #[test]
    fn renders_field_chains_and_pipelines() {
        let template = indoc! {r#"
            name: {{ .Release.Name }}
            replicas: {{ .Values.replicas }}
            tag: {{ .Values.image.tag | default "latest" | quote }}
            chart: {{ .Chart.Name | upper }}
        "#};

        let rendered = render_template(template, &ctx()).expect("render");
        assert!(rendered.contains("name: frontend"));
        assert!(rendered.contains("replicas: 3"));
        assert!(rendered.contains("tag: \"latest\""));
        assert!(rendered.contains("chart: WEB"));
    }

    #[test]
    fn to_yaml_and_nindent_compose() {
        let template = "labels:{{ .Values.labels | toYaml | nindent 2 }}";
        let rendered = render_template(template, &ctx()).expect("render");
        assert_eq!(rendered, "labels:\n  app: web");
    }

    #[test]
    fn control_flow_is_rejected_by_name() {
        let err = render_template("{{ if .Values.replicas }}x{{ end }}", &ctx()).expect_err("expected error");
        match err {
            FleetError::Render(msg) => assert!(msg.contains("\"if\"")),
            other => panic!("expected render error, got {other}"),
        }
    }

    #[test]
    fn comments_render_to_nothing() {
        let rendered =
            render_template("a{{- /* note */ -}}b", &ctx()).expect("render");
        assert_eq!(rendered, "ab");
    }

    #[test]
    fn lookup_is_detected_in_function_position() {
        assert!(calls_lookup(r#"{{ lookup "v1" "Secret" "ns" "name" }}"#));
        assert!(calls_lookup(r#"{{ (lookup "v1" "ConfigMap" "" "").data }}"#));
        assert!(calls_lookup(r#"{{ .Values.x | lookup }}"#));
        // The word in a string literal is not a call.
        assert!(!calls_lookup(r#"{{ "lookup tables" }}"#));
        assert!(!calls_lookup("plain text lookup"));
    }
}
