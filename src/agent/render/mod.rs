pub mod helm;
pub mod kustomize;
pub mod manifest;
pub mod template;

pub use template::ClusterValues;

use kube::api::DynamicObject;
use std::collections::BTreeMap;

use crate::bundlereader::{apply_overlays, decode_resource};
use crate::crd::options::BundleDeploymentOptions;
use crate::crd::BundleResource;
use crate::error::{FleetError, FleetResult};

/// Default namespace when neither the objects nor the options name one.
const FALLBACK_NAMESPACE: &str = "default";

/// Render a bundle deployment's effective resource set into the objects to
/// apply: helm charts through the template pipeline, kustomize directories
/// through the build subset, plain manifests straight through.
pub fn render(
    resources: &[BundleResource],
    options: &BundleDeploymentOptions,
    cluster: &ClusterValues,
) -> FleetResult<Vec<DynamicObject>> {
    let effective = apply_overlays(resources, &options.overlays)?;

    let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for resource in &effective {
        files.insert(resource.name.clone(), decode_resource(resource)?);
    }

    let release_namespace = options
        .target_namespace
        .as_deref()
        .or(options.default_namespace.as_deref())
        .unwrap_or(FALLBACK_NAMESPACE);

    let mut objects = if let Some(kustomize) = options
        .kustomize
        .as_ref()
        .filter(|k| k.dir.is_some())
    {
        kustomize::render_kustomize(&files, kustomize.dir.as_deref().unwrap_or(""))?
    } else if files.contains_key(kustomize::KUSTOMIZATION_FILE) && options.helm.is_none() {
        kustomize::render_kustomize(&files, "")?
    } else if has_chart(&files, options) {
        let helm_options = options.helm.clone().unwrap_or_default();
        helm::render_chart(&files, &helm_options, cluster, release_namespace)?
    } else {
        let mut parsed = Vec::new();
        for (path, raw) in &files {
            if !is_manifest_path(path) {
                continue;
            }
            let content = std::str::from_utf8(raw).map_err(|_| {
                FleetError::InvalidBundle(format!("{path} is not valid UTF-8"))
            })?;
            parsed.extend(manifest::parse_objects(content)?);
        }
        parsed
    };

    assign_namespaces(&mut objects, options);
    Ok(objects)
}

fn has_chart(files: &BTreeMap<String, Vec<u8>>, options: &BundleDeploymentOptions) -> bool {
    if files.contains_key("Chart.yaml") {
        return true;
    }
    options
        .helm
        .as_ref()
        .and_then(|h| h.chart.as_deref())
        .map(|dir| {
            let root = dir.trim_start_matches("./").trim_end_matches('/');
            files.contains_key(&format!("{root}/Chart.yaml"))
        })
        .unwrap_or(false)
}

fn is_manifest_path(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml") || path.ends_with(".json")
}

/// Force `targetNamespace` onto every object; otherwise fill in
/// `defaultNamespace` where objects carry none of their own.
fn assign_namespaces(objects: &mut [DynamicObject], options: &BundleDeploymentOptions) {
    for obj in objects.iter_mut() {
        if let Some(target) = &options.target_namespace {
            obj.metadata.namespace = Some(target.clone());
        } else if obj.metadata.namespace.is_none() {
            obj.metadata.namespace = Some(
                options
                    .default_namespace
                    .clone()
                    .unwrap_or_else(|| FALLBACK_NAMESPACE.to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::options::{HelmOptions, KustomizeOptions};
    use indoc::indoc;
    use kube::ResourceExt;

    fn resource(name: &str, content: &str) -> BundleResource {
        BundleResource {
            name: name.to_string(),
            content: content.to_string(),
            encoding: String::new(),
        }
    }

    #[test]
    fn plain_manifests_pass_through_with_namespaces() {
        let resources = vec![resource(
            "deployment.yaml",
            indoc! {"
                apiVersion: apps/v1
                kind: Deployment
                metadata:
                  name: sleeper
            "},
        )];
        let options = BundleDeploymentOptions {
            default_namespace: Some("apps".into()),
            ..Default::default()
        };

        let objects = render(&resources, &options, &ClusterValues::default()).expect("render");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].metadata.namespace.as_deref(), Some("apps"));
    }

    #[test]
    fn target_namespace_overrides_object_namespaces() {
        let resources = vec![resource(
            "deployment.yaml",
            indoc! {"
                apiVersion: apps/v1
                kind: Deployment
                metadata:
                  name: sleeper
                  namespace: theirs
            "},
        )];
        let options = BundleDeploymentOptions {
            target_namespace: Some("forced".into()),
            ..Default::default()
        };

        let objects = render(&resources, &options, &ClusterValues::default()).expect("render");
        assert_eq!(objects[0].metadata.namespace.as_deref(), Some("forced"));
    }

    #[test]
    fn chart_at_the_root_renders_via_helm() {
        let resources = vec![
            resource("Chart.yaml", "name: web\nversion: 0.1.0\n"),
            resource("values.yaml", "replicas: 2\n"),
            resource(
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
        ];

        let objects = render(
            &resources,
            &BundleDeploymentOptions::default(),
            &ClusterValues::default(),
        )
        .expect("render");
        assert_eq!(objects[0].name_any(), "web");
        assert_eq!(objects[0].data["spec"]["replicas"], 2);
    }

    #[test]
    fn kustomize_dir_option_selects_the_build() {
        let resources = vec![
            resource(
                "deploy/kustomization.yaml",
                "resources:\n  - deployment.yaml\nnamespace: web\n",
            ),
            resource(
                "deploy/deployment.yaml",
                indoc! {"
                    apiVersion: apps/v1
                    kind: Deployment
                    metadata:
                      name: sleeper
                "},
            ),
        ];
        let options = BundleDeploymentOptions {
            kustomize: Some(KustomizeOptions {
                dir: Some("deploy".into()),
            }),
            ..Default::default()
        };

        let objects = render(&resources, &options, &ClusterValues::default()).expect("render");
        assert_eq!(objects[0].metadata.namespace.as_deref(), Some("web"));
    }

    #[test]
    fn overlays_change_what_renders() {
        let resources = vec![
            resource(
                "cm.yaml",
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: conf\ndata:\n  v: base\n",
            ),
            resource(
                "overlays/prod/cm.yaml",
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: conf\ndata:\n  v: prod\n",
            ),
        ];

        let base = render(
            &resources,
            &BundleDeploymentOptions::default(),
            &ClusterValues::default(),
        )
        .expect("render");
        assert_eq!(base[0].data["data"]["v"], "base");

        let options = BundleDeploymentOptions {
            overlays: vec!["prod".into()],
            ..Default::default()
        };
        let prod = render(&resources, &options, &ClusterValues::default()).expect("render");
        assert_eq!(prod[0].data["data"]["v"], "prod");
    }

    #[test]
    fn helm_chart_in_subdir_needs_the_chart_option() {
        let resources = vec![
            resource("chart/Chart.yaml", "name: web\nversion: 0.1.0\n"),
            resource(
                "chart/templates/cm.yaml",
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: c\n",
            ),
        ];
        let options = BundleDeploymentOptions {
            helm: Some(HelmOptions {
                chart: Some("chart".into()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let objects = render(&resources, &options, &ClusterValues::default()).expect("render");
        assert_eq!(objects.len(), 1);
    }
}
