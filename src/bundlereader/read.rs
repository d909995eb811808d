use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::fleet_yaml::{FleetYaml, FLEET_YAML};
use crate::crd::bundle::{Bundle, BundleResource, BundleSpec, BundleTarget};
use crate::crd::options::BundleDeploymentOptions;
use crate::error::{FleetError, FleetResult};

/// Bundle specs above this uncompressed size are re-read with compression
/// forced on, to keep objects within what the API server tolerates.
const MAX_BUNDLE_SPEC_SIZE: usize = 1024 * 1024;

#[derive(Clone, Debug, Default)]
pub struct ReadOptions {
    /// Gzip each file's content (`base64+gz` encoding)
    pub compress: bool,

    /// Namespace forced onto all delivered resources
    pub target_namespace: Option<String>,

    /// Start the bundle paused
    pub paused: bool,

    /// Labels stamped onto the produced bundle
    pub labels: BTreeMap<String, String>,
}

/// Read a source tree into a Bundle. Deterministic: two reads of the same
/// tree produce byte-identical resource lists regardless of directory
/// iteration order.
pub fn read_bundle(name: &str, base_dir: &Path, opts: &ReadOptions) -> FleetResult<Bundle> {
    let fleet_yaml = load_fleet_yaml(base_dir)?;
    let resources = read_resources(base_dir, &fleet_yaml, opts.compress)?;

    let mut targets = fleet_yaml.target_customizations.clone();
    assign_target_names(&mut targets);

    let options = BundleDeploymentOptions {
        default_namespace: fleet_yaml.default_namespace.clone(),
        target_namespace: opts
            .target_namespace
            .clone()
            .or_else(|| fleet_yaml.namespace.clone()),
        helm: fleet_yaml.helm.clone(),
        kustomize: fleet_yaml.kustomize.clone(),
        diff: fleet_yaml.diff.clone(),
        ..Default::default()
    };

    let spec = BundleSpec {
        resources,
        targets,
        depends_on: fleet_yaml.depends_on.clone(),
        rollout_strategy: fleet_yaml.rollout_strategy.clone(),
        paused: opts.paused || fleet_yaml.paused,
        options,
        ..Default::default()
    };

    // Oversized specs get one retry with compression forced on.
    if !opts.compress && serde_json::to_vec(&spec)?.len() > MAX_BUNDLE_SPEC_SIZE {
        log::info!(
            "bundle {} exceeds {} bytes uncompressed, re-reading compressed",
            name,
            MAX_BUNDLE_SPEC_SIZE
        );
        let mut compressed_opts = opts.clone();
        compressed_opts.compress = true;
        return read_bundle(name, base_dir, &compressed_opts);
    }

    let bundle_name = normalize_name(
        fleet_yaml.name.as_deref().unwrap_or(name),
    );
    let mut bundle = Bundle::new(&bundle_name, spec);

    let mut labels = opts.labels.clone();
    if let Some(extra) = &fleet_yaml.labels {
        labels.extend(extra.clone());
    }
    if !labels.is_empty() {
        bundle.metadata.labels = Some(labels);
    }

    Ok(bundle)
}

fn load_fleet_yaml(base_dir: &Path) -> FleetResult<FleetYaml> {
    let path = base_dir.join(FLEET_YAML);
    if !path.exists() {
        return Ok(FleetYaml::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(serde_yaml::from_str(&raw)?)
}

/// Walk the tree and build the sorted resource list.
fn read_resources(
    base_dir: &Path,
    fleet_yaml: &FleetYaml,
    compress: bool,
) -> FleetResult<Vec<BundleResource>> {
    let include = compile_globs(&fleet_yaml.include)?;
    let exclude = compile_globs(&fleet_yaml.exclude)?;

    let mut paths = Vec::new();
    collect_files(base_dir, base_dir, &mut paths)?;
    paths.sort();

    let mut resources = Vec::with_capacity(paths.len());
    for relative in paths {
        let name = relative.to_string_lossy().replace('\\', "/");

        if name == FLEET_YAML {
            continue;
        }
        if !include.is_empty() && !include.iter().any(|p| p.matches(&name)) {
            continue;
        }
        if exclude.iter().any(|p| p.matches(&name)) {
            continue;
        }

        let bytes = std::fs::read(base_dir.join(&relative))?;
        resources.push(encode_resource(&name, &bytes, compress)?);
    }

    Ok(resources)
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> FleetResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();

        // Hidden files and VCS internals never enter a bundle.
        if file_name.starts_with('.') {
            continue;
        }

        if path.is_dir() {
            collect_files(base, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(base)
                .map_err(|e| FleetError::Internal(format!("path outside bundle root: {e}")))?;
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}

fn compile_globs(globs: &[String]) -> FleetResult<Vec<glob::Pattern>> {
    globs
        .iter()
        .map(|g| {
            glob::Pattern::new(g)
                .map_err(|e| FleetError::InvalidBundle(format!("invalid glob {g:?}: {e}")))
        })
        .collect()
}

pub(crate) fn encode_resource(name: &str, bytes: &[u8], compress: bool) -> FleetResult<BundleResource> {
    if compress {
        let compressed = crate::content::gzip(bytes)?;
        return Ok(BundleResource {
            name: name.to_string(),
            content: BASE64.encode(compressed),
            encoding: "base64+gz".to_string(),
        });
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(BundleResource {
            name: name.to_string(),
            content: text.to_string(),
            encoding: String::new(),
        }),
        Err(_) => Ok(BundleResource {
            name: name.to_string(),
            content: BASE64.encode(bytes),
            encoding: "base64".to_string(),
        }),
    }
}

/// Name any unnamed targets `target000`, `target001`, … in declaration
/// order, so repeated reads produce stable diffs.
pub fn assign_target_names(targets: &mut [BundleTarget]) {
    for (i, target) in targets.iter_mut().enumerate() {
        if target.name.as_deref().unwrap_or("").is_empty() {
            target.name = Some(format!("target{:03}", i));
        }
    }
}

/// The canonical serialization the content hash is computed over: the
/// resource list sorted by name, as compact JSON.
pub fn canonical_resources_json(resources: &[BundleResource]) -> FleetResult<Vec<u8>> {
    let mut sorted: Vec<&BundleResource> = resources.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(serde_json::to_vec(&sorted)?)
}

/// SHA-256 over the canonical serialization; names the Content blob.
pub fn resources_sha256(resources: &[BundleResource]) -> FleetResult<String> {
    Ok(crate::content::sha256_hex(&canonical_resources_json(
        resources,
    )?))
}

/// Kubernetes object names are lowercase RFC 1123: map everything else to
/// dashes and cap the length.
pub fn normalize_name(name: &str) -> String {
    let mut out: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    out = out.trim_matches('-').to_string();
    if out.is_empty() {
        out = "bundle".to_string();
    }
    out.truncate(53);
    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }

    #[test]
    fn two_reads_produce_identical_hashes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "b.yaml", "kind: Service\n");
        write(dir.path(), "a.yaml", "kind: Deployment\n");
        write(dir.path(), "overlays/prod/a.yaml", "kind: Deployment\nreplicas: 3\n");

        let opts = ReadOptions::default();
        let first = read_bundle("app", dir.path(), &opts).expect("read");
        let second = read_bundle("app", dir.path(), &opts).expect("read");

        let sha1 = resources_sha256(&first.spec.resources).expect("sha");
        let sha2 = resources_sha256(&second.spec.resources).expect("sha");
        assert_eq!(sha1, sha2);
        assert_eq!(
            canonical_resources_json(&first.spec.resources).expect("json"),
            canonical_resources_json(&second.spec.resources).expect("json"),
        );

        // Sorted by path, fleet.yaml excluded, overlays included.
        let names: Vec<&str> = first.spec.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a.yaml", "b.yaml", "overlays/prod/a.yaml"]);
    }

    #[test]
    fn fleet_yaml_shapes_the_bundle() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "fleet.yaml",
            indoc! {"
                namespace: web
                defaultNamespace: apps
                targetCustomizations:
                  - clusterName: c1
                  - name: named
                    clusterName: c2
            "},
        );
        write(dir.path(), "deployment.yaml", "kind: Deployment\n");

        let bundle =
            read_bundle("app", dir.path(), &ReadOptions::default()).expect("read");
        assert_eq!(bundle.spec.options.target_namespace.as_deref(), Some("web"));
        assert_eq!(bundle.spec.options.default_namespace.as_deref(), Some("apps"));
        // fleet.yaml itself never becomes a resource.
        assert_eq!(bundle.spec.resources.len(), 1);
        // Unnamed targets get generated, stable names.
        assert_eq!(bundle.spec.targets[0].name.as_deref(), Some("target000"));
        assert_eq!(bundle.spec.targets[1].name.as_deref(), Some("named"));
    }

    #[test]
    fn include_exclude_globs_filter_the_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "fleet.yaml",
            indoc! {"
                include:
                  - '*.yaml'
                exclude:
                  - 'secret.yaml'
            "},
        );
        write(dir.path(), "app.yaml", "kind: Deployment\n");
        write(dir.path(), "secret.yaml", "kind: Secret\n");
        write(dir.path(), "README.md", "docs\n");

        let bundle =
            read_bundle("app", dir.path(), &ReadOptions::default()).expect("read");
        let names: Vec<&str> = bundle.spec.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["app.yaml"]);
    }

    #[test]
    fn compression_changes_encoding_not_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "app.yaml", "kind: Deployment\n");

        let plain = read_bundle("app", dir.path(), &ReadOptions::default()).expect("read");
        let compressed = read_bundle(
            "app",
            dir.path(),
            &ReadOptions {
                compress: true,
                ..Default::default()
            },
        )
        .expect("read");

        assert_eq!(plain.spec.resources[0].encoding, "");
        assert_eq!(compressed.spec.resources[0].encoding, "base64+gz");
        assert_eq!(
            crate::bundlereader::decode_resource(&plain.spec.resources[0]).expect("decode"),
            crate::bundlereader::decode_resource(&compressed.spec.resources[0]).expect("decode"),
        );
    }

    #[test]
    fn names_are_normalized_for_the_api() {
        assert_eq!(normalize_name("My App/Path"), "my-app-path");
        assert_eq!(normalize_name("--weird--"), "weird");
        assert_eq!(normalize_name("***"), "bundle");
    }
}
