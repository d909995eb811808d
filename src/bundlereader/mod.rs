pub mod fleet_yaml;
pub mod read;

pub use fleet_yaml::{FleetYaml, FLEET_YAML};
pub use read::{read_bundle, ReadOptions};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::crd::BundleResource;
use crate::error::{FleetError, FleetResult};

/// Directory prefix under which overlay file sets live in a bundle.
pub const OVERLAYS_PREFIX: &str = "overlays/";

/// Decode one resource entry to raw bytes according to its encoding tag.
pub fn decode_resource(resource: &BundleResource) -> FleetResult<Vec<u8>> {
    match resource.encoding.as_str() {
        "" => Ok(resource.content.clone().into_bytes()),
        "base64" => BASE64
            .decode(&resource.content)
            .map_err(|e| FleetError::InvalidBundle(format!("bad base64 in {}: {e}", resource.name))),
        "base64+gz" => {
            let compressed = BASE64.decode(&resource.content).map_err(|e| {
                FleetError::InvalidBundle(format!("bad base64 in {}: {e}", resource.name))
            })?;
            crate::content::gunzip(&compressed)
        }
        other => Err(FleetError::InvalidBundle(format!(
            "unknown encoding {other:?} in {}",
            resource.name
        ))),
    }
}

/// Compute the effective resource set for a cluster: the base files (the
/// ones outside `overlays/`) with each named overlay merged on top, in list
/// order so later overlays override earlier ones. Nested directories inside
/// an overlay keep their relative paths.
pub fn apply_overlays(
    resources: &[BundleResource],
    overlays: &[String],
) -> FleetResult<Vec<BundleResource>> {
    let mut merged: Vec<BundleResource> = resources
        .iter()
        .filter(|r| !r.name.starts_with(OVERLAYS_PREFIX))
        .cloned()
        .collect();

    for overlay in overlays {
        let prefix = format!("{OVERLAYS_PREFIX}{overlay}/");
        let mut found = false;

        for resource in resources.iter().filter(|r| r.name.starts_with(&prefix)) {
            found = true;
            let relative = &resource.name[prefix.len()..];
            let replacement = BundleResource {
                name: relative.to_string(),
                content: resource.content.clone(),
                encoding: resource.encoding.clone(),
            };

            match merged.iter_mut().find(|r| r.name == relative) {
                Some(existing) => *existing = replacement,
                None => merged.push(replacement),
            }
        }

        if !found {
            return Err(FleetError::InvalidBundle(format!(
                "overlay {overlay:?} not found in bundle"
            )));
        }
    }

    merged.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str, content: &str) -> BundleResource {
        BundleResource {
            name: name.to_string(),
            content: content.to_string(),
            encoding: String::new(),
        }
    }

    #[test]
    fn overlays_replace_and_add_files_in_order() {
        let resources = vec![
            resource("deployment.yaml", "base"),
            resource("service.yaml", "svc"),
            resource("overlays/prod/deployment.yaml", "prod"),
            resource("overlays/prod/extra.yaml", "extra"),
            resource("overlays/canary/deployment.yaml", "canary"),
        ];

        let base = apply_overlays(&resources, &[]).expect("no overlays");
        assert_eq!(base.len(), 2);

        let prod = apply_overlays(&resources, &["prod".to_string()]).expect("prod");
        assert_eq!(prod.len(), 3);
        let dep = prod.iter().find(|r| r.name == "deployment.yaml").expect("dep");
        assert_eq!(dep.content, "prod");

        // Later overlays override earlier ones.
        let both =
            apply_overlays(&resources, &["prod".to_string(), "canary".to_string()]).expect("both");
        let dep = both.iter().find(|r| r.name == "deployment.yaml").expect("dep");
        assert_eq!(dep.content, "canary");
        assert!(both.iter().any(|r| r.name == "extra.yaml"));
    }

    #[test]
    fn unknown_overlay_is_an_input_error() {
        let resources = vec![resource("deployment.yaml", "base")];
        let err = apply_overlays(&resources, &["missing".to_string()]).expect_err("expected error");
        assert!(matches!(err, FleetError::InvalidBundle(_)));
    }

    #[test]
    fn decode_handles_all_encodings() {
        let plain = resource("a.yaml", "hello");
        assert_eq!(decode_resource(&plain).expect("plain"), b"hello");

        let b64 = BundleResource {
            name: "b.bin".into(),
            content: "aGVsbG8=".into(),
            encoding: "base64".into(),
        };
        assert_eq!(decode_resource(&b64).expect("base64"), b"hello");

        let gz = crate::content::gzip(b"hello").expect("gzip");
        let gzb64 = BundleResource {
            name: "c.yaml".into(),
            content: base64::engine::general_purpose::STANDARD.encode(gz),
            encoding: "base64+gz".into(),
        };
        assert_eq!(decode_resource(&gzb64).expect("base64+gz"), b"hello");

        let bad = BundleResource {
            name: "d".into(),
            content: String::new(),
            encoding: "zip".into(),
        };
        assert!(decode_resource(&bad).is_err());
    }
}
