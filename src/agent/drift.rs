use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use std::collections::HashMap;

use crate::crd::options::{ComparePatch, DiffOptions};
use crate::crd::summary::ModifiedStatus;

/// Metadata paths the API server owns; always masked before comparison.
const SERVER_OWNED_POINTERS: [&str; 6] = [
    "/metadata/resourceVersion",
    "/metadata/uid",
    "/metadata/generation",
    "/metadata/creationTimestamp",
    "/metadata/managedFields",
    "/status",
];

/// Identity of a downstream object for matching applied against live.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn of(obj: &DynamicObject) -> ObjectKey {
        ObjectKey {
            api_version: obj
                .types
                .as_ref()
                .map(|t| t.api_version.clone())
                .unwrap_or_default(),
            kind: obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }
}

/// Compare every applied object against its live counterpart and report the
/// divergences. A missing live object is drift with `missing=true`; live
/// objects owned by the deployment but absent from the applied set are
/// reported by the caller as `delete=true` entries.
pub fn detect_drift(
    applied: &[DynamicObject],
    live: &HashMap<ObjectKey, DynamicObject>,
    diff: Option<&DiffOptions>,
) -> Vec<ModifiedStatus> {
    let empty = Vec::new();
    let patches = diff.map(|d| &d.compare_patches).unwrap_or(&empty);
    let mut modified = Vec::new();

    for obj in applied {
        let key = ObjectKey::of(obj);

        match live.get(&key) {
            None => modified.push(ModifiedStatus {
                api_version: Some(key.api_version),
                kind: Some(key.kind),
                namespace: Some(key.namespace),
                name: Some(key.name),
                missing: true,
                ..Default::default()
            }),
            Some(live_obj) => {
                if let Some(status) = compare_object(obj, live_obj, patches) {
                    modified.push(status);
                }
            }
        }
    }

    modified
}

/// Compare one object pair after masking; `None` means no drift.
pub fn compare_object(
    applied: &DynamicObject,
    live: &DynamicObject,
    patches: &[ComparePatch],
) -> Option<ModifiedStatus> {
    let key = ObjectKey::of(applied);

    let mut applied_json = to_json(applied);
    let mut live_json = to_json(live);

    for pointer in SERVER_OWNED_POINTERS {
        remove_pointer(&mut applied_json, pointer);
        remove_pointer(&mut live_json, pointer);
    }

    for patch in patches.iter().filter(|p| patch_matches(p, &key)) {
        for pointer in &patch.json_pointers {
            remove_pointer(&mut applied_json, pointer);
            remove_pointer(&mut live_json, pointer);
        }
        for operation in &patch.operations {
            if operation.op == "remove" || operation.op == "ignore" {
                remove_pointer(&mut applied_json, &operation.path);
                remove_pointer(&mut live_json, &operation.path);
            }
        }
    }

    let mut diffs = Vec::new();
    subset_diff(&applied_json, &live_json, "", &mut diffs);

    if diffs.is_empty() {
        return None;
    }

    Some(ModifiedStatus {
        api_version: Some(key.api_version),
        kind: Some(key.kind),
        namespace: Some(key.namespace),
        name: Some(key.name),
        patch: serde_json::to_string(&diffs).ok(),
        ..Default::default()
    })
}

fn patch_matches(patch: &ComparePatch, key: &ObjectKey) -> bool {
    patch
        .api_version
        .as_deref()
        .map(|v| v == key.api_version)
        .unwrap_or(true)
        && patch.kind.as_deref().map(|k| k == key.kind).unwrap_or(true)
        && patch
            .namespace
            .as_deref()
            .map(|n| n == key.namespace)
            .unwrap_or(true)
        && patch.name.as_deref().map(|n| n == key.name).unwrap_or(true)
}

fn to_json(obj: &DynamicObject) -> Value {
    serde_json::to_value(obj).unwrap_or(Value::Null)
}

/// Remove the value a JSON pointer names, if present.
fn remove_pointer(value: &mut Value, pointer: &str) {
    let Some((parent_path, leaf)) = pointer.rsplit_once('/') else {
        return;
    };

    let parent = if parent_path.is_empty() {
        Some(value)
    } else {
        value.pointer_mut(parent_path)
    };

    match parent {
        Some(Value::Object(map)) => {
            map.remove(leaf);
        }
        Some(Value::Array(items)) => {
            if let Ok(index) = leaf.parse::<usize>() {
                if index < items.len() {
                    items.remove(index);
                }
            }
        }
        _ => {}
    }
}

/// Record every path where `applied` disagrees with `live`. Fields present
/// only in `live` are server defaults and do not count as drift; fields
/// present in `applied` must match.
fn subset_diff(applied: &Value, live: &Value, path: &str, diffs: &mut Vec<String>) {
    match (applied, live) {
        (Value::Object(applied_map), Value::Object(live_map)) => {
            for (key, applied_value) in applied_map {
                let child_path = format!("{path}/{key}");
                match live_map.get(key) {
                    Some(live_value) => subset_diff(applied_value, live_value, &child_path, diffs),
                    None => diffs.push(child_path),
                }
            }
        }
        (Value::Array(applied_items), Value::Array(live_items)) => {
            // Entries appended beyond the applied list are tolerated like
            // extra object keys; dropped entries are drift.
            if live_items.len() < applied_items.len() {
                diffs.push(path.to_string());
                return;
            }
            for (index, (a, l)) in applied_items.iter().zip(live_items).enumerate() {
                subset_diff(a, l, &format!("{path}/{index}"), diffs);
            }
        }
        (a, l) => {
            if a != l {
                diffs.push(path.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn object(yaml: &str) -> DynamicObject {
        crate::agent::render::manifest::parse_objects(yaml)
            .expect("parse")
            .remove(0)
    }

    fn service(ports: &str, selector: &str) -> DynamicObject {
        object(&format!(
            indoc! {"
                apiVersion: v1
                kind: Service
                metadata:
                  name: web
                  namespace: apps
                spec:
                  ports:
                {}
                  selector:
                    app: {}
            "},
            ports, selector
        ))
    }

    #[test]
    fn identical_objects_do_not_drift() {
        let applied = service("    - port: 80", "web");
        let live = service("    - port: 80", "web");
        assert!(compare_object(&applied, &live, &[]).is_none());
    }

    #[test]
    fn server_defaults_are_not_drift() {
        let applied = service("    - port: 80", "web");
        let mut live = service("    - port: 80", "web");
        live.data["spec"]["clusterIP"] = "10.0.0.1".into();
        live.data["status"] = serde_json::json!({"loadBalancer": {}});
        assert!(compare_object(&applied, &live, &[]).is_none());
    }

    #[test]
    fn masked_paths_are_ignored_but_others_flag() {
        let patches = vec![ComparePatch {
            kind: Some("Service".into()),
            json_pointers: vec!["/spec/ports/0".into()],
            ..Default::default()
        }];

        // A foreign change inside the masked pointer: no drift.
        let applied = service("    - port: 80", "web");
        let live = service("    - port: 8080", "web");
        assert!(compare_object(&applied, &live, &patches).is_none());

        // An added port leaves the applied entries intact: no drift.
        let live = service("    - port: 8080\n    - port: 9090", "web");
        assert!(compare_object(&applied, &live, &patches).is_none());

        // A change outside the mask still flags.
        let live = service("    - port: 80", "hijacked");
        let status = compare_object(&applied, &live, &patches).expect("drift");
        let patch = status.patch.expect("patch");
        assert!(patch.contains("/spec/selector/app"));
    }

    #[test]
    fn removed_list_entries_are_drift() {
        let applied = service("    - port: 80\n    - port: 443", "web");
        let live = service("    - port: 80", "web");
        let status = compare_object(&applied, &live, &[]).expect("drift");
        assert!(status.patch.expect("patch").contains("/spec/ports"));
    }

    #[test]
    fn missing_live_objects_are_drift() {
        let applied = vec![service("    - port: 80", "web")];
        let drift = detect_drift(&applied, &HashMap::new(), None);
        assert_eq!(drift.len(), 1);
        assert!(drift[0].missing);
    }

    #[test]
    fn compare_patch_coordinates_scope_the_mask() {
        let patches = vec![ComparePatch {
            kind: Some("ConfigMap".into()),
            json_pointers: vec!["/spec/selector".into()],
            ..Default::default()
        }];

        // The mask targets ConfigMaps, so the Service change still flags.
        let applied = service("    - port: 80", "web");
        let live = service("    - port: 80", "other");
        assert!(compare_object(&applied, &live, &patches).is_some());
    }
}
