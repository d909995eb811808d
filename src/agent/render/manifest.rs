use kube::api::DynamicObject;

use crate::error::{FleetError, FleetResult};

/// Parse a multi-document YAML (or JSON) manifest into DynamicObjects.
/// Empty documents and comment-only documents are skipped; anything that
/// does not look like a Kubernetes object is an input error.
pub fn parse_objects(content: &str) -> FleetResult<Vec<DynamicObject>> {
    let mut objects = Vec::new();

    for document in serde_yaml::Deserializer::from_str(content) {
        let value: serde_yaml::Value = serde::Deserialize::deserialize(document)?;

        if matches!(value, serde_yaml::Value::Null) {
            continue;
        }

        let json = serde_json::to_value(&value)?;
        let obj: DynamicObject = serde_json::from_value(json).map_err(|e| {
            FleetError::InvalidBundle(format!(
                "document didn't look like a Kubernetes object (apiVersion/kind/metadata): {}",
                e
            ))
        })?;

        if obj.types.is_none() {
            return Err(FleetError::InvalidBundle(
                "document is missing apiVersion/kind".to_string(),
            ));
        }

        objects.push(obj);
    }

    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use kube::ResourceExt;

    #[test]
    fn parses_multi_document_yaml() {
        let manifest = indoc! {"
            apiVersion: apps/v1
            kind: Deployment
            metadata:
              name: sleeper
            ---
            # comment-only document
            ---
            apiVersion: v1
            kind: Service
            metadata:
              name: sleeper
        "};

        let objects = parse_objects(manifest).expect("parse");
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].name_any(), "sleeper");
        assert_eq!(
            objects[1].types.as_ref().map(|t| t.kind.as_str()),
            Some("Service")
        );
    }

    #[test]
    fn rejects_documents_without_type_meta() {
        let err = parse_objects("metadata:\n  name: x\n").expect_err("expected error");
        assert!(matches!(err, FleetError::InvalidBundle(_)));
    }
}
