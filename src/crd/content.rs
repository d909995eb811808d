use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// The content-addressed payload of a Bundle. Cluster-scoped, named
/// `s-<sha256>`, immutable once written; the finalizer list is the reference
/// count.
///
/// Unlike the other resources, Content carries its payload at the top level
/// rather than under `spec`, so the kube derive does not fit and `Resource`
/// is implemented by hand.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Content {
    #[serde(rename = "apiVersion", default = "api_version")]
    pub api_version_field: String,

    #[serde(rename = "kind", default = "kind")]
    pub kind_field: String,

    pub metadata: ObjectMeta,

    /// Gzipped JSON of the bundle's resource entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ByteString>,

    /// Untruncated hash of the uncompressed serialization, for verification
    /// against the (possibly truncated) object name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256sum: Option<String>,
}

fn api_version() -> String {
    format!("{}/{}", super::GROUP, super::VERSION)
}

fn kind() -> String {
    "Content".to_string()
}

impl Content {
    pub fn new(name: &str, content: Vec<u8>, sha256sum: &str) -> Self {
        Content {
            api_version_field: api_version(),
            kind_field: kind(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            content: Some(ByteString(content)),
            sha256sum: Some(sha256sum.to_string()),
        }
    }
}

impl kube::Resource for Content {
    type DynamicType = ();
    type Scope = k8s_openapi::ClusterResourceScope;

    fn kind(_: &()) -> Cow<'static, str> {
        "Content".into()
    }

    fn group(_: &()) -> Cow<'static, str> {
        super::GROUP.into()
    }

    fn version(_: &()) -> Cow<'static, str> {
        super::VERSION.into()
    }

    fn plural(_: &()) -> Cow<'static, str> {
        "contents".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_serializes_with_type_meta_and_base64_payload() {
        let content = Content::new("s-abc", vec![1, 2, 3], "abcdef");
        let json = serde_json::to_value(&content).expect("serialize");
        assert_eq!(json["apiVersion"], "fleet.cattle.io/v1alpha1");
        assert_eq!(json["kind"], "Content");
        assert_eq!(json["metadata"]["name"], "s-abc");
        assert_eq!(json["content"], "AQID");
        assert_eq!(json["sha256sum"], "abcdef");
    }

    #[test]
    fn content_roundtrips() {
        let content = Content::new("s-abc", b"payload".to_vec(), "ff");
        let json = serde_json::to_string(&content).expect("serialize");
        let back: Content = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.content.map(|b| b.0), Some(b"payload".to_vec()));
    }
}
