use std::fmt::Write;
use thiserror::Error;

/// Formats an error and its entire source chain with each error on a new line
///
/// This produces output like:
/// ```text
/// Error message
///   Caused by: First cause
///   Caused by: Second cause
///   Caused by: Root cause
/// ```
pub fn format_error_chain(err: &dyn std::error::Error) -> String {
    let mut output = String::new();
    write!(&mut output, "{}", err).ok();

    let mut source = err.source();
    while let Some(err) = source {
        write!(&mut output, "\n  Caused by: {}", err).ok();
        source = err.source();
    }

    output
}

/// Formats an anyhow::Error with its full chain
pub fn format_anyhow_chain(err: &anyhow::Error) -> String {
    let mut output = String::new();

    let chain: Vec<_> = err.chain().collect();

    if let Some((first, rest)) = chain.split_first() {
        write!(&mut output, "{}", first).ok();
        for cause in rest {
            write!(&mut output, "\n  Caused by: {}", cause).ok();
        }
    }

    output
}

/// Central error type for both the controller and the agent
#[derive(Error, Debug)]
pub enum FleetError {
    /// Kubernetes-related errors
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Kubernetes resource not found: {0}")]
    KubernetesNotFound(String),

    /// Source acquisition errors
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credentials rejected by a Git/Helm/OCI endpoint. Carries only the
    /// endpoint, never the credential material.
    #[error("authentication failed for {0}")]
    Auth(String),

    #[error("no chart version found for constraint {constraint:?} in {repo}")]
    NoChartVersionFound { repo: String, constraint: String },

    #[error("invalid version constraint: {0}")]
    VersionConstraint(#[from] semver::Error),

    /// Bundle construction errors
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    /// Content blob failed hash verification; requires human action
    #[error("corrupt content {name}: expected sha256 {expected}, got {actual}")]
    CorruptContent {
        name: String,
        expected: String,
        actual: String,
    },

    /// Downstream rendering/apply errors
    #[error("render error: {0}")]
    Render(String),

    #[error("target namespace does not exist on downstream cluster")]
    TargetNamespaceMissing,

    #[error("namespace {0} does not match AllowedTargetNamespaceSelector")]
    TargetNamespaceMismatch(String),

    /// Serialization/Deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors with context
    #[error("Internal error: {0}")]
    Internal(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FleetError {
    /// True for errors a retry with backoff may resolve. Input and fatal
    /// errors are excluded so they surface on conditions instead of burning
    /// the work queue.
    pub fn is_transient(&self) -> bool {
        match self {
            FleetError::Kubernetes(_) | FleetError::Http(_) | FleetError::Io(_) => true,
            FleetError::Git(e) => !matches!(e.class(), git2::ErrorClass::Invalid),
            _ => false,
        }
    }
}

/// Convenience type alias for Results using FleetError
pub type FleetResult<T> = Result<T, FleetError>;

// Implement From for common error types that don't have automatic conversion
impl From<String> for FleetError {
    fn from(s: String) -> Self {
        FleetError::Internal(s)
    }
}

impl From<&str> for FleetError {
    fn from(s: &str) -> Self {
        FleetError::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_includes_causes_line_by_line() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        let err = FleetError::Io(inner);
        let formatted = format_error_chain(&err);
        assert!(formatted.starts_with("I/O error:"));
        assert!(formatted.contains("connection reset"));
    }

    #[test]
    fn auth_errors_are_not_transient() {
        assert!(!FleetError::Auth("https://git.example.com".into()).is_transient());
        assert!(!FleetError::CorruptContent {
            name: "s-abc".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        }
        .is_transient());
    }
}
