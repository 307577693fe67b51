//! Typed error hierarchy for the shiptag reconciler.
//!
//! Four top-level enums cover the four subsystems:
//! - `ApiError` — App Store Connect client failures (transport, remote, signing)
//! - `RepoError` — tag store failures (local git or hosted API)
//! - `ConfigError` — missing or malformed configuration
//! - `ReconcileError` — reconciler-level invariant violations

use thiserror::Error;

/// Errors from the App Store Connect client and token signer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response that was not (or no longer) retryable. `detail` is
    /// taken from the first entry of the `{errors:[{detail}]}` envelope when
    /// present, otherwise the raw response body.
    #[error("API request failed with status {status}: {detail}")]
    Remote { status: u16, detail: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The ECDSA signature did not parse as a DER SEQUENCE of two integers.
    #[error("Malformed ECDSA signature: {0}")]
    MalformedSignature(String),

    #[error("No app found for bundle id {bundle_id}")]
    AppNotFound { bundle_id: String },

    #[error("No review submission found for version {version_id}")]
    NoSubmissionFound { version_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// Status code for remote failures; `None` for everything else.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transport failures (connection reset, DNS, timeout) are always
    /// retry candidates; remote statuses are checked against the policy's
    /// status set by the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}

/// Errors from the repository tag store (either backend).
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Hosted API error: {0}")]
    Hosted(#[source] anyhow::Error),

    /// The commit a build claims to be built from is absent from history.
    /// This indicates an inconsistent repository state and is fatal.
    #[error("Commit {sha} not found in repository history")]
    CommitMissing { sha: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration variable {name}")]
    MissingVar { name: &'static str },

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: &'static str, message: String },
}

/// Errors from the reconcilers themselves.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Live version string that does not look like a release version.
    /// Input-validation failure, not a retry condition.
    #[error("Invalid version string '{version}': expected MAJOR.MINOR or MAJOR.MINOR.PATCH")]
    InvalidVersion { version: String },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_remote_carries_status_and_detail() {
        let err = ApiError::Remote {
            status: 409,
            detail: "duplicate version".to_string(),
        };
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("409"));
        assert!(err.to_string().contains("duplicate version"));
    }

    #[test]
    fn api_error_malformed_signature_is_matchable() {
        let err = ApiError::MalformedSignature("truncated sequence".to_string());
        assert!(matches!(err, ApiError::MalformedSignature(_)));
        assert!(err.status().is_none());
    }

    #[test]
    fn api_error_no_submission_carries_version_id() {
        let err = ApiError::NoSubmissionFound {
            version_id: "abc-123".to_string(),
        };
        assert!(err.to_string().contains("abc-123"));
    }

    #[test]
    fn repo_error_commit_missing_carries_sha() {
        let err = RepoError::CommitMissing {
            sha: "deadbeef".to_string(),
        };
        assert!(err.to_string().contains("deadbeef"));
    }

    #[test]
    fn config_error_missing_var_names_variable() {
        let err = ConfigError::MissingVar { name: "ASC_KEY_ID" };
        assert!(err.to_string().contains("ASC_KEY_ID"));
    }

    #[test]
    fn reconcile_error_converts_from_api_error() {
        let inner = ApiError::Remote {
            status: 500,
            detail: "boom".to_string(),
        };
        let err: ReconcileError = inner.into();
        assert!(matches!(err, ReconcileError::Api(_)));
    }

    #[test]
    fn reconcile_error_invalid_version_message() {
        let err = ReconcileError::InvalidVersion {
            version: "1.x".to_string(),
        };
        assert!(err.to_string().contains("1.x"));
        assert!(err.to_string().contains("MAJOR.MINOR"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ApiError::AppNotFound {
            bundle_id: "com.example".into(),
        });
        assert_std_error(&RepoError::CommitMissing { sha: "x".into() });
        assert_std_error(&ConfigError::MissingVar { name: "X" });
        assert_std_error(&ReconcileError::InvalidVersion { version: "x".into() });
    }
}
