//! Repository tag state: queries and mutations over tags and commits.
//!
//! The reconcilers only care about the capability set (tag existence,
//! commit existence, ref resolution, annotated tag creation); whether that
//! is served by a local clone or by the hosting provider's API is a
//! configuration choice, selected here and nowhere else.

pub mod git;
pub mod hosted;

use async_trait::async_trait;

use crate::config::{AppConfig, TagBackend};
use crate::errors::RepoError;

#[async_trait]
pub trait TagStore: Send + Sync {
    async fn tag_exists(&self, name: &str) -> Result<bool, RepoError>;

    async fn commit_exists(&self, sha: &str) -> Result<bool, RepoError>;

    /// Resolve a symbolic reference to a full commit hash, trying the
    /// reference as given first, then its remote-tracking counterpart.
    /// `None` when neither resolves.
    async fn resolve_ref(&self, reference: &str) -> Result<Option<String>, RepoError>;

    /// Create an annotated tag at `commit_sha` and publish it.
    async fn create_tag(&self, name: &str, commit_sha: &str, message: &str)
    -> Result<(), RepoError>;
}

/// Select the backend the configuration asks for.
pub fn build_tag_store(config: &AppConfig) -> Result<Box<dyn TagStore>, RepoError> {
    match config.tag_backend {
        TagBackend::Git => {
            let path = config.repo_path.clone().ok_or_else(|| {
                RepoError::Other(anyhow::anyhow!("git backend requires REPO_PATH"))
            })?;
            Ok(Box::new(git::LocalGitTagStore::new(
                path,
                config.github_token.clone(),
            )))
        }
        TagBackend::Hosted => Ok(Box::new(hosted::HostedTagStore::new(
            &config.repo_slug(),
            &config.github_token,
        ))),
    }
}

/// Whether `s` is already a full 40-character hex commit hash.
pub fn is_full_sha(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_full_sha() {
        assert!(is_full_sha("0123456789abcdef0123456789abcdef01234567"));
        assert!(is_full_sha(&"a".repeat(40)));
        assert!(!is_full_sha("abc123"));
        assert!(!is_full_sha(&"g".repeat(40)));
        assert!(!is_full_sha(&"a".repeat(41)));
        assert!(!is_full_sha("main"));
        assert!(!is_full_sha(""));
    }
}
