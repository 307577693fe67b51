//! GitHub-backed change-request notifier.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{ChangeRequest, Notifier};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "shiptag";

/// A pull request as returned by the commit-association endpoint
/// (subset of fields we care about).
#[derive(Debug, Deserialize)]
pub struct GitHubPull {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub merge_commit_sha: Option<String>,
}

/// Prefer the pull whose merge commit is exactly `sha` (the commit that
/// landed on the main branch); otherwise the first association returned.
pub fn select_pull(pulls: Vec<GitHubPull>, sha: &str) -> Option<GitHubPull> {
    let merged_at_sha = pulls
        .iter()
        .position(|p| p.merge_commit_sha.as_deref() == Some(sha));
    match merged_at_sha {
        Some(index) => pulls.into_iter().nth(index),
        None => pulls.into_iter().next(),
    }
}

pub struct GitHubNotifier {
    http: reqwest::Client,
    base_url: String,
    slug: String,
    token: String,
}

impl GitHubNotifier {
    pub fn new(slug: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: API_BASE.to_string(),
            slug: slug.to_string(),
            token: token.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Notifier for GitHubNotifier {
    async fn request_for_commit(&self, sha: &str) -> anyhow::Result<Option<ChangeRequest>> {
        let url = format!("{}/repos/{}/commits/{}/pulls", self.base_url, self.slug, sha);
        let pulls: Vec<GitHubPull> = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .context("Failed to send commit-pulls request to GitHub")?
            .error_for_status()
            .context("GitHub commit-pulls API returned error status")?
            .json()
            .await
            .context("Failed to parse commit-pulls response from GitHub")?;

        Ok(select_pull(pulls, sha).map(|p| ChangeRequest {
            number: p.number,
            title: p.title,
            body: p.body,
        }))
    }

    async fn post_comment(&self, number: u64, body: &str) -> anyhow::Result<()> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.base_url, self.slug, number
        );
        self.http
            .post(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .json(&json!({"body": body}))
            .send()
            .await
            .context("Failed to send comment request to GitHub")?
            .error_for_status()
            .context("GitHub comment API returned error status")?;
        info!("posted comment on change request #{}", number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull(number: u64, merge_sha: Option<&str>) -> GitHubPull {
        GitHubPull {
            number,
            title: format!("PR {}", number),
            body: None,
            merge_commit_sha: merge_sha.map(str::to_string),
        }
    }

    #[test]
    fn test_select_pull_prefers_exact_merge_commit() {
        let pulls = vec![pull(1, Some("other")), pull(2, Some("abc123"))];
        let selected = select_pull(pulls, "abc123").unwrap();
        assert_eq!(selected.number, 2);
    }

    #[test]
    fn test_select_pull_falls_back_to_first() {
        let pulls = vec![pull(7, Some("other")), pull(8, None)];
        let selected = select_pull(pulls, "abc123").unwrap();
        assert_eq!(selected.number, 7);
    }

    #[test]
    fn test_select_pull_empty() {
        assert!(select_pull(vec![], "abc123").is_none());
    }

    #[test]
    fn test_github_pull_deserialize() {
        let json = r###"{
            "number": 42,
            "title": "Fix crash on launch",
            "body": "## Release Notes\nNo more crashing.",
            "state": "closed",
            "merge_commit_sha": "abc123"
        }"###;
        let pull: GitHubPull = serde_json::from_str(json).unwrap();
        assert_eq!(pull.number, 42);
        assert_eq!(pull.merge_commit_sha.as_deref(), Some("abc123"));
        assert!(pull.body.unwrap().contains("Release Notes"));
    }
}
