//! Tag store backed by the hosting provider's REST API.
//!
//! Covers deployments without a local clone: tag/commit existence through
//! lookups, tag creation through the git-data endpoints (tag object first,
//! then the ref pointing at it).

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::TagStore;
use crate::errors::RepoError;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "shiptag";

pub struct HostedTagStore {
    http: reqwest::Client,
    base_url: String,
    slug: String,
    token: String,
}

impl HostedTagStore {
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

    fn url(&self, suffix: &str) -> String {
        format!("{}/repos/{}/{}", self.base_url, self.slug, suffix)
    }

    /// GET an endpoint where 404 is a meaningful "absent", not an error.
    async fn lookup(&self, url: &str) -> Result<Option<Value>, RepoError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))
            .map_err(RepoError::Hosted)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RepoError::Hosted(anyhow!(
                "GET {} returned {}: {}",
                url,
                status,
                body
            )));
        }
        let json = response
            .json::<Value>()
            .await
            .context("Failed to parse hosted API response")
            .map_err(RepoError::Hosted)?;
        Ok(Some(json))
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, RepoError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))
            .map_err(RepoError::Hosted)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RepoError::Hosted(anyhow!(
                "POST {} returned {}: {}",
                url,
                status,
                body
            )));
        }
        response
            .json::<Value>()
            .await
            .context("Failed to parse hosted API response")
            .map_err(RepoError::Hosted)
    }
}

pub fn tag_object_body(name: &str, commit_sha: &str, message: &str) -> Value {
    json!({
        "tag": name,
        "message": message,
        "object": commit_sha,
        "type": "commit",
        "tagger": {
            "name": "shiptag",
            "email": "shiptag@localhost",
            "date": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        }
    })
}

#[async_trait]
impl TagStore for HostedTagStore {
    async fn tag_exists(&self, name: &str) -> Result<bool, RepoError> {
        let url = self.url(&format!("git/ref/tags/{}", name));
        Ok(self.lookup(&url).await?.is_some())
    }

    async fn commit_exists(&self, sha: &str) -> Result<bool, RepoError> {
        let url = self.url(&format!("commits/{}", sha));
        Ok(self.lookup(&url).await?.is_some())
    }

    async fn resolve_ref(&self, reference: &str) -> Result<Option<String>, RepoError> {
        // The hosted API is the remote, so there is no separate
        // remote-tracking namespace to fall back to.
        let url = self.url(&format!("commits/{}", reference));
        Ok(self
            .lookup(&url)
            .await?
            .and_then(|json| json.get("sha").and_then(Value::as_str).map(str::to_string)))
    }

    async fn create_tag(
        &self,
        name: &str,
        commit_sha: &str,
        message: &str,
    ) -> Result<(), RepoError> {
        let tag = self
            .post(
                &self.url("git/tags"),
                &tag_object_body(name, commit_sha, message),
            )
            .await?;
        let tag_sha = tag
            .get("sha")
            .and_then(Value::as_str)
            .ok_or_else(|| RepoError::Hosted(anyhow!("tag object response missing sha")))?;

        self.post(
            &self.url("git/refs"),
            &json!({"ref": format!("refs/tags/{}", name), "sha": tag_sha}),
        )
        .await?;
        info!("created and published tag {} at {}", name, commit_sha);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let store = HostedTagStore::new("owner/repo", "token");
        assert_eq!(
            store.url("git/ref/tags/v1.4-1400"),
            "https://api.github.com/repos/owner/repo/git/ref/tags/v1.4-1400"
        );
        let store = store.with_base_url("http://localhost:9999/");
        assert_eq!(
            store.url("commits/abc"),
            "http://localhost:9999/repos/owner/repo/commits/abc"
        );
    }

    #[test]
    fn test_tag_object_body_shape() {
        let body = tag_object_body("v1.4-1400", "abc123", "Production release");
        assert_eq!(body["tag"], "v1.4-1400");
        assert_eq!(body["object"], "abc123");
        assert_eq!(body["type"], "commit");
        assert_eq!(body["message"], "Production release");
        assert!(body["tagger"]["date"].as_str().unwrap().ends_with('Z'));
    }
}
