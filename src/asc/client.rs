//! Authenticated, retrying HTTP client for the App Store Connect API.
//!
//! One client instance owns the token signer and the resolved app id; query
//! and mutation layers borrow it. Every attempt is signed with a fresh token
//! from the signer since a token can expire mid-retry-sequence.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::asc::models::{App, Document, RawResource};
use crate::asc::token::TokenSigner;
use crate::config::AppConfig;
use crate::errors::ApiError;
use crate::retry::{AttemptError, RetryPolicy, with_retry};

pub const BASE_URL: &str = "https://api.appstoreconnect.apple.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Which app the client is scoped to, and how to find it.
#[derive(Debug, Clone)]
pub struct AppIdentity {
    pub bundle_id: String,
    /// Disambiguates when several apps share a bundle id.
    pub name: Option<String>,
    /// Skips resolution entirely.
    pub id_override: Option<String>,
}

impl From<&AppConfig> for AppIdentity {
    fn from(config: &AppConfig) -> Self {
        Self {
            bundle_id: config.bundle_id.clone(),
            name: config.app_name.clone(),
            id_override: config.app_id_override.clone(),
        }
    }
}

pub struct AscClient {
    http: reqwest::Client,
    signer: Mutex<TokenSigner>,
    identity: AppIdentity,
    cached_app_id: Mutex<Option<String>>,
    policy: RetryPolicy,
    base_url: String,
}

impl AscClient {
    pub fn new(config: &AppConfig) -> Result<Self, ApiError> {
        let signer = TokenSigner::new(&config.key_id, &config.issuer_id, &config.private_key_pem)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            signer: Mutex::new(signer),
            identity: AppIdentity::from(config),
            cached_app_id: Mutex::new(None),
            policy: RetryPolicy::default(),
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point the client at a different host (tests, proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Issue a request with the default policy. A 204 response yields `None`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, ApiError> {
        let policy = self.policy.clone();
        self.request_with_policy(method, path, body, &policy).await
    }

    pub async fn request_with_policy(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        policy: &RetryPolicy,
    ) -> Result<Option<Value>, ApiError> {
        let url = self.absolute_url(path);
        let label = format!("{} {}", method, path);
        with_retry(policy, &label, || self.attempt(method.clone(), &url, body)).await
    }

    pub async fn get(&self, path: &str) -> Result<Option<Value>, ApiError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Option<Value>, ApiError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<Option<Value>, ApiError> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Option<Value>, ApiError> {
        self.request(Method::DELETE, path, None).await
    }

    /// GET a collection endpoint, following `links.next` until exhausted.
    /// Returns all data rows plus all side-loaded resources.
    pub async fn paged_get<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<(Vec<T>, Vec<RawResource>), ApiError> {
        let mut rows = Vec::new();
        let mut included = Vec::new();
        let mut next = Some(path.to_string());

        while let Some(page_path) = next {
            let Some(json) = self.get(&page_path).await? else {
                break;
            };
            let document: Document<Vec<T>> = serde_json::from_value(json)
                .map_err(|e| ApiError::Other(anyhow!("Failed to parse {}: {}", page_path, e)))?;
            rows.extend(document.data);
            included.extend(document.included);
            next = document.links.and_then(|l| l.next);
        }
        Ok((rows, included))
    }

    /// The app id this client is scoped to, resolved once and cached.
    /// Resolution scans apps matching the bundle id and disambiguates by
    /// exact configured name when more than one matches.
    pub async fn app_id(&self) -> Result<String, ApiError> {
        if let Some(id) = self.cached_app_id.lock().ok().and_then(|c| c.clone()) {
            return Ok(id);
        }
        if let Some(id) = &self.identity.id_override {
            self.cache_app_id(id);
            return Ok(id.clone());
        }

        let path = format!(
            "/v1/apps?filter[bundleId]={}&limit=200",
            self.identity.bundle_id
        );
        let (apps, _) = self.paged_get::<App>(&path).await?;
        let matches: Vec<&App> = apps
            .iter()
            .filter(|a| a.attributes.bundle_id == self.identity.bundle_id)
            .collect();

        let chosen = match (matches.len(), &self.identity.name) {
            (0, _) => None,
            (1, _) => Some(matches[0]),
            (_, Some(name)) => matches.iter().find(|a| &a.attributes.name == name).copied(),
            // Several candidates and nothing to disambiguate with: take the
            // first in response order.
            (_, None) => Some(matches[0]),
        };

        let app = chosen.ok_or_else(|| ApiError::AppNotFound {
            bundle_id: self.identity.bundle_id.clone(),
        })?;
        debug!("resolved app {} -> {}", self.identity.bundle_id, app.id);
        self.cache_app_id(&app.id);
        Ok(app.id.clone())
    }

    fn cache_app_id(&self, id: &str) {
        if let Ok(mut cached) = self.cached_app_id.lock() {
            *cached = Some(id.to_string());
        }
    }

    fn absolute_url(&self, path: &str) -> String {
        // Pagination links come back absolute.
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, AttemptError> {
        let token = self
            .signer
            .lock()
            .map_err(|_| AttemptError::from(ApiError::Other(anyhow!("token signer poisoned"))))?
            .current_token()
            .map_err(AttemptError::from)?;

        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::from(ApiError::Transport(e)))?;

        let status = response.status();
        if status.as_u16() == 204 {
            return Ok(None);
        }
        if status.is_success() {
            let json = response
                .json::<Value>()
                .await
                .map_err(|e| AttemptError::from(ApiError::Transport(e)))?;
            return Ok(Some(json));
        }

        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let raw_body = response.text().await.unwrap_or_default();
        Err(AttemptError {
            error: ApiError::Remote {
                status: status.as_u16(),
                detail: extract_error_detail(&raw_body),
            },
            retry_after,
        })
    }
}

/// Pull the human-readable message out of the `{errors:[{detail}]}` envelope,
/// falling back to the raw body.
fn extract_error_detail(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body)
        && let Some(detail) = json
            .get("errors")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first())
            .and_then(|e| e.get("detail"))
            .and_then(Value::as_str)
    {
        return detail.to_string();
    }
    body.to_string()
}
