//! State-changing operations against the App Store Connect registry.
//!
//! Every operation is either naturally idempotent (get-or-create, attach,
//! upsert) or guarded by the caller, so a poll interrupted between steps
//! recovers cleanly on the next one.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::asc::client::AscClient;
use crate::asc::models::{
    AppStoreVersion, AppStoreVersionLocalization, AppStoreVersionSubmission, Document,
};
use crate::errors::ApiError;
use crate::reconcile::{RegistryMutation, VersionHandle};

pub struct AppStoreMutation {
    client: Arc<AscClient>,
}

impl AppStoreMutation {
    pub fn new(client: Arc<AscClient>) -> Self {
        Self { client }
    }

    fn parse<T: serde::de::DeserializeOwned>(
        json: Option<Value>,
        what: &str,
    ) -> Result<T, ApiError> {
        let value = json.ok_or_else(|| ApiError::Other(anyhow!("Empty response for {}", what)))?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::Other(anyhow!("Failed to parse {}: {}", what, e)))
    }
}

pub fn create_version_body(app_id: &str, version: &str) -> Value {
    json!({
        "data": {
            "type": "appStoreVersions",
            "attributes": {"platform": "IOS", "versionString": version},
            "relationships": {
                "app": {"data": {"type": "apps", "id": app_id}}
            }
        }
    })
}

pub fn select_build_body(build_id: &str) -> Value {
    json!({"data": {"type": "builds", "id": build_id}})
}

pub fn update_localization_body(localization_id: &str, notes: &str) -> Value {
    json!({
        "data": {
            "type": "appStoreVersionLocalizations",
            "id": localization_id,
            "attributes": {"whatsNew": notes}
        }
    })
}

pub fn create_localization_body(version_id: &str, locale: &str, notes: &str) -> Value {
    json!({
        "data": {
            "type": "appStoreVersionLocalizations",
            "attributes": {"locale": locale, "whatsNew": notes},
            "relationships": {
                "appStoreVersion": {"data": {"type": "appStoreVersions", "id": version_id}}
            }
        }
    })
}

pub fn submission_body(version_id: &str) -> Value {
    json!({
        "data": {
            "type": "appStoreVersionSubmissions",
            "relationships": {
                "appStoreVersion": {"data": {"type": "appStoreVersions", "id": version_id}}
            }
        }
    })
}

#[async_trait]
impl RegistryMutation for AppStoreMutation {
    async fn get_or_create_version(&self, version: &str) -> Result<VersionHandle, ApiError> {
        let app_id = self.client.app_id().await?;
        let path = format!(
            "/v1/apps/{}/appStoreVersions?filter[versionString]={}&limit=1",
            app_id, version
        );
        let (existing, _) = self.client.paged_get::<AppStoreVersion>(&path).await?;
        if let Some(found) = existing.into_iter().next() {
            info!("version {} already exists ({})", version, found.id);
            return Ok(VersionHandle {
                id: found.id,
                state: found.attributes.app_store_state,
                existed: true,
            });
        }

        let response = self
            .client
            .post("/v1/appStoreVersions", &create_version_body(&app_id, version))
            .await?;
        let document: Document<AppStoreVersion> = Self::parse(response, "created version")?;
        info!("created version {} ({})", version, document.data.id);
        Ok(VersionHandle {
            id: document.data.id,
            state: document.data.attributes.app_store_state,
            existed: false,
        })
    }

    async fn select_build(&self, version_id: &str, build_id: &str) -> Result<(), ApiError> {
        let path = format!("/v1/appStoreVersions/{}/relationships/build", version_id);
        self.client
            .patch(&path, &select_build_body(build_id))
            .await?;
        info!("attached build {} to version {}", build_id, version_id);
        Ok(())
    }

    async fn set_release_notes(
        &self,
        version_id: &str,
        notes: &str,
        locale: &str,
    ) -> Result<(), ApiError> {
        let path = format!(
            "/v1/appStoreVersions/{}/appStoreVersionLocalizations?limit=200",
            version_id
        );
        let (localizations, _) = self
            .client
            .paged_get::<AppStoreVersionLocalization>(&path)
            .await?;

        match localizations.iter().find(|l| l.attributes.locale == locale) {
            Some(existing) => {
                let path = format!("/v1/appStoreVersionLocalizations/{}", existing.id);
                self.client
                    .patch(&path, &update_localization_body(&existing.id, notes))
                    .await?;
            }
            None => {
                self.client
                    .post(
                        "/v1/appStoreVersionLocalizations",
                        &create_localization_body(version_id, locale, notes),
                    )
                    .await?;
            }
        }
        info!("set {} release notes on version {}", locale, version_id);
        Ok(())
    }

    async fn submit_for_review(&self, version_id: &str) -> Result<(), ApiError> {
        self.client
            .post("/v1/appStoreVersionSubmissions", &submission_body(version_id))
            .await?;
        info!("submitted version {} for review", version_id);
        Ok(())
    }

    async fn cancel_review(&self, version_id: &str) -> Result<(), ApiError> {
        let path = format!("/v1/appStoreVersions/{}/appStoreVersionSubmission", version_id);
        // The to-one lookup reports "no submission" as data:null on some API
        // versions and as 404 on others.
        let response = match self.client.get(&path).await {
            Ok(response) => response,
            Err(ApiError::Remote { status: 404, .. }) => None,
            Err(e) => return Err(e),
        };
        let submission = response
            .map(|json| {
                Self::parse::<Document<Option<AppStoreVersionSubmission>>>(Some(json), "active submission")
            })
            .transpose()?
            .and_then(|document| document.data)
            .ok_or_else(|| ApiError::NoSubmissionFound {
                version_id: version_id.to_string(),
            })?;

        let path = format!("/v1/appStoreVersionSubmissions/{}", submission.id);
        self.client.delete(&path).await?;
        info!(
            "cancelled submission {} of version {}",
            submission.id, version_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_version_body_shape() {
        let body = create_version_body("app-1", "1.5");
        assert_eq!(body["data"]["type"], "appStoreVersions");
        assert_eq!(body["data"]["attributes"]["versionString"], "1.5");
        assert_eq!(body["data"]["attributes"]["platform"], "IOS");
        assert_eq!(body["data"]["relationships"]["app"]["data"]["id"], "app-1");
    }

    #[test]
    fn test_select_build_body_shape() {
        let body = select_build_body("build-9");
        assert_eq!(body["data"]["type"], "builds");
        assert_eq!(body["data"]["id"], "build-9");
    }

    #[test]
    fn test_localization_bodies() {
        let update = update_localization_body("loc-1", "Fixes");
        assert_eq!(update["data"]["id"], "loc-1");
        assert_eq!(update["data"]["attributes"]["whatsNew"], "Fixes");
        assert!(update["data"]["attributes"].get("locale").is_none());

        let create = create_localization_body("ver-1", "en-US", "Fixes");
        assert_eq!(create["data"]["attributes"]["locale"], "en-US");
        assert_eq!(
            create["data"]["relationships"]["appStoreVersion"]["data"]["id"],
            "ver-1"
        );
    }

    #[test]
    fn test_submission_body_shape() {
        let body = submission_body("ver-2");
        assert_eq!(body["data"]["type"], "appStoreVersionSubmissions");
        assert_eq!(
            body["data"]["relationships"]["appStoreVersion"]["data"]["id"],
            "ver-2"
        );
    }
}
