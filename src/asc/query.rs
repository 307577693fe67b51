//! Read-only queries over the App Store Connect registry.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::asc::client::AscClient;
use crate::asc::models::{
    AppStoreVersion, Build, CiBuildRun, CiProduct, CiWorkflow, Document, LIVE_STATES, RawResource,
    REJECTED_STATES, REVIEW_STATES,
};
use crate::errors::ApiError;
use crate::reconcile::{
    BetaCandidate, CommitReference, LiveBuild, RegistryQuery, VersionSummary,
};

/// How many of a workflow's most recent runs are searched for a build.
const BUILD_RUN_SCAN_LIMIT: usize = 200;

pub struct AppStoreQuery {
    client: Arc<AscClient>,
}

impl AppStoreQuery {
    pub fn new(client: Arc<AscClient>) -> Self {
        Self { client }
    }

    async fn versions(&self) -> Result<Vec<AppStoreVersion>, ApiError> {
        let app_id = self.client.app_id().await?;
        let path = format!("/v1/apps/{}/appStoreVersions?limit=200", app_id);
        let (versions, _) = self.client.paged_get::<AppStoreVersion>(&path).await?;
        Ok(versions)
    }

    async fn first_version_in(&self, states: &[&str]) -> Result<Option<VersionSummary>, ApiError> {
        let versions = self.versions().await?;
        Ok(first_version_matching(&versions, states).map(|v| VersionSummary {
            id: v.id.clone(),
            version: v.attributes.version_string.clone(),
            state: v.attributes.app_store_state.clone(),
        }))
    }

    /// Build number attached to a version, `None` when no build is selected.
    async fn attached_build_number(&self, version_id: &str) -> Result<Option<String>, ApiError> {
        let path = format!("/v1/appStoreVersions/{}/build", version_id);
        let Some(json) = self.client.get(&path).await? else {
            return Ok(None);
        };
        let document: Document<Option<Build>> = serde_json::from_value(json)
            .map_err(|e| ApiError::Other(anyhow!("Failed to parse attached build: {}", e)))?;
        Ok(document.data.map(|b| b.attributes.version))
    }
}

#[async_trait]
impl RegistryQuery for AppStoreQuery {
    /// First version in API response order whose state is live. No
    /// tie-break among multiple simultaneously live versions: the API's
    /// ordering is not guaranteed chronological, so first-match-wins is
    /// preserved rather than inferring recency.
    async fn live_production_build(&self) -> Result<LiveBuild, ApiError> {
        let Some(live) = self.first_version_in(LIVE_STATES).await? else {
            return Ok(LiveBuild::none());
        };
        let build_number = self
            .attached_build_number(&live.id)
            .await?
            .unwrap_or_else(|| "0".to_string());
        Ok(LiveBuild {
            live: true,
            version: live.version,
            build_number,
        })
    }

    async fn build_in_review(&self) -> Result<Option<VersionSummary>, ApiError> {
        self.first_version_in(REVIEW_STATES).await
    }

    async fn rejected_version(&self) -> Result<Option<VersionSummary>, ApiError> {
        self.first_version_in(REJECTED_STATES).await
    }

    async fn latest_eligible_beta_build(&self) -> Result<Option<BetaCandidate>, ApiError> {
        let app_id = self.client.app_id().await?;

        // Builds attached to the live or in-review version are not
        // candidates; collect their numbers first.
        let mut excluded = Vec::new();
        let live = self.live_production_build().await?;
        if live.live {
            excluded.push(live.build_number);
        }
        if let Some(in_review) = self.build_in_review().await?
            && let Some(number) = self.attached_build_number(&in_review.id).await?
        {
            excluded.push(number);
        }

        let path = format!(
            "/v1/builds?filter[app]={}&sort=-uploadedDate&include=preReleaseVersion,buildBetaDetail&limit=200",
            app_id
        );
        let (builds, included) = self.client.paged_get::<Build>(&path).await?;

        let candidate = builds.into_iter().find(|b| {
            b.attributes.is_eligible() && !excluded.iter().any(|n| n == &b.attributes.version)
        });
        Ok(candidate.map(|build| {
            let pre_release_version = pre_release_version_of(&build, &included);
            let beta_state = beta_state_of(&build, &included);
            BetaCandidate {
                build_number: build.attributes.version,
                build_id: build.id,
                pre_release_version,
                beta_state,
            }
        }))
    }

    /// Worst case this scans every workflow of every CI product, 200 runs
    /// deep. Product and workflow counts are small and the operation runs
    /// on a coarse polling interval, so the N x M x 200 walk is acceptable.
    async fn commit_for_build(
        &self,
        build_number: &str,
    ) -> Result<Option<CommitReference>, ApiError> {
        let (products, _) = self.client.paged_get::<CiProduct>("/v1/ciProducts?limit=200").await?;
        for product in &products {
            let workflows_path = format!("/v1/ciProducts/{}/workflows?limit=200", product.id);
            let (workflows, _) = self.client.paged_get::<CiWorkflow>(&workflows_path).await?;
            for workflow in &workflows {
                let runs_path = format!(
                    "/v1/ciWorkflows/{}/buildRuns?sort=-number&limit={}",
                    workflow.id, BUILD_RUN_SCAN_LIMIT
                );
                let Some(json) = self.client.get(&runs_path).await? else {
                    continue;
                };
                let document: Document<Vec<CiBuildRun>> = serde_json::from_value(json)
                    .map_err(|e| {
                        ApiError::Other(anyhow!("Failed to parse build runs: {}", e))
                    })?;
                for run in document.data.iter().take(BUILD_RUN_SCAN_LIMIT) {
                    if run.attributes.number_string().as_deref() != Some(build_number) {
                        continue;
                    }
                    let Some(reference) = run
                        .attributes
                        .source_commit
                        .as_ref()
                        .and_then(|c| c.commit_ref())
                    else {
                        debug!(
                            "run {} matches build {} but has no usable commit field",
                            run.id, build_number
                        );
                        continue;
                    };
                    return Ok(Some(CommitReference {
                        build_number: build_number.to_string(),
                        reference,
                        workflow_id: workflow.id.clone(),
                        workflow_name: workflow.attributes.name.clone(),
                    }));
                }
            }
        }
        Ok(None)
    }

    async fn build_by_number(&self, build_number: &str) -> Result<Option<BetaCandidate>, ApiError> {
        let app_id = self.client.app_id().await?;
        let path = format!(
            "/v1/builds?filter[app]={}&filter[version]={}&limit=1",
            app_id, build_number
        );
        let (builds, _) = self.client.paged_get::<Build>(&path).await?;
        Ok(builds.into_iter().next().map(|build| BetaCandidate {
            build_number: build.attributes.version,
            build_id: build.id,
            pre_release_version: None,
            beta_state: None,
        }))
    }
}

/// First version in response order whose state is in `states`.
pub fn first_version_matching<'a>(
    versions: &'a [AppStoreVersion],
    states: &[&str],
) -> Option<&'a AppStoreVersion> {
    versions
        .iter()
        .find(|v| states.contains(&v.attributes.app_store_state.as_str()))
}

fn related_id(relationship: &Option<crate::asc::models::Relationship>) -> Option<&str> {
    relationship
        .as_ref()
        .and_then(|r| r.data.as_ref())
        .map(|d| d.id.as_str())
}

fn included_attribute<'a>(
    included: &'a [RawResource],
    kind: &str,
    id: &str,
    attribute: &str,
) -> Option<&'a str> {
    included
        .iter()
        .find(|r| r.kind == kind && r.id == id)
        .and_then(|r| r.attributes.get(attribute))
        .and_then(Value::as_str)
}

/// Pre-release version string of a build, resolved through `included`.
pub fn pre_release_version_of(build: &Build, included: &[RawResource]) -> Option<String> {
    let id = related_id(&build.relationships.as_ref()?.pre_release_version)?;
    included_attribute(included, "preReleaseVersions", id, "version").map(str::to_string)
}

/// Beta distribution state of a build, resolved through `included`.
pub fn beta_state_of(build: &Build, included: &[RawResource]) -> Option<String> {
    let id = related_id(&build.relationships.as_ref()?.build_beta_detail)?;
    included_attribute(included, "buildBetaDetails", id, "externalBuildState")
        .map(str::to_string)
}
