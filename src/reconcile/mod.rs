//! Reconciliation of remote build-pipeline state against repository state.
//!
//! Two reconcilers run per poll:
//! - [`deploy::DeployReconciler`] submits the latest eligible beta build for
//!   App Store review, at most one submission in flight at a time.
//! - [`release::ReleaseSyncReconciler`] tags builds that reached the store
//!   and announces them on the originating change request.
//!
//! Both are written against the capability traits below so the remote
//! registry can be swapped for in-memory fakes in tests. The App Store
//! Connect implementations live in [`crate::asc`].

pub mod deploy;
pub mod release;

use async_trait::async_trait;

use crate::errors::ApiError;

/// The build currently live in the store, if any. `build_number` is the
/// sentinel `"0"` when nothing is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveBuild {
    pub live: bool,
    pub version: String,
    pub build_number: String,
}

impl LiveBuild {
    pub fn none() -> Self {
        Self {
            live: false,
            version: String::new(),
            build_number: "0".to_string(),
        }
    }
}

/// A store version in some review-related state.
#[derive(Debug, Clone)]
pub struct VersionSummary {
    pub id: String,
    pub version: String,
    pub state: String,
}

/// A processed, unexpired beta build not yet attached to a live or
/// in-review version.
#[derive(Debug, Clone)]
pub struct BetaCandidate {
    pub build_id: String,
    pub build_number: String,
    pub pre_release_version: Option<String>,
    pub beta_state: Option<String>,
}

/// Where a build came from, per the CI build-run history.
#[derive(Debug, Clone)]
pub struct CommitReference {
    pub build_number: String,
    /// Full 40-hex commit hash, or a symbolic ref needing resolution.
    pub reference: String,
    pub workflow_id: String,
    pub workflow_name: String,
}

/// Result of `get_or_create_version`.
#[derive(Debug, Clone)]
pub struct VersionHandle {
    pub id: String,
    pub state: String,
    /// Whether the version already existed remotely.
    pub existed: bool,
}

/// Read-only queries over the remote build registry.
#[async_trait]
pub trait RegistryQuery {
    async fn live_production_build(&self) -> Result<LiveBuild, ApiError>;

    /// First version whose state means a review is underway or pending
    /// release, in API response order.
    async fn build_in_review(&self) -> Result<Option<VersionSummary>, ApiError>;

    /// First version whose state means a rejection.
    async fn rejected_version(&self) -> Result<Option<VersionSummary>, ApiError>;

    async fn latest_eligible_beta_build(&self) -> Result<Option<BetaCandidate>, ApiError>;

    /// Cross-reference CI build-run history for the run that produced
    /// `build_number`. `None` when the build predates commit tracking.
    async fn commit_for_build(&self, build_number: &str)
    -> Result<Option<CommitReference>, ApiError>;

    async fn build_by_number(&self, build_number: &str) -> Result<Option<BetaCandidate>, ApiError>;
}

/// State-changing operations against the remote build registry.
#[async_trait]
pub trait RegistryMutation {
    /// Idempotent: an existing version with this string is reused.
    async fn get_or_create_version(&self, version: &str) -> Result<VersionHandle, ApiError>;

    async fn select_build(&self, version_id: &str, build_id: &str) -> Result<(), ApiError>;

    /// Upserts the localized "what's new" text.
    async fn set_release_notes(
        &self,
        version_id: &str,
        notes: &str,
        locale: &str,
    ) -> Result<(), ApiError>;

    async fn submit_for_review(&self, version_id: &str) -> Result<(), ApiError>;

    /// Fails with [`ApiError::NoSubmissionFound`] when no submission exists.
    async fn cancel_review(&self, version_id: &str) -> Result<(), ApiError>;
}
