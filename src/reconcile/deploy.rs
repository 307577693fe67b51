//! Deploy reconciliation: submit the latest eligible beta build for App
//! Store review, keeping at most one submission in flight.
//!
//! Every step is idempotent or naturally recoverable: get-or-create for the
//! version, overwrite semantics for build attachment and release notes. A
//! poll that dies between steps finishes the job on the next invocation.

use tracing::{info, warn};

use crate::errors::{ApiError, ReconcileError};
use crate::notify::{Notifier, extract_release_notes};

use super::{RegistryMutation, RegistryQuery};

const DEFAULT_LOCALE: &str = "en-US";

/// What a single poll concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// A version is mid-review; submitting another would race it.
    BlockedByReview { version: String },
    /// A rejection needs human attention (resubmission policy disabled).
    BlockedByRejection { version: String },
    NoEligibleBuild,
    /// The newest candidate came from a workflow outside the configured
    /// filter (a beta or UAT pipeline, typically).
    WrongWorkflow {
        build_number: String,
        workflow: String,
    },
    Submitted {
        version: String,
        build_number: String,
        commented: bool,
    },
    DryRun {
        version: String,
        build_number: String,
    },
}

pub struct DeployReconciler<'a> {
    query: &'a dyn RegistryQuery,
    mutation: &'a dyn RegistryMutation,
    notifier: &'a dyn Notifier,
    /// Only builds produced by this workflow are deployed.
    workflow_filter: Option<String>,
    resubmit_after_rejection: bool,
    dry_run: bool,
}

impl<'a> DeployReconciler<'a> {
    pub fn new(
        query: &'a dyn RegistryQuery,
        mutation: &'a dyn RegistryMutation,
        notifier: &'a dyn Notifier,
        workflow_filter: Option<String>,
        resubmit_after_rejection: bool,
        dry_run: bool,
    ) -> Self {
        Self {
            query,
            mutation,
            notifier,
            workflow_filter,
            resubmit_after_rejection,
            dry_run,
        }
    }

    pub async fn run(&self) -> Result<DeployOutcome, ReconcileError> {
        if let Some(in_review) = self.query.build_in_review().await? {
            info!(
                "version {} is {}, not submitting another",
                in_review.version, in_review.state
            );
            return Ok(DeployOutcome::BlockedByReview {
                version: in_review.version,
            });
        }

        if let Some(rejected) = self.query.rejected_version().await? {
            if !self.resubmit_after_rejection {
                info!(
                    "version {} was rejected ({}), waiting for manual resolution",
                    rejected.version, rejected.state
                );
                return Ok(DeployOutcome::BlockedByRejection {
                    version: rejected.version,
                });
            }
            info!(
                "version {} was rejected ({}), resubmission policy active",
                rejected.version, rejected.state
            );
            if !self.dry_run {
                // A leftover submission on the rejected version would block
                // the new one; absence of one is the normal case.
                match self.mutation.cancel_review(&rejected.id).await {
                    Ok(()) => info!("cancelled stale submission on {}", rejected.version),
                    Err(ApiError::NoSubmissionFound { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let Some(candidate) = self.query.latest_eligible_beta_build().await? else {
            info!("no eligible beta build, nothing to deploy");
            return Ok(DeployOutcome::NoEligibleBuild);
        };
        info!(
            "latest eligible beta build: {} (pre-release version {:?}, beta state {:?})",
            candidate.build_number, candidate.pre_release_version, candidate.beta_state
        );

        let commit = self.query.commit_for_build(&candidate.build_number).await?;
        if let Some(filter) = &self.workflow_filter {
            let workflow = commit.as_ref().map(|c| c.workflow_name.clone());
            match workflow {
                Some(name) if &name == filter => {}
                Some(name) => {
                    info!(
                        "build {} came from workflow '{}', not '{}', skipping",
                        candidate.build_number, name, filter
                    );
                    return Ok(DeployOutcome::WrongWorkflow {
                        build_number: candidate.build_number,
                        workflow: name,
                    });
                }
                None => {
                    // Cannot attribute the build to any workflow; with a
                    // filter configured, an unattributable build is not
                    // deployable.
                    info!(
                        "build {} has no CI run, cannot check workflow filter, skipping",
                        candidate.build_number
                    );
                    return Ok(DeployOutcome::NoEligibleBuild);
                }
            }
        }

        let version = candidate.pre_release_version.clone().ok_or_else(|| {
            ReconcileError::Other(anyhow::anyhow!(
                "build {} has no pre-release version string",
                candidate.build_number
            ))
        })?;

        let request = match &commit {
            Some(commit) => match self.notifier.request_for_commit(&commit.reference).await {
                Ok(request) => request,
                Err(e) => {
                    warn!("change request lookup failed: {:#}", e);
                    None
                }
            },
            None => None,
        };
        let notes = extract_release_notes(request.as_ref());

        if self.dry_run {
            info!("[dry-run] would get-or-create version {}", version);
            info!(
                "[dry-run] would attach build {} and set {} release notes",
                candidate.build_number, DEFAULT_LOCALE
            );
            info!("[dry-run] would submit version {} for review", version);
            if let Some(request) = &request {
                info!("[dry-run] would comment on change request #{}", request.number);
            }
            return Ok(DeployOutcome::DryRun {
                version,
                build_number: candidate.build_number,
            });
        }

        let handle = self.mutation.get_or_create_version(&version).await?;
        self.mutation
            .select_build(&handle.id, &candidate.build_id)
            .await?;
        self.mutation
            .set_release_notes(&handle.id, &notes, DEFAULT_LOCALE)
            .await?;
        self.mutation.submit_for_review(&handle.id).await?;
        info!(
            "submitted version {} (build {}) for review",
            version, candidate.build_number
        );

        let commented = match &request {
            Some(request) => {
                let comment = format!(
                    "Build {} was submitted for App Store review as version {}.",
                    candidate.build_number, version
                );
                match self.notifier.post_comment(request.number, &comment).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("failed to comment on #{}: {:#}", request.number, e);
                        false
                    }
                }
            }
            None => false,
        };

        Ok(DeployOutcome::Submitted {
            version,
            build_number: candidate.build_number,
            commented,
        })
    }
}
