//! Release synchronization: make sure every build that reached the store is
//! recorded as an annotated tag and announced on its change request.
//!
//! The tag is the durable idempotency marker. Its existence proves the
//! (version, build) pair was fully processed, so a poll that crashed after
//! tagging but before commenting will not tag twice; it simply skips. A
//! failed comment is never retried for the same pair, which keeps the
//! "exactly once" guarantee on the mutation that matters (the tag) and a
//! best-effort guarantee on the announcement.

use regex::Regex;
use tracing::{info, warn};

use crate::errors::{ReconcileError, RepoError};
use crate::notify::Notifier;
use crate::repo::{TagStore, is_full_sha};

use super::RegistryQuery;

/// MAJOR.MINOR or MAJOR.MINOR.PATCH.
const VERSION_PATTERN: &str = r"^\d+\.\d+(\.\d+)?$";

/// Canonical tag name for a released (version, build) pair.
pub fn tag_name(version: &str, build_number: &str) -> String {
    format!("v{}-{}", version, build_number)
}

pub fn is_valid_version(version: &str) -> bool {
    Regex::new(VERSION_PATTERN)
        .expect("static regex compiles")
        .is_match(version)
}

/// What a single poll concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// No live build, or the sentinel build number "0".
    NothingLive,
    /// The idempotency checkpoint: tag already present, nothing owed.
    AlreadyTagged { tag: String },
    /// The build predates commit tracking; not an error.
    CommitUntracked { build_number: String },
    /// A symbolic ref that resolved against neither the local branch nor
    /// its remote-tracking counterpart.
    RefUnresolved { reference: String },
    Tagged { tag: String, commented: bool },
    DryRun { tag: String },
}

pub struct ReleaseSyncReconciler<'a> {
    query: &'a dyn RegistryQuery,
    tags: &'a dyn TagStore,
    notifier: &'a dyn Notifier,
    dry_run: bool,
}

impl<'a> ReleaseSyncReconciler<'a> {
    pub fn new(
        query: &'a dyn RegistryQuery,
        tags: &'a dyn TagStore,
        notifier: &'a dyn Notifier,
        dry_run: bool,
    ) -> Self {
        Self {
            query,
            tags,
            notifier,
            dry_run,
        }
    }

    pub async fn run(&self) -> Result<ReleaseOutcome, ReconcileError> {
        let live = self.query.live_production_build().await?;
        if !live.live || live.build_number == "0" {
            info!("no live production build, nothing to sync");
            return Ok(ReleaseOutcome::NothingLive);
        }
        info!(
            "live production build: version {} build {}",
            live.version, live.build_number
        );

        if !is_valid_version(&live.version) {
            return Err(ReconcileError::InvalidVersion {
                version: live.version,
            });
        }

        let tag = tag_name(&live.version, &live.build_number);
        if self.tags.tag_exists(&tag).await? {
            info!("tag {} already exists, release fully processed", tag);
            return Ok(ReleaseOutcome::AlreadyTagged { tag });
        }

        let Some(commit) = self.query.commit_for_build(&live.build_number).await? else {
            info!(
                "no CI run found for build {}, predates commit tracking",
                live.build_number
            );
            return Ok(ReleaseOutcome::CommitUntracked {
                build_number: live.build_number,
            });
        };

        let sha = if is_full_sha(&commit.reference) {
            commit.reference.clone()
        } else {
            match self.tags.resolve_ref(&commit.reference).await? {
                Some(sha) => {
                    info!("resolved ref {} to {}", commit.reference, sha);
                    sha
                }
                None => {
                    info!("could not resolve ref {}, skipping", commit.reference);
                    return Ok(ReleaseOutcome::RefUnresolved {
                        reference: commit.reference,
                    });
                }
            }
        };

        if !self.tags.commit_exists(&sha).await? {
            return Err(RepoError::CommitMissing { sha }.into());
        }

        let message = format!(
            "Production release: version {}, build {}",
            live.version, live.build_number
        );
        if self.dry_run {
            info!("[dry-run] would create tag {} at {} and push", tag, sha);
            info!("[dry-run] would comment on the change request merged at {}", sha);
            return Ok(ReleaseOutcome::DryRun { tag });
        }

        self.tags.create_tag(&tag, &sha, &message).await?;

        let commented = self.announce(&sha, &live.version, &live.build_number, &tag).await;
        Ok(ReleaseOutcome::Tagged { tag, commented })
    }

    /// Best-effort: a failure here is logged and never rolls back the tag.
    async fn announce(&self, sha: &str, version: &str, build_number: &str, tag: &str) -> bool {
        let request = match self.notifier.request_for_commit(sha).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                info!("no change request found for {}, skipping comment", sha);
                return false;
            }
            Err(e) => {
                warn!("change request lookup failed for {}: {:#}", sha, e);
                return false;
            }
        };

        let comment = format!(
            "This change was released to the App Store in version {} (build {}), tagged `{}`.",
            version, build_number, tag
        );
        match self.notifier.post_comment(request.number, &comment).await {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to comment on #{}: {:#}", request.number, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_name_format() {
        assert_eq!(tag_name("1.4", "1400"), "v1.4-1400");
        assert_eq!(tag_name("2.0.1", "57"), "v2.0.1-57");
    }

    #[test]
    fn test_version_validation() {
        assert!(is_valid_version("1.4"));
        assert!(is_valid_version("1.4.2"));
        assert!(is_valid_version("10.20.30"));
        assert!(!is_valid_version("1"));
        assert!(!is_valid_version("1.4.2.1"));
        assert!(!is_valid_version("1.x"));
        assert!(!is_valid_version("v1.4"));
        assert!(!is_valid_version("1.4-beta"));
        assert!(!is_valid_version(""));
    }
}
