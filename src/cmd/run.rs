//! Lock-gated reconciliation runs.
//!
//! Entry sequence: validate configuration, take the per-app lock, wire the
//! live collaborators, run the requested reconcilers, release the lock.
//! A lock held by another run exits 0 (the scheduler will fire again); a
//! ctrl-c releases the lock before the process dies.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use shiptag::asc::{AppStoreMutation, AppStoreQuery, AscClient};
use shiptag::config::AppConfig;
use shiptag::lock::RunLock;
use shiptag::notify::github::GitHubNotifier;
use shiptag::reconcile::deploy::{DeployOutcome, DeployReconciler};
use shiptag::reconcile::release::{ReleaseOutcome, ReleaseSyncReconciler};
use shiptag::repo::build_tag_store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Deploy,
    ReleaseSync,
    /// Both reconcilers, deploy first.
    Both,
}

pub async fn run_reconciliation(config: AppConfig, job: Job) -> Result<()> {
    config.validate()?;

    let mut lock = RunLock::for_bundle(&config.bundle_id);
    if !lock.acquire()? {
        info!(
            "another reconciliation holds {}, exiting",
            lock.path().display()
        );
        println!("Another run is in progress, nothing to do.");
        return Ok(());
    }

    let result = tokio::select! {
        result = execute(&config, job) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, releasing lock");
            Err(anyhow::anyhow!("interrupted by signal"))
        }
    };
    lock.release()?;
    result
}

async fn execute(config: &AppConfig, job: Job) -> Result<()> {
    let client = Arc::new(AscClient::new(config)?);
    let query = AppStoreQuery::new(client.clone());
    let mutation = AppStoreMutation::new(client);
    let tags = build_tag_store(config)?;
    let notifier = GitHubNotifier::new(&config.repo_slug(), &config.github_token);

    if config.dry_run {
        info!("dry-run mode: mutations will be logged, not performed");
    }

    if matches!(job, Job::Deploy | Job::Both) {
        let reconciler = DeployReconciler::new(
            &query,
            &mutation,
            &notifier,
            config.workflow_name.clone(),
            config.resubmit_after_rejection,
            config.dry_run,
        );
        report_deploy(reconciler.run().await?);
    }

    if matches!(job, Job::ReleaseSync | Job::Both) {
        let reconciler =
            ReleaseSyncReconciler::new(&query, tags.as_ref(), &notifier, config.dry_run);
        report_release(reconciler.run().await?);
    }

    Ok(())
}

fn report_deploy(outcome: DeployOutcome) {
    match outcome {
        DeployOutcome::BlockedByReview { version } => {
            println!("deploy: version {} is in review, no submission made", version);
        }
        DeployOutcome::BlockedByRejection { version } => {
            println!("deploy: version {} was rejected, waiting for manual resolution", version);
        }
        DeployOutcome::NoEligibleBuild => {
            println!("deploy: no eligible beta build");
        }
        DeployOutcome::WrongWorkflow {
            build_number,
            workflow,
        } => {
            println!(
                "deploy: build {} belongs to workflow '{}', skipped",
                build_number, workflow
            );
        }
        DeployOutcome::Submitted {
            version,
            build_number,
            commented,
        } => {
            println!(
                "deploy: submitted version {} (build {}) for review{}",
                version,
                build_number,
                if commented { ", change request notified" } else { "" }
            );
        }
        DeployOutcome::DryRun {
            version,
            build_number,
        } => {
            println!(
                "deploy: [dry-run] would submit version {} (build {})",
                version, build_number
            );
        }
    }
}

fn report_release(outcome: ReleaseOutcome) {
    match outcome {
        ReleaseOutcome::NothingLive => {
            println!("release-sync: no live production build");
        }
        ReleaseOutcome::AlreadyTagged { tag } => {
            println!("release-sync: {} already tagged, nothing to do", tag);
        }
        ReleaseOutcome::CommitUntracked { build_number } => {
            println!(
                "release-sync: build {} predates commit tracking, skipped",
                build_number
            );
        }
        ReleaseOutcome::RefUnresolved { reference } => {
            println!("release-sync: ref '{}' did not resolve, skipped", reference);
        }
        ReleaseOutcome::Tagged { tag, commented } => {
            println!(
                "release-sync: created and pushed {}{}",
                tag,
                if commented { ", change request notified" } else { "" }
            );
        }
        ReleaseOutcome::DryRun { tag } => {
            println!("release-sync: [dry-run] would create {}", tag);
        }
    }
}
