//! Tag store backed by a local clone, driven through libgit2.

use std::path::PathBuf;

use async_trait::async_trait;
use git2::{Cred, PushOptions, RemoteCallbacks, Repository, Signature};
use tracing::{debug, info};

use super::TagStore;
use crate::errors::RepoError;

const REMOTE_NAME: &str = "origin";

pub struct LocalGitTagStore {
    repo_path: PathBuf,
    token: String,
}

impl LocalGitTagStore {
    pub fn new(repo_path: PathBuf, token: String) -> Self {
        Self { repo_path, token }
    }

    fn open(&self) -> Result<Repository, RepoError> {
        Ok(Repository::open(&self.repo_path)?)
    }

    fn revparse_commit(&self, repo: &Repository, spec: &str) -> Option<String> {
        repo.revparse_single(spec)
            .ok()
            .and_then(|obj| obj.peel_to_commit().ok())
            .map(|commit| commit.id().to_string())
    }
}

#[async_trait]
impl TagStore for LocalGitTagStore {
    async fn tag_exists(&self, name: &str) -> Result<bool, RepoError> {
        let repo = self.open()?;
        Ok(repo.refname_to_id(&format!("refs/tags/{}", name)).is_ok())
    }

    async fn commit_exists(&self, sha: &str) -> Result<bool, RepoError> {
        let repo = self.open()?;
        let Ok(oid) = git2::Oid::from_str(sha) else {
            return Ok(false);
        };
        Ok(repo.find_commit(oid).is_ok())
    }

    async fn resolve_ref(&self, reference: &str) -> Result<Option<String>, RepoError> {
        let repo = self.open()?;
        if let Some(sha) = self.revparse_commit(&repo, reference) {
            return Ok(Some(sha));
        }
        // Not a local ref; try the remote-tracking branch.
        let tracking = format!("{}/{}", REMOTE_NAME, reference);
        if let Some(sha) = self.revparse_commit(&repo, &tracking) {
            debug!("resolved {} via {}", reference, tracking);
            return Ok(Some(sha));
        }
        Ok(None)
    }

    async fn create_tag(
        &self,
        name: &str,
        commit_sha: &str,
        message: &str,
    ) -> Result<(), RepoError> {
        let repo = self.open()?;
        let oid = git2::Oid::from_str(commit_sha)?;
        let target = repo.find_object(oid, None)?;
        let tagger = Signature::now("shiptag", "shiptag@localhost")?;
        repo.tag(name, &target, &tagger, message, false)?;
        info!("created tag {} at {}", name, commit_sha);

        let mut callbacks = RemoteCallbacks::new();
        let token = self.token.clone();
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext("x-access-token", &token)
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let refspec = format!("refs/tags/{}:refs/tags/{}", name, name);
        let mut remote = repo.find_remote(REMOTE_NAME)?;
        remote.push(&[refspec.as_str()], Some(&mut options))?;
        info!("pushed tag {} to {}", name, REMOTE_NAME);
        Ok(())
    }
}
