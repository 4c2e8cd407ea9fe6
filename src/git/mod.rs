mod libgit;

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::model::{identity::RepositoryIdentity, ParseError};

pub use libgit::LibGit;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Git error for {location}: {source}")]
    Git {
        location: String,
        source: git2::Error,
    },
    #[error("Commit {commit} was not found in {location}")]
    CommitNotFound { location: String, commit: String },
    #[error("Invalid repository identity: {0}")]
    Parse(#[from] ParseError),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// What the resolver needs from git: a shallow clone at an optional branch and
/// a checkout of a specific commit.
pub trait GitClient {
    fn clone_repository(
        &self,
        url: &str,
        branch: Option<&str>,
        destination: &Path,
    ) -> Result<(), FetchError>;

    fn checkout(&self, repository: &Path, commit: &str) -> Result<(), FetchError>;
}

/// Clones identities that are missing from the cache into fresh slots under
/// the modules directory.
pub struct Fetcher<G> {
    git: G,
    modules_dir: PathBuf,
}

impl<G: GitClient> Fetcher<G> {
    pub fn new(git: G, modules_dir: PathBuf) -> Fetcher<G> {
        Fetcher { git, modules_dir }
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    /// Clones `identity` and returns the physical path of the clone.
    ///
    /// The slot is emptied first and deleted again if the clone or checkout
    /// fails, so a failed fetch leaves nothing behind.
    pub fn fetch(&self, identity: &RepositoryIdentity) -> Result<PathBuf, FetchError> {
        let slot = self.modules_dir.join(identity.cache_key()?);
        if slot.exists() {
            debug!("Removing stale cache slot {}", slot.display());
            std::fs::remove_dir_all(&slot)?;
        }
        std::fs::create_dir_all(&self.modules_dir)?;

        info!("Fetching {} into {}", identity, slot.display());
        let result = self
            .git
            .clone_repository(&identity.url, identity.branch.as_deref(), &slot)
            .and_then(|()| match &identity.commit {
                Some(commit) => self.git.checkout(&slot, commit),
                None => Ok(()),
            });

        if let Err(error) = result {
            if let Err(cleanup) = std::fs::remove_dir_all(&slot) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "Could not remove partial clone {}: {}",
                        slot.display(),
                        cleanup
                    );
                }
            }
            return Err(error);
        }

        Ok(slot)
    }
}
