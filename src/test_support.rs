use std::{
    cell::RefCell,
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{
    git::{FetchError, GitClient},
    model::project::{ProjectConfig, DEFAULT_PROJECT_FILE},
};

/// In-memory stand-in for a git server. A clone is a directory with a
/// README and `lib`, `include` and `docs` subdirectories, plus a project
/// configuration when one was registered for the url.
#[derive(Default)]
pub struct FakeGit {
    clones: RefCell<Vec<String>>,
    checkouts: RefCell<Vec<(PathBuf, String)>>,
    failing_urls: Vec<String>,
    failing_checkout: bool,
    projects: HashMap<String, ProjectConfig>,
}

impl FakeGit {
    pub fn failing_url(mut self, url: &str) -> Self {
        self.failing_urls.push(url.to_string());
        self
    }

    pub fn failing_checkout(mut self) -> Self {
        self.failing_checkout = true;
        self
    }

    pub fn with_project(mut self, url: &str, config: ProjectConfig) -> Self {
        self.projects.insert(url.to_string(), config);
        self
    }

    pub fn clones(&self) -> Vec<String> {
        self.clones.borrow().clone()
    }

    pub fn checkouts(&self) -> Vec<(PathBuf, String)> {
        self.checkouts.borrow().clone()
    }
}

impl GitClient for FakeGit {
    fn clone_repository(
        &self,
        url: &str,
        _branch: Option<&str>,
        destination: &Path,
    ) -> Result<(), FetchError> {
        self.clones.borrow_mut().push(url.to_string());
        if self.failing_urls.iter().any(|u| u == url) {
            return Err(FetchError::Git {
                location: url.to_string(),
                source: git2::Error::from_str("repository not found"),
            });
        }

        for dir in ["lib", "include", "docs"] {
            std::fs::create_dir_all(destination.join(dir))?;
            std::fs::write(destination.join(dir).join("file.txt"), dir)?;
        }
        std::fs::write(destination.join("README.md"), url)?;
        if let Some(config) = self.projects.get(url) {
            config
                .save(&destination.join(DEFAULT_PROJECT_FILE))
                .map_err(|e| std::io::Error::other(e.to_string()))?;
        }
        Ok(())
    }

    fn checkout(&self, repository: &Path, commit: &str) -> Result<(), FetchError> {
        self.checkouts
            .borrow_mut()
            .push((repository.to_path_buf(), commit.to_string()));
        if self.failing_checkout {
            return Err(FetchError::CommitNotFound {
                location: repository.display().to_string(),
                commit: commit.to_string(),
            });
        }
        Ok(())
    }
}
