use std::path::{Component, Path, PathBuf};

use log::{debug, error};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    empty_as_none,
    identity::{module_name, RepositoryIdentity},
    ParseError,
};

pub const DEFAULT_PROJECT_FILE: &str = ".repolink";
pub const DEFAULT_LINK_SUBDIR: &str = "modules";

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project configuration {path} not found. Run `repolink init` to initialize the project")]
    ConfigNotFound { path: PathBuf },
    #[error("Project configuration {path} already exists")]
    AlreadyInitialized { path: PathBuf },
    #[error("Project configuration {path} could not be parsed: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Link subdirectory {value:?} must be a relative path inside the project")]
    InvalidLinkSubdir { value: String },
    #[error("Dependency {name} is not declared in the project")]
    DependencyNotFound { name: String },
    #[error("Error while serializing project configuration: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// One declared dependency of a project.
///
/// An empty `directories` list links the whole repository; otherwise only the
/// listed subpaths are linked, inside a bundle directory named after the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(with = "empty_as_none", default)]
    pub branch: Option<String>,
    #[serde(with = "empty_as_none", default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub directories: Vec<String>,
}

impl Dependency {
    pub fn new(
        url: impl Into<String>,
        branch: Option<String>,
        commit: Option<String>,
        directories: Vec<String>,
    ) -> Result<Dependency, ParseError> {
        let url = url.into();
        Ok(Dependency {
            name: module_name(&url)?,
            url,
            branch: branch.filter(|b| !b.is_empty()),
            commit: commit.filter(|c| !c.is_empty()),
            directories,
        })
    }

    pub fn identity(&self) -> RepositoryIdentity {
        RepositoryIdentity::new(self.url.clone(), self.branch.clone(), self.commit.clone())
    }

    /// The name the dependency is linked under, derived from its url.
    pub fn resolved_name(&self) -> Result<String, ParseError> {
        module_name(&self.url)
    }

    pub fn is_bundle(&self) -> bool {
        !self.directories.is_empty()
    }

    fn is_named(&self, name: &str) -> bool {
        self.name == name || self.resolved_name().is_ok_and(|n| n == name)
    }
}

/// The per-project document, always read and written as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default = "default_link_subdir")]
    pub link_subdir: String,
}

fn default_link_subdir() -> String {
    DEFAULT_LINK_SUBDIR.to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig::new(DEFAULT_LINK_SUBDIR)
    }
}

impl ProjectConfig {
    pub fn new(link_subdir: impl Into<String>) -> ProjectConfig {
        ProjectConfig {
            dependencies: Vec::new(),
            link_subdir: link_subdir.into(),
        }
    }

    pub fn from_json_str(data: &str) -> Result<ProjectConfig, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn load(path: &Path) -> Result<ProjectConfig, ProjectError> {
        debug!("Reading project configuration {}", path.display());
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProjectError::ConfigNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(error) => return Err(error.into()),
        };

        ProjectConfig::from_json_str(&contents).map_err(|source| {
            error!("Could not parse project configuration {}", path.display());
            ProjectError::Corrupt {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Like [`ProjectConfig::load`], but a missing file is `Ok(None)`.
    pub fn load_if_present(path: &Path) -> Result<Option<ProjectConfig>, ProjectError> {
        match ProjectConfig::load(path) {
            Ok(config) => Ok(Some(config)),
            Err(ProjectError::ConfigNotFound { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ProjectError> {
        let mut contents = serde_json::to_string_pretty(self)?;
        contents.push('\n');
        std::fs::write(path, contents)?;
        debug!("Wrote project configuration {}", path.display());
        Ok(())
    }

    /// Directory the dependencies are linked into. It is deleted and rebuilt on
    /// every fetch, so it must name a proper subdirectory of the project.
    pub fn link_dir(&self, project_dir: &Path) -> Result<PathBuf, ProjectError> {
        let subdir = Path::new(&self.link_subdir);
        let mut components = subdir.components().peekable();
        let valid = components.peek().is_some()
            && components.all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(ProjectError::InvalidLinkSubdir {
                value: self.link_subdir.clone(),
            });
        }
        Ok(project_dir.join(subdir))
    }

    /// Adds the dependency, replacing an existing declaration with the same url.
    /// Returns true when an existing declaration was replaced.
    pub fn upsert(&mut self, dependency: Dependency) -> bool {
        match self
            .dependencies
            .iter_mut()
            .find(|d| d.url == dependency.url)
        {
            Some(existing) => {
                *existing = dependency;
                true
            }
            None => {
                self.dependencies.push(dependency);
                false
            }
        }
    }

    pub fn find(&self, name: &str) -> Result<&Dependency, ProjectError> {
        self.dependencies
            .iter()
            .find(|d| d.is_named(name))
            .ok_or_else(|| ProjectError::DependencyNotFound {
                name: name.to_string(),
            })
    }

    pub fn find_mut(&mut self, name: &str) -> Result<&mut Dependency, ProjectError> {
        self.dependencies
            .iter_mut()
            .find(|d| d.is_named(name))
            .ok_or_else(|| ProjectError::DependencyNotFound {
                name: name.to_string(),
            })
    }

    pub fn remove(&mut self, name: &str) -> Result<Dependency, ProjectError> {
        let position = self
            .dependencies
            .iter()
            .position(|d| d.is_named(name))
            .ok_or_else(|| ProjectError::DependencyNotFound {
                name: name.to_string(),
            })?;
        Ok(self.dependencies.remove(position))
    }

    /// Whether any declared dependency can be served by the stored version `identity`.
    pub fn declares(&self, identity: &RepositoryIdentity) -> bool {
        self.dependencies
            .iter()
            .any(|d| identity.satisfies(&d.identity()))
    }
}
