use std::path::{Path, PathBuf};

use log::{debug, error, info};
use thiserror::Error;

use crate::{
    cache::{CacheEntry, CacheError, CacheStore, ModuleCache},
    git::{FetchError, Fetcher, GitClient},
    link::{LinkBackend, LinkError, Materializer},
    model::{
        identity::RepositoryIdentity,
        project::{Dependency, ProjectConfig, ProjectError},
    },
};

pub(crate) const WARNING_FILE: &str = "WARN.md";

const WARNING: &str = "# Managed by repolink

Every entry in this directory is a link into the shared repolink cache.
The directory is deleted and rebuilt by `repolink fetch`, so do not keep
your own files here. Edit the project configuration instead.
";

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error("Dependency cycle detected: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },
    #[error("{} dependencies could not be fetched: {}", .failures.len(), describe(.failures))]
    Incomplete { failures: Vec<(String, FetchError)> },
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

fn describe(failures: &[(String, FetchError)]) -> String {
    failures
        .iter()
        .map(|(name, error)| format!("{name} ({error})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolves a project's declared dependencies into links backed by the shared cache.
///
/// Dependencies are resolved depth first: a cached clone that carries its own
/// project configuration is resolved as a project in turn, registered as a
/// dependent of its own dependencies.
pub struct Resolver<'a, S, G, L> {
    cache: &'a ModuleCache<S>,
    fetcher: &'a Fetcher<G>,
    materializer: &'a Materializer<L>,
    project_file: PathBuf,
}

impl<'a, S, G, L> Resolver<'a, S, G, L>
where
    S: CacheStore,
    G: GitClient,
    L: LinkBackend,
{
    pub fn new(
        cache: &'a ModuleCache<S>,
        fetcher: &'a Fetcher<G>,
        materializer: &'a Materializer<L>,
        project_file: impl Into<PathBuf>,
    ) -> Self {
        Resolver {
            cache,
            fetcher,
            materializer,
            project_file: project_file.into(),
        }
    }

    /// Rebuilds the project's link directory from its configuration.
    ///
    /// A dependency that fails to fetch does not stop its siblings; all such
    /// failures are returned together as [`ResolveError::Incomplete`].
    pub fn fetch_project(&self, project_dir: &Path) -> Result<(), ResolveError> {
        let project_dir = std::path::absolute(project_dir)?;
        let config = ProjectConfig::load(&project_dir.join(&self.project_file))?;
        self.cache.register_client(&project_dir, &self.project_file)?;

        let link_dir = config.link_dir(&project_dir)?;
        let declared = config.dependencies.len();
        info!(
            "Resolving {} dependencies of {}",
            declared,
            project_dir.display()
        );

        let mut failures = Vec::new();
        self.resolve_project(&project_dir, config, &mut Vec::new(), &mut failures)?;
        if !failures.is_empty() {
            return Err(ResolveError::Incomplete { failures });
        }

        if declared > 0 {
            write_warning(&link_dir)?;
        }
        Ok(())
    }

    /// Resolves a single declared dependency and refreshes only its link.
    pub fn fetch_dependency(&self, project_dir: &Path, name: &str) -> Result<(), ResolveError> {
        let project_dir = std::path::absolute(project_dir)?;
        let config_path = project_dir.join(&self.project_file);
        let mut config = ProjectConfig::load(&config_path)?;
        self.cache.register_client(&project_dir, &self.project_file)?;

        let link_dir = config.link_dir(&project_dir)?;
        let mut failures = Vec::new();
        let dependency = config.find_mut(name)?;
        let renamed = self.resolve_dependency(
            &project_dir,
            &link_dir,
            dependency,
            &mut Vec::new(),
            &mut failures,
        )?;
        if renamed {
            config.save(&config_path)?;
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ResolveError::Incomplete { failures })
        }
    }

    fn resolve_project(
        &self,
        project_dir: &Path,
        mut config: ProjectConfig,
        chain: &mut Vec<String>,
        failures: &mut Vec<(String, FetchError)>,
    ) -> Result<(), ResolveError> {
        let link_dir = config.link_dir(project_dir)?;
        if self.materializer.remove_link_tree(&link_dir)? {
            debug!("Cleared {}", link_dir.display());
        }

        let mut renamed = false;
        for dependency in config.dependencies.iter_mut() {
            renamed |= self.resolve_dependency(project_dir, &link_dir, dependency, chain, failures)?;
        }

        if renamed {
            config.save(&project_dir.join(&self.project_file))?;
        }
        Ok(())
    }

    /// Returns true when the dependency's recorded name changed.
    fn resolve_dependency(
        &self,
        project_dir: &Path,
        link_dir: &Path,
        dependency: &mut Dependency,
        chain: &mut Vec<String>,
        failures: &mut Vec<(String, FetchError)>,
    ) -> Result<bool, ResolveError> {
        let identity = dependency.identity();
        let name = match dependency.resolved_name() {
            Ok(name) => name,
            Err(error) => {
                error!("Skipping {}: {}", dependency.url, error);
                failures.push((dependency.url.clone(), error.into()));
                return Ok(false);
            }
        };

        let (key, entry) = match self.cached(&identity)? {
            Some(found) => found,
            None => match self.fetcher.fetch(&identity) {
                Ok(path) => self.cache.put(&identity, &path)?,
                Err(error) => {
                    error!("Failed to fetch {}: {}", identity, error);
                    failures.push((name, error));
                    return Ok(false);
                }
            },
        };

        self.cache.add_dependent(&key, project_dir)?;
        self.resolve_nested(&key, &entry, chain, failures)?;

        let target = link_dir.join(&name);
        if dependency.is_bundle() {
            self.materializer
                .link_bundle(&entry.path, &target, &dependency.directories)?;
        } else {
            self.materializer.link_whole(&entry.path, &target)?;
        }

        if dependency.name != name {
            dependency.name = name;
            return Ok(true);
        }
        Ok(false)
    }

    /// Cache hit whose clone is still on disk.
    fn cached(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<Option<(String, CacheEntry)>, ResolveError> {
        match self.cache.lookup(identity)? {
            Some((key, entry)) if entry.path.is_dir() => {
                debug!("Using cached {} from slot {}", identity, key);
                Ok(Some((key, entry)))
            }
            Some((key, entry)) => {
                info!(
                    "Cached clone {} for slot {} is gone, fetching again",
                    entry.path.display(),
                    key
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn resolve_nested(
        &self,
        key: &str,
        entry: &CacheEntry,
        chain: &mut Vec<String>,
        failures: &mut Vec<(String, FetchError)>,
    ) -> Result<(), ResolveError> {
        let Some(nested) = ProjectConfig::load_if_present(&entry.path.join(&self.project_file))?
        else {
            return Ok(());
        };

        if chain.iter().any(|k| k == key) {
            let mut cycle = chain.clone();
            cycle.push(key.to_string());
            return Err(ResolveError::Cycle { chain: cycle });
        }

        debug!("Resolving nested dependencies of {}", key);
        chain.push(key.to_string());
        let result = self.resolve_project(&entry.path, nested, chain, failures);
        chain.pop();
        result
    }
}

fn write_warning(link_dir: &Path) -> Result<(), std::io::Error> {
    let path = link_dir.join(WARNING_FILE);
    if path.exists() || !link_dir.is_dir() {
        return Ok(());
    }
    std::fs::write(path, WARNING)
}
