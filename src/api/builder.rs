use std::{env, error::Error, path::PathBuf};

use home::home_dir;

use crate::{
    cache::ModuleCache,
    git::{Fetcher, LibGit},
    link::{Materializer, PlatformLink},
    model::project::{DEFAULT_LINK_SUBDIR, DEFAULT_PROJECT_FILE},
    Repolink,
};

#[derive(Default)]
pub struct RepolinkBuilder {
    // All other paths are relative to `root`
    root: Option<PathBuf>,
    project_file_name: Option<PathBuf>,
    cache_directory_path: Option<PathBuf>,
    link_subdir: Option<String>,
}

impl RepolinkBuilder {
    /// Project root directory.
    ///
    /// Defaults to the current directory.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }

    /// Name of the project configuration file.
    ///
    /// Defaults to `.repolink`.
    pub fn project_file_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_file_name = Some(path.into());
        self
    }

    /// Location of the shared cache directory.
    ///
    /// Defaults to `$HOME/.repolink`.
    pub fn cache_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_directory_path = Some(path.into());
        self
    }

    /// Link subdirectory written by `init` when none is given.
    ///
    /// Defaults to `modules`.
    pub fn link_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.link_subdir = Some(subdir.into());
        self
    }

    pub fn try_build(self) -> Result<Repolink, Box<dyn Error>> {
        let Self {
            root,
            project_file_name,
            cache_directory_path,
            link_subdir,
        } = self;
        let root = match root {
            Some(root) => std::path::absolute(root)?,
            None => env::current_dir()?,
        };

        let project_file_name =
            project_file_name.unwrap_or_else(|| PathBuf::from(DEFAULT_PROJECT_FILE));

        let cache_directory = match cache_directory_path {
            Some(path) => root.join(path),
            None => default_cache_directory()?,
        };

        let link_subdir = link_subdir.unwrap_or_else(|| DEFAULT_LINK_SUBDIR.to_string());

        let git = LibGit::open_default()?;
        let cache = ModuleCache::open(cache_directory)?;
        let fetcher = Fetcher::new(git, cache.modules_dir().to_path_buf());

        Ok(Repolink {
            cache,
            fetcher,
            materializer: Materializer::new(PlatformLink::default()),
            root,
            project_file_name,
            link_subdir,
        })
    }
}

fn default_cache_directory() -> Result<PathBuf, Box<dyn Error>> {
    let mut cache_directory =
        home_dir().ok_or("Could not find home dir. Please define $HOME env variable.")?;
    cache_directory.push(".repolink");
    Ok(cache_directory)
}
