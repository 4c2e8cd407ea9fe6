use std::{
    error::Error,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    cache::{JsonCacheStore, ModuleCache},
    clean::CleanReport,
    cli::command_handlers::{
        do_add, do_clean, do_fetch, do_git, do_init, do_list, do_list_cache, do_remove, do_update,
        DependencyChange,
    },
    git::{Fetcher, LibGit},
    link::{Materializer, PlatformLink},
    model::project::Dependency,
};

mod builder;

pub use builder::RepolinkBuilder;

pub struct Repolink {
    cache: ModuleCache<JsonCacheStore>,
    fetcher: Fetcher<LibGit>,
    materializer: Materializer<PlatformLink>,
    root: PathBuf,
    project_file_name: PathBuf,
    link_subdir: String,
}

impl Repolink {
    pub fn builder() -> RepolinkBuilder {
        RepolinkBuilder::default()
    }

    /// Creates the project configuration and registers the project with the cache
    pub fn init(&self, link_subdir: Option<String>) -> Result<(), Box<dyn Error>> {
        let link_subdir = link_subdir.unwrap_or_else(|| self.link_subdir.clone());
        do_init(&self.cache, &self.root, &self.project_file_name, &link_subdir)
    }

    /// Declares a dependency without fetching it
    pub fn add(
        &self,
        url: String,
        branch: Option<String>,
        commit: Option<String>,
        directories: Vec<String>,
    ) -> Result<(), Box<dyn Error>> {
        let dependency = Dependency::new(url, branch, commit, directories)?;
        do_add(&self.root, &self.project_file_name, dependency)
    }

    /// Replaces a dependency's declaration and links it again
    pub fn update(&self, name: &str, change: DependencyChange) -> Result<(), Box<dyn Error>> {
        do_update(
            &self.cache,
            &self.fetcher,
            &self.materializer,
            &self.root,
            &self.project_file_name,
            name,
            change,
        )
    }

    /// Removes a dependency declaration, its cache registration and its link
    pub fn remove(&self, name: &str) -> Result<(), Box<dyn Error>> {
        do_remove(
            &self.cache,
            &self.materializer,
            &self.root,
            &self.project_file_name,
            name,
        )
    }

    /// Fetches every declared dependency and rebuilds the link directory
    pub fn fetch(&self) -> Result<(), Box<dyn Error>> {
        do_fetch(
            &self.cache,
            &self.fetcher,
            &self.materializer,
            &self.root,
            &self.project_file_name,
        )
    }

    /// Evicts cache entries that no project depends on any more
    pub fn clean(&self) -> Result<CleanReport, Box<dyn Error>> {
        do_clean(&self.cache, &self.project_file_name)
    }

    pub fn list(&self, out: &mut impl Write) -> Result<(), Box<dyn Error>> {
        do_list(&self.root, &self.project_file_name, out)
    }

    pub fn list_cache(&self, out: &mut impl Write) -> Result<(), Box<dyn Error>> {
        do_list_cache(&self.cache, out)
    }

    /// Runs git with `args` inside the cached clone of dependency `name`
    pub fn git(&self, name: &str, args: &[String]) -> Result<(), Box<dyn Error>> {
        do_git(&self.cache, &self.root, &self.project_file_name, name, args)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
