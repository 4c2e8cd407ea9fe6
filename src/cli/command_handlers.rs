use log::{debug, info};

use crate::{
    cache::{CacheStore, ModuleCache},
    clean::{collect_garbage, CleanReport},
    fetch::{Resolver, WARNING_FILE},
    git::{Fetcher, GitClient},
    link::{LinkBackend, Materializer},
    model::project::{Dependency, ProjectConfig, ProjectError},
};
use std::{
    error::Error,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

const GITIGNORE: &str = ".gitignore";

/// New values for a declared dependency. `None` keeps the current value and
/// an empty value clears it.
#[derive(Debug, Default, Clone)]
pub struct DependencyChange {
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub directories: Option<Vec<String>>,
}

/// Handler to init command
pub fn do_init<S: CacheStore>(
    cache: &ModuleCache<S>,
    root: &Path,
    project_file: &Path,
    link_subdir: &str,
) -> Result<(), Box<dyn Error>> {
    let root = std::path::absolute(root)?;
    let config_path = root.join(project_file);
    if config_path.exists() {
        return Err(ProjectError::AlreadyInitialized { path: config_path }.into());
    }

    let config = ProjectConfig::new(link_subdir);
    config.link_dir(&root)?;
    config.save(&config_path)?;
    add_to_gitignore(&root, link_subdir)?;
    cache.register_client(&root, project_file)?;

    info!("Initialized {}", config_path.display());
    Ok(())
}

/// Handler to add command. Declares the dependency, replacing an existing
/// declaration of the same url; nothing is fetched.
pub fn do_add(
    root: &Path,
    project_file: &Path,
    dependency: Dependency,
) -> Result<(), Box<dyn Error>> {
    let config_path = root.join(project_file);
    let mut config = ProjectConfig::load(&config_path)?;

    let name = dependency.name.clone();
    if config.upsert(dependency) {
        info!("Replaced the declaration of {}", name);
    } else {
        info!("Declared {}", name);
    }
    config.save(&config_path)?;
    Ok(())
}

/// Handler to update command
///
/// Rewrites the declaration, releases the project's claim on the previously
/// resolved version, and links the dependency again.
pub fn do_update<S: CacheStore, G: GitClient, L: LinkBackend>(
    cache: &ModuleCache<S>,
    fetcher: &Fetcher<G>,
    materializer: &Materializer<L>,
    root: &Path,
    project_file: &Path,
    name: &str,
    change: DependencyChange,
) -> Result<(), Box<dyn Error>> {
    let root = std::path::absolute(root)?;
    let config_path = root.join(project_file);
    let mut config = ProjectConfig::load(&config_path)?;
    let link_dir = config.link_dir(&root)?;

    let dependency = config.find_mut(name)?;
    let previous = dependency.identity();
    let link_name = dependency.resolved_name()?;
    if let Some(branch) = change.branch {
        dependency.branch = Some(branch).filter(|b| !b.is_empty());
    }
    if let Some(commit) = change.commit {
        dependency.commit = Some(commit).filter(|c| !c.is_empty());
    }
    if let Some(directories) = change.directories {
        dependency.directories = directories.into_iter().filter(|d| !d.is_empty()).collect();
    }
    let current = dependency.identity();
    config.save(&config_path)?;

    if previous != current {
        for key in cache.release(&previous.url, &root)? {
            debug!("Released {} from {}", root.display(), key);
        }
    }
    materializer.remove_link_tree(&link_dir.join(&link_name))?;

    Resolver::new(cache, fetcher, materializer, project_file).fetch_dependency(&root, name)?;
    info!("Updated {}", name);
    Ok(())
}

/// Handler to remove command
pub fn do_remove<S: CacheStore, L: LinkBackend>(
    cache: &ModuleCache<S>,
    materializer: &Materializer<L>,
    root: &Path,
    project_file: &Path,
    name: &str,
) -> Result<(), Box<dyn Error>> {
    let root = std::path::absolute(root)?;
    let config_path = root.join(project_file);
    let mut config = ProjectConfig::load(&config_path)?;
    let link_dir = config.link_dir(&root)?;

    let dependency = config.remove(name)?;
    config.save(&config_path)?;

    for key in cache.release(&dependency.url, &root)? {
        debug!("Released {} from {}", root.display(), key);
    }
    materializer.remove_link_tree(&link_dir.join(dependency.resolved_name()?))?;
    remove_if_unused(&link_dir)?;

    info!("Removed {}", name);
    Ok(())
}

/// Handler to fetch command
pub fn do_fetch<S: CacheStore, G: GitClient, L: LinkBackend>(
    cache: &ModuleCache<S>,
    fetcher: &Fetcher<G>,
    materializer: &Materializer<L>,
    root: &Path,
    project_file: &Path,
) -> Result<(), Box<dyn Error>> {
    Resolver::new(cache, fetcher, materializer, project_file).fetch_project(root)?;
    Ok(())
}

/// Handler to clean command
pub fn do_clean<S: CacheStore>(
    cache: &ModuleCache<S>,
    project_file: &Path,
) -> Result<CleanReport, Box<dyn Error>> {
    let report = collect_garbage(cache, project_file)?;
    if report.is_empty() {
        info!("Cache is clean, nothing to do");
    }
    Ok(report)
}

/// Handler to list command
pub fn do_list(
    root: &Path,
    project_file: &Path,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    let config = ProjectConfig::load(&root.join(project_file))?;
    if config.dependencies.is_empty() {
        writeln!(out, "No dependencies declared.")?;
        return Ok(());
    }

    writeln!(out, "Dependencies:")?;
    for dependency in &config.dependencies {
        let name = dependency
            .resolved_name()
            .unwrap_or_else(|_| dependency.name.clone());
        writeln!(out, "- {name}")?;
        writeln!(out, "  url: {}", dependency.url)?;
        writeln!(out, "  branch: {}", dependency.branch.as_deref().unwrap_or(""))?;
        writeln!(out, "  commit: {}", dependency.commit.as_deref().unwrap_or(""))?;
        if dependency.is_bundle() {
            writeln!(out, "  directories: {}", dependency.directories.join(", "))?;
        }
    }
    Ok(())
}

/// Handler to `list --cache`
pub fn do_list_cache<S: CacheStore>(
    cache: &ModuleCache<S>,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    let entries = cache.entries()?;
    if entries.is_empty() {
        writeln!(out, "Cache is empty.")?;
        return Ok(());
    }

    for (key, entry) in entries {
        writeln!(out, "- {key}")?;
        writeln!(out, "  url: {}", entry.identity.url)?;
        writeln!(out, "  branch: {}", entry.identity.branch.as_deref().unwrap_or(""))?;
        writeln!(out, "  commit: {}", entry.identity.commit.as_deref().unwrap_or(""))?;
        writeln!(out, "  path: {}", entry.path.display())?;
        for dependent in &entry.dependents {
            writeln!(out, "  dependent: {}", dependent.display())?;
        }
    }
    Ok(())
}

/// Handler to git command. Runs the `git` executable inside the cached clone
/// of the named dependency; `args` are passed through as separate arguments.
pub fn do_git<S: CacheStore>(
    cache: &ModuleCache<S>,
    root: &Path,
    project_file: &Path,
    name: &str,
    args: &[String],
) -> Result<(), Box<dyn Error>> {
    let clone = cached_clone(cache, root, project_file, name)?;
    debug!("Running git {:?} in {}", args, clone.display());

    let status = Command::new("git").args(args).current_dir(&clone).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("git exited with {status}").into())
    }
}

fn cached_clone<S: CacheStore>(
    cache: &ModuleCache<S>,
    root: &Path,
    project_file: &Path,
    name: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let config = ProjectConfig::load(&root.join(project_file))?;
    let dependency = config.find(name)?;
    match cache.lookup(&dependency.identity())? {
        Some((_, entry)) if entry.path.is_dir() => Ok(entry.path),
        _ => Err(format!("{name} has not been fetched yet. Run `repolink fetch` first").into()),
    }
}

/// Appends `entry` to the project's `.gitignore` unless a line already ignores it.
fn add_to_gitignore(root: &Path, entry: &str) -> Result<(), Box<dyn Error>> {
    let path = root.join(GITIGNORE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };

    let entry = entry.trim_matches('/');
    if contents
        .lines()
        .any(|line| line.trim().trim_matches('/') == entry)
    {
        debug!("{} already ignores {}", path.display(), entry);
        return Ok(());
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    if !contents.is_empty() && !contents.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{entry}")?;
    Ok(())
}

/// Deletes the link directory when nothing but the warning file is left.
fn remove_if_unused(link_dir: &Path) -> Result<(), std::io::Error> {
    let entries = match std::fs::read_dir(link_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    for entry in entries {
        if entry?.file_name() != WARNING_FILE {
            return Ok(());
        }
    }
    info!("Removing empty {}", link_dir.display());
    std::fs::remove_dir_all(link_dir)
}
