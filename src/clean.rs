use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::{
    cache::{CacheError, CacheStore, ModuleCache},
    model::{identity::RepositoryIdentity, project::ProjectConfig},
};

/// What a garbage collection run changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Slots deleted because nothing depends on them any more.
    pub evicted: Vec<String>,
    /// Slots dropped from the document because their clone had vanished.
    pub vanished: Vec<String>,
    /// Dependents released from a slot, as (slot, project).
    pub released: Vec<(String, PathBuf)>,
    /// Abandoned client directories that were deleted.
    pub removed_clients: Vec<PathBuf>,
}

impl CleanReport {
    pub fn is_empty(&self) -> bool {
        self == &CleanReport::default()
    }
}

/// Releases dependents that no longer declare their cache entry and evicts
/// every entry left without dependents.
///
/// Registered clients without their project file are deleted first; each
/// client is checked against the file name it registered with. The scan then
/// repeats until a pass evicts nothing, so clones that were only needed by
/// another evicted clone go in the same run. `project_file` is used for
/// dependents that never registered as clients, such as nested clones.
pub fn collect_garbage<S: CacheStore>(
    cache: &ModuleCache<S>,
    project_file: &Path,
) -> Result<CleanReport, CacheError> {
    let mut report = CleanReport::default();

    remove_abandoned_clients(cache, &mut report)?;
    let files = ProjectFiles {
        clients: cache.clients()?,
        fallback: project_file,
    };

    let mut pass = 1;
    loop {
        debug!("Garbage collection pass {}", pass);
        if !collect_pass(cache, &files, &mut report)? {
            break;
        }
        pass += 1;
    }

    info!(
        "Evicted {} cache entries, released {} dependents",
        report.evicted.len() + report.vanished.len(),
        report.released.len()
    );
    Ok(report)
}

/// Project file name per dependent directory.
struct ProjectFiles<'a> {
    clients: BTreeMap<PathBuf, PathBuf>,
    fallback: &'a Path,
}

impl ProjectFiles<'_> {
    fn config_path(&self, project_dir: &Path) -> PathBuf {
        let file = self
            .clients
            .get(project_dir)
            .map_or(self.fallback, PathBuf::as_path);
        project_dir.join(file)
    }
}

/// Returns true when any entry left the cache.
fn collect_pass<S: CacheStore>(
    cache: &ModuleCache<S>,
    files: &ProjectFiles,
    report: &mut CleanReport,
) -> Result<bool, CacheError> {
    let mut changed = false;

    for (key, entry) in cache.entries()? {
        if !entry.path.exists() {
            warn!(
                "Clone {} of {} no longer exists, dropping it from the cache",
                entry.path.display(),
                key
            );
            cache.remove_entry(&key)?;
            report.vanished.push(key);
            changed = true;
            continue;
        }

        for dependent in &entry.dependents {
            if !still_declares(&files.config_path(dependent), &entry.identity) {
                info!("{} no longer depends on {}", dependent.display(), key);
                cache.remove_dependent(&key, dependent)?;
                report.released.push((key.clone(), dependent.clone()));
            }
        }

        if cache.evict_if_orphaned(&key)? {
            report.evicted.push(key);
            changed = true;
        }
    }

    Ok(changed)
}

fn still_declares(config_path: &Path, identity: &RepositoryIdentity) -> bool {
    match ProjectConfig::load_if_present(config_path) {
        Ok(Some(config)) => config.declares(identity),
        Ok(None) => false,
        Err(error) => {
            warn!(
                "Cannot read {}, keeping its project as a dependent of {}: {}",
                config_path.display(),
                identity,
                error
            );
            true
        }
    }
}

fn remove_abandoned_clients<S: CacheStore>(
    cache: &ModuleCache<S>,
    report: &mut CleanReport,
) -> Result<(), CacheError> {
    for (client, project_file) in cache.clients()? {
        if !client.exists() {
            debug!("Forgetting client {}", client.display());
            cache.forget_client(&client)?;
            continue;
        }
        if client.join(&project_file).exists() {
            continue;
        }
        if cache.modules_dir().starts_with(&client) {
            warn!(
                "Not deleting client {}: it contains the cache",
                client.display()
            );
            continue;
        }

        info!("Deleting abandoned project {}", client.display());
        std::fs::remove_dir_all(&client)?;
        cache.forget_client(&client)?;
        report.removed_clients.push(client);
    }
    Ok(())
}
