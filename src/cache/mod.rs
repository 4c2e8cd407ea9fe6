mod store;

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::model::{identity::RepositoryIdentity, project::DEFAULT_PROJECT_FILE, ParseError};

pub use store::{JsonCacheStore, MemoryCacheStore};

const CACHE_DOCUMENT: &str = "cache.json";
const MODULES_DIR: &str = "modules";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache document {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Module {key} not found in cache")]
    ModuleNotFound { key: String },
    #[error("Cache location {location} is not a directory")]
    BadLocation { location: String },
    #[error("Error while serializing cache document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Invalid repository identity: {0}")]
    Parse(#[from] ParseError),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// Whole-document persistence for the cache. Every [`ModuleCache`] mutation is
/// one `load` followed by one `save`; nothing guards against a concurrent writer.
pub trait CacheStore {
    fn load(&self) -> Result<CacheDocument, CacheError>;

    fn save(&self, document: &CacheDocument) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDocument {
    #[serde(default)]
    pub modules: BTreeMap<String, CacheEntry>,
    /// Every project that ran `init` or `fetch`, with the name of its
    /// project file.
    #[serde(default, deserialize_with = "client_registry")]
    pub clients: BTreeMap<PathBuf, PathBuf>,
}

/// One fetched repository version and the projects currently depending on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    #[serde(flatten)]
    pub identity: RepositoryIdentity,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependents: BTreeSet<PathBuf>,
}

impl CacheEntry {
    pub fn name(&self) -> Result<String, ParseError> {
        self.identity.name()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClientRegistry {
    Named(BTreeMap<PathBuf, PathBuf>),
    Unnamed(Vec<PathBuf>),
}

/// Reads the registry as a `{path: project file}` map. A plain list of paths
/// is accepted, each with the default project file.
fn client_registry<'de, D>(deserializer: D) -> Result<BTreeMap<PathBuf, PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<ClientRegistry>::deserialize(deserializer)? {
        Some(ClientRegistry::Named(clients)) => clients,
        Some(ClientRegistry::Unnamed(clients)) => clients
            .into_iter()
            .map(|client| (client, PathBuf::from(DEFAULT_PROJECT_FILE)))
            .collect(),
        None => BTreeMap::new(),
    })
}

pub struct ModuleCache<S> {
    store: S,
    modules_dir: PathBuf,
}

impl ModuleCache<JsonCacheStore> {
    /// Opens the cache rooted at `location`, creating the directory layout
    /// (`cache.json` plus a `modules` directory) on first use.
    pub fn open(location: PathBuf) -> Result<ModuleCache<JsonCacheStore>, CacheError> {
        if location.exists() {
            if !location.is_dir() {
                return Err(CacheError::BadLocation {
                    location: location.to_str().unwrap_or("").to_string(),
                });
            }
        } else {
            info!("Initializing cache at {}", location.display());
        }

        let modules_dir = location.join(MODULES_DIR);
        std::fs::create_dir_all(&modules_dir)?;

        let store = JsonCacheStore::new(location.join(CACHE_DOCUMENT));
        Ok(ModuleCache::new(store, modules_dir))
    }
}

impl<S: CacheStore> ModuleCache<S> {
    pub fn new(store: S, modules_dir: PathBuf) -> ModuleCache<S> {
        ModuleCache { store, modules_dir }
    }

    /// Directory holding one clone per cache slot.
    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut CacheDocument) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let mut document = self.store.load()?;
        let result = f(&mut document)?;
        self.store.save(&document)?;
        Ok(result)
    }

    /// Finds a slot that can serve `identity`: its own slot when present,
    /// otherwise the first entry in key order whose stored version satisfies it.
    pub fn lookup(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<Option<(String, CacheEntry)>, CacheError> {
        let key = identity.cache_key()?;
        let mut modules = self.store.load()?.modules;
        if let Some(entry) = modules.remove(&key) {
            if entry.identity.satisfies(identity) {
                return Ok(Some((key, entry)));
            }
        }
        Ok(modules
            .into_iter()
            .find(|(_, entry)| entry.identity.satisfies(identity)))
    }

    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.store.load()?.modules.remove(key))
    }

    pub fn entries(&self) -> Result<BTreeMap<String, CacheEntry>, CacheError> {
        Ok(self.store.load()?.modules)
    }

    /// Records `identity` as stored at `path`. An existing entry in the same
    /// slot is overwritten but keeps its dependents.
    pub fn put(
        &self,
        identity: &RepositoryIdentity,
        path: &Path,
    ) -> Result<(String, CacheEntry), CacheError> {
        let key = identity.cache_key()?;
        self.update(|document| {
            let dependents = document
                .modules
                .remove(&key)
                .map(|previous| previous.dependents)
                .unwrap_or_default();
            let entry = CacheEntry {
                path: path.to_path_buf(),
                identity: identity.clone(),
                dependents,
            };
            document.modules.insert(key.clone(), entry.clone());
            debug!("Stored {} in cache slot {}", identity, key);
            Ok((key, entry))
        })
    }

    /// Returns true when `project` was not yet a dependent.
    pub fn add_dependent(&self, key: &str, project: &Path) -> Result<bool, CacheError> {
        self.update(|document| {
            let entry =
                document
                    .modules
                    .get_mut(key)
                    .ok_or_else(|| CacheError::ModuleNotFound {
                        key: key.to_string(),
                    })?;
            Ok(entry.dependents.insert(project.to_path_buf()))
        })
    }

    /// Returns true when `project` was a dependent. Unknown slots are ignored.
    pub fn remove_dependent(&self, key: &str, project: &Path) -> Result<bool, CacheError> {
        self.update(|document| {
            Ok(document
                .modules
                .get_mut(key)
                .is_some_and(|entry| entry.dependents.remove(project)))
        })
    }

    /// Removes `project` from every slot holding a version of `url` and
    /// returns those slots.
    pub fn release(&self, url: &str, project: &Path) -> Result<Vec<String>, CacheError> {
        self.update(|document| {
            Ok(document
                .modules
                .iter_mut()
                .filter(|(_, entry)| entry.identity.url == url)
                .filter_map(|(key, entry)| entry.dependents.remove(project).then(|| key.clone()))
                .collect())
        })
    }

    /// Removes the entry and deletes its clone when nothing depends on it.
    ///
    /// Storage outside the modules directory is never deleted; such an entry
    /// is only dropped from the document.
    pub fn evict_if_orphaned(&self, key: &str) -> Result<bool, CacheError> {
        self.update(|document| {
            let Some(entry) = document.modules.get(key) else {
                return Ok(false);
            };
            if !entry.dependents.is_empty() {
                return Ok(false);
            }

            if entry.path.starts_with(&self.modules_dir) {
                match std::fs::remove_dir_all(&entry.path) {
                    Ok(()) => {}
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                    Err(error) => return Err(error.into()),
                }
            } else {
                warn!(
                    "Not deleting {} for cache slot {}: it is outside {}",
                    entry.path.display(),
                    key,
                    self.modules_dir.display()
                );
            }
            document.modules.remove(key);
            info!("Evicted {} from the cache", key);
            Ok(true)
        })
    }

    /// Drops the entry without touching the filesystem.
    pub fn remove_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.update(|document| Ok(document.modules.remove(key)))
    }

    /// Records `project` and the project file it was set up with. Returns
    /// true when the registry changed.
    pub fn register_client(&self, project: &Path, project_file: &Path) -> Result<bool, CacheError> {
        self.update(|document| {
            let previous = document
                .clients
                .insert(project.to_path_buf(), project_file.to_path_buf());
            Ok(previous.as_deref() != Some(project_file))
        })
    }

    pub fn forget_client(&self, project: &Path) -> Result<bool, CacheError> {
        self.update(|document| Ok(document.clients.remove(project).is_some()))
    }

    pub fn clients(&self) -> Result<BTreeMap<PathBuf, PathBuf>, CacheError> {
        Ok(self.store.load()?.clients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn memory_cache(modules_dir: &Path) -> ModuleCache<MemoryCacheStore> {
        ModuleCache::new(MemoryCacheStore::default(), modules_dir.to_path_buf())
    }

    fn identity(commit: Option<&str>) -> RepositoryIdentity {
        RepositoryIdentity::new(
            "https://example.com/foo.git",
            None,
            commit.map(str::to_owned),
        )
    }

    #[test]
    fn put_and_lookup() {
        let cache = memory_cache(Path::new("/cache/modules"));
        assert!(cache.lookup(&identity(None)).unwrap().is_none());

        let (key, entry) = cache
            .put(&identity(Some("abc")), Path::new("/cache/modules/foo@@abc"))
            .unwrap();
        assert_eq!(key, "foo@@abc");
        assert_eq!(entry.name().unwrap(), "foo");

        let (found_key, _) = cache.lookup(&identity(None)).unwrap().unwrap();
        assert_eq!(found_key, "foo@@abc");
        assert!(cache.lookup(&identity(Some("def"))).unwrap().is_none());
    }

    #[test]
    fn distinct_versions_use_distinct_slots() {
        let cache = memory_cache(Path::new("/cache/modules"));
        cache
            .put(&identity(Some("abc")), Path::new("/cache/modules/foo@@abc"))
            .unwrap();
        cache
            .put(&identity(Some("def")), Path::new("/cache/modules/foo@@def"))
            .unwrap();

        let entries = cache.entries().unwrap();
        assert_eq!(
            entries.keys().cloned().collect::<Vec<_>>(),
            vec!["foo@@abc".to_string(), "foo@@def".to_string()]
        );
    }

    #[test]
    fn put_keeps_dependents_of_the_slot() {
        let cache = memory_cache(Path::new("/cache/modules"));
        let (key, _) = cache
            .put(&identity(None), Path::new("/cache/modules/foo"))
            .unwrap();
        cache.add_dependent(&key, Path::new("/work/a")).unwrap();

        let (_, entry) = cache
            .put(&identity(None), Path::new("/cache/modules/foo"))
            .unwrap();
        assert_eq!(entry.dependents, BTreeSet::from([PathBuf::from("/work/a")]));
    }

    #[test]
    fn dependents_are_a_set() {
        let cache = memory_cache(Path::new("/cache/modules"));
        let (key, _) = cache
            .put(&identity(None), Path::new("/cache/modules/foo"))
            .unwrap();

        assert!(cache.add_dependent(&key, Path::new("/work/a")).unwrap());
        assert!(!cache.add_dependent(&key, Path::new("/work/a")).unwrap());
        assert!(cache.add_dependent(&key, Path::new("/work/b")).unwrap());
        assert_eq!(cache.get(&key).unwrap().unwrap().dependents.len(), 2);

        assert!(cache.remove_dependent(&key, Path::new("/work/a")).unwrap());
        assert!(!cache.remove_dependent(&key, Path::new("/work/a")).unwrap());
        assert!(!cache.remove_dependent("unknown", Path::new("/work/a")).unwrap());
        assert!(matches!(
            cache.add_dependent("unknown", Path::new("/work/a")),
            Err(CacheError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn evict_only_orphans() {
        let temp = tempfile::tempdir().unwrap();
        let modules_dir = temp.path().join("modules");
        let clone = modules_dir.join("foo");
        std::fs::create_dir_all(clone.join("src")).unwrap();
        std::fs::write(clone.join("src").join("lib.rs"), "").unwrap();

        let cache = memory_cache(&modules_dir);
        let (key, _) = cache.put(&identity(None), &clone).unwrap();
        cache.add_dependent(&key, Path::new("/work/a")).unwrap();

        assert!(!cache.evict_if_orphaned(&key).unwrap());
        assert!(clone.exists());

        cache.remove_dependent(&key, Path::new("/work/a")).unwrap();
        assert!(cache.evict_if_orphaned(&key).unwrap());
        assert!(!clone.exists());
        assert!(cache.get(&key).unwrap().is_none());
        assert!(!cache.evict_if_orphaned(&key).unwrap());
    }

    #[test]
    fn evict_never_deletes_outside_modules_dir() {
        let temp = tempfile::tempdir().unwrap();
        let outside = temp.path().join("precious");
        std::fs::create_dir_all(&outside).unwrap();

        let cache = memory_cache(&temp.path().join("modules"));
        let (key, _) = cache.put(&identity(None), &outside).unwrap();
        assert!(cache.evict_if_orphaned(&key).unwrap());
        assert!(outside.exists());
        assert!(cache.entries().unwrap().is_empty());
    }

    #[test]
    fn unpinned_clone_does_not_serve_a_pinned_request() {
        let cache = memory_cache(Path::new("/cache/modules"));
        cache
            .put(&identity(None), Path::new("/cache/modules/foo"))
            .unwrap();

        assert!(cache.lookup(&identity(Some("abc"))).unwrap().is_none());

        cache
            .put(&identity(Some("abc")), Path::new("/cache/modules/foo@@abc"))
            .unwrap();
        let (key, _) = cache.lookup(&identity(Some("abc"))).unwrap().unwrap();
        assert_eq!(key, "foo@@abc");
        let (key, _) = cache.lookup(&identity(None)).unwrap().unwrap();
        assert_eq!(key, "foo");
    }

    #[test]
    fn release_covers_every_version_of_the_url() {
        let cache = memory_cache(Path::new("/cache/modules"));
        let project = Path::new("/work/a");
        for commit in [None, Some("abc"), Some("def")] {
            let (key, _) = cache
                .put(&identity(commit), Path::new("/cache/modules/x"))
                .unwrap();
            cache.add_dependent(&key, project).unwrap();
        }
        let other = RepositoryIdentity::new("https://example.com/bar.git", None, None);
        let (bar, _) = cache.put(&other, Path::new("/cache/modules/bar")).unwrap();
        cache.add_dependent(&bar, project).unwrap();
        cache.remove_dependent("foo@@def", project).unwrap();

        let released = cache.release("https://example.com/foo.git", project).unwrap();

        assert_eq!(released, vec!["foo".to_string(), "foo@@abc".to_string()]);
        assert!(cache
            .entries()
            .unwrap()
            .values()
            .filter(|entry| entry.identity.url != other.url)
            .all(|entry| entry.dependents.is_empty()));
        assert_eq!(
            cache.get(&bar).unwrap().unwrap().dependents,
            BTreeSet::from([project.to_path_buf()])
        );
    }

    #[test]
    fn clients_registry() {
        let cache = memory_cache(Path::new("/cache/modules"));
        let default_file = Path::new(DEFAULT_PROJECT_FILE);
        assert!(cache.register_client(Path::new("/work/a"), default_file).unwrap());
        assert!(!cache.register_client(Path::new("/work/a"), default_file).unwrap());
        assert!(cache
            .register_client(Path::new("/work/a"), Path::new("deps.json"))
            .unwrap());
        assert_eq!(
            cache.clients().unwrap(),
            BTreeMap::from([(PathBuf::from("/work/a"), PathBuf::from("deps.json"))])
        );
        assert!(cache.forget_client(Path::new("/work/a")).unwrap());
        assert!(cache.clients().unwrap().is_empty());
    }

    #[test]
    fn open_creates_layout() {
        let temp = tempfile::tempdir().unwrap();
        let location = temp.path().join("cache-root");
        let cache = ModuleCache::open(location.clone()).unwrap();
        assert!(location.join("modules").is_dir());
        assert_eq!(cache.modules_dir(), location.join("modules"));
        assert_eq!(cache.store().path(), location.join("cache.json"));

        let file = temp.path().join("file");
        std::fs::write(&file, "").unwrap();
        assert!(matches!(
            ModuleCache::open(file),
            Err(CacheError::BadLocation { .. })
        ));
    }

    // Concurrent invocations are not supported: every operation is an
    // unguarded read-modify-write, so a writer holding a stale document
    // silently discards whatever was saved after it loaded.
    #[test]
    fn stale_writer_loses_updates() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ModuleCache::open(temp.path().to_path_buf()).unwrap();
        let (key, _) = cache
            .put(&identity(None), &cache.modules_dir().join("foo"))
            .unwrap();

        let stale = cache.store().load().unwrap();
        cache.add_dependent(&key, Path::new("/work/a")).unwrap();
        cache.store().save(&stale).unwrap();

        assert!(cache.get(&key).unwrap().unwrap().dependents.is_empty());
    }
}
