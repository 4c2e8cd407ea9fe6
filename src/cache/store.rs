use std::{
    cell::RefCell,
    path::{Path, PathBuf},
};

use log::{debug, trace};

use super::{CacheDocument, CacheError, CacheStore};

/// The cache document persisted as pretty-printed JSON at a fixed path.
///
/// A missing file loads as an empty document; the first save creates it.
pub struct JsonCacheStore {
    path: PathBuf,
}

impl JsonCacheStore {
    pub fn new(path: PathBuf) -> JsonCacheStore {
        JsonCacheStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for JsonCacheStore {
    fn load(&self) -> Result<CacheDocument, CacheError> {
        trace!("Loading cache document {}", self.path.display());
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "Cache document {} does not exist yet, starting empty",
                    self.path.display()
                );
                return Ok(CacheDocument::default());
            }
            Err(error) => return Err(error.into()),
        };
        serde_json::from_str(&contents).map_err(|source| CacheError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, document: &CacheDocument) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = serde_json::to_string_pretty(document)?;
        contents.push('\n');
        std::fs::write(&self.path, contents)?;
        trace!("Saved cache document {}", self.path.display());
        Ok(())
    }
}

/// Keeps the cache document in memory. Used to embed the resolver without
/// touching the user's cache and as the test double for [`JsonCacheStore`].
#[derive(Default)]
pub struct MemoryCacheStore {
    document: RefCell<CacheDocument>,
}

impl MemoryCacheStore {
    pub fn new(document: CacheDocument) -> MemoryCacheStore {
        MemoryCacheStore {
            document: RefCell::new(document),
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self) -> Result<CacheDocument, CacheError> {
        Ok(self.document.borrow().clone())
    }

    fn save(&self, document: &CacheDocument) -> Result<(), CacheError> {
        *self.document.borrow_mut() = document.clone();
        Ok(())
    }
}
