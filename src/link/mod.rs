use std::{
    io,
    path::{Component, Path, PathBuf},
};

use log::{debug, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Refusing to link {} to {}: the link would contain its own target", .target.display(), .origin.display())]
    SelfReferential { origin: PathBuf, target: PathBuf },
    #[error("{} exists and is not a link", .target.display())]
    TargetOccupied { target: PathBuf },
    #[error("Invalid directory selection {subdir:?}: must be a relative path inside the repository")]
    InvalidSubdirectory { subdir: String },
    #[error("Link source {} does not exist", .path.display())]
    SourceMissing { path: PathBuf },
    #[error("IO error at {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
    #[error("Could not link {} of the selected directories into {}: {}", .failures.len(), .target.display(), describe(.failures))]
    Bundle {
        target: PathBuf,
        failures: Vec<(String, LinkError)>,
    },
}

fn describe(failures: &[(String, LinkError)]) -> String {
    failures
        .iter()
        .map(|(subdir, error)| format!("{subdir}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> LinkError + '_ {
    move |error| LinkError::Io {
        path: path.to_path_buf(),
        error,
    }
}

/// Creates and removes a single directory link. Implementations are picked
/// per platform by [`PlatformLink`].
pub trait LinkBackend {
    fn create_link(&self, source: &Path, target: &Path) -> io::Result<()>;

    fn remove_link(&self, path: &Path) -> io::Result<()>;
}

#[cfg(unix)]
#[derive(Default)]
pub struct SymlinkBackend;

#[cfg(unix)]
impl LinkBackend for SymlinkBackend {
    fn create_link(&self, source: &Path, target: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(source, target)
    }

    fn remove_link(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Directory junctions, which unlike symlinks need no elevated privileges.
#[cfg(windows)]
#[derive(Default)]
pub struct JunctionBackend;

#[cfg(windows)]
impl LinkBackend for JunctionBackend {
    fn create_link(&self, source: &Path, target: &Path) -> io::Result<()> {
        junction::create(source, target)
    }

    fn remove_link(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }
}

#[cfg(unix)]
pub type PlatformLink = SymlinkBackend;
#[cfg(windows)]
pub type PlatformLink = JunctionBackend;

/// Materializes cache clones into a project's link subdirectory.
pub struct Materializer<L> {
    backend: L,
}

impl<L: LinkBackend> Materializer<L> {
    pub fn new(backend: L) -> Materializer<L> {
        Materializer { backend }
    }

    /// Points `target` at `source`, replacing a stale link or file at `target`.
    ///
    /// Fails without touching the filesystem when one path contains the other.
    pub fn link_whole(&self, source: &Path, target: &Path) -> Result<(), LinkError> {
        let source = normalize(source).map_err(io_error(source))?;
        let target = normalize(target).map_err(io_error(target))?;

        if target.starts_with(&source) || source.starts_with(&target) {
            return Err(LinkError::SelfReferential {
                origin: source,
                target,
            });
        }
        if !source.exists() {
            return Err(LinkError::SourceMissing { path: source });
        }

        match std::fs::symlink_metadata(&target) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                debug!("Replacing link {}", target.display());
                self.backend
                    .remove_link(&target)
                    .map_err(io_error(&target))?;
            }
            Ok(metadata) if metadata.is_dir() => {
                return Err(LinkError::TargetOccupied { target });
            }
            Ok(_) => {
                debug!("Replacing file {}", target.display());
                std::fs::remove_file(&target).map_err(io_error(&target))?;
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(io_error(&target)(error)),
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        self.backend
            .create_link(&source, &target)
            .map_err(io_error(&target))?;
        debug!("Linked {} -> {}", target.display(), source.display());
        Ok(())
    }

    /// Links each selected subdirectory of `source` into `target_base`.
    ///
    /// Every subdirectory is attempted; failures are returned together as
    /// [`LinkError::Bundle`].
    pub fn link_bundle(
        &self,
        source: &Path,
        target_base: &Path,
        subdirs: &[String],
    ) -> Result<(), LinkError> {
        let mut failures = Vec::new();
        for subdir in subdirs {
            let result = validate_subdir(subdir).and_then(|relative| {
                self.link_whole(&source.join(relative), &target_base.join(relative))
            });
            if let Err(error) = result {
                warn!("Could not link {}: {}", subdir, error);
                failures.push((subdir.clone(), error));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LinkError::Bundle {
                target: target_base.to_path_buf(),
                failures,
            })
        }
    }

    /// Deletes a link, a file, or a bundle directory at `target`.
    ///
    /// Returns false when nothing was there. Links are removed without
    /// following them.
    pub fn remove_link_tree(&self, target: &Path) -> Result<bool, LinkError> {
        let metadata = match std::fs::symlink_metadata(target) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(error) => return Err(io_error(target)(error)),
        };

        let removed = if metadata.file_type().is_symlink() {
            self.backend.remove_link(target)
        } else if metadata.is_dir() {
            std::fs::remove_dir_all(target)
        } else {
            std::fs::remove_file(target)
        };
        removed.map_err(io_error(target))?;

        debug!("Removed {}", target.display());
        Ok(true)
    }
}

fn validate_subdir(subdir: &str) -> Result<&Path, LinkError> {
    let path = Path::new(subdir);
    let valid = path
        .components()
        .any(|component| matches!(component, Component::Normal(_)))
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if valid {
        Ok(path)
    } else {
        Err(LinkError::InvalidSubdirectory {
            subdir: subdir.to_string(),
        })
    }
}

/// Absolute form of `path` with `.` and `..` resolved lexically. Links are
/// not followed, so a path can be checked before it exists.
fn normalize(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}
