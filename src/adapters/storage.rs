//! Directory layout for live activities.
//!
//! Each activity gets `<root>/<uuid>/` with `install`, `log`, `data`, `tmp`
//! and `internal` subdirectories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;
use uuid::Uuid;

use super::{LiveActivityFilesystem, LiveActivityStorageManager};

const SUBDIRECTORY_INSTALL: &str = "install";
const SUBDIRECTORY_LOG: &str = "log";
const SUBDIRECTORY_DATA_PERMANENT: &str = "data";
const SUBDIRECTORY_DATA_TEMPORARY: &str = "tmp";
const SUBDIRECTORY_INTERNAL: &str = "internal";

/// Filesystem rooted at one activity's base directory
#[derive(Debug, Clone)]
pub struct SimpleLiveActivityFilesystem {
    install_dir: PathBuf,
    log_dir: PathBuf,
    data_dir: PathBuf,
    tmp_dir: PathBuf,
    internal_dir: PathBuf,
}

impl SimpleLiveActivityFilesystem {
    /// Lay out the standard subdirectories under `base`
    pub fn new(base: &Path) -> Self {
        Self {
            install_dir: base.join(SUBDIRECTORY_INSTALL),
            log_dir: base.join(SUBDIRECTORY_LOG),
            data_dir: base.join(SUBDIRECTORY_DATA_PERMANENT),
            tmp_dir: base.join(SUBDIRECTORY_DATA_TEMPORARY),
            internal_dir: base.join(SUBDIRECTORY_INTERNAL),
        }
    }

    /// Create any missing directories
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.install_dir,
            &self.log_dir,
            &self.data_dir,
            &self.tmp_dir,
            &self.internal_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create activity directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

impl LiveActivityFilesystem for SimpleLiveActivityFilesystem {
    fn install_directory(&self) -> &Path {
        &self.install_dir
    }

    fn log_directory(&self) -> &Path {
        &self.log_dir
    }

    fn permanent_data_directory(&self) -> &Path {
        &self.data_dir
    }

    fn temp_data_directory(&self) -> &Path {
        &self.tmp_dir
    }

    fn internal_directory(&self) -> &Path {
        &self.internal_dir
    }
}

/// Storage manager keeping every activity under one root directory
#[derive(Debug, Clone)]
pub struct SimpleLiveActivityStorageManager {
    root: PathBuf,
}

impl SimpleLiveActivityStorageManager {
    /// Create a storage manager rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory for all activities
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn filesystem(&self, uuid: Uuid) -> SimpleLiveActivityFilesystem {
        SimpleLiveActivityFilesystem::new(&self.root.join(uuid.to_string()))
    }
}

impl LiveActivityStorageManager for SimpleLiveActivityStorageManager {
    fn activity_filesystem(&self, uuid: Uuid) -> Result<Arc<dyn LiveActivityFilesystem>> {
        let filesystem = self.filesystem(uuid);
        filesystem.ensure_directories()?;
        Ok(Arc::new(filesystem))
    }

    fn clean_tmp_data(&self, uuid: Uuid) -> Result<()> {
        delete_directory_contents(self.filesystem(uuid).temp_data_directory())
    }

    fn clean_permanent_data(&self, uuid: Uuid) -> Result<()> {
        delete_directory_contents(self.filesystem(uuid).permanent_data_directory())
    }
}

/// Remove the contents of `dir`, keeping the directory itself
fn delete_directory_contents(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.with_context(|| format!("Failed to remove: {}", path.display()))?;
    }

    debug!(dir = %dir.display(), "Cleaned directory contents");
    Ok(())
}
