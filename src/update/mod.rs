pub mod backup;
pub mod install;
pub mod package;
pub mod stage;
pub mod verify;

use std::fs;
use std::path::{Path, PathBuf};

pub use backup::{AppDataBackup, BackupAndRestore, SnapshotMarker};
pub use install::{InstallOrchestrator, InstallReport};
pub use package::{UpdateChanges, UpdatePackage};
pub use stage::stage_package;
pub use verify::{verify, verify_or_reject};

/// Directories an install run works in, all below one work root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLayout {
    root: PathBuf,
}

impl UpdateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Extracted package contents; the mirror source.
    pub fn update_dir(&self) -> PathBuf {
        self.root.join("update")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("backup")
    }

    /// Full snapshot of the install directory taken before mirroring.
    pub fn install_snapshot_dir(&self) -> PathBuf {
        self.backup_dir().join("install")
    }

    pub fn app_data_dir(&self) -> PathBuf {
        self.backup_dir().join("appdata")
    }

    /// Version of the package waiting in `update_dir`, written when staging.
    pub fn staged_version_file(&self) -> PathBuf {
        self.root.join("staged.version")
    }

    /// Version of the last package installed from this work root.
    pub fn installed_version_file(&self) -> PathBuf {
        self.root.join("installed.version")
    }

    /// The work root relative to `install_dir`, when it lives inside it.
    pub fn within(&self, install_dir: &Path) -> Option<PathBuf> {
        self.root
            .strip_prefix(install_dir)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }
}

/// Reads a version file; a missing or empty file yields `None`.
pub fn read_version(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
