use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::disk::{FolderMirror, PathResolver};
use crate::error::{Result, UpdateError};
use crate::update::UpdateLayout;

pub const SNAPSHOT_MARKER: &str = ".snapshot";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Written into the snapshot once it is complete. Without it there is no
/// restore point.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SnapshotMarker {
    pub version: u32,
    pub source: PathBuf,
    pub created: String,
    pub files: usize,
    /// Application version the snapshot holds, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

pub fn marker_path(snapshot_dir: &Path) -> PathBuf {
    snapshot_dir.join(SNAPSHOT_MARKER)
}

pub fn read_marker(path: &Path) -> Result<SnapshotMarker> {
    let mut contents = String::new();
    File::open(path)
        .map_err(|e| UpdateError::message(format!("open {}: {}", path.display(), e)))?
        .read_to_string(&mut contents)
        .map_err(|e| UpdateError::message(format!("read {}: {}", path.display(), e)))?;
    serde_yaml::from_str(&contents)
        .map_err(|e| UpdateError::message(format!("parse {}: {}", path.display(), e)))
}

fn write_marker(path: &Path, marker: &SnapshotMarker) -> Result<()> {
    let data = serde_yaml::to_string(marker)
        .map_err(|e| UpdateError::message(format!("encode snapshot marker: {}", e)))?;
    let mut file = File::create(path)
        .map_err(|e| UpdateError::message(format!("create {}: {}", path.display(), e)))?;
    file.write_all(data.as_bytes())
        .map_err(|e| UpdateError::message(format!("write {}: {}", path.display(), e)))?;
    file.sync_all()
        .map_err(|e| UpdateError::message(format!("sync {}: {}", path.display(), e)))?;
    Ok(())
}

/// Whole-installation snapshot and rollback through the folder mirror.
#[derive(Debug, Clone)]
pub struct BackupAndRestore {
    resolver: PathResolver,
    snapshot_dir: PathBuf,
    protected: Vec<PathBuf>,
    app_version: Option<String>,
}

impl BackupAndRestore {
    pub fn new(resolver: PathResolver, layout: &UpdateLayout) -> Self {
        Self {
            resolver,
            snapshot_dir: layout.install_snapshot_dir(),
            protected: Vec::new(),
            app_version: None,
        }
    }

    /// Version recorded in the marker of the next backup.
    pub fn app_version(mut self, version: Option<String>) -> Self {
        self.app_version = version;
        self
    }

    /// Install-relative entries left out of the snapshot and left alone by a
    /// restore, such as a work root that lives inside the install directory.
    pub fn exclude<I, P>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.protected.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// The marker of the last completed backup, if one exists.
    pub fn restore_point(&self) -> Option<SnapshotMarker> {
        let path = marker_path(&self.snapshot_dir);
        if !path.exists() {
            return None;
        }
        read_marker(&path).ok()
    }

    pub fn backup(&self, install_dir: &Path) -> Result<SnapshotMarker> {
        info!(source = %install_dir.display(), target = %self.snapshot_dir.display(), "creating backup of existing installation");
        let marker = marker_path(&self.snapshot_dir);
        if marker.exists() {
            fs::remove_file(&marker)
                .map_err(|e| UpdateError::Backup(format!("remove {}: {}", marker.display(), e)))?;
        }

        let result = self
            .mirror()
            .mirror(install_dir, &self.snapshot_dir)
            .map_err(|e| UpdateError::Backup(e.to_string()))?;
        debug!(copied = result.files_copied, deleted = result.files_deleted, "snapshot updated");

        let snapshot = SnapshotMarker {
            version: SNAPSHOT_VERSION,
            source: install_dir.to_path_buf(),
            created: Local::now().to_rfc3339(),
            files: count_files(&self.snapshot_dir),
            app_version: self.app_version.clone(),
        };
        write_marker(&marker, &snapshot).map_err(|e| UpdateError::Backup(e.to_string()))?;
        info!(files = snapshot.files, "backup complete");
        Ok(snapshot)
    }

    /// Mirrors the snapshot back over `install_dir` and returns the number of
    /// files written.
    pub fn restore(&self, install_dir: &Path) -> Result<usize> {
        info!(target = %install_dir.display(), "attempting to roll back upgrade");
        let marker = marker_path(&self.snapshot_dir);
        let snapshot = read_marker(&marker).map_err(|e| {
            UpdateError::message(format!("no valid restore point in {}: {}", self.snapshot_dir.display(), e))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(UpdateError::message(format!(
                "snapshot version mismatch: expected {}, got {}",
                SNAPSHOT_VERSION, snapshot.version
            )));
        }
        let result = self
            .mirror()
            .mirror(&self.snapshot_dir, install_dir)
            .map_err(|e| UpdateError::message(format!("restore {}: {}", install_dir.display(), e)))?;
        info!(files = result.files_copied, deleted = result.files_deleted, "rolled back files");
        Ok(result.files_copied)
    }

    fn mirror(&self) -> FolderMirror {
        FolderMirror::new(self.resolver)
            .protect(self.protected.iter().cloned())
            .protect([SNAPSHOT_MARKER])
    }
}

fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_type().is_dir() && entry.file_name() != SNAPSHOT_MARKER)
        .count()
}

/// Copies the user data files aside before an install. Best effort: a failure
/// is logged and the install continues.
#[derive(Debug, Clone)]
pub struct AppDataBackup {
    target: PathBuf,
    entries: Vec<String>,
}

impl AppDataBackup {
    pub fn new(layout: &UpdateLayout, entries: Vec<String>) -> Self {
        Self {
            target: layout.app_data_dir(),
            entries,
        }
    }

    /// Returns how many entries were copied.
    pub fn backup(&self, install_dir: &Path) -> usize {
        info!(target = %self.target.display(), "backing up app data");
        if let Err(err) = reset_dir(&self.target) {
            error!(path = %self.target.display(), error = %err, "could not create an app data backup; user data is NOT backed up");
            return 0;
        }
        let mut copied = 0;
        for entry in &self.entries {
            let from = install_dir.join(entry);
            let to = self.target.join(entry);
            match copy_entry(&from, &to) {
                Ok(()) => {
                    debug!(file = %entry, "backed up app data file");
                    copied += 1;
                }
                Err(err) => {
                    error!(file = %entry, error = %err, "could not back up app data file; user data is NOT backed up");
                }
            }
        }
        copied
    }
}

fn reset_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    } else {
        fs::create_dir_all(dir)
    }
}

fn copy_entry(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)?;
    Ok(())
}
