use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::settings::AppSettings;
use crate::error::{Result, UpdateError};
use crate::types::InstallState;
use crate::update::package::UpdatePackage;
use crate::update::verify::verify_or_reject;
use crate::update::UpdateLayout;

const STAGING_ROOT: &str = ".staging-root";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub files: usize,
    pub settings_carried: bool,
    pub branch_redirected: bool,
}

/// Verifies `archive`, unpacks it into the update directory and carries the
/// installation's settings into the staged copy. Nothing is touched when
/// verification fails.
pub fn stage_package(
    package: &UpdatePackage,
    archive: &Path,
    install_dir: &Path,
    layout: &UpdateLayout,
    settings_file: &str,
) -> Result<StageReport> {
    info!(state = %InstallState::Verifying, version = %package.version, path = %archive.display(), "verifying update package");
    verify_or_reject(package, archive)?;
    info!("update package verified successfully");

    let update_dir = layout.update_dir();
    let version_file = layout.staged_version_file();
    if version_file.exists() {
        fs::remove_file(&version_file)
            .map_err(|e| UpdateError::Package(format!("remove {}: {}", version_file.display(), e)))?;
    }
    reset_dir(&update_dir)
        .map_err(|e| UpdateError::Package(format!("prepare {}: {}", update_dir.display(), e)))?;
    let files = extract_zip(archive, &update_dir)?;
    unwrap_single_root(&update_dir)
        .map_err(|e| UpdateError::Package(format!("flatten {}: {}", update_dir.display(), e)))?;
    info!(files, target = %update_dir.display(), "update package extracted successfully");
    fs::write(&version_file, package.version.to_string())
        .map_err(|e| UpdateError::Package(format!("write {}: {}", version_file.display(), e)))?;

    let mut report = StageReport {
        files,
        ..StageReport::default()
    };
    let current = install_dir.join(settings_file);
    let staged = update_dir.join(settings_file);
    if !current.is_file() {
        warn!(path = %current.display(), "no settings file to carry forward");
        return Ok(report);
    }
    let mut settings = AppSettings::load(&current)?;
    report.branch_redirected = settings.redirect_branch(&package.branch);
    if staged.is_file() {
        settings.apply_to(&staged)?;
    } else {
        fs::copy(&current, &staged)
            .map_err(|e| UpdateError::Package(format!("copy {}: {}", staged.display(), e)))?;
        if report.branch_redirected {
            settings.apply_to(&staged)?;
        }
    }
    report.settings_carried = true;
    Ok(report)
}

fn reset_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

fn extract_zip(archive_path: &Path, target: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .map_err(|e| UpdateError::Package(format!("open {}: {}", archive_path.display(), e)))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| UpdateError::Package(format!("read {}: {}", archive_path.display(), e)))?;

    let mut files = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| UpdateError::Package(format!("entry {}: {}", index, e)))?;
        let relative: PathBuf = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                return Err(UpdateError::Package(format!(
                    "entry {} has an unsafe path",
                    entry.name()
                )));
            }
        };
        let out = target.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out)
                .map_err(|e| UpdateError::Package(format!("create {}: {}", out.display(), e)))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| UpdateError::Package(format!("create {}: {}", parent.display(), e)))?;
        }
        let mut writer = File::create(&out)
            .map_err(|e| UpdateError::Package(format!("create {}: {}", out.display(), e)))?;
        io::copy(&mut entry, &mut writer)
            .map_err(|e| UpdateError::Package(format!("extract {}: {}", relative.display(), e)))?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| UpdateError::Package(format!("chmod {}: {}", out.display(), e)))?;
        }
        debug!(file = %relative.display(), "extracted");
        files += 1;
    }
    Ok(files)
}

// Release archives wrap everything in one top-level folder; the mirror source
// is that folder's contents.
fn unwrap_single_root(dir: &Path) -> io::Result<()> {
    let entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<_>>()?;
    if entries.len() != 1 || !entries[0].is_dir() {
        return Ok(());
    }
    let inner = dir.join(STAGING_ROOT);
    fs::rename(&entries[0], &inner)?;
    for entry in fs::read_dir(&inner)? {
        let entry = entry?;
        fs::rename(entry.path(), dir.join(entry.file_name()))?;
    }
    fs::remove_dir(&inner)?;
    debug!(root = %entries[0].display(), "unwrapped archive root folder");
    Ok(())
}
