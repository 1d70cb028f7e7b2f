use std::fs::{self, File};
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::disk::paths::PathResolver;
use crate::types::TransferMode;

/// Moves bytes for the mirror. The seam exists so the install pipeline can be
/// exercised against failing storage.
pub trait FileTransfer {
    fn transfer(
        &self,
        source: &Path,
        target: &Path,
        mode: TransferMode,
        overwrite: bool,
    ) -> io::Result<TransferMode>;
}

impl<T: FileTransfer + ?Sized> FileTransfer for &T {
    fn transfer(
        &self,
        source: &Path,
        target: &Path,
        mode: TransferMode,
        overwrite: bool,
    ) -> io::Result<TransferMode> {
        (**self).transfer(source, target, mode, overwrite)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskTransfer {
    resolver: PathResolver,
}

impl DiskTransfer {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }
}

impl FileTransfer for DiskTransfer {
    fn transfer(
        &self,
        source: &Path,
        target: &Path,
        mode: TransferMode,
        overwrite: bool,
    ) -> io::Result<TransferMode> {
        if mode == TransferMode::None {
            return Ok(TransferMode::None);
        }

        if self.resolver.paths_equal(source, target) {
            if mode == TransferMode::Move
                && source.as_os_str() != target.as_os_str()
                && source.exists()
            {
                rename_case_only(source, target)?;
                debug!(source = %source.display(), target = %target.display(), "renamed casing");
                return Ok(TransferMode::Move);
            }
            debug!(path = %source.display(), "source and target are the same file; skipping");
            return Ok(TransferMode::None);
        }

        match fs::symlink_metadata(target) {
            Ok(meta) => {
                if !overwrite {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} already exists", target.display()),
                    ));
                }
                if meta.is_dir() {
                    return Err(io::Error::other(format!(
                        "{} is a directory",
                        target.display()
                    )));
                }
                clear_readonly(target, &meta)?;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        match mode {
            TransferMode::Copy => copy_via_temp(source, target)?,
            TransferMode::Move => move_file(source, target)?,
            TransferMode::None => {}
        }
        debug!(
            mode = mode.as_str(),
            source = %source.display(),
            target = %target.display(),
            "transferred file"
        );
        Ok(mode)
    }
}

// Writes next to the target and renames over it so a reader never sees a
// half-written file.
fn copy_via_temp(source: &Path, target: &Path) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::other(format!("{} has no parent", target.display())))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".kavita-update-")
        .tempfile_in(parent)?;
    let mut input = File::open(source)?;
    io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    let perms = fs::metadata(source)?.permissions();
    fs::set_permissions(tmp.path(), perms)?;
    tmp.persist(target).map_err(|err| err.error)?;
    Ok(())
}

fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    if let Err(err) = fs::rename(source, target) {
        warn!(source = %source.display(), error = %err, "rename failed; copying instead");
        copy_via_temp(source, target)?;
        fs::remove_file(source)?;
    }
    Ok(())
}

fn rename_case_only(source: &Path, target: &Path) -> io::Result<()> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let interim = target.with_file_name(format!(".{}.{}.casing", name, std::process::id()));
    fs::rename(source, &interim)?;
    fs::rename(&interim, target)
}

#[allow(clippy::permissions_set_readonly_false)]
pub(crate) fn clear_readonly(path: &Path, meta: &fs::Metadata) -> io::Result<()> {
    let mut perms = meta.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}
