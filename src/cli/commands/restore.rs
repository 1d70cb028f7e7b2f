use crate::cli::args::RestoreArgs;
use crate::cli::commands::install_dir_or_cwd;
use crate::config::UpdaterConfig;
use crate::disk::PathResolver;
use crate::error::{Result, UpdateError};
use crate::update::{BackupAndRestore, UpdateLayout};

pub fn run_restore(config: &UpdaterConfig, args: RestoreArgs) -> Result<()> {
    let install_dir = install_dir_or_cwd(args.install_dir.as_deref())?;
    if !install_dir.is_dir() {
        return Err(UpdateError::precondition(format!(
            "target folder doesn't exist {}",
            install_dir.display()
        )));
    }
    let layout = UpdateLayout::new(config.work_root_for(&install_dir));
    let backups =
        BackupAndRestore::new(PathResolver::default(), &layout).exclude(layout.within(&install_dir));
    let Some(point) = backups.restore_point() else {
        return Err(UpdateError::precondition(format!(
            "no restore point in {}",
            backups.snapshot_dir().display()
        )));
    };
    let restored = backups.restore(&install_dir)?;
    println!(
        "restored {} file(s) from the backup taken {}",
        restored, point.created
    );
    Ok(())
}
