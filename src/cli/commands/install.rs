use std::path::Path;

use tracing::info;

use crate::cli::args::InstallArgs;
use crate::cli::commands::install_dir_or_cwd;
use crate::cli::commands::stage::stage;
use crate::config::UpdaterConfig;
use crate::disk::FileTransfer;
use crate::error::Result;
use crate::process::SystemProcesses;
use crate::update::{InstallOrchestrator, InstallReport};

pub fn run_install(config: &UpdaterConfig, args: InstallArgs) -> Result<()> {
    let install_dir = install_dir_or_cwd(args.install_dir.as_deref())?;
    let installer = InstallOrchestrator::new(
        config.clone(),
        Box::new(SystemProcesses::new(config.term_grace)),
    );
    let report = install(&installer, config, &install_dir, &args)?;
    println!(
        "updated {}: {} copied, {} deleted; restart: {:?}",
        report.install_dir.display(),
        report.mirrored.files_copied,
        report.mirrored.files_deleted + report.mirrored.dirs_deleted,
        report.restart
    );
    Ok(())
}

/// Stages the package, when one is given, once the install folder and
/// process id have been checked, then runs the install.
fn install<T: FileTransfer>(
    installer: &InstallOrchestrator<T>,
    config: &UpdaterConfig,
    install_dir: &Path,
    args: &InstallArgs,
) -> Result<InstallReport> {
    let (install_dir, _) = installer.check_preconditions(install_dir, args.pid)?;
    if let (Some(archive), Some(manifest)) = (&args.package, &args.manifest) {
        let staged = stage(config, &install_dir, archive, manifest)?;
        info!(files = staged.files, "package staged");
    }
    installer.start(&install_dir, args.pid)
}
