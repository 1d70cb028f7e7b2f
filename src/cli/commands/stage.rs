use std::path::Path;

use tracing::info;

use crate::cli::args::StageArgs;
use crate::cli::commands::install_dir_or_cwd;
use crate::config::UpdaterConfig;
use crate::error::Result;
use crate::update::stage::StageReport;
use crate::update::{stage_package, UpdateLayout, UpdatePackage};

pub fn run_stage(config: &UpdaterConfig, args: StageArgs) -> Result<()> {
    let install_dir = install_dir_or_cwd(args.install_dir.as_deref())?;
    let report = stage(config, &install_dir, &args.package.package, &args.package.manifest)?;
    println!(
        "staged {} file(s); settings carried: {}; branch redirected: {}",
        report.files, report.settings_carried, report.branch_redirected
    );
    Ok(())
}

pub(crate) fn stage(
    config: &UpdaterConfig,
    install_dir: &Path,
    archive: &Path,
    manifest: &Path,
) -> Result<StageReport> {
    let package = UpdatePackage::load(manifest)?;
    let layout = UpdateLayout::new(config.work_root_for(install_dir));
    info!(version = %package.version, branch = %package.branch, "staging update");
    stage_package(&package, archive, install_dir, &layout, &config.settings_file)
}
