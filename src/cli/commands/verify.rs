use tracing::info;

use crate::cli::args::PackageArgs;
use crate::error::Result;
use crate::update::{verify_or_reject, UpdatePackage};

pub fn run_verify(args: PackageArgs) -> Result<()> {
    let package = UpdatePackage::load(&args.manifest)?;
    verify_or_reject(&package, &args.package)?;
    info!(version = %package.version, path = %args.package.display(), "package verified");
    println!("{}: ok ({})", args.package.display(), package.version);
    Ok(())
}
