use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "kavita-update", version, about = "Install a staged Kavita update")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Replace the installation with the staged package (the default).
    Install(InstallArgs),
    /// Check a package archive against its manifest.
    Verify(PackageArgs),
    /// Verify and unpack a package into the update folder.
    Stage(StageArgs),
    /// Roll the installation back to the last backup.
    Restore(RestoreArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Process id of the running application.
    #[arg(allow_negative_numbers = true)]
    pub pid: i64,
    #[arg(long)]
    pub install_dir: Option<PathBuf>,
    /// Stage this archive before installing.
    #[arg(long, requires = "manifest")]
    pub package: Option<PathBuf>,
    #[arg(long, requires = "package")]
    pub manifest: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    #[arg(long)]
    pub package: PathBuf,
    /// Update feed entry describing the package (JSON).
    #[arg(long)]
    pub manifest: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct StageArgs {
    #[command(flatten)]
    pub package: PackageArgs,
    #[arg(long)]
    pub install_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    #[arg(long)]
    pub install_dir: Option<PathBuf>,
}
