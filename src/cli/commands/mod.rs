pub mod install;
pub mod restore;
pub mod stage;
pub mod verify;

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Result, UpdateError};

pub fn exit_for_error(err: &UpdateError) -> ! {
    eprintln!("{}", err);
    std::process::exit(err.exit_code());
}

/// `--install-dir`, or the current directory when it is not given.
pub fn install_dir_or_cwd(install_dir: Option<&Path>) -> Result<PathBuf> {
    match install_dir {
        Some(dir) if dir.as_os_str().to_string_lossy().trim().is_empty() => {
            Err(UpdateError::precondition("install folder can not be empty"))
        }
        Some(dir) => Ok(dir.to_path_buf()),
        None => env::current_dir()
            .map_err(|e| UpdateError::precondition(format!("current directory: {}", e))),
    }
}
