pub mod cli;
pub mod config;
pub mod disk;
pub mod error;
pub mod process;
pub mod types;
pub mod update;

pub use error::{ConfigError, Result, UpdateError};
pub use types::{InstallState, PathCasing, Pid, TransferMode};
