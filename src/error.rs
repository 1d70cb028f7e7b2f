use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{0}")]
    Message(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("update package {} failed verification: expected {expected}, got {actual}", path.display())]
    Verification {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("backup failed: {0}")]
    Backup(String),
    #[error("mirror failed ({cause}); rolled back {restored} file(s)")]
    Mirror { cause: String, restored: usize },
    #[error("rollback failed after mirror error ({cause}): {restore}; manual intervention required")]
    Rollback { cause: String, restore: String },
    #[error("{0} was restarted prematurely by an external process")]
    PrematureRestart(String),
    #[error("process {0}")]
    Process(String),
    #[error("package {0}")]
    Package(String),
    #[error("{0}")]
    Config(ConfigError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse config: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, UpdateError>;

impl UpdateError {
    pub fn message(msg: impl Into<String>) -> Self {
        UpdateError::Message(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        UpdateError::Precondition(msg.into())
    }

    /// Process exit status for this failure. Zero is reserved for a complete
    /// install-and-restart.
    pub fn exit_code(&self) -> i32 {
        match self {
            UpdateError::Precondition(_) | UpdateError::Config(_) => 2,
            UpdateError::Verification { .. } => 3,
            UpdateError::Backup(_) => 4,
            UpdateError::Mirror { .. } => 5,
            UpdateError::Rollback { .. } => 6,
            UpdateError::PrematureRestart(_) => 7,
            UpdateError::Package(_) => 8,
            UpdateError::Process(_) | UpdateError::Message(_) | UpdateError::Io(_) => 1,
        }
    }
}

impl From<ConfigError> for UpdateError {
    fn from(err: ConfigError) -> Self {
        UpdateError::Config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kinds_have_distinct_exit_codes() {
        let codes = [
            UpdateError::precondition("x").exit_code(),
            UpdateError::Verification {
                path: PathBuf::from("a.zip"),
                expected: "aa".to_string(),
                actual: "bb".to_string(),
            }
            .exit_code(),
            UpdateError::Backup("x".to_string()).exit_code(),
            UpdateError::Mirror {
                cause: "x".to_string(),
                restored: 1,
            }
            .exit_code(),
            UpdateError::Rollback {
                cause: "x".to_string(),
                restore: "y".to_string(),
            }
            .exit_code(),
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }
}
