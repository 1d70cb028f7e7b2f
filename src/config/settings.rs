use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, UpdateError};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_LOG_LEVEL: &str = "Information";
pub const DEFAULT_BRANCH: &str = "main";
pub const TOKEN_PLACEHOLDER: &str = "super secret unguessable key";

/// Values of the application settings file that survive an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    pub port: u16,
    pub log_level: String,
    pub branch: String,
    pub token: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            branch: DEFAULT_BRANCH.to_string(),
            token: None,
        }
    }
}

impl AppSettings {
    /// Reads the settings file once. Missing keys fall back to the defaults;
    /// a missing or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| UpdateError::message(format!("read {}: {}", path.display(), e)))?;
        Self::parse(&contents)
            .map_err(|e| UpdateError::message(format!("parse {}: {}", path.display(), e)))
    }

    pub fn parse(contents: &str) -> std::result::Result<Self, serde_json::Error> {
        let root: Value = serde_json::from_str(contents)?;
        let defaults = AppSettings::default();
        let port = root
            .get("Port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(defaults.port);
        let log_level = root
            .pointer("/Logging/LogLevel/Default")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(defaults.log_level);
        let branch = root
            .get("Branch")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(defaults.branch);
        let token = root
            .get("TokenKey")
            .and_then(Value::as_str)
            .filter(|t| *t != TOKEN_PLACEHOLDER)
            .map(str::to_string);
        Ok(Self {
            port,
            log_level,
            branch,
            token,
        })
    }

    /// Writes these values into another settings file by replacing the
    /// literal key/value text it already holds. The file is not reformatted.
    pub fn apply_to(&self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)
            .map_err(|e| UpdateError::message(format!("read {}: {}", path.display(), e)))?;
        let current = AppSettings::parse(&contents)
            .map_err(|e| UpdateError::message(format!("parse {}: {}", path.display(), e)))?;
        let updated = self.replace_in(&current, contents);
        fs::write(path, updated)
            .map_err(|e| UpdateError::message(format!("write {}: {}", path.display(), e)))?;
        info!(path = %path.display(), port = self.port, branch = %self.branch, "carried settings forward");
        Ok(())
    }

    fn replace_in(&self, current: &AppSettings, mut contents: String) -> String {
        contents = contents.replace(
            &format!("\"Port\": {}", current.port),
            &format!("\"Port\": {}", self.port),
        );
        contents = contents.replace(
            &format!("\"Default\": \"{}\"", current.log_level),
            &format!("\"Default\": \"{}\"", self.log_level),
        );
        contents = contents.replace(
            &format!("\"Branch\": \"{}\"", current.branch),
            &format!("\"Branch\": \"{}\"", self.branch),
        );
        if let Some(token) = &self.token {
            let existing = current.token.as_deref().unwrap_or(TOKEN_PLACEHOLDER);
            contents = contents.replace(
                &format!("\"TokenKey\": \"{}\"", existing),
                &format!("\"TokenKey\": \"{}\"", token),
            );
        }
        debug!("settings text replaced");
        contents
    }

    /// Points the settings at `branch`; returns whether anything changed.
    pub fn redirect_branch(&mut self, branch: &str) -> bool {
        if branch.is_empty() || self.branch == branch {
            return false;
        }
        info!(from = %self.branch, to = %branch, "redirecting update branch");
        self.branch = branch.to_string();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CURRENT: &str = r#"{
  "TokenKey": "a-real-token",
  "Port": 5050,
  "Branch": "develop",
  "Logging": {
    "LogLevel": {
      "Default": "Debug",
      "Microsoft": "Information"
    }
  }
}"#;

    const SHIPPED: &str = r#"{
  "TokenKey": "super secret unguessable key",
  "Port": 5000,
  "Branch": "main",
  "Logging": {
    "LogLevel": {
      "Default": "Information",
      "Microsoft": "Information"
    }
  }
}"#;

    #[test]
    fn parse_reads_nested_values() {
        let settings = AppSettings::parse(CURRENT).expect("parse");
        assert_eq!(settings.port, 5050);
        assert_eq!(settings.log_level, "Debug");
        assert_eq!(settings.branch, "develop");
        assert_eq!(settings.token.as_deref(), Some("a-real-token"));
    }

    #[test]
    fn parse_defaults_missing_keys() {
        let settings = AppSettings::parse("{}").expect("parse");
        assert_eq!(settings, AppSettings::default());
        let placeholder = AppSettings::parse(SHIPPED).expect("parse");
        assert_eq!(placeholder.token, None);
    }

    #[test]
    fn apply_carries_values_into_shipped_file() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("appsettings.json");
        fs::write(&target, SHIPPED).expect("write");

        let settings = AppSettings::parse(CURRENT).expect("parse");
        settings.apply_to(&target).expect("apply");

        let updated = fs::read_to_string(&target).expect("read");
        assert_eq!(AppSettings::parse(&updated).expect("parse"), settings);
        assert!(updated.contains("\"Microsoft\": \"Information\""));
    }

    #[test]
    fn redirect_branch_reports_change() {
        let mut settings = AppSettings::default();
        assert!(!settings.redirect_branch("main"));
        assert!(settings.redirect_branch("develop"));
        assert_eq!(settings.branch, "develop");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        assert!(AppSettings::load(&dir.path().join("appsettings.json")).is_err());
    }
}
