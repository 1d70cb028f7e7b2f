use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_APP_NAME: &str = "Kavita";
pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";
pub const DEFAULT_LEGACY_SUFFIX: &str = "bin/Kavita";
pub const DEFAULT_WORK_DIR: &str = "temp";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_data: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_model: Option<String>,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_grace_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RestartConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessModelKind {
    /// Stop the application before touching files and start it afterwards.
    Terminate,
    /// Leave restarts to a service manager and only start as a fallback.
    Supervisor,
}

impl ProcessModelKind {
    pub fn native() -> Self {
        if cfg!(windows) {
            ProcessModelKind::Terminate
        } else {
            ProcessModelKind::Supervisor
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::native()),
            "terminate" => Ok(ProcessModelKind::Terminate),
            "supervisor" => Ok(ProcessModelKind::Supervisor),
            _ => Err(format!(
                "invalid process model {}; expected auto, terminate, or supervisor",
                value
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessModelKind::Terminate => "terminate",
            ProcessModelKind::Supervisor => "supervisor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_millis(1000),
        }
    }
}

/// Validated configuration handed to every component of an install run.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub app_name: String,
    pub process_names: Vec<String>,
    pub work_root: Option<PathBuf>,
    pub app_data: Vec<String>,
    pub preserve: Vec<String>,
    pub legacy_suffix: Option<String>,
    pub process_model: ProcessModelKind,
    pub restart: RestartPolicy,
    pub term_grace: Duration,
    pub settings_file: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            process_names: vec![DEFAULT_APP_NAME.to_string()],
            work_root: None,
            app_data: vec![DEFAULT_SETTINGS_FILE.to_string(), "kavita.db".to_string()],
            preserve: vec![
                "kavita.db".to_string(),
                "config".to_string(),
                "logs".to_string(),
            ],
            legacy_suffix: Some(DEFAULT_LEGACY_SUFFIX.to_string()),
            process_model: ProcessModelKind::native(),
            restart: RestartPolicy::default(),
            term_grace: Duration::from_millis(5000),
            settings_file: DEFAULT_SETTINGS_FILE.to_string(),
        }
    }
}

impl UpdaterConfig {
    /// Directory holding `update/` and `backup/` for an installation.
    pub fn work_root_for(&self, install_dir: &Path) -> PathBuf {
        match &self.work_root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => install_dir.join(root),
            None => install_dir.join(DEFAULT_WORK_DIR),
        }
    }

    /// Name of the executable that is started after an install.
    pub fn executable_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.app_name)
        } else {
            self.app_name.clone()
        }
    }
}
