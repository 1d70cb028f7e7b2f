use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use std::time::Duration;

use crate::config::model::{Config, ProcessModelKind, RestartPolicy, UpdaterConfig};
use crate::error::{ConfigError, Result, UpdateError};

pub fn load_config(path: &Path) -> Result<UpdaterConfig> {
    let mut contents = String::new();
    File::open(path)
        .map_err(UpdateError::Io)?
        .read_to_string(&mut contents)
        .map_err(UpdateError::Io)?;
    let cfg: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    parse_runtime(cfg)
}

/// Loads `path` when it exists; an absent file yields the defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<UpdaterConfig> {
    match path {
        Some(path) if path.exists() => load_config(path),
        Some(path) => Err(ConfigError::Invalid(format!(
            "config file {} does not exist",
            path.display()
        ))
        .into()),
        None => Ok(UpdaterConfig::default()),
    }
}

fn parse_runtime(cfg: Config) -> Result<UpdaterConfig> {
    let defaults = UpdaterConfig::default();

    let app_name = match cfg.app_name {
        Some(name) if name.trim().is_empty() => {
            return Err(ConfigError::Invalid("appName is empty".to_string()).into());
        }
        Some(name) => name.trim().to_string(),
        None => defaults.app_name.clone(),
    };
    let process_names = if cfg.process_names.is_empty() {
        vec![app_name.clone()]
    } else {
        cfg.process_names
    };
    if process_names.iter().any(|n| n.trim().is_empty()) {
        return Err(ConfigError::Invalid("processNames must not contain empty names".to_string()).into());
    }

    let app_data = cfg.app_data.unwrap_or(defaults.app_data);
    for entry in &app_data {
        validate_relative("appData", entry)?;
    }
    let preserve = cfg.preserve.unwrap_or(defaults.preserve);
    for entry in &preserve {
        validate_relative("preserve", entry)?;
    }

    let process_model = match cfg.process_model {
        Some(value) => ProcessModelKind::parse(&value).map_err(ConfigError::Invalid)?,
        None => defaults.process_model,
    };

    let restart = RestartPolicy {
        attempts: cfg.restart.attempts.unwrap_or(defaults.restart.attempts),
        interval: cfg
            .restart
            .interval_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.restart.interval),
    };
    if restart.attempts == 0 {
        return Err(ConfigError::Invalid("restart.attempts must be at least 1".to_string()).into());
    }

    let legacy_suffix = match cfg.legacy_suffix {
        Some(suffix) if suffix.trim().is_empty() => None,
        Some(suffix) => Some(suffix),
        None => defaults.legacy_suffix,
    };

    Ok(UpdaterConfig {
        app_name,
        process_names,
        work_root: cfg.work_root,
        app_data,
        preserve,
        legacy_suffix,
        process_model,
        restart,
        term_grace: cfg
            .term_grace_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.term_grace),
        settings_file: cfg.settings_file.unwrap_or(defaults.settings_file),
    })
}

fn validate_relative(key: &str, entry: &str) -> Result<()> {
    let path = Path::new(entry);
    if entry.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{} entry is empty", key)).into());
    }
    if path.is_absolute() {
        return Err(ConfigError::Invalid(format!(
            "{} entry {} must be relative to the install directory",
            key, entry
        ))
        .into());
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ConfigError::Invalid(format!("{} entry {} must not contain ..", key, entry)).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load(yaml: &str) -> Result<UpdaterConfig> {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(yaml.as_bytes()).expect("write");
        load_config(file.path())
    }

    #[test]
    fn load_config_with_overrides() {
        let cfg = load(
            r#"
appName: "Kavita"
processNames: ["Kavita", "Kavita.Console"]
workRoot: "/var/lib/kavita/updates"
appData: ["config/appsettings.json", "config/kavita.db"]
processModel: supervisor
restart:
  attempts: 3
  intervalMs: 250
"#,
        )
        .expect("load");
        assert_eq!(cfg.process_names.len(), 2);
        assert_eq!(cfg.process_model, ProcessModelKind::Supervisor);
        assert_eq!(cfg.restart.attempts, 3);
        assert_eq!(cfg.restart.interval, Duration::from_millis(250));
        assert_eq!(
            cfg.work_root_for(Path::new("/opt/kavita")),
            Path::new("/var/lib/kavita/updates")
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = load("{}").expect("load");
        assert_eq!(cfg.app_name, "Kavita");
        assert_eq!(cfg.process_names, vec!["Kavita".to_string()]);
        assert_eq!(cfg.restart, RestartPolicy::default());
        assert_eq!(cfg.work_root_for(Path::new("/opt/kavita")), Path::new("/opt/kavita/temp"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            load("processModel: sometimes"),
            Err(UpdateError::Config(ConfigError::Invalid(_)))
        ));
        assert!(matches!(
            load("preserve: [\"../outside\"]"),
            Err(UpdateError::Config(ConfigError::Invalid(_)))
        ));
        assert!(matches!(
            load("restart: { attempts: 0 }"),
            Err(UpdateError::Config(ConfigError::Invalid(_)))
        ));
        assert!(matches!(
            load("jobs: [unclosed"),
            Err(UpdateError::Config(ConfigError::Parse(_)))
        ));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        assert!(load_or_default(Some(Path::new("/nonexistent/kavita-update.yaml"))).is_err());
        assert!(load_or_default(None).is_ok());
    }
}
