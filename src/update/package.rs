use std::fs;
use std::path::Path;

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, UpdateError};

/// One release as published by the update feed.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePackage {
    #[serde(deserialize_with = "deserialize_version")]
    pub version: Version,
    #[serde(default)]
    pub url: String,
    pub hash: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub changes: UpdateChanges,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChanges {
    #[serde(default)]
    pub new: Vec<String>,
    #[serde(default)]
    pub fixed: Vec<String>,
    #[serde(default)]
    pub changed: Vec<String>,
}

fn default_branch() -> String {
    crate::config::settings::DEFAULT_BRANCH.to_string()
}

impl UpdatePackage {
    pub fn from_json(contents: &str) -> Result<Self> {
        let package: UpdatePackage = serde_json::from_str(contents)
            .map_err(|e| UpdateError::Package(format!("manifest: {}", e)))?;
        if package.hash.trim().is_empty() {
            return Err(UpdateError::Package("manifest has an empty hash".to_string()));
        }
        Ok(package)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| UpdateError::Package(format!("read manifest {}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }
}

fn deserialize_version<'de, D>(deserializer: D) -> std::result::Result<Version, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_version(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid version {}", raw)))
}

/// Accepts plain semver as well as the four-part `major.minor.patch.build`
/// form release builds are stamped with; the fourth part becomes build
/// metadata.
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }
    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.len() == 4 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
        return Version::parse(&format!("{}.{}.{}+{}", parts[0], parts[1], parts[2], parts[3])).ok();
    }
    None
}
