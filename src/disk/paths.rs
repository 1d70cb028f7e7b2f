use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::trace;

use crate::types::PathCasing;

/// Resolves on-disk casing and compares paths the way the target platform does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathResolver {
    casing: PathCasing,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(PathCasing::native())
    }
}

impl PathResolver {
    pub fn new(casing: PathCasing) -> Self {
        Self { casing }
    }

    pub fn casing(&self) -> PathCasing {
        self.casing
    }

    /// Rebuilds `path` from the entry names the filesystem reports.
    ///
    /// Case-sensitive platforms, UNC paths and paths with any missing segment
    /// come back unchanged.
    pub fn actual_casing(&self, path: &Path) -> PathBuf {
        if self.casing == PathCasing::Sensitive {
            return path.to_path_buf();
        }
        if path.as_os_str().to_string_lossy().starts_with("\\\\") {
            return path.to_path_buf();
        }

        let mut resolved = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Prefix(prefix) => {
                    let drive = prefix.as_os_str().to_string_lossy().to_uppercase();
                    resolved.push(drive);
                }
                Component::RootDir | Component::CurDir | Component::ParentDir => {
                    resolved.push(component.as_os_str());
                }
                Component::Normal(name) => {
                    let dir = if resolved.as_os_str().is_empty() {
                        Path::new(".")
                    } else {
                        resolved.as_path()
                    };
                    match find_entry(dir, name) {
                        Some(actual) => resolved.push(actual),
                        None => {
                            trace!(path = %path.display(), "casing unresolved; keeping input");
                            return path.to_path_buf();
                        }
                    }
                }
            }
        }
        resolved
    }

    /// Parent of `path` after dropping one trailing separator; `None` at a root.
    pub fn parent_path(&self, path: &Path) -> Option<PathBuf> {
        let raw = path.as_os_str().to_string_lossy();
        let clean = strip_trailing_separator(&raw);
        if clean.trim().is_empty() {
            return None;
        }
        let absolute = std::path::absolute(clean).ok()?;
        absolute.parent().map(Path::to_path_buf)
    }

    /// Corrects the casing of the parent directory and reattaches the last
    /// segment as given.
    pub fn resolve_real_parent_path(&self, path: &Path) -> PathBuf {
        let Some(parent) = self.parent_path(path) else {
            return path.to_path_buf();
        };
        let Some(name) = path.file_name() else {
            return path.to_path_buf();
        };
        let real_parent = self.actual_casing(&parent);
        if !real_parent.is_dir() {
            return path.to_path_buf();
        }
        real_parent.join(name)
    }

    pub fn paths_equal(&self, a: &Path, b: &Path) -> bool {
        if self
            .casing
            .eq_str(&a.to_string_lossy(), &b.to_string_lossy())
        {
            return true;
        }
        let left = normalize(a);
        let right = normalize(b);
        self.casing
            .eq_str(&left.to_string_lossy(), &right.to_string_lossy())
    }
}

fn find_entry(dir: &Path, name: &OsStr) -> Option<OsString> {
    let entries = fs::read_dir(dir).ok()?;
    let wanted = name.to_string_lossy().to_lowercase();
    let mut candidate = None;
    for entry in entries.flatten() {
        let entry_name = entry.file_name();
        if entry_name == name {
            return Some(entry_name);
        }
        if candidate.is_none() && entry_name.to_string_lossy().to_lowercase() == wanted {
            candidate = Some(entry_name);
        }
    }
    candidate
}

fn strip_trailing_separator(raw: &str) -> &str {
    if cfg!(windows) {
        // keep the separator of a drive root such as `C:\`
        if raw.ends_with(":\\") || raw.ends_with(":/") {
            return raw;
        }
        raw.strip_suffix('\\')
            .or_else(|| raw.strip_suffix('/'))
            .unwrap_or(raw)
    } else if raw.len() > 1 {
        raw.strip_suffix('/').unwrap_or(raw)
    } else {
        raw
    }
}

fn normalize(path: &Path) -> PathBuf {
    let raw = path.as_os_str().to_string_lossy();
    let whole = raw.trim();
    let trimmed = whole.trim_end_matches(['/', '\\']);
    let trimmed = if trimmed.is_empty() && whole.starts_with(['/', '\\']) {
        &whole[..1]
    } else {
        trimmed
    };
    let absolute = std::path::absolute(trimmed).unwrap_or_else(|_| PathBuf::from(trimmed));
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
