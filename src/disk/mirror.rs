use std::collections::{BTreeSet, VecDeque};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::disk::compare::files_equal;
use crate::disk::paths::PathResolver;
use crate::disk::transfer::{clear_readonly, DiskTransfer, FileTransfer};
use crate::types::TransferMode;

const IGNORED_DIR_PREFIXES: [&str; 3] = [".nfs", ".DS_Store", "@eaDir"];
const IGNORED_FILE_PREFIXES: [&str; 1] = [".nfs"];
const IGNORED_FILE_NAMES: [&str; 1] = ["debug.log"];
const IGNORED_FILE_SUFFIXES: [&str; 1] = [".socket"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorResult {
    pub files_copied: usize,
    pub files_deleted: usize,
    pub dirs_deleted: usize,
}

/// Makes a target directory an exact content copy of a source directory.
pub struct FolderMirror<T = DiskTransfer> {
    resolver: PathResolver,
    transfer: T,
    protected: Vec<PathBuf>,
}

impl Default for FolderMirror<DiskTransfer> {
    fn default() -> Self {
        Self::new(PathResolver::default())
    }
}

impl FolderMirror<DiskTransfer> {
    pub fn new(resolver: PathResolver) -> Self {
        Self::with_transfer(resolver, DiskTransfer::new(resolver))
    }
}

impl<T: FileTransfer> FolderMirror<T> {
    pub fn with_transfer(resolver: PathResolver, transfer: T) -> Self {
        Self {
            resolver,
            transfer,
            protected: Vec::new(),
        }
    }

    /// Entries, relative to the mirror roots, that are never deleted,
    /// overwritten or descended into. Folders above them are kept.
    pub fn protect<I, P>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.protected.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn mirror(&self, source: &Path, target: &Path) -> io::Result<MirrorResult> {
        let source = self.resolver.resolve_real_parent_path(source);
        let target = self.resolver.resolve_real_parent_path(target);
        debug!(source = %source.display(), target = %target.display(), "mirror folder");

        let mut result = MirrorResult::default();
        if self.resolver.paths_equal(&source, &target) {
            debug!(path = %source.display(), "source and target are the same; nothing to mirror");
            return Ok(result);
        }
        if !source.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("mirror source {} is not a directory", source.display()),
            ));
        }

        // A `None` source stands for a directory the source does not have but
        // that holds protected entries below it.
        let mut pending = VecDeque::new();
        pending.push_back((Some(source), target, PathBuf::new()));
        while let Some((src_dir, dst_dir, rel)) = pending.pop_front() {
            fs::create_dir_all(&dst_dir).map_err(|e| with_path(e, &dst_dir))?;
            let wanted = match &src_dir {
                Some(dir) => Listing::read(dir)?,
                None => Listing::default(),
            };
            let existing = Listing::read(&dst_dir)?;

            for name in existing.dirs.difference(&wanted.dirs) {
                if self.skip_dir(&rel, name) {
                    continue;
                }
                if self.holds_protected(&rel.join(name)) {
                    pending.push_back((None, dst_dir.join(name), rel.join(name)));
                    continue;
                }
                let stale = dst_dir.join(name);
                fs::remove_dir_all(&stale).map_err(|e| with_path(e, &stale))?;
                debug!(path = %stale.display(), "removed stale directory");
                result.dirs_deleted += 1;
            }

            for name in existing.files.difference(&wanted.files) {
                if self.skip_file(&rel, name) {
                    continue;
                }
                let stale = dst_dir.join(name);
                remove_file(&stale).map_err(|e| with_path(e, &stale))?;
                debug!(path = %stale.display(), "removed stale file");
                result.files_deleted += 1;
            }

            let Some(src_dir) = src_dir else {
                continue;
            };
            for name in &wanted.files {
                if self.skip_file(&rel, name) {
                    continue;
                }
                let from = src_dir.join(name);
                let to = dst_dir.join(name);
                if files_equal(&from, &to) {
                    continue;
                }
                self.transfer
                    .transfer(&from, &to, TransferMode::Copy, true)
                    .map_err(|e| with_path(e, &to))?;
                result.files_copied += 1;
            }

            for name in &wanted.dirs {
                if self.skip_dir(&rel, name) {
                    continue;
                }
                pending.push_back((Some(src_dir.join(name)), dst_dir.join(name), rel.join(name)));
            }
        }
        Ok(result)
    }

    fn skip_dir(&self, rel: &Path, name: &OsStr) -> bool {
        let text = name.to_string_lossy();
        if IGNORED_DIR_PREFIXES.iter().any(|p| text.starts_with(p)) {
            trace!(folder = %rel.join(name).display(), "ignoring folder");
            return true;
        }
        self.is_protected(&rel.join(name))
    }

    fn skip_file(&self, rel: &Path, name: &OsStr) -> bool {
        let text = name.to_string_lossy();
        if IGNORED_FILE_PREFIXES.iter().any(|p| text.starts_with(p))
            || IGNORED_FILE_NAMES.iter().any(|n| text == *n)
            || IGNORED_FILE_SUFFIXES.iter().any(|s| text.ends_with(s))
        {
            trace!(file = %rel.join(name).display(), "ignoring file");
            return true;
        }
        self.is_protected(&rel.join(name))
    }

    fn is_protected(&self, rel: &Path) -> bool {
        self.protected
            .iter()
            .any(|p| self.leading_match(p, rel) == Some(p.components().count()))
    }

    /// True when `rel` is a directory above a protected entry. Such a
    /// directory is walked but never removed.
    fn holds_protected(&self, rel: &Path) -> bool {
        let depth = rel.components().count();
        self.protected.iter().any(|p| {
            p.components().count() > depth && self.leading_match(p, rel) == Some(depth)
        })
    }

    /// Number of components of `rel` when all of them lead `protected`.
    fn leading_match(&self, protected: &Path, rel: &Path) -> Option<usize> {
        let casing = self.resolver.casing();
        let mut count = 0;
        let mut wanted = protected.components();
        for part in rel.components() {
            let p = wanted.next()?;
            if !casing.eq_str(&p.as_os_str().to_string_lossy(), &part.as_os_str().to_string_lossy()) {
                return None;
            }
            count += 1;
        }
        Some(count)
    }
}

#[derive(Default)]
struct Listing {
    dirs: BTreeSet<OsString>,
    files: BTreeSet<OsString>,
}

impl Listing {
    fn read(dir: &Path) -> io::Result<Self> {
        let mut listing = Listing::default();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| {
                let kind = e.io_error().map(|io| io.kind()).unwrap_or(io::ErrorKind::Other);
                io::Error::new(kind, format!("read {}: {}", dir.display(), e))
            })?;
            let name = entry.file_name().to_os_string();
            if entry.path_is_symlink() && entry.path().is_dir() {
                warn!(path = %entry.path().display(), "skipping symlinked folder");
                continue;
            }
            if entry.file_type().is_dir() {
                listing.dirs.insert(name);
            } else {
                listing.files.insert(name);
            }
        }
        Ok(listing)
    }
}

fn remove_file(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.file_type().is_symlink() {
        clear_readonly(path, &meta)?;
    }
    fs::remove_file(path)
}

fn with_path(err: io::Error, path: &Path) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {}", path.display(), err))
}
