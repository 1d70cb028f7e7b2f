pub mod compare;
pub mod mirror;
pub mod paths;
pub mod transfer;

pub use compare::files_equal;
pub use mirror::{FolderMirror, MirrorResult};
pub use paths::PathResolver;
pub use transfer::{DiskTransfer, FileTransfer};

/// Relative path -> contents for every file under `root`.
#[cfg(test)]
pub(crate) fn tree_contents(root: &std::path::Path) -> std::collections::BTreeMap<String, Vec<u8>> {
    let mut out = std::collections::BTreeMap::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry.expect("walk");
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("under root")
            .to_string_lossy()
            .to_string();
        out.insert(rel, std::fs::read(entry.path()).expect("read"));
    }
    out
}
