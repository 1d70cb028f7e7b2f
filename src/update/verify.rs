use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Result, UpdateError};
use crate::update::package::UpdatePackage;

const HASH_BUFFER: usize = 64 * 1024;

/// Hex SHA-256 of a file, streamed.
pub fn digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER];
    loop {
        let read = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// True when the archive at `path` hashes to the package's published digest.
/// Comparison ignores case. An unreadable archive does not verify.
pub fn verify(package: &UpdatePackage, path: &Path) -> bool {
    match digest(path) {
        Ok(actual) => {
            let ok = actual.eq_ignore_ascii_case(package.hash.trim());
            if ok {
                debug!(path = %path.display(), "package hash verified");
            } else {
                warn!(path = %path.display(), expected = %package.hash, actual = %actual, "package hash mismatch");
            }
            ok
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot read package for verification");
            false
        }
    }
}

/// Like [`verify`], but a mismatch becomes a `Verification` error carrying
/// both digests.
pub fn verify_or_reject(package: &UpdatePackage, path: &Path) -> Result<()> {
    if verify(package, path) {
        return Ok(());
    }
    let actual = digest(path).unwrap_or_else(|e| format!("unreadable ({})", e));
    Err(UpdateError::Verification {
        path: path.to_path_buf(),
        expected: package.hash.clone(),
        actual,
    })
}
