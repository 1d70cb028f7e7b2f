use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tracing::debug;

pub const COMPARE_CHUNK: usize = 64 * 1024;

/// Byte-for-byte comparison. Missing or unreadable files are never equal.
pub fn files_equal(a: &Path, b: &Path) -> bool {
    match compare_streams(a, b) {
        Ok(equal) => equal,
        Err(err) => {
            debug!(a = %a.display(), b = %b.display(), error = %err, "compare failed; treating as different");
            false
        }
    }
}

fn compare_streams(a: &Path, b: &Path) -> io::Result<bool> {
    let mut left = File::open(a)?;
    let mut right = File::open(b)?;
    let mut left_buf = vec![0u8; COMPARE_CHUNK];
    let mut right_buf = vec![0u8; COMPARE_CHUNK];
    loop {
        let left_len = fill(&mut left, &mut left_buf)?;
        let right_len = fill(&mut right, &mut right_buf)?;
        if left_len != right_len {
            return Ok(false);
        }
        if left_len == 0 {
            return Ok(true);
        }
        if left_buf[..left_len] != right_buf[..right_len] {
            return Ok(false);
        }
    }
}

// Reads until the buffer is full or the stream ends so short reads from one
// side do not register as a length mismatch.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
