//! Local artifact checksums.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 64 * 1024;

/// Returns the size and hex SHA-256 of a file.
///
/// Hashing runs on the blocking pool.
pub async fn sha256_file(path: &Path) -> io::Result<(u64, String)> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_blocking(&path))
        .await
        .map_err(io::Error::other)?
}

fn hash_blocking(path: &Path) -> io::Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        size += read as u64;
    }
    Ok((size, hex::encode(hasher.finalize())))
}
