//! Content hashing for change detection.
//!
//! XXH3-128 is used because only change detection matters here, not
//! collision resistance against an adversary.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use xxhash_rust::xxh3::{xxh3_128, Xxh3};

const BUFFER_SIZE: usize = 64 * 1024;

/// Hash a byte slice, returning 32 lowercase hex characters.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:032x}", xxh3_128(data))
}

/// Hash a file's full content by streaming it through the hasher.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:032x}", hasher.digest128()))
}
