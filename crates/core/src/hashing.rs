//! SHA-256 checksums for images about to be uploaded.
//!
//! Providers name uploaded objects after the image checksum so that a
//! retried upload of the same image lands on the same cloud object.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Images are read in 64 KiB chunks.
const CHUNK_SIZE: usize = 64 * 1024;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Compute the SHA-256 hex digest of a file without loading it into memory.
pub fn hash_image(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Name of the uploaded object: `{image_name}-{digest}.{extension}`.
pub fn image_id(image_name: &str, digest: &str, extension: &str) -> String {
    format!("{image_name}-{digest}.{extension}")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        let hash = sha256_hex(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn file_hash_matches_in_memory_hash_across_chunks() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(&data).expect("write image");

        let digest = hash_image(file.path()).expect("hash image");
        assert_eq!(digest, sha256_hex(&data));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(hash_image(Path::new("/nonexistent/image.img")).is_err());
    }

    #[test]
    fn image_id_joins_parts() {
        assert_eq!(image_id("fedora", "abc123", "vhd"), "fedora-abc123.vhd");
    }
}
