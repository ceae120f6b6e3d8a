//! SHA-256 checksums

use crate::error::{InstallError, InstallResult};
use crate::manifest::Manifest;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Compute the SHA-256 of a file, returning `(hex digest, size in bytes)`
pub fn compute_sha256(path: &Path) -> InstallResult<(String, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut size = 0u64;

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    Ok((format!("{:x}", hasher.finalize()), size))
}

/// [`compute_sha256`] on the blocking pool
pub async fn compute_sha256_async(path: PathBuf) -> InstallResult<(String, u64)> {
    tokio::task::spawn_blocking(move || compute_sha256(&path))
        .await
        .map_err(|e| InstallError::Io(std::io::Error::other(e)))?
}

/// Verify a file against an expected hex digest (case-insensitive)
pub fn verify_sha256(path: &Path, expected: &str) -> InstallResult<()> {
    let (actual, _) = compute_sha256(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(InstallError::ChecksumMismatch {
            path: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Checksum a package archive and record the digest and size in the manifest
pub fn update_manifest_checksum(manifest: &mut Manifest, package: &Path) -> InstallResult<()> {
    let (sha256, size) = compute_sha256(package)?;
    tracing::debug!(package = ?package, sha256 = %sha256, size, "Updated package checksum");
    manifest.set_package_checksum(sha256, size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello world").unwrap();

        let (digest, size) = compute_sha256(&path).unwrap();
        assert_eq!(digest, HELLO_SHA256);
        assert_eq!(size, 11);
    }

    #[test]
    fn test_verify_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello world").unwrap();

        assert!(verify_sha256(&path, &HELLO_SHA256.to_uppercase()).is_ok());
        let err = verify_sha256(&path, &"0".repeat(64)).unwrap_err();
        assert!(matches!(err, InstallError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_missing_file() {
        assert!(compute_sha256(Path::new("/nonexistent/file.bin")).is_err());
    }

    #[tokio::test]
    async fn test_compute_sha256_async() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let (digest, size) = compute_sha256_async(path).await.unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(size, 0);
    }

    #[test]
    fn test_update_manifest_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("package.tar.gz");
        std::fs::write(&path, "hello world").unwrap();

        let mut manifest = Manifest::new(&crate::spec::ModelSpec::new("hf", "gpt2", "latest"));
        update_manifest_checksum(&mut manifest, &path).unwrap();
        assert_eq!(manifest.distribution.package.sha256, HELLO_SHA256);
        assert_eq!(manifest.distribution.package.size, 11);
    }
}
