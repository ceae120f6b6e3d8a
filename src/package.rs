//! Package assembly
//!
//! A package is a gzip'd tar of a flat file tree. Archives are
//! byte-for-byte reproducible: entries are sorted, and timestamps and
//! ownership are zeroed. The archive is written next to its destination
//! and renamed into place, so a failed build never leaves a partial file
//! at `dest`. The destination directory must already exist; a build whose
//! staging directory was removed underneath it fails instead of
//! recreating it.

use crate::error::{InstallError, InstallResult};
use crate::fetch::compute_sha256;
use crate::manifest::update::list_relative_files;
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

/// File name of the package archive inside an installed model directory
pub const PACKAGE_FILE: &str = "package.tar.gz";

/// Result of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
    pub files: Vec<String>,
}

/// Stages files in a scoped temp workspace and builds the archive
///
/// The workspace is removed when the builder is dropped.
pub struct PackageBuilder {
    workspace: TempDir,
}

impl PackageBuilder {
    pub fn new() -> InstallResult<Self> {
        let workspace = tempfile::Builder::new()
            .prefix("modelpack-package-")
            .tempdir()?;
        Ok(Self { workspace })
    }

    /// Create the workspace under a specific directory
    pub fn new_in(dir: &Path) -> InstallResult<Self> {
        std::fs::create_dir_all(dir)?;
        let workspace = tempfile::Builder::new()
            .prefix("modelpack-package-")
            .tempdir_in(dir)?;
        Ok(Self { workspace })
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Absolute path for a package-relative file, creating parent dirs
    pub fn workspace_path(&self, rel: &str) -> InstallResult<PathBuf> {
        let rel = checked_relative(rel)?;
        let path = self.workspace.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Copy a local file into the package
    pub fn add_file(&self, src: &Path, rel: &str) -> InstallResult<PathBuf> {
        let dest = self.workspace_path(rel)?;
        std::fs::copy(src, &dest)?;
        Ok(dest)
    }

    pub fn add_bytes(&self, rel: &str, bytes: &[u8]) -> InstallResult<PathBuf> {
        let dest = self.workspace_path(rel)?;
        std::fs::write(&dest, bytes)?;
        Ok(dest)
    }

    /// Copy every file under `dir`, keeping relative paths
    pub fn add_dir(&self, dir: &Path) -> InstallResult<usize> {
        let files = list_relative_files(dir)?;
        for rel in &files {
            self.add_file(&dir.join(rel), rel)?;
        }
        Ok(files.len())
    }

    /// Relative paths currently staged
    pub fn files(&self) -> InstallResult<Vec<String>> {
        list_relative_files(self.workspace.path())
    }

    pub fn build(&self, dest: &Path) -> InstallResult<PackageSummary> {
        build_archive(self.workspace.path(), dest)
    }

    /// [`PackageBuilder::build`] on the blocking pool
    pub async fn build_async(&self, dest: &Path) -> InstallResult<PackageSummary> {
        let src = self.workspace.path().to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || build_archive(&src, &dest))
            .await
            .map_err(|e| InstallError::Io(std::io::Error::other(e)))?
    }
}

/// Write a deterministic tar.gz of every file under `src` to `dest`
///
/// The parent of `dest` must exist.
pub fn build_archive(src: &Path, dest: &Path) -> InstallResult<PackageSummary> {
    let files = list_relative_files(src)?;
    if files.is_empty() {
        return Err(InstallError::Package(format!(
            "nothing to package in {}",
            src.display()
        )));
    }

    let dest_dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dest_dir.is_dir() {
        return Err(InstallError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("package directory {} does not exist", dest_dir.display()),
        )));
    }

    let staging = tempfile::Builder::new()
        .prefix(".package-")
        .tempfile_in(&dest_dir)?;
    {
        let encoder = GzBuilder::new()
            .mtime(0)
            .write(staging.as_file(), Compression::default());
        let mut tar = tar::Builder::new(encoder);

        for rel in &files {
            let path = src.join(rel);
            let len = std::fs::metadata(&path)?.len();
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(len);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            tar.append_data(&mut header, rel, File::open(&path)?)?;
        }

        tar.into_inner()?.finish()?;
    }
    staging.as_file().sync_all()?;
    staging.persist(dest).map_err(|e| InstallError::Io(e.error))?;

    let (sha256, size) = compute_sha256(dest)?;
    tracing::debug!(dest = ?dest, files = files.len(), size, "Package archive written");

    Ok(PackageSummary {
        path: dest.to_path_buf(),
        size,
        sha256,
        files,
    })
}

/// Unpack a package into `dest`, returning the extracted relative paths
pub fn extract_package(archive: &Path, dest: &Path) -> InstallResult<Vec<String>> {
    std::fs::create_dir_all(dest)?;
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if !is_safe_relative(&path) {
            return Err(InstallError::Package(format!(
                "archive entry escapes package root: {}",
                path.display()
            )));
        }
        entry.unpack_in(dest)?;
    }

    list_relative_files(dest)
}

fn is_safe_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().next().is_some()
}

fn checked_relative(rel: &str) -> InstallResult<&Path> {
    let path = Path::new(rel);
    if !is_safe_relative(path) {
        return Err(InstallError::Package(format!("invalid package path: {rel}")));
    }
    Ok(path)
}
