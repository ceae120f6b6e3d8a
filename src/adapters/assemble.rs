//! Concurrent download and package assembly shared by the hub adapters

use crate::error::{InstallError, InstallResult};
use crate::fetch::{HttpFetcher, ProgressCallback, compute_sha256_async};
use crate::manifest::{Manifest, ModelFile};
use crate::package::{PackageBuilder, PackageSummary};
use futures::StreamExt;
use std::path::Path;
use tokio::sync::Mutex;

/// A file to fetch, addressed by its path inside the package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub url: String,
}

impl RemoteFile {
    pub fn new(path: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
        }
    }
}

/// Download `files` concurrently and build the package at `dest`
///
/// Individual failures are logged and skipped. Zero successful downloads
/// is a [`InstallError::NoFilesDownloaded`]. On success the manifest's file
/// list, package checksum and size reflect what was actually packaged.
pub async fn assemble_package(
    fetcher: &HttpFetcher,
    files: Vec<RemoteFile>,
    manifest: &mut Manifest,
    dest: &Path,
    parallel: usize,
    progress: Option<ProgressCallback>,
) -> InstallResult<PackageSummary> {
    let model = manifest.full_version();
    let requested = files.len();
    let builder = PackageBuilder::new()?;
    let downloaded: Mutex<Vec<ModelFile>> = Mutex::new(Vec::with_capacity(requested));

    tracing::info!(model = %model, files = requested, parallel, "Downloading package files");

    {
        let builder = &builder;
        let downloaded = &downloaded;
        let progress = progress.as_ref();
        futures::stream::iter(files)
            .map(move |file| async move {
                match fetch_one(fetcher, builder, &file, progress).await {
                    Ok(entry) => downloaded.lock().await.push(entry),
                    Err(e) => tracing::warn!(
                        file = %file.path,
                        url = %file.url,
                        error = %e,
                        "Skipping file that failed to download"
                    ),
                }
            })
            .buffer_unordered(parallel.max(1))
            .collect::<Vec<()>>()
            .await;
    }

    let mut downloaded = downloaded.into_inner();
    if downloaded.is_empty() {
        return Err(InstallError::NoFilesDownloaded(model));
    }
    if downloaded.len() < requested {
        tracing::warn!(
            model = %model,
            requested,
            downloaded = downloaded.len(),
            "Partial download, continuing with available files"
        );
    }
    downloaded.sort_by(|a, b| a.path.cmp(&b.path));

    let summary = builder.build_async(dest).await?;
    manifest.format.files = downloaded;
    manifest.set_package_checksum(summary.sha256.clone(), summary.size);

    tracing::info!(
        model = %model,
        files = summary.files.len(),
        size = summary.size,
        sha256 = %summary.sha256,
        "Package assembled"
    );

    Ok(summary)
}

async fn fetch_one(
    fetcher: &HttpFetcher,
    builder: &PackageBuilder,
    file: &RemoteFile,
    progress: Option<&ProgressCallback>,
) -> InstallResult<ModelFile> {
    let target = builder.workspace_path(&file.path)?;
    fetcher.download_to(&file.url, &target, progress).await?;
    let (sha256, size) = compute_sha256_async(target).await?;
    Ok(ModelFile {
        path: file.path.clone(),
        size,
        sha256,
    })
}
