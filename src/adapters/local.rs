//! Private registry adapter
//!
//! A modelpack-compatible registry serves finished manifests and packages:
//! - `GET {base}/api/v1/models/{ns}/{name}/{version}/manifest.json`
//! - `GET {base}/api/v1/models/{ns}/{name}/{version}/package.tar.gz`
//! - `GET {base}/api/v1/search?q=<query>`
//!
//! Packages are fetched as-is, trying the primary URL and then each mirror.

use super::{AdapterConfig, PUBLIC_NAMESPACES, RepositoryAdapter, SearchResult};
use crate::error::{InstallError, InstallResult};
use crate::fetch::{self, HttpFetcher, ProgressCallback};
use crate::manifest::{Io, MANIFEST_FILE, Manifest};
use crate::package::PACKAGE_FILE;
use crate::spec::ModelSpec;
use async_trait::async_trait;
use std::path::Path;

pub struct LocalRegistryAdapter {
    base_url: String,
    mirrors: Vec<String>,
    fetcher: HttpFetcher,
    verify_checksums: bool,
}

impl LocalRegistryAdapter {
    /// Requires `config.base_url`
    pub fn new(config: &AdapterConfig) -> InstallResult<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| InstallError::Package("local registry requires a base URL".into()))?;

        Ok(Self {
            base_url,
            mirrors: config
                .mirrors
                .iter()
                .map(|m| m.trim_end_matches('/').to_string())
                .collect(),
            fetcher: config.fetcher()?,
            verify_checksums: config.verify_checksums,
        })
    }

    fn model_path(spec: &ModelSpec) -> String {
        format!(
            "api/v1/models/{}/{}/{}",
            spec.namespace, spec.name, spec.version
        )
    }

    /// Primary package URL, manifest mirrors, then configured registry mirrors
    fn package_candidates(&self, manifest: &Manifest) -> Vec<String> {
        let model_path = Self::model_path(&manifest.spec());
        let package = &manifest.distribution.package;

        let mut candidates: Vec<String> = Vec::new();
        let declared = std::iter::once(&package.url).chain(package.mirrors.iter());
        let configured = self
            .mirrors
            .iter()
            .map(|mirror| format!("{mirror}/{model_path}/{PACKAGE_FILE}"));

        for url in declared.cloned().chain(configured) {
            if !url.is_empty() && !candidates.contains(&url) {
                candidates.push(url);
            }
        }
        candidates
    }

    async fn fetch_candidate(
        &self,
        url: &str,
        partial: &Path,
        expected_sha256: &str,
        progress: Option<&ProgressCallback>,
    ) -> InstallResult<()> {
        self.fetcher.download_to(url, partial, progress).await?;
        if self.verify_checksums && !expected_sha256.is_empty() {
            let path = partial.to_path_buf();
            let expected = expected_sha256.to_string();
            let verified = tokio::task::spawn_blocking(move || fetch::verify_sha256(&path, &expected))
                .await
                .map_err(|e| InstallError::Io(std::io::Error::other(e)))?;
            if let Err(e) = verified {
                let _ = tokio::fs::remove_file(partial).await;
                return Err(e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryAdapter for LocalRegistryAdapter {
    fn name(&self) -> &str {
        "local"
    }

    fn can_handle(&self, namespace: &str, _name: &str) -> bool {
        !PUBLIC_NAMESPACES.contains(&namespace)
    }

    async fn get_manifest(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> InstallResult<Manifest> {
        let spec = ModelSpec::new(namespace, name, version);
        let model_path = Self::model_path(&spec);
        let url = format!("{}/{}/{}", self.base_url, model_path, MANIFEST_FILE);

        let mut manifest: Manifest = match self.fetcher.get_json(&url).await {
            Ok(manifest) => manifest,
            Err(e) if e.is_not_found_status() => {
                return Err(InstallError::NotFound(spec.to_string()));
            }
            Err(e) => return Err(e),
        };

        if manifest.io.inputs.is_empty() || manifest.io.outputs.is_empty() {
            tracing::warn!(model = %spec, "Registry manifest has no I/O schema, using generic");
            manifest.io = Io::generic();
        }
        if manifest.distribution.package.url.is_empty() {
            manifest.distribution.package.url =
                format!("{}/{}/{}", self.base_url, model_path, PACKAGE_FILE);
        }
        if manifest.distribution.registry.url.is_empty() {
            manifest.distribution.registry.url = self.base_url.clone();
            manifest.distribution.registry.namespace = namespace.to_string();
        }

        tracing::info!(model = %spec, "Fetched registry manifest");
        Ok(manifest)
    }

    async fn download_package(
        &self,
        manifest: &mut Manifest,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> InstallResult<()> {
        let model = manifest.full_version();
        let expected = manifest.distribution.package.sha256.clone();
        let partial = dest.with_extension("part");

        for url in self.package_candidates(manifest) {
            match self
                .fetch_candidate(&url, &partial, &expected, progress.as_ref())
                .await
            {
                Ok(()) => {
                    tokio::fs::rename(&partial, dest).await?;
                    let dest = dest.to_path_buf();
                    let (sha256, size) = fetch::compute_sha256_async(dest).await?;
                    manifest.set_package_checksum(sha256, size);
                    tracing::info!(model = %model, url = %url, size, "Downloaded registry package");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(model = %model, url = %url, error = %e, "Package source failed, trying next");
                }
            }
        }

        Err(InstallError::NoFilesDownloaded(model))
    }

    async fn search(&self, query: &str) -> InstallResult<Vec<SearchResult>> {
        let url = format!(
            "{}/api/v1/search?q={}",
            self.base_url,
            urlencoding::encode(query)
        );
        match self.fetcher.get_json(&url).await {
            Ok(results) => Ok(results),
            Err(e) => {
                tracing::debug!(error = %e, "Registry search unavailable");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(mirrors: &[&str]) -> LocalRegistryAdapter {
        let config = AdapterConfig {
            mirrors: mirrors.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
        .with_base_url("http://registry.local/");
        LocalRegistryAdapter::new(&config).unwrap()
    }

    #[test]
    fn test_requires_base_url() {
        assert!(LocalRegistryAdapter::new(&AdapterConfig::default()).is_err());
    }

    #[test]
    fn test_skips_public_namespaces() {
        let adapter = adapter(&[]);
        assert!(adapter.can_handle("acme", "classifier"));
        for ns in PUBLIC_NAMESPACES {
            assert!(!adapter.can_handle(ns, "anything"));
        }
    }

    #[test]
    fn test_package_candidates_order() {
        let adapter = adapter(&["http://mirror-a/", "http://mirror-b"]);
        let mut manifest = Manifest::new(&ModelSpec::new("acme", "classifier", "1.0"));
        manifest.distribution.package.url = "http://registry.local/pkg.tar.gz".into();
        manifest.distribution.package.mirrors = vec![
            "http://cdn/pkg.tar.gz".into(),
            "http://registry.local/pkg.tar.gz".into(),
        ];

        assert_eq!(
            adapter.package_candidates(&manifest),
            vec![
                "http://registry.local/pkg.tar.gz",
                "http://cdn/pkg.tar.gz",
                "http://mirror-a/api/v1/models/acme/classifier/1.0/package.tar.gz",
                "http://mirror-b/api/v1/models/acme/classifier/1.0/package.tar.gz",
            ]
        );
    }
}
