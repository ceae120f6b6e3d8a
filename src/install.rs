//! Install pipeline
//!
//! ```text
//! spec ─> AdapterRegistry ─> get_manifest ─> download_package ─> extract
//!      ─> post-assembly update ─> conversion chain ─> post-assembly update
//!      ─> validate ─> CacheManager::store
//! ```
//!
//! Everything up to the final `store` happens inside a staging directory
//! under `<cache>/tmp`. Dropping the install future (Ctrl+C, deadline)
//! removes it, so a cancelled install never leaves a partial model behind.
//! Blocking workers hold a reference to the staging directory; if the
//! future is dropped while one runs, removal happens when it finishes.

use crate::adapters::{AdapterRegistry, register_default_adapters};
use crate::cache::{CacheManager, FILES_DIR, INSTALL_RECORD, InstallRecord};
use crate::config::InstallerConfig;
use crate::convert::{ConversionChain, ConversionReport, ConversionRequest};
use crate::error::{InstallError, InstallResult};
use crate::fetch::{ProgressCallback, compute_sha256, update_manifest_checksum};
use crate::manifest::{MANIFEST_FILE, Manifest, ModelFile, update_execution_format};
use crate::package::{PACKAGE_FILE, build_archive, extract_package};
use crate::spec::ModelSpec;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Reinstall even when the model is cached
    pub force: bool,
    /// Run the ONNX conversion chain
    pub convert: bool,
    /// Overall deadline for one install
    pub deadline: Option<Duration>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            force: false,
            convert: true,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub spec: ModelSpec,
    pub manifest: Manifest,
    /// Install directory in the cache
    pub path: PathBuf,
    /// Adapter that served the model; `cache` when already installed
    pub adapter: String,
    pub conversion: Option<ConversionReport>,
    pub already_installed: bool,
}

pub struct Installer {
    registry: AdapterRegistry,
    cache: CacheManager,
    converter: ConversionChain,
    options: InstallOptions,
}

impl Installer {
    pub fn new(registry: AdapterRegistry, cache: CacheManager, converter: ConversionChain) -> Self {
        Self {
            registry,
            cache,
            converter,
            options: InstallOptions::default(),
        }
    }

    /// Default adapters, cache and conversion chain for a configuration
    pub fn from_config(config: &InstallerConfig) -> InstallResult<Self> {
        let converter = if config.conversion.enabled {
            ConversionChain::from_config(config)?
        } else {
            ConversionChain::default()
        };
        Ok(Self::new(
            register_default_adapters(config)?,
            CacheManager::new(&config.cache_dir),
            converter,
        ))
    }

    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Install `spec` into the cache
    pub async fn install(
        &self,
        spec: &ModelSpec,
        progress: Option<ProgressCallback>,
    ) -> InstallResult<InstallOutcome> {
        match self.options.deadline {
            Some(limit) => tokio::time::timeout(limit, self.run(spec, progress))
                .await
                .map_err(|_| {
                    tracing::warn!(model = %spec, deadline = ?limit, "Install deadline exceeded");
                    InstallError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("install of {spec} exceeded {}s", limit.as_secs()),
                    ))
                })?,
            None => self.run(spec, progress).await,
        }
    }

    /// Resolve a manifest without installing: cached copy first, then upstream
    pub async fn manifest(&self, spec: &ModelSpec) -> InstallResult<Manifest> {
        if self.cache.is_cached(spec) {
            return self.cache.load_manifest(spec);
        }
        let adapter = self.registry.find_adapter(&spec.namespace, &spec.name)?;
        adapter
            .get_manifest(&spec.namespace, &spec.name, &spec.version)
            .await
    }

    async fn run(
        &self,
        spec: &ModelSpec,
        progress: Option<ProgressCallback>,
    ) -> InstallResult<InstallOutcome> {
        if !self.options.force && self.cache.is_cached(spec) {
            tracing::info!(model = %spec, "Already installed");
            return Ok(InstallOutcome {
                spec: spec.clone(),
                manifest: self.cache.load_manifest(spec)?,
                path: self.cache.model_path(spec)?,
                adapter: "cache".to_string(),
                conversion: None,
                already_installed: true,
            });
        }

        let adapter = self.registry.find_adapter(&spec.namespace, &spec.name)?;
        tracing::info!(model = %spec, adapter = adapter.name(), "Resolved adapter");

        let mut manifest = adapter
            .get_manifest(&spec.namespace, &spec.name, &spec.version)
            .await?;

        let staging = Arc::new(self.cache.staging_dir()?);
        let package = staging.path().join(PACKAGE_FILE);
        let files_dir = staging.path().join(FILES_DIR);

        adapter
            .download_package(&mut manifest, &package, progress)
            .await?;

        let extracted = blocking_in(&staging, {
            let package = package.clone();
            let files_dir = files_dir.clone();
            move || extract_package(&package, &files_dir)
        })
        .await?;
        tracing::debug!(model = %spec, files = extracted.len(), "Extracted package");

        if manifest.format.files.is_empty() {
            manifest.format.files = describe_files(&files_dir, &extracted)?;
        }

        update_execution_format(&mut manifest, &files_dir)?;

        let conversion = if self.should_convert(&manifest) {
            let request = ConversionRequest::for_manifest(&manifest, &files_dir, adapter.name());
            let report = self.converter.run(&request).await;
            match report.output() {
                Some(output) => {
                    self.record_conversion(&mut manifest, &staging, &files_dir, output, &package)
                        .await?
                }
                None => tracing::warn!(
                    model = %spec,
                    outcome = %report,
                    "Continuing with {} weights",
                    manifest.format.execution_format
                ),
            }
            Some(report)
        } else {
            None
        };

        update_execution_format(&mut manifest, &files_dir)?;
        manifest.validate(true)?;

        manifest.save(&staging.path().join(MANIFEST_FILE))?;
        let record = serde_json::to_vec_pretty(&InstallRecord::new(spec))?;
        std::fs::write(staging.path().join(INSTALL_RECORD), record)?;

        let path = self.cache.store(spec, staging.path())?;
        tracing::info!(
            model = %spec,
            format = %manifest.format.execution_format,
            files = manifest.format.files.len(),
            path = ?path,
            "Install complete"
        );

        Ok(InstallOutcome {
            spec: spec.clone(),
            manifest,
            path,
            adapter: adapter.name().to_string(),
            conversion,
            already_installed: false,
        })
    }

    fn should_convert(&self, manifest: &Manifest) -> bool {
        self.options.convert
            && !self.converter.is_empty()
            && !manifest.format.execution_format.is_portable()
    }

    /// Add the converted file to the manifest and rebuild the package
    async fn record_conversion(
        &self,
        manifest: &mut Manifest,
        staging: &Arc<TempDir>,
        files_dir: &Path,
        output: &Path,
        package: &Path,
    ) -> InstallResult<()> {
        let rel = output
            .strip_prefix(files_dir)
            .map_err(|_| {
                InstallError::Package(format!(
                    "converted file {} is outside the package",
                    output.display()
                ))
            })?
            .to_string_lossy()
            .replace('\\', "/");

        let (sha256, size) = compute_sha256(output)?;
        manifest.format.files.retain(|f| f.path != rel);
        manifest.format.files.push(ModelFile {
            path: rel,
            size,
            sha256,
        });
        manifest.format.files.sort_by(|a, b| a.path.cmp(&b.path));

        let src = files_dir.to_path_buf();
        let dest = package.to_path_buf();
        blocking_in(staging, move || build_archive(&src, &dest)).await?;
        update_manifest_checksum(manifest, package)?;
        tracing::info!(model = %manifest.full_version(), "Package rebuilt with converted model");
        Ok(())
    }
}

/// `{path, size, sha256}` for extracted files
fn describe_files(dir: &Path, files: &[String]) -> InstallResult<Vec<ModelFile>> {
    files
        .iter()
        .map(|rel| {
            let (sha256, size) = compute_sha256(&dir.join(rel))?;
            Ok(ModelFile {
                path: rel.clone(),
                size,
                sha256,
            })
        })
        .collect()
}

/// Run `f` on the blocking pool with `staging` kept alive until it returns
async fn blocking_in<T, F>(staging: &Arc<TempDir>, f: F) -> InstallResult<T>
where
    F: FnOnce() -> InstallResult<T> + Send + 'static,
    T: Send + 'static,
{
    let guard = Arc::clone(staging);
    tokio::task::spawn_blocking(move || {
        let result = f();
        drop(guard);
        result
    })
    .await
    .map_err(|e| InstallError::Io(std::io::Error::other(e)))?
}
