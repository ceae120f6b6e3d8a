//! Repository adapters
//!
//! Each adapter turns a `(namespace, name, version)` triple into a
//! [`Manifest`] and, separately, into an assembled package on disk.
//!
//! Adapters are held by an [`AdapterRegistry`] in priority order and the
//! first adapter whose [`RepositoryAdapter::can_handle`] accepts a spec wins:
//! - `local`: private registry, only when configured
//! - `pytorch`: PyTorch Hub models described by GitHub `hubconf.py` files
//! - `tensorflow-hub`: TF Hub REST catalog
//! - `modelscope`: ModelScope REST catalog
//! - `huggingface`: catch-all, always registered last

pub mod assemble;
pub mod hubconf;
pub mod huggingface;
pub mod local;
pub mod modelscope;
pub mod pytorch;
pub mod selection;
pub mod tfhub;

pub use assemble::{RemoteFile, assemble_package};
pub use huggingface::HuggingFaceAdapter;
pub use local::LocalRegistryAdapter;
pub use modelscope::ModelScopeAdapter;
pub use pytorch::PyTorchHubAdapter;
pub use selection::{FileSelection, WeightFormat, select_files};
pub use tfhub::TfHubAdapter;

use crate::config::InstallerConfig;
use crate::error::{InstallError, InstallResult};
use crate::fetch::{HttpFetcher, ModelValidator, ProgressCallback};
use crate::manifest::Manifest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Namespaces owned by the public hub adapters
pub const PUBLIC_NAMESPACES: [&str; 8] = [
    "hf",
    "huggingface",
    "pytorch",
    "torch",
    "tfhub",
    "tf",
    "modelscope",
    "ms",
];

/// A search hit from any adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SearchResult {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SearchResult {
    pub fn spec_string(&self) -> String {
        if self.version.is_empty() {
            format!("{}/{}", self.namespace, self.name)
        } else {
            format!("{}/{}@{}", self.namespace, self.name, self.version)
        }
    }
}

/// Per-adapter settings, fixed at construction
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Overrides the adapter's public endpoint
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub parallel_downloads: usize,
    pub mirrors: Vec<String>,
    pub verify_checksums: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_secs: 300,
            parallel_downloads: 3,
            mirrors: Vec::new(),
            verify_checksums: true,
        }
    }
}

impl AdapterConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Configured base URL without a trailing slash, or `default`
    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn fetcher(&self) -> InstallResult<HttpFetcher> {
        HttpFetcher::new(self.timeout(), self.token.clone())
    }

    /// Validators never send credentials
    pub fn validator(&self) -> InstallResult<ModelValidator> {
        Ok(ModelValidator::new(crate::fetch::build_client(self.timeout())?))
    }
}

/// Integration contract for a model repository backend
#[async_trait]
pub trait RepositoryAdapter: Send + Sync {
    /// Short identifier, e.g. `huggingface`
    fn name(&self) -> &str;

    /// Whether this adapter claims the spec
    fn can_handle(&self, namespace: &str, name: &str) -> bool;

    /// Build a manifest for a model that is confirmed to exist
    async fn get_manifest(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> InstallResult<Manifest>;

    /// Download the model's files and write the package archive to `dest`
    ///
    /// Updates the manifest's file list, package checksum and size.
    async fn download_package(
        &self,
        manifest: &mut Manifest,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> InstallResult<()>;

    /// Best-effort search; unsupported or unreachable search yields `Ok(vec![])`
    async fn search(&self, query: &str) -> InstallResult<Vec<SearchResult>>;
}

/// Ordered adapter list; first match wins
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn RepositoryAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an adapter at the lowest priority so far
    pub fn register(&mut self, adapter: Arc<dyn RepositoryAdapter>) {
        tracing::debug!(
            adapter = adapter.name(),
            priority = self.adapters.len(),
            "Registered adapter"
        );
        self.adapters.push(adapter);
    }

    pub fn find_adapter(
        &self,
        namespace: &str,
        name: &str,
    ) -> InstallResult<Arc<dyn RepositoryAdapter>> {
        self.adapters
            .iter()
            .find(|adapter| adapter.can_handle(namespace, name))
            .cloned()
            .ok_or_else(|| InstallError::AdapterNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RepositoryAdapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Query every adapter, skipping the ones whose search fails
    pub async fn search_all(&self, query: &str) -> Vec<SearchResult> {
        let searches = self.adapters.iter().map(|adapter| async move {
            match adapter.search(query).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::debug!(adapter = adapter.name(), error = %e, "Search failed");
                    Vec::new()
                }
            }
        });
        futures::future::join_all(searches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Build the default adapter stack from configuration
///
/// Order: local registry (if configured), pytorch, tfhub, modelscope,
/// huggingface (if enabled).
pub fn register_default_adapters(config: &InstallerConfig) -> InstallResult<AdapterRegistry> {
    let base = AdapterConfig {
        timeout_secs: config.registry.timeout_secs,
        parallel_downloads: config.download.parallel,
        verify_checksums: config.download.verify_checksums,
        ..Default::default()
    };

    let mut registry = AdapterRegistry::new();

    if let Some(url) = &config.registry.url {
        let local = AdapterConfig {
            mirrors: config.registry.mirrors.clone(),
            ..base.clone()
        }
        .with_base_url(url.clone());
        registry.register(Arc::new(LocalRegistryAdapter::new(&local)?));
    }

    let github = base.clone().with_token(config.registry.github_token.clone());
    registry.register(Arc::new(PyTorchHubAdapter::new(&github)?));
    registry.register(Arc::new(TfHubAdapter::new(&base)?));
    registry.register(Arc::new(ModelScopeAdapter::new(&base)?));

    if config.registry.enable_huggingface {
        let hf = base.with_token(config.registry.huggingface_token.clone());
        registry.register(Arc::new(HuggingFaceAdapter::new(&hf)?));
    }

    Ok(registry)
}

/// `latest` maps to the default branch, anything else is used as a revision
pub(crate) fn revision_for(version: &str, default_branch: &str) -> String {
    if version.is_empty() || version == crate::spec::LATEST {
        default_branch.to_string()
    } else {
        version.to_string()
    }
}

/// Split `a/b...` into two non-empty halves
pub(crate) fn split_owner(name: &str) -> Option<(&str, &str)> {
    name.split_once('/')
        .filter(|(owner, rest)| !owner.is_empty() && !rest.is_empty())
}
