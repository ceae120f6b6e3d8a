//! TensorFlow Hub adapter
//!
//! Specs look like `tfhub/<publisher>/<path>`, e.g.
//! `tfhub/google/universal-sentence-encoder@4`. A version other than
//! `latest` is appended to the model URL.

use super::{AdapterConfig, RemoteFile, RepositoryAdapter, SearchResult, assemble_package};
use crate::error::{InstallError, InstallResult};
use crate::fetch::{HttpFetcher, ModelValidator, ProgressCallback};
use crate::manifest::{ExecutionFormat, Framework, Io, IoSpec, Manifest, ModelFile};
use crate::spec::{LATEST, ModelSpec};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_BASE_URL: &str = "https://tfhub.dev";

const SAVED_MODEL: &str = "saved_model";
const TFLITE: &str = "tflite";

/// `{model}?format=json` response
#[derive(Debug, Default, Deserialize)]
struct TfHubModel {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    version: Option<serde_json::Value>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    inputs: Vec<TfHubTensor>,
    #[serde(default)]
    outputs: Vec<TfHubTensor>,
}

#[derive(Debug, Deserialize)]
struct TfHubTensor {
    name: String,
    #[serde(default)]
    dtype: Option<String>,
    #[serde(default)]
    shape: Vec<Option<i64>>,
}

impl TfHubTensor {
    /// Unknown dimensions are dynamic
    fn to_io_spec(&self) -> IoSpec {
        let shape: Vec<i64> = self.shape.iter().map(|d| d.unwrap_or(-1)).collect();
        let dtype = self.dtype.as_deref().unwrap_or("float32");
        IoSpec::new(&self.name, dtype, &shape)
    }
}

#[derive(Debug, Default, Deserialize)]
struct TfHubSearchResponse {
    #[serde(default)]
    results: Vec<TfHubSearchHit>,
}

#[derive(Debug, Deserialize)]
struct TfHubSearchHit {
    publisher: String,
    name: String,
    #[serde(default)]
    version: Option<serde_json::Value>,
    #[serde(default)]
    description: String,
}

fn version_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct TfHubAdapter {
    base_url: String,
    fetcher: HttpFetcher,
    validator: ModelValidator,
    parallel: usize,
}

impl TfHubAdapter {
    pub fn new(config: &AdapterConfig) -> InstallResult<Self> {
        Ok(Self {
            base_url: config.base_url_or(DEFAULT_BASE_URL),
            fetcher: config.fetcher()?,
            validator: config.validator()?,
            parallel: config.parallel_downloads,
        })
    }

    fn model_url(&self, name: &str, version: &str) -> InstallResult<String> {
        let (publisher, path) = super::split_owner(name).ok_or_else(|| {
            InstallError::InvalidModelName {
                adapter: "tensorflow-hub".to_string(),
                name: name.to_string(),
                expected: "publisher/path (e.g. google/universal-sentence-encoder)".to_string(),
            }
        })?;
        let mut url = format!("{}/{}/{}", self.base_url, publisher, path);
        if !version.is_empty() && version != LATEST {
            url.push('/');
            url.push_str(version);
        }
        Ok(url)
    }

    fn package_file(kind: &str) -> &'static str {
        if kind == TFLITE {
            "model.tflite"
        } else {
            "model.tar.gz"
        }
    }

    fn base_manifest(&self, spec: &ModelSpec, model_url: &str, kind: &str) -> Manifest {
        let mut manifest = Manifest::new(spec);
        manifest.metadata.description = format!("TensorFlow Hub model: {}", spec.name);
        manifest.metadata.license = "Apache-2.0".to_string();
        manifest.metadata.homepage = Some(model_url.to_string());
        manifest.framework = Framework::new("TensorFlow", "2.0.0");
        manifest.format.kind = kind.to_string();
        manifest.format.execution_format = ExecutionFormat::Tensorflow;
        manifest.format.files = vec![ModelFile::named(Self::package_file(kind))];
        manifest.distribution.package.url = format!("{model_url}?tf-hub-format=compressed");
        manifest.distribution.registry.url = self.base_url.clone();
        manifest.distribution.registry.namespace = "tfhub".to_string();
        manifest
    }
}

#[async_trait]
impl RepositoryAdapter for TfHubAdapter {
    fn name(&self) -> &str {
        "tensorflow-hub"
    }

    fn can_handle(&self, namespace: &str, _name: &str) -> bool {
        matches!(namespace, "tfhub" | "tf")
    }

    async fn get_manifest(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> InstallResult<Manifest> {
        let spec = ModelSpec::new(namespace, name, version);
        let model_url = self.model_url(name, version)?;

        let metadata: TfHubModel = match self
            .fetcher
            .get_json(&format!("{model_url}?format=json"))
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(
                    model = %spec,
                    error = %e,
                    "TF Hub metadata unavailable, building basic manifest"
                );
                if !self.validator.exists(&model_url).await? {
                    return Err(InstallError::NotFound(spec.to_string()));
                }
                return Ok(self.base_manifest(&spec, &model_url, SAVED_MODEL));
            }
        };

        let kind = metadata.format.as_deref().unwrap_or(SAVED_MODEL).to_lowercase();
        let mut manifest = self.base_manifest(&spec, &model_url, &kind);
        if !metadata.description.is_empty() {
            manifest.metadata.description = metadata.description.clone();
        }
        if !metadata.name.is_empty() {
            manifest.metadata.tags.push(metadata.name.clone());
        }
        if let Some(upstream) = version_string(metadata.version.as_ref()) {
            tracing::debug!(model = %spec, upstream_version = %upstream, "Resolved TF Hub version");
        }
        if !metadata.inputs.is_empty() && !metadata.outputs.is_empty() {
            manifest.io = Io {
                inputs: metadata.inputs.iter().map(TfHubTensor::to_io_spec).collect(),
                outputs: metadata.outputs.iter().map(TfHubTensor::to_io_spec).collect(),
            };
        }

        tracing::info!(model = %spec, format = %kind, "Built manifest");
        Ok(manifest)
    }

    async fn download_package(
        &self,
        manifest: &mut Manifest,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> InstallResult<()> {
        let url = if manifest.distribution.package.url.is_empty() {
            let model_url = self.model_url(&manifest.metadata.name, &manifest.metadata.version)?;
            format!("{model_url}?tf-hub-format=compressed")
        } else {
            manifest.distribution.package.url.clone()
        };
        let file = RemoteFile::new(Self::package_file(&manifest.format.kind), url);

        assemble_package(&self.fetcher, vec![file], manifest, dest, self.parallel, progress).await?;
        Ok(())
    }

    async fn search(&self, query: &str) -> InstallResult<Vec<SearchResult>> {
        let url = format!(
            "{}/api/v1/models?q={}",
            self.base_url,
            urlencoding::encode(query)
        );
        let response: TfHubSearchResponse = match self.fetcher.get_json(&url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "TF Hub search unavailable");
                return Ok(Vec::new());
            }
        };

        Ok(response
            .results
            .into_iter()
            .map(|hit| SearchResult {
                name: format!("{}/{}", hit.publisher, hit.name),
                namespace: "tfhub".to_string(),
                version: version_string(hit.version.as_ref()).unwrap_or_else(|| LATEST.to_string()),
                description: hit.description,
                framework: "TensorFlow".to_string(),
                tags: Vec::new(),
            })
            .collect())
    }
}
