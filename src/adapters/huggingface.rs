//! HuggingFace Hub adapter
//!
//! Catch-all adapter: accepts any namespace and must be registered last.
//! Specs in the `hf`/`huggingface` namespace map to bare model ids
//! (`hf/bert-base-uncased` -> `bert-base-uncased`); any other namespace is
//! treated as the owning organization (`BAAI/bge-small-en-v1.5`).

use super::{
    AdapterConfig, RemoteFile, RepositoryAdapter, SearchResult, assemble_package, revision_for,
    select_files,
};
use crate::error::{InstallError, InstallResult};
use crate::fetch::{HttpFetcher, ModelValidator, ProgressCallback};
use crate::manifest::{ExecutionFormat, Framework, Io, Manifest, ModelFile};
use crate::schema;
use crate::spec::ModelSpec;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_BASE_URL: &str = "https://huggingface.co";

/// Files requested when the repository listing is unavailable
pub const FALLBACK_FILES: [&str; 6] = [
    "config.json",
    "pytorch_model.bin",
    "tokenizer.json",
    "tokenizer_config.json",
    "vocab.txt",
    "vocab.json",
];

/// `/api/models/{id}` response (partial)
#[derive(Debug, Default, Deserialize)]
struct ModelInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
    #[serde(default, rename = "cardData")]
    card_data: Option<CardData>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

#[derive(Debug, Default, Deserialize)]
struct CardData {
    #[serde(default)]
    license: Option<serde_json::Value>,
}

impl ModelInfo {
    fn license(&self) -> Option<String> {
        match self.card_data.as_ref()?.license.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => items
                .iter()
                .find_map(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        }
    }
}

/// `/api/models?search=` entry
#[derive(Debug, Deserialize)]
struct HubSearchHit {
    id: String,
    #[serde(default)]
    pipeline_tag: Option<String>,
    #[serde(default)]
    library_name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct HuggingFaceAdapter {
    base_url: String,
    fetcher: HttpFetcher,
    validator: ModelValidator,
    parallel: usize,
}

impl HuggingFaceAdapter {
    pub fn new(config: &AdapterConfig) -> InstallResult<Self> {
        Ok(Self {
            base_url: config.base_url_or(DEFAULT_BASE_URL),
            fetcher: config.fetcher()?,
            validator: config.validator()?,
            parallel: config.parallel_downloads,
        })
    }

    /// Hub model id for a spec's namespace and name
    pub fn model_id(namespace: &str, name: &str) -> String {
        match namespace {
            "" | "hf" | "huggingface" => name.to_string(),
            _ => format!("{namespace}/{name}"),
        }
    }

    fn file_url(&self, model_id: &str, revision: &str, file: &str) -> String {
        format!("{}/{}/resolve/{}/{}", self.base_url, model_id, revision, file)
    }

    async fn model_info(&self, model_id: &str) -> InstallResult<ModelInfo> {
        self.fetcher
            .get_json(&format!("{}/api/models/{}", self.base_url, model_id))
            .await
    }

    async fn infer_io(&self, model_id: &str, revision: &str) -> Io {
        let url = self.file_url(model_id, revision, "config.json");
        match self.fetcher.get_bytes(&url).await {
            Ok(bytes) => schema::io_from_config(&bytes),
            Err(e) => {
                tracing::warn!(
                    model_id = %model_id,
                    error = %e,
                    "config.json unavailable, using generic I/O schema"
                );
                Io::generic()
            }
        }
    }
}

#[async_trait]
impl RepositoryAdapter for HuggingFaceAdapter {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn can_handle(&self, _namespace: &str, _name: &str) -> bool {
        true
    }

    async fn get_manifest(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> InstallResult<Manifest> {
        let spec = ModelSpec::new(namespace, name, version);
        let model_id = Self::model_id(namespace, name);
        let revision = revision_for(version, "main");

        let page = format!("{}/{}", self.base_url, model_id);
        if !self.validator.exists(&page).await? {
            return Err(InstallError::NotFound(spec.to_string()));
        }

        let io = self.infer_io(&model_id, &revision).await;
        let info = match self.model_info(&model_id).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(model_id = %model_id, error = %e, "Model info unavailable");
                ModelInfo::default()
            }
        };

        let mut manifest = Manifest::new(&spec);
        manifest.metadata.description = format!("Model from Hugging Face: {model_id}");
        manifest.metadata.license = info.license().unwrap_or_else(|| "Unknown".to_string());
        manifest.metadata.homepage = Some(page);
        manifest.metadata.tags = info.tags;
        manifest.framework = Framework::new("PyTorch", "2.0.0");
        manifest.format.kind = "pytorch".to_string();
        manifest.format.execution_format = ExecutionFormat::Onnx;
        manifest.format.files = vec![ModelFile::named("pytorch_model.bin")];
        manifest.io = io;
        manifest.distribution.package.url = self.file_url(&model_id, &revision, "pytorch_model.bin");
        manifest.distribution.registry.url = self.base_url.clone();
        manifest.distribution.registry.namespace = "huggingface".to_string();

        tracing::info!(model_id = %model_id, inputs = manifest.io.inputs.len(), "Built manifest");
        Ok(manifest)
    }

    async fn download_package(
        &self,
        manifest: &mut Manifest,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> InstallResult<()> {
        let model_id = Self::model_id(&manifest.metadata.namespace, &manifest.metadata.name);
        let revision = revision_for(&manifest.metadata.version, "main");

        let listing = match self.model_info(&model_id).await {
            Ok(info) if !info.siblings.is_empty() => {
                Some(info.siblings.into_iter().map(|s| s.rfilename).collect::<Vec<_>>())
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(model_id = %model_id, error = %e, "File listing unavailable, using defaults");
                None
            }
        };
        let selection = match &listing {
            Some(files) => select_files(files, true),
            None => select_files(&FALLBACK_FILES, false),
        };

        tracing::info!(
            model_id = %model_id,
            format = selection.format.as_str(),
            files = selection.files.len(),
            "Selected files"
        );

        if selection.format.is_runtime_ready()
            && let Some(format) = selection.format.execution_format()
        {
            manifest.format.kind = format.as_str().to_string();
            manifest.format.execution_format = format;
        }

        let files = selection
            .files
            .iter()
            .map(|file| RemoteFile::new(file, self.file_url(&model_id, &revision, file)))
            .collect();

        assemble_package(&self.fetcher, files, manifest, dest, self.parallel, progress).await?;
        Ok(())
    }

    async fn search(&self, query: &str) -> InstallResult<Vec<SearchResult>> {
        let url = format!(
            "{}/api/models?search={}&limit=20",
            self.base_url,
            urlencoding::encode(query)
        );
        let hits: Vec<HubSearchHit> = match self.fetcher.get_json(&url).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::debug!(error = %e, "HuggingFace search unavailable");
                return Ok(Vec::new());
            }
        };

        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                name: hit.id,
                namespace: "hf".to_string(),
                version: crate::spec::LATEST.to_string(),
                description: hit.pipeline_tag.unwrap_or_default(),
                framework: hit.library_name.unwrap_or_default(),
                tags: hit.tags,
            })
            .collect())
    }
}
