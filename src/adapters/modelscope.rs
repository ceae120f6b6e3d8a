//! ModelScope adapter
//!
//! Specs look like `modelscope/<owner>/<model>` (alias `ms`). ModelScope
//! wraps most responses in a `{"Code": .., "Data": {..}}` envelope with
//! PascalCase keys; lowercase keys and unwrapped bodies are also accepted.

use super::{
    AdapterConfig, RemoteFile, RepositoryAdapter, SearchResult, assemble_package, revision_for,
    select_files,
};
use crate::error::{InstallError, InstallResult};
use crate::fetch::{HttpFetcher, ModelValidator, ProgressCallback};
use crate::manifest::{Framework, Io, Manifest, ModelFile};
use crate::schema;
use crate::spec::{LATEST, ModelSpec};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

pub const DEFAULT_BASE_URL: &str = "https://www.modelscope.cn";

/// Files requested when the repository listing is unavailable
pub const FALLBACK_FILES: [&str; 6] = [
    "configuration.json",
    "config.json",
    "pytorch_model.bin",
    "model.safetensors",
    "tokenizer.json",
    "vocab.txt",
];

#[derive(Debug, Default, Deserialize)]
struct MsModel {
    #[serde(default, rename = "Description", alias = "description")]
    description: String,
    #[serde(default, rename = "License", alias = "license")]
    license: String,
    #[serde(default, rename = "Frameworks", alias = "frameworks", alias = "framework")]
    frameworks: Option<Value>,
    #[serde(default, rename = "Tags", alias = "tags")]
    tags: Vec<String>,
}

impl MsModel {
    fn framework(&self) -> Option<String> {
        match self.frameworks.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Array(items) => items.iter().find_map(|v| v.as_str()).map(str::to_string),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MsFileListing {
    #[serde(default, rename = "Files", alias = "files")]
    files: Vec<MsFile>,
}

#[derive(Debug, Deserialize)]
struct MsFile {
    #[serde(rename = "Path", alias = "path")]
    path: String,
    #[serde(default, rename = "Type", alias = "type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct MsSearchData {
    #[serde(default, rename = "Models", alias = "models")]
    models: Vec<MsSearchHit>,
}

#[derive(Debug, Deserialize)]
struct MsSearchHit {
    #[serde(rename = "Name", alias = "name")]
    name: String,
    #[serde(default, rename = "Path", alias = "path", alias = "owner")]
    path: String,
    #[serde(default, rename = "Description", alias = "description")]
    description: String,
}

/// Decode `Data`/`data` when present, else the body itself
fn unwrap_envelope<T: DeserializeOwned>(body: Value) -> InstallResult<T> {
    let inner = match body {
        Value::Object(mut map) => match map.remove("Data").or_else(|| map.remove("data")) {
            Some(data) => data,
            None => Value::Object(map),
        },
        other => other,
    };
    Ok(serde_json::from_value(inner)?)
}

pub struct ModelScopeAdapter {
    base_url: String,
    fetcher: HttpFetcher,
    validator: ModelValidator,
    parallel: usize,
}

impl ModelScopeAdapter {
    pub fn new(config: &AdapterConfig) -> InstallResult<Self> {
        Ok(Self {
            base_url: config.base_url_or(DEFAULT_BASE_URL),
            fetcher: config.fetcher()?,
            validator: config.validator()?,
            parallel: config.parallel_downloads,
        })
    }

    fn parse_name(name: &str) -> InstallResult<(&str, &str)> {
        super::split_owner(name).ok_or_else(|| InstallError::InvalidModelName {
            adapter: "modelscope".to_string(),
            name: name.to_string(),
            expected: "owner/model (e.g. damo/nlp_structbert_backbone_base_std)".to_string(),
        })
    }

    fn api_url(&self, owner: &str, model: &str) -> String {
        format!("{}/api/v1/models/{}/{}", self.base_url, owner, model)
    }

    fn file_url(&self, owner: &str, model: &str, revision: &str, file: &str) -> String {
        format!(
            "{}/repo?Revision={}&FilePath={}",
            self.api_url(owner, model),
            urlencoding::encode(revision),
            urlencoding::encode(file)
        )
    }

    async fn get_data<T: DeserializeOwned>(&self, url: &str) -> InstallResult<T> {
        let body: Value = self.fetcher.get_json(url).await?;
        unwrap_envelope(body)
    }

    async fn list_files(&self, owner: &str, model: &str, revision: &str) -> InstallResult<Vec<String>> {
        let url = format!(
            "{}/repo/files?Revision={}&Recursive=true",
            self.api_url(owner, model),
            urlencoding::encode(revision)
        );
        let listing: MsFileListing = self.get_data(&url).await?;
        Ok(listing
            .files
            .into_iter()
            .filter(|f| f.kind != "tree")
            .map(|f| f.path)
            .collect())
    }

    async fn infer_io(&self, owner: &str, model: &str, revision: &str) -> Io {
        let url = self.file_url(owner, model, revision, "config.json");
        match self.fetcher.get_bytes(&url).await {
            Ok(bytes) => schema::io_from_config(&bytes),
            Err(e) => {
                tracing::warn!(model = %format!("{owner}/{model}"), error = %e, "config.json unavailable, using generic I/O schema");
                Io::generic()
            }
        }
    }
}

#[async_trait]
impl RepositoryAdapter for ModelScopeAdapter {
    fn name(&self) -> &str {
        "modelscope"
    }

    fn can_handle(&self, namespace: &str, _name: &str) -> bool {
        matches!(namespace, "modelscope" | "ms")
    }

    async fn get_manifest(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> InstallResult<Manifest> {
        let spec = ModelSpec::new(namespace, name, version);
        let (owner, model) = Self::parse_name(name)?;
        let revision = revision_for(version, "master");

        let page = format!("{}/models/{}/{}", self.base_url, owner, model);
        if !self.validator.exists(&page).await? {
            return Err(InstallError::NotFound(spec.to_string()));
        }

        let info = match self.get_data::<MsModel>(&self.api_url(owner, model)).await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(model = %spec, error = %e, "ModelScope metadata unavailable, building basic manifest");
                None
            }
        };

        let mut manifest = Manifest::new(&spec);
        manifest.metadata.description = format!("Model from ModelScope: {owner}/{model}");
        manifest.metadata.license = "Unknown".to_string();
        manifest.metadata.homepage = Some(page.clone());
        manifest.framework = Framework::new("PyTorch", "2.0.0");
        manifest.format.kind = "modelscope".to_string();
        manifest.format.execution_format = crate::manifest::ExecutionFormat::Pytorch;
        manifest.format.files = vec![ModelFile::named("pytorch_model.bin")];
        manifest.distribution.package.url = page;
        manifest.distribution.registry.url = self.base_url.clone();
        manifest.distribution.registry.namespace = "modelscope".to_string();

        if let Some(info) = info {
            if !info.description.is_empty() {
                manifest.metadata.description = info.description.clone();
            }
            if !info.license.is_empty() {
                manifest.metadata.license = info.license.clone();
            }
            if let Some(framework) = info.framework() {
                manifest.framework.name = framework;
            }
            manifest.metadata.tags = info.tags;
            manifest.io = self.infer_io(owner, model, &revision).await;
        }

        tracing::info!(model = %spec, inputs = manifest.io.inputs.len(), "Built manifest");
        Ok(manifest)
    }

    async fn download_package(
        &self,
        manifest: &mut Manifest,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> InstallResult<()> {
        let name = manifest.metadata.name.clone();
        let (owner, model) = Self::parse_name(&name)?;
        let revision = revision_for(&manifest.metadata.version, "master");

        let selection = match self.list_files(owner, model, &revision).await {
            Ok(files) if !files.is_empty() => select_files(&files, true),
            Ok(_) => select_files(&FALLBACK_FILES, false),
            Err(e) => {
                tracing::warn!(model = %name, error = %e, "File listing unavailable, using defaults");
                select_files(&FALLBACK_FILES, false)
            }
        };

        tracing::info!(
            model = %name,
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
            .map(|file| RemoteFile::new(file, self.file_url(owner, model, &revision, file)))
            .collect();

        assemble_package(&self.fetcher, files, manifest, dest, self.parallel, progress).await?;
        Ok(())
    }

    async fn search(&self, query: &str) -> InstallResult<Vec<SearchResult>> {
        let url = format!(
            "{}/api/v1/models?Keyword={}",
            self.base_url,
            urlencoding::encode(query)
        );
        let data: MsSearchData = match self.get_data(&url).await {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(error = %e, "ModelScope search unavailable");
                return Ok(Vec::new());
            }
        };

        Ok(data
            .models
            .into_iter()
            .map(|hit| SearchResult {
                name: if hit.path.is_empty() {
                    hit.name
                } else {
                    format!("{}/{}", hit.path, hit.name)
                },
                namespace: "modelscope".to_string(),
                version: LATEST.to_string(),
                description: hit.description,
                framework: String::new(),
                tags: Vec::new(),
            })
            .collect())
    }
}
