//! PyTorch Hub adapter
//!
//! PyTorch Hub has no REST catalog. Models live in GitHub repositories under
//! the `pytorch` organization and are described by a `hubconf.py` file, from
//! which weight URLs are scraped (see [`super::hubconf`]).
//!
//! Specs look like `pytorch/<repo>/<model>`, e.g. `pytorch/vision/resnet50`.

use super::hubconf::{self, FALLBACK_WEIGHTS};
use super::{AdapterConfig, RemoteFile, RepositoryAdapter, SearchResult, assemble_package};
use crate::error::{InstallError, InstallResult};
use crate::fetch::{HttpFetcher, ModelValidator, ProgressCallback};
use crate::manifest::{ExecutionFormat, Framework, Manifest, ModelFile};
use crate::spec::ModelSpec;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;

pub const GITHUB_URL: &str = "https://github.com";
pub const RAW_CONTENT_URL: &str = "https://raw.githubusercontent.com";
pub const HUB_URL: &str = "https://pytorch.org/hub";

const HUBCONF_BRANCHES: [&str; 2] = ["main", "master"];

pub struct PyTorchHubAdapter {
    github_url: String,
    raw_url: String,
    fetcher: HttpFetcher,
    validator: ModelValidator,
    parallel: usize,
}

impl PyTorchHubAdapter {
    /// `config.token` is a GitHub token, sent as `Authorization: token <pat>`
    pub fn new(config: &AdapterConfig) -> InstallResult<Self> {
        Ok(Self {
            github_url: config.base_url_or(GITHUB_URL),
            raw_url: RAW_CONTENT_URL.to_string(),
            fetcher: config.fetcher()?.with_auth_scheme("token"),
            validator: config.validator()?,
            parallel: config.parallel_downloads,
        })
    }

    /// Point the adapter at alternate GitHub web and raw-content hosts
    pub fn with_endpoints(mut self, github_url: &str, raw_url: &str) -> Self {
        self.github_url = github_url.trim_end_matches('/').to_string();
        self.raw_url = raw_url.trim_end_matches('/').to_string();
        self
    }

    /// Split `<repo>/<model>`
    fn parse_name(name: &str) -> InstallResult<(&str, &str)> {
        super::split_owner(name).ok_or_else(|| InstallError::InvalidModelName {
            adapter: "pytorch".to_string(),
            name: name.to_string(),
            expected: "repo/model (e.g. vision/resnet50)".to_string(),
        })
    }

    async fn fetch_hubconf(&self, github_repo: &str) -> Option<String> {
        for branch in HUBCONF_BRANCHES {
            let url = format!("{}/{}/{}/hubconf.py", self.raw_url, github_repo, branch);
            match self.fetcher.get_text(&url).await {
                Ok(text) => return Some(text),
                Err(e) => tracing::debug!(url = %url, error = %e, "hubconf.py not found on branch"),
            }
        }
        tracing::warn!(repo = %github_repo, "hubconf.py unavailable, using static weight table");
        None
    }

    /// Candidate weight URLs for a model
    pub async fn candidate_urls(&self, repo: &str, model: &str) -> Vec<String> {
        let github_repo = format!("pytorch/{repo}");
        let hubconf = self.fetch_hubconf(&github_repo).await;
        hubconf::weight_urls(hubconf.as_deref(), model)
    }
}

#[async_trait]
impl RepositoryAdapter for PyTorchHubAdapter {
    fn name(&self) -> &str {
        "pytorch"
    }

    fn can_handle(&self, namespace: &str, _name: &str) -> bool {
        matches!(namespace, "pytorch" | "torch")
    }

    async fn get_manifest(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> InstallResult<Manifest> {
        let spec = ModelSpec::new(namespace, name, version);
        let (repo, model) = Self::parse_name(name)?;
        let github_repo = format!("pytorch/{repo}");

        let repo_url = format!("{}/{}", self.github_url, github_repo);
        if !self.validator.exists(&repo_url).await? {
            return Err(InstallError::NotFound(spec.to_string()));
        }

        let urls = self.candidate_urls(repo, model).await;
        let Some((primary, rest)) = urls.split_first() else {
            tracing::warn!(model = %spec, "No weight URLs in hubconf.py or static table");
            return Err(InstallError::NotFound(spec.to_string()));
        };

        let mut manifest = Manifest::new(&spec);
        manifest.metadata.description = format!("Model from PyTorch Hub: {repo}/{model}");
        manifest.metadata.license = "BSD-3-Clause".to_string();
        manifest.metadata.homepage = Some(repo_url);
        manifest.framework = Framework::new("PyTorch", "2.0.0");
        manifest.format.kind = "pytorch".to_string();
        manifest.format.execution_format = ExecutionFormat::Pytorch;
        manifest.format.files = vec![ModelFile::named(format!("{model}.pth"))];
        manifest.distribution.package.url = primary.clone();
        manifest.distribution.package.mirrors = rest.to_vec();
        manifest.distribution.registry.url = HUB_URL.to_string();
        manifest.distribution.registry.namespace = "pytorch".to_string();

        tracing::info!(model = %spec, candidates = urls.len(), "Built manifest");
        Ok(manifest)
    }

    async fn download_package(
        &self,
        manifest: &mut Manifest,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> InstallResult<()> {
        let package = &manifest.distribution.package;
        let mut urls: Vec<String> = std::iter::once(&package.url)
            .chain(package.mirrors.iter())
            .filter(|u| !u.is_empty())
            .cloned()
            .collect();

        if urls.is_empty() {
            let (repo, model) = Self::parse_name(&manifest.metadata.name)?;
            urls = self.candidate_urls(repo, model).await;
        }

        let mut seen = HashSet::new();
        let files: Vec<RemoteFile> = urls
            .into_iter()
            .map(|url| RemoteFile::new(hubconf::file_name_from_url(&url), url))
            .filter(|file| seen.insert(file.path.clone()))
            .collect();

        assemble_package(&self.fetcher, files, manifest, dest, self.parallel, progress).await?;
        Ok(())
    }

    /// Matches against the known torchvision weights
    async fn search(&self, query: &str) -> InstallResult<Vec<SearchResult>> {
        let query = query.to_lowercase();
        Ok(FALLBACK_WEIGHTS
            .iter()
            .filter(|(name, _)| name.contains(&query))
            .map(|(name, _)| SearchResult {
                name: format!("vision/{name}"),
                namespace: "pytorch".to_string(),
                version: crate::spec::LATEST.to_string(),
                description: format!("torchvision {name} pretrained weights"),
                framework: "PyTorch".to_string(),
                tags: vec!["vision".to_string()],
            })
            .collect())
    }
}
