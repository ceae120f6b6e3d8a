//! ONNX conversion fallback chain
//!
//! Conversion is best-effort. Strategies are tried in order:
//! 1. download a pre-converted `model.onnx` published next to the weights
//! 2. run the converter image under Docker
//! 3. run the converter scripts with a local Python
//!
//! Each attempt returns an [`AttemptOutcome`]. The driver stops at the first
//! conversion, moves on after a soft failure, and stops after a hard one.
//! Installation proceeds whatever the [`ConversionReport`] says.

use crate::adapters::AdapterConfig;
use crate::adapters::huggingface::{self, HuggingFaceAdapter};
use crate::config::InstallerConfig;
use crate::error::InstallResult;
use crate::fetch::HttpFetcher;
use crate::manifest::Manifest;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// File name every strategy converts to
pub const ONNX_OUTPUT: &str = "model.onnx";

const DOCKER_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const STDERR_TAIL_LINES: usize = 5;

/// One model to convert
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// Extracted package contents
    pub model_dir: PathBuf,
    /// Weights file or directory handed to the converter
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Upstream identifier, e.g. `bert-base-uncased` or `pytorch/vision/resnet50`
    pub model_id: String,
    pub namespace: String,
    pub version: String,
    /// Adapter that produced the package
    pub adapter: String,
}

impl ConversionRequest {
    /// Build a request for an assembled package extracted into `model_dir`
    pub fn for_manifest(manifest: &Manifest, model_dir: &Path, adapter: &str) -> Self {
        let namespace = manifest.metadata.namespace.clone();
        let model_id = if adapter == "huggingface" {
            HuggingFaceAdapter::model_id(&namespace, &manifest.metadata.name)
        } else {
            manifest.full_name()
        };

        let input_path = match script_for(&namespace) {
            "convert_huggingface.py" => model_dir.to_path_buf(),
            _ => primary_weights(manifest)
                .map(|file| model_dir.join(file))
                .unwrap_or_else(|| model_dir.to_path_buf()),
        };

        Self {
            model_dir: model_dir.to_path_buf(),
            input_path,
            output_path: model_dir.join(ONNX_OUTPUT),
            model_id,
            namespace,
            version: manifest.metadata.version.clone(),
            adapter: adapter.to_string(),
        }
    }

    fn script(&self) -> &'static str {
        script_for(&self.namespace)
    }
}

/// Converter script for a namespace
pub fn script_for(namespace: &str) -> &'static str {
    match namespace {
        "pytorch" | "torch" => "convert_pytorch.py",
        "tfhub" | "tf" => "convert_tensorflow.py",
        _ => "convert_huggingface.py",
    }
}

fn primary_weights(manifest: &Manifest) -> Option<&str> {
    const WEIGHT_EXTENSIONS: [&str; 6] = [".pth", ".pt", ".bin", ".safetensors", ".tar.gz", ".tflite"];
    manifest
        .format
        .files
        .iter()
        .map(|f| f.path.as_str())
        .find(|path| {
            let lower = path.to_lowercase();
            WEIGHT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        })
}

/// Result of a single strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Converted(PathBuf),
    /// Not applicable or failed in a way the next strategy may avoid
    Soft(String),
    /// Failed in a way no later strategy can recover from
    Hard(String),
}

#[async_trait]
pub trait ConversionStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(&self, request: &ConversionRequest) -> AttemptOutcome;
}

/// Final outcome of the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionReport {
    Converted { strategy: String, output: PathBuf },
    /// Every strategy soft-failed; reasons in attempt order
    Unavailable { attempts: Vec<(String, String)> },
    Failed { strategy: String, reason: String },
}

impl ConversionReport {
    pub fn output(&self) -> Option<&Path> {
        match self {
            Self::Converted { output, .. } => Some(output),
            _ => None,
        }
    }
}

impl fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converted { strategy, output } => {
                write!(f, "converted to {} via {}", output.display(), strategy)
            }
            Self::Unavailable { attempts } => {
                let tried: Vec<&str> = attempts.iter().map(|(name, _)| name.as_str()).collect();
                write!(f, "conversion unavailable (tried: {})", tried.join(", "))
            }
            Self::Failed { strategy, reason } => write!(f, "{strategy} failed: {reason}"),
        }
    }
}

/// Ordered list of conversion strategies
#[derive(Default)]
pub struct ConversionChain {
    strategies: Vec<Box<dyn ConversionStrategy>>,
}

impl ConversionChain {
    pub fn new(strategies: Vec<Box<dyn ConversionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Pre-converted download, Docker, then local Python
    pub fn from_config(config: &InstallerConfig) -> InstallResult<Self> {
        let conversion = &config.conversion;
        let limit = Duration::from_secs(conversion.timeout_secs.max(1));

        let hub = AdapterConfig {
            timeout_secs: config.registry.timeout_secs,
            ..Default::default()
        }
        .with_token(config.registry.huggingface_token.clone());

        let mut strategies: Vec<Box<dyn ConversionStrategy>> = vec![
            Box::new(PreConvertedDownload::new(
                hub.fetcher()?,
                huggingface::DEFAULT_BASE_URL,
            )),
            Box::new(DockerConversion::new(&conversion.docker_image, limit)),
        ];
        if let Some(scripts_dir) = &conversion.scripts_dir {
            strategies.push(Box::new(LocalPythonConversion::new(
                &conversion.python,
                scripts_dir,
                limit,
            )));
        }
        Ok(Self::new(strategies))
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, request: &ConversionRequest) -> ConversionReport {
        let mut attempts = Vec::new();

        for strategy in &self.strategies {
            tracing::debug!(strategy = strategy.name(), model_id = %request.model_id, "Trying conversion");
            match strategy.attempt(request).await {
                AttemptOutcome::Converted(output) => {
                    tracing::info!(
                        strategy = strategy.name(),
                        model_id = %request.model_id,
                        output = ?output,
                        "Converted to ONNX"
                    );
                    return ConversionReport::Converted {
                        strategy: strategy.name().to_string(),
                        output,
                    };
                }
                AttemptOutcome::Soft(reason) => {
                    tracing::debug!(strategy = strategy.name(), reason = %reason, "Conversion strategy unavailable");
                    attempts.push((strategy.name().to_string(), reason));
                }
                AttemptOutcome::Hard(reason) => {
                    tracing::warn!(strategy = strategy.name(), reason = %reason, "Conversion failed");
                    return ConversionReport::Failed {
                        strategy: strategy.name().to_string(),
                        reason,
                    };
                }
            }
        }

        tracing::warn!(model_id = %request.model_id, "No conversion strategy succeeded");
        ConversionReport::Unavailable { attempts }
    }
}

async fn prepare_output(request: &ConversionRequest) -> Result<(), AttemptOutcome> {
    let parent = request.output_path.parent().unwrap_or(&request.model_dir);
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| AttemptOutcome::Hard(format!("cannot create {}: {e}", parent.display())))
}

/// Run a command to completion under a hard deadline
///
/// The child is killed when the deadline passes or the future is dropped.
async fn run_with_timeout(mut cmd: Command, limit: Duration) -> Result<(), String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("failed to spawn: {e}")),
        Err(_) => return Err(format!("timed out after {}s", limit.as_secs_f64())),
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines() {
        tracing::trace!(line = %line, "converter output");
    }

    if output.status.success() {
        return Ok(());
    }
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    Err(format!("exited with {}: {}", output.status, tail))
}

fn converted_or_missing(request: &ConversionRequest) -> AttemptOutcome {
    if request.output_path.is_file() {
        AttemptOutcome::Converted(request.output_path.clone())
    } else {
        AttemptOutcome::Soft(format!(
            "converter did not produce {}",
            request.output_path.display()
        ))
    }
}

/// Fetch an ONNX export the repository already publishes
pub struct PreConvertedDownload {
    fetcher: HttpFetcher,
    base_url: String,
}

impl PreConvertedDownload {
    const CANDIDATES: [&'static str; 2] = ["model.onnx", "onnx/model.onnx"];

    pub fn new(fetcher: HttpFetcher, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ConversionStrategy for PreConvertedDownload {
    fn name(&self) -> &str {
        "pre-converted"
    }

    async fn attempt(&self, request: &ConversionRequest) -> AttemptOutcome {
        if request.adapter != "huggingface" {
            return AttemptOutcome::Soft("no pre-converted artifacts for this source".into());
        }
        if let Err(outcome) = prepare_output(request).await {
            return outcome;
        }

        let revision = crate::adapters::revision_for(&request.version, "main");
        for candidate in Self::CANDIDATES {
            let url = format!(
                "{}/{}/resolve/{}/{}",
                self.base_url, request.model_id, revision, candidate
            );
            match self.fetcher.download_to(&url, &request.output_path, None).await {
                Ok(_) => return AttemptOutcome::Converted(request.output_path.clone()),
                Err(e) => tracing::debug!(url = %url, error = %e, "No pre-converted ONNX"),
            }
        }
        AttemptOutcome::Soft("repository publishes no ONNX export".into())
    }
}

/// Run the converter image with the package mounted at `/model`
pub struct DockerConversion {
    image: String,
    timeout: Duration,
}

impl DockerConversion {
    pub fn new(image: &str, timeout: Duration) -> Self {
        Self {
            image: image.to_string(),
            timeout,
        }
    }

    async fn docker_available() -> bool {
        let mut probe = Command::new("docker");
        probe.arg("version").arg("--format").arg("{{.Server.Version}}");
        run_with_timeout(probe, DOCKER_PROBE_TIMEOUT).await.is_ok()
    }

    /// Path as seen inside the container
    fn container_path(request: &ConversionRequest, path: &Path) -> String {
        match path.strip_prefix(&request.model_dir) {
            Ok(rel) if rel.as_os_str().is_empty() => "/model".to_string(),
            Ok(rel) => format!("/model/{}", rel.to_string_lossy().replace('\\', "/")),
            Err(_) => "/model".to_string(),
        }
    }
}

#[async_trait]
impl ConversionStrategy for DockerConversion {
    fn name(&self) -> &str {
        "docker"
    }

    async fn attempt(&self, request: &ConversionRequest) -> AttemptOutcome {
        if !Self::docker_available().await {
            return AttemptOutcome::Soft("docker is not available".into());
        }
        if let Err(outcome) = prepare_output(request).await {
            return outcome;
        }

        let mut cmd = Command::new("docker");
        cmd.arg("run")
            .arg("--rm")
            .arg("-v")
            .arg(format!("{}:/model", request.model_dir.display()))
            .arg(&self.image)
            .arg("python")
            .arg(format!("/scripts/{}", request.script()))
            .arg(Self::container_path(request, &request.input_path))
            .arg(Self::container_path(request, &request.output_path))
            .arg(&request.model_id);

        tracing::debug!(image = %self.image, model_id = %request.model_id, "Running converter container");
        match run_with_timeout(cmd, self.timeout).await {
            Ok(()) => converted_or_missing(request),
            Err(reason) => AttemptOutcome::Soft(reason),
        }
    }
}

/// Run the converter scripts with a local interpreter
pub struct LocalPythonConversion {
    python: String,
    scripts_dir: PathBuf,
    timeout: Duration,
}

impl LocalPythonConversion {
    pub fn new(python: &str, scripts_dir: &Path, timeout: Duration) -> Self {
        Self {
            python: python.to_string(),
            scripts_dir: scripts_dir.to_path_buf(),
            timeout,
        }
    }
}

#[async_trait]
impl ConversionStrategy for LocalPythonConversion {
    fn name(&self) -> &str {
        "local-python"
    }

    async fn attempt(&self, request: &ConversionRequest) -> AttemptOutcome {
        let script = self.scripts_dir.join(request.script());
        if !script.is_file() {
            return AttemptOutcome::Soft(format!("{} not found", script.display()));
        }
        if let Err(outcome) = prepare_output(request).await {
            return outcome;
        }

        let mut cmd = Command::new(&self.python);
        cmd.arg(&script)
            .arg(&request.input_path)
            .arg(&request.output_path)
            .arg(&request.model_id);

        tracing::debug!(python = %self.python, script = ?script, "Running local converter");
        match run_with_timeout(cmd, self.timeout).await {
            Ok(()) => converted_or_missing(request),
            Err(reason) => AttemptOutcome::Soft(reason),
        }
    }
}
