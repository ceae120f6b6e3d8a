//! Model manifest
//!
//! The manifest is the declarative description of an installed package:
//! - identity and licensing metadata
//! - framework and on-disk format (including the derived execution format)
//! - tensor I/O schema with preprocessing hints
//! - compute requirements
//! - distribution info (package URL, checksum, registry)

pub mod update;

pub use update::update_execution_format;

use crate::error::{InstallError, InstallResult};
use crate::spec::ModelSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const API_VERSION: &str = "modelpack/v1";
pub const KIND: &str = "Model";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Runtime format a downstream engine should load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionFormat {
    #[default]
    Onnx,
    Pytorch,
    Tensorflow,
    Gguf,
    Safetensors,
}

impl ExecutionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Pytorch => "pytorch",
            Self::Tensorflow => "tensorflow",
            Self::Gguf => "gguf",
            Self::Safetensors => "safetensors",
        }
    }

    /// Map a free-form format/type string to an execution format
    ///
    /// Returns `None` for strings that carry no format information.
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_lowercase().as_str() {
            "onnx" => Some(Self::Onnx),
            "gguf" => Some(Self::Gguf),
            "safetensors" => Some(Self::Safetensors),
            "pytorch" | "torch" | "modelscope" => Some(Self::Pytorch),
            "tensorflow" | "saved_model" | "tf" | "tflite" => Some(Self::Tensorflow),
            _ => None,
        }
    }

    /// Formats a runtime can load directly without conversion
    pub fn is_portable(&self) -> bool {
        matches!(self, Self::Onnx | Self::Gguf)
    }
}

impl fmt::Display for ExecutionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default)]
    pub license: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Framework {
    pub name: String,
    pub version: String,
}

impl Framework {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}

/// A file shipped in the package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModelFile {
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
}

impl ModelFile {
    pub fn named(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Format {
    /// Source format as published upstream (e.g. "pytorch", "saved_model")
    #[serde(rename = "type")]
    pub kind: String,
    pub execution_format: ExecutionFormat,
    /// Set when the package holds several ONNX graphs (encoder/decoder splits)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub multi_encoder: bool,
    #[serde(default)]
    pub files: Vec<ModelFile>,
}

/// Preprocessing hint attached to an input tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Preprocessing {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_type: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// A named tensor. Shape entries of -1 are dynamic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoSpec {
    pub name: String,
    pub dtype: String,
    pub shape: Vec<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocessing: Option<Preprocessing>,
}

impl IoSpec {
    pub fn new(name: &str, dtype: &str, shape: &[i64]) -> Self {
        Self {
            name: name.to_string(),
            dtype: dtype.to_string(),
            shape: shape.to_vec(),
            description: String::new(),
            preprocessing: None,
        }
    }

    pub fn with_preprocessing(mut self, preprocessing: Preprocessing) -> Self {
        self.preprocessing = Some(preprocessing);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Io {
    #[serde(default)]
    pub inputs: Vec<IoSpec>,
    #[serde(default)]
    pub outputs: Vec<IoSpec>,
}

impl Io {
    /// Single float tensor in, single float tensor out
    pub fn generic() -> Self {
        Self {
            inputs: vec![IoSpec::new("input", "float32", &[-1, -1])],
            outputs: vec![IoSpec::new("output", "float32", &[-1, -1])],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuRequirement {
    pub min_cores: u32,
    pub recommended_cores: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRequirement {
    pub min_gb: f64,
    pub recommended_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GpuRequirement {
    pub required: bool,
    pub recommended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_vram_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuda_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    pub cpu: CpuRequirement,
    pub memory: MemoryRequirement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuRequirement>,
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            cpu: CpuRequirement {
                min_cores: 2,
                recommended_cores: 4,
            },
            memory: MemoryRequirement {
                min_gb: 2.0,
                recommended_gb: 4.0,
            },
            gpu: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PackageInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RegistryInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Distribution {
    pub package: PackageInfo,
    pub registry: RegistryInfo,
}

/// Complete model manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub framework: Framework,
    pub format: Format,
    #[serde(default)]
    pub io: Io,
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default)]
    pub distribution: Distribution,
}

impl Manifest {
    /// Skeleton manifest for a spec with generic I/O and default requirements
    pub fn new(spec: &ModelSpec) -> Self {
        let now = Utc::now();
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: Metadata {
                name: spec.name.clone(),
                namespace: spec.namespace.clone(),
                version: spec.version.clone(),
                created: now,
                updated: now,
                ..Default::default()
            },
            framework: Framework::default(),
            format: Format::default(),
            io: Io::generic(),
            requirements: Requirements::default(),
            distribution: Distribution::default(),
        }
    }

    /// `namespace/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }

    /// `namespace/name@version`
    pub fn full_version(&self) -> String {
        format!("{}@{}", self.full_name(), self.metadata.version)
    }

    pub fn spec(&self) -> ModelSpec {
        ModelSpec::new(
            &self.metadata.namespace,
            &self.metadata.name,
            &self.metadata.version,
        )
    }

    /// Record the package checksum and size
    pub fn set_package_checksum(&mut self, sha256: String, size: u64) {
        self.distribution.package.sha256 = sha256;
        self.distribution.package.size = size;
        self.metadata.updated = Utc::now();
    }

    /// Check document completeness
    ///
    /// `require_files` is set once the package has been assembled.
    pub fn validate(&self, require_files: bool) -> InstallResult<()> {
        if self.metadata.name.is_empty() || self.metadata.namespace.is_empty() {
            return Err(InstallError::InvalidManifest(
                "name and namespace are required".into(),
            ));
        }
        if self.metadata.version.is_empty() {
            return Err(InstallError::InvalidManifest("version is required".into()));
        }
        if self.io.inputs.is_empty() || self.io.outputs.is_empty() {
            return Err(InstallError::InvalidManifest(format!(
                "{} declares no inputs or outputs",
                self.full_version()
            )));
        }
        if require_files && self.format.files.is_empty() {
            return Err(InstallError::InvalidManifest(format!(
                "{} has no files",
                self.full_version()
            )));
        }

        let declared = self
            .format
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.sha256.as_str()))
            .chain(std::iter::once(("package", self.distribution.package.sha256.as_str())));
        for (path, sha) in declared {
            if !sha.is_empty() && !is_sha256_hex(sha) {
                return Err(InstallError::InvalidManifest(format!(
                    "{path}: malformed sha256 '{sha}'"
                )));
            }
        }

        Ok(())
    }

    /// Read a manifest document from disk
    pub fn load(path: &Path) -> InstallResult<Self> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Write the manifest as pretty JSON
    pub fn save(&self, path: &Path) -> InstallResult<()> {
        let content = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
