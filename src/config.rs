//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main installer configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct InstallerConfig {
    pub home_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub registry: RegistryConfig,
    pub download: DownloadConfig,
    pub conversion: ConversionConfig,
    pub cache: CacheConfig,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        let home_dir = default_home_dir();
        Self {
            cache_dir: home_dir.join("cache"),
            home_dir,
            registry: RegistryConfig::default(),
            download: DownloadConfig::default(),
            conversion: ConversionConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// Upstream registry settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Private registry checked before any public hub
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub mirrors: Vec<String>,
    pub enable_huggingface: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub huggingface_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: None,
            mirrors: Vec::new(),
            enable_huggingface: true,
            huggingface_token: None,
            github_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Concurrent per-file downloads within one package
    pub parallel: usize,
    pub verify_checksums: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            verify_checksums: true,
        }
    }
}

/// ONNX conversion fallback chain settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConversionConfig {
    pub enabled: bool,
    pub docker_image: String,
    pub python: String,
    /// Directory holding `convert_*.py` scripts for local conversion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scripts_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            docker_image: default_docker_image(),
            python: "python3".to_string(),
            scripts_dir: None,
            timeout_secs: default_conversion_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct CacheConfig {
    pub clean: CleanPolicy,
}

/// Cache eviction bounds
///
/// The newest `keep_latest` installs of each model are never evicted.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CleanPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_hours: Option<u64>,
    pub keep_latest: usize,
}

impl Default for CleanPolicy {
    fn default() -> Self {
        Self {
            max_size_gb: None,
            max_age_hours: None,
            keep_latest: 1,
        }
    }
}

impl InstallerConfig {
    /// Default location of the config file, under `MODELPACK_HOME` when set
    pub fn default_path() -> PathBuf {
        std::env::var_os("MODELPACK_HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_home_dir)
            .join("config.toml")
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Without an explicit path, [`InstallerConfig::default_path`] is read if present.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.or_else(|| {
            let default = Self::default_path();
            default.exists().then_some(default)
        });

        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(home) = std::env::var("MODELPACK_HOME") {
            let home = PathBuf::from(home);
            if self.cache_dir == self.home_dir.join("cache") {
                self.cache_dir = home.join("cache");
            }
            self.home_dir = home;
        }
        if let Ok(cache_dir) = std::env::var("MODELPACK_CACHE_DIR") {
            self.cache_dir = PathBuf::from(cache_dir);
        }
        if let Ok(url) = std::env::var("MODELPACK_REGISTRY_URL") {
            self.registry.url = Some(url).filter(|u| !u.is_empty());
        }
        if let Ok(parallel) = std::env::var("MODELPACK_PARALLEL_DOWNLOADS") {
            self.download.parallel = parallel
                .parse()
                .context("Invalid MODELPACK_PARALLEL_DOWNLOADS value")?;
        }
        if let Ok(token) = std::env::var("HF_TOKEN").or_else(|_| std::env::var("HUGGINGFACE_TOKEN")) {
            self.registry.huggingface_token = Some(token);
        }
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            self.registry.github_token = Some(token);
        }
        if let Ok(image) = std::env::var("MODELPACK_CONVERTER_IMAGE") {
            self.conversion.docker_image = image;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.download.parallel == 0 {
            anyhow::bail!("download.parallel must be at least 1");
        }
        if self.registry.timeout_secs == 0 {
            anyhow::bail!("registry.timeout_secs must be greater than 0");
        }
        if self.conversion.enabled && self.conversion.timeout_secs == 0 {
            anyhow::bail!("conversion.timeout_secs must be greater than 0");
        }

        let urls = self.registry.url.iter().chain(self.registry.mirrors.iter());
        for url in urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("Registry URL '{}' must start with http:// or https://", url);
            }
        }

        if let Some(max_size) = self.cache.clean.max_size_gb
            && max_size <= 0.0
        {
            anyhow::bail!("cache.clean.max_size_gb must be positive (got {})", max_size);
        }

        Ok(())
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create config directory: {:?}", parent))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }
}

// Default functions
fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".modelpack"))
        .unwrap_or_else(|| PathBuf::from("/tmp/modelpack"))
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_parallel() -> usize {
    3
}
fn default_docker_image() -> String {
    "ghcr.io/modelpack/converter:latest".to_string()
}
fn default_conversion_timeout_secs() -> u64 {
    1800
}
