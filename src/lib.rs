//! modelpack - universal installer for machine-learning models
//!
//! Resolves `namespace/name@version` against a set of repository adapters
//! (private registry, PyTorch Hub, TensorFlow Hub, ModelScope, HuggingFace),
//! downloads the minimal file set, and assembles a reproducible package with
//! a manifest describing how to execute the model.

pub mod adapters;
pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod fetch;
pub mod install;
pub mod manifest;
pub mod package;
pub mod schema;
pub mod spec;

pub use adapters::{AdapterConfig, AdapterRegistry, RepositoryAdapter, SearchResult, register_default_adapters};
pub use cache::{CacheManager, CleanReport};
pub use config::InstallerConfig;
pub use convert::{ConversionChain, ConversionReport};
pub use error::{InstallError, InstallResult};
pub use install::{InstallOptions, InstallOutcome, Installer};
pub use manifest::{ExecutionFormat, Manifest};
pub use spec::ModelSpec;
