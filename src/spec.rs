//! Model spec parsing (`namespace/name[@version]`)

use crate::error::{InstallError, InstallResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version token used when the user does not pin one
pub const LATEST: &str = "latest";

/// A parsed model reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl ModelSpec {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse `namespace/name[@version]`
    ///
    /// The name may itself contain slashes (`pytorch/vision/resnet50`).
    /// A missing or empty version resolves to `latest`.
    pub fn parse(input: &str) -> InstallResult<Self> {
        let input = input.trim();
        let (namespace, rest) = input
            .split_once('/')
            .ok_or_else(|| InstallError::InvalidSpec(input.to_string()))?;

        let (name, version) = match rest.rsplit_once('@') {
            Some((name, version)) if !version.is_empty() => (name, version),
            Some((name, _)) => (name, LATEST),
            None => (rest, LATEST),
        };

        if namespace.is_empty() || name.is_empty() || name.starts_with('/') {
            return Err(InstallError::InvalidSpec(input.to_string()));
        }

        Ok(Self::new(namespace, name, version))
    }

    /// `namespace/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_latest(&self) -> bool {
        self.version == LATEST
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.version)
    }
}

impl FromStr for ModelSpec {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
