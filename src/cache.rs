//! Installed model cache
//!
//! Layout:
//! ```text
//! <cache>/
//! ├── models/
//! │   └── pytorch/vision/resnet50/latest/
//! │       ├── manifest.json
//! │       ├── .install.json
//! │       ├── package.tar.gz
//! │       └── files/
//! │           └── resnet50-0676ba61.pth
//! └── tmp/
//!     └── install-XXXXXX/     (staging, removed on drop)
//! ```

use crate::config::CleanPolicy;
use crate::error::{InstallError, InstallResult};
use crate::manifest::{MANIFEST_FILE, Manifest};
use crate::spec::ModelSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

pub const INSTALL_RECORD: &str = ".install.json";
pub const FILES_DIR: &str = "files";

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Written next to every installed manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub installed_at: DateTime<Utc>,
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl InstallRecord {
    pub fn new(spec: &ModelSpec) -> Self {
        Self {
            installed_at: Utc::now(),
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
            version: spec.version.clone(),
        }
    }

    pub fn spec(&self) -> ModelSpec {
        ModelSpec::new(&self.namespace, &self.name, &self.version)
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// An installed model found in the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedModel {
    pub record: InstallRecord,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// `ns/name@version` of every evicted install
    pub removed: Vec<String>,
    pub freed_bytes: u64,
}

pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Install directory for a spec
    ///
    /// Every name segment becomes a directory; `.` and `..` are rejected.
    pub fn model_path(&self, spec: &ModelSpec) -> InstallResult<PathBuf> {
        let mut path = self.models_dir();
        let segments = std::iter::once(spec.namespace.as_str())
            .chain(spec.name.split('/'))
            .chain(std::iter::once(spec.version.as_str()));
        for segment in segments {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(InstallError::InvalidSpec(spec.to_string()));
            }
            path.push(segment);
        }
        Ok(path)
    }

    pub fn is_cached(&self, spec: &ModelSpec) -> bool {
        self.model_path(spec)
            .map(|path| path.join(MANIFEST_FILE).is_file())
            .unwrap_or(false)
    }

    pub fn load_manifest(&self, spec: &ModelSpec) -> InstallResult<Manifest> {
        let path = self.model_path(spec)?.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(InstallError::NotFound(spec.to_string()));
        }
        Manifest::load(&path)
    }

    /// Fresh staging directory under `tmp/`, removed when dropped
    pub fn staging_dir(&self) -> InstallResult<TempDir> {
        let tmp = self.tmp_dir();
        std::fs::create_dir_all(&tmp)?;
        Ok(tempfile::Builder::new().prefix("install-").tempdir_in(tmp)?)
    }

    /// Move a fully staged install into place, replacing any previous one
    ///
    /// `staged` must live on the same filesystem as the cache (use
    /// [`CacheManager::staging_dir`]).
    pub fn store(&self, spec: &ModelSpec, staged: &Path) -> InstallResult<PathBuf> {
        let target = self.model_path(spec)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !target.exists() {
            std::fs::rename(staged, &target)?;
            tracing::info!(model = %spec, path = ?target, "Stored install");
            return Ok(target);
        }

        let backup = tempfile::Builder::new()
            .prefix("replaced-")
            .tempdir_in(self.staging_parent()?)?;
        let previous = backup.path().join("previous");
        std::fs::rename(&target, &previous)?;
        if let Err(e) = std::fs::rename(staged, &target) {
            std::fs::rename(&previous, &target)?;
            return Err(e.into());
        }

        tracing::info!(model = %spec, path = ?target, "Replaced existing install");
        Ok(target)
    }

    fn staging_parent(&self) -> InstallResult<PathBuf> {
        let tmp = self.tmp_dir();
        std::fs::create_dir_all(&tmp)?;
        Ok(tmp)
    }

    /// Remove an install; returns false when it was not cached
    pub fn remove(&self, spec: &ModelSpec) -> InstallResult<bool> {
        let target = self.model_path(spec)?;
        if !target.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&target)?;
        self.prune_empty_parents(&target);
        tracing::info!(model = %spec, "Removed install");
        Ok(true)
    }

    fn prune_empty_parents(&self, removed: &Path) {
        let models = self.models_dir();
        let mut dir = removed.parent();
        while let Some(current) = dir {
            if current == models || !current.starts_with(&models) {
                break;
            }
            if std::fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    /// All installs, sorted by full name then version
    pub fn list(&self) -> InstallResult<Vec<CachedModel>> {
        let models_dir = self.models_dir();
        if !models_dir.exists() {
            return Ok(Vec::new());
        }

        let mut models = Vec::new();
        for entry in WalkDir::new(&models_dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() || entry.file_name() != INSTALL_RECORD {
                continue;
            }
            let Some(dir) = entry.path().parent() else {
                continue;
            };
            let record: InstallRecord = match std::fs::read(entry.path())
                .map_err(InstallError::from)
                .and_then(|bytes| Ok(serde_json::from_slice(&bytes)?))
            {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = ?entry.path(), error = %e, "Skipping unreadable install record");
                    continue;
                }
            };
            models.push(CachedModel {
                record,
                path: dir.to_path_buf(),
                size: dir_size(dir),
            });
        }

        models.sort_by(|a, b| {
            a.record
                .full_name()
                .cmp(&b.record.full_name())
                .then_with(|| a.record.version.cmp(&b.record.version))
        });
        Ok(models)
    }

    /// Size of one install in bytes
    pub fn size(&self, spec: &ModelSpec) -> Option<u64> {
        let path = self.model_path(spec).ok()?;
        path.exists().then(|| dir_size(&path))
    }

    /// Size of every install plus leftover staging data
    pub fn total_size(&self) -> u64 {
        dir_size(&self.root)
    }

    /// Evict installs according to `policy`
    pub fn clean(&self, policy: &CleanPolicy) -> InstallResult<CleanReport> {
        let models = self.list()?;
        let mut report = CleanReport::default();

        for index in plan_eviction(&models, policy, Utc::now()) {
            let model = &models[index];
            std::fs::remove_dir_all(&model.path)?;
            self.prune_empty_parents(&model.path);
            report.removed.push(model.record.spec().to_string());
            report.freed_bytes += model.size;
            tracing::info!(model = %model.record.spec(), bytes = model.size, "Evicted install");
        }

        Ok(report)
    }
}

/// Indices of `models` to evict, oldest first
///
/// The newest `keep_latest` installs of each `ns/name` are protected. Other
/// installs go when older than `max_age_hours`, then oldest-first while the
/// total exceeds `max_size_gb`.
pub fn plan_eviction(models: &[CachedModel], policy: &CleanPolicy, now: DateTime<Utc>) -> Vec<usize> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, model) in models.iter().enumerate() {
        groups.entry(model.record.full_name()).or_default().push(index);
    }

    let mut protected = HashSet::new();
    for members in groups.values_mut() {
        members.sort_by(|a, b| models[*b].record.installed_at.cmp(&models[*a].record.installed_at));
        protected.extend(members.iter().take(policy.keep_latest).copied());
    }

    let mut candidates: Vec<usize> = (0..models.len()).filter(|i| !protected.contains(i)).collect();
    candidates.sort_by_key(|i| models[*i].record.installed_at);

    let mut evicted: Vec<usize> = Vec::new();
    if let Some(hours) = policy.max_age_hours {
        let max_age_secs = i64::try_from(hours.saturating_mul(3600)).unwrap_or(i64::MAX);
        evicted.extend(
            candidates
                .iter()
                .copied()
                .filter(|i| (now - models[*i].record.installed_at).num_seconds() > max_age_secs),
        );
    }

    if let Some(max_gb) = policy.max_size_gb {
        let limit = (max_gb * BYTES_PER_GB) as u64;
        let mut total: u64 = models
            .iter()
            .enumerate()
            .filter(|(i, _)| !evicted.contains(i))
            .map(|(_, m)| m.size)
            .sum();
        for index in candidates {
            if total <= limit {
                break;
            }
            if evicted.contains(&index) {
                continue;
            }
            total = total.saturating_sub(models[index].size);
            evicted.push(index);
        }
    }

    evicted
}

/// Recursively calculate directory size
fn dir_size(path: &Path) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                size += dir_size(&path);
            } else if let Ok(metadata) = std::fs::metadata(&path) {
                size += metadata.len();
            }
        }
    }

    size
}
