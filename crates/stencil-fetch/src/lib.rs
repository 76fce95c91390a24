mod cache;
mod origin;

pub use cache::{CacheEntry, CacheInfo};
pub use origin::TemplateOrigin;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use stencil_core::{
    collect_relative_file_paths, copy_dir_recursive, normalize_relative_path, unique_suffix,
    Component, ProjectLayout,
};

pub const LATEST: &str = "latest";

/// Version marker each upstream template tree carries at its root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateManifest {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub local_path: PathBuf,
    pub resolved_version: String,
    pub from_cache: bool,
    pub origin_kind: String,
}

#[derive(Debug, Deserialize)]
struct RegistryIndexDoc {
    latest: String,
    #[serde(default)]
    versions: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    layout: ProjectLayout,
    origin: TemplateOrigin,
}

impl Fetcher {
    pub fn new(layout: ProjectLayout, origin: TemplateOrigin) -> Self {
        Self { layout, origin }
    }

    pub fn origin(&self) -> &TemplateOrigin {
        &self.origin
    }

    /// Resolves `version` ("latest" or explicit) against the configured
    /// origin and materializes that version's tree under the cache.
    pub fn fetch(&self, version: &str) -> Result<FetchResult> {
        self.layout.ensure_base_dirs()?;
        match &self.origin {
            TemplateOrigin::Registry { index_url } => self.fetch_registry(index_url, version),
            TemplateOrigin::Git { repo_url } => self.fetch_git(repo_url, version),
            TemplateOrigin::Local { path } => self.fetch_local(path, version),
        }
    }

    /// Concrete version string behind "latest". Registry origins answer from
    /// the index alone; git and local origins materialize into the cache.
    pub fn resolve_latest(&self) -> Result<String> {
        match &self.origin {
            TemplateOrigin::Registry { index_url } => {
                Ok(self.load_registry_index(index_url)?.latest)
            }
            TemplateOrigin::Git { .. } | TemplateOrigin::Local { .. } => {
                Ok(self.fetch(LATEST)?.resolved_version)
            }
        }
    }

    fn fetch_registry(&self, index_url: &str, version: &str) -> Result<FetchResult> {
        // An explicit version never changes; a cache hit skips the index
        // round-trip entirely (and keeps cached versions reachable offline).
        if version != LATEST {
            if let Some(result) = self.cached(version) {
                return Ok(result);
            }
        }

        let doc = self.load_registry_index(index_url)?;
        let resolved = if version == LATEST {
            doc.latest.clone()
        } else {
            version.to_string()
        };

        if let Some(result) = self.cached(&resolved) {
            return Ok(result);
        }

        let archive_url = doc.versions.get(&resolved).ok_or_else(|| {
            anyhow::anyhow!(
                "fetch-failed: registry index has no version '{}': {}",
                resolved,
                index_url
            )
        })?;

        let response = reqwest::blocking::get(archive_url)
            .with_context(|| format!("fetch-failed: could not download {archive_url}"))?
            .error_for_status()
            .with_context(|| format!("fetch-failed: download rejected for {archive_url}"))?;
        let bytes = response
            .bytes()
            .with_context(|| format!("fetch-failed: could not read body of {archive_url}"))?;

        let staging = self.staging_dir();
        let result = (|| -> Result<FetchResult> {
            let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_ref()));
            archive.unpack(&staging).with_context(|| {
                format!("fetch-failed: could not extract archive from {archive_url}")
            })?;
            let tree_root = locate_tree_root(&staging)?;
            self.commit_to_cache(&tree_root, &resolved)
        })();
        let _ = fs::remove_dir_all(&staging);
        result
    }

    fn fetch_git(&self, repo_url: &str, version: &str) -> Result<FetchResult> {
        if version != LATEST {
            if let Some(result) = self.cached(version) {
                return Ok(result);
            }
        }

        let staging = self.staging_dir();
        let result = (|| -> Result<FetchResult> {
            origin::git_shallow_clone(repo_url, &staging, version)?;
            let manifest = read_manifest(&staging)?;
            if version != LATEST && manifest.version != version {
                anyhow::bail!(
                    "fetch-failed: tag v{} carries template version {}",
                    version,
                    manifest.version
                );
            }
            let _ = fs::remove_dir_all(staging.join(".git"));

            if let Some(result) = self.cached(&manifest.version) {
                return Ok(result);
            }
            self.commit_to_cache(&staging, &manifest.version)
        })();
        let _ = fs::remove_dir_all(&staging);
        result
    }

    fn fetch_local(&self, source: &Path, version: &str) -> Result<FetchResult> {
        if !source.is_dir() {
            anyhow::bail!(
                "fetch-failed: local template path does not exist: {}",
                source.display()
            );
        }
        let manifest = read_manifest(source)?;

        if version != LATEST && version != manifest.version {
            // The sibling checkout moved on; older versions only exist in cache.
            if let Some(result) = self.cached(version) {
                return Ok(result);
            }
            anyhow::bail!(
                "fetch-failed: local origin provides version {} (requested {}): {}",
                manifest.version,
                version,
                source.display()
            );
        }

        if version != LATEST {
            if let Some(result) = self.cached(&manifest.version) {
                return Ok(result);
            }
        }

        // "latest" always re-copies: a sibling checkout is mutable.
        let staging = self.staging_dir();
        let result = (|| -> Result<FetchResult> {
            copy_dir_recursive(source, &staging)?;
            self.commit_to_cache(&staging, &manifest.version)
        })();
        let _ = fs::remove_dir_all(&staging);
        result
    }

    /// Maps component names onto subtrees of a fetched tree. Components the
    /// upstream dropped are reported, not fatal.
    pub fn extract_components(
        &self,
        fetched: &Path,
        names: &[Component],
    ) -> (BTreeMap<Component, PathBuf>, Vec<Component>) {
        let requested: Vec<Component> = if names.is_empty() {
            Component::ALL.to_vec()
        } else {
            names.to_vec()
        };

        let mut found = BTreeMap::new();
        let mut missing = Vec::new();
        for component in requested {
            let dir = fetched.join(component.dir_name());
            if dir.is_dir() {
                found.insert(component, dir);
            } else {
                missing.push(component);
            }
        }
        (found, missing)
    }

    /// Deduplicated relative file listing under a fetched tree, optionally
    /// narrowed by glob patterns.
    pub fn list_files(&self, fetched: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let compiled: Vec<Pattern> = patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern)
                    .with_context(|| format!("invalid file pattern: '{pattern}'"))
            })
            .collect::<Result<_>>()?;

        let mut unique: BTreeSet<PathBuf> = BTreeSet::new();
        for relative in collect_relative_file_paths(fetched)? {
            let normalized = normalize_relative_path(&relative);
            if compiled.is_empty() || compiled.iter().any(|pattern| pattern.matches(&normalized)) {
                unique.insert(relative);
            }
        }
        Ok(unique.into_iter().collect())
    }

    pub fn clear_cache(&self) -> Result<usize> {
        cache::clear(&self.layout)
    }

    pub fn cache_info(&self) -> Result<CacheInfo> {
        cache::info(&self.layout)
    }

    fn cached(&self, version: &str) -> Option<FetchResult> {
        let slot = self.cache_slot(version);
        let populated = fs::read_dir(&slot)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        populated.then(|| FetchResult {
            local_path: slot,
            resolved_version: version.to_string(),
            from_cache: true,
            origin_kind: self.origin.kind_label().to_string(),
        })
    }

    fn commit_to_cache(&self, tree: &Path, version: &str) -> Result<FetchResult> {
        let slot = self.cache_slot(version);
        copy_dir_recursive(tree, &slot).with_context(|| {
            format!("fetch-failed: could not populate cache slot {}", slot.display())
        })?;
        Ok(FetchResult {
            local_path: slot,
            resolved_version: version.to_string(),
            from_cache: false,
            origin_kind: self.origin.kind_label().to_string(),
        })
    }

    fn cache_slot(&self, version: &str) -> PathBuf {
        self.layout
            .cache_dir()
            .join(self.origin.kind_label())
            .join(version)
    }

    fn staging_dir(&self) -> PathBuf {
        self.layout
            .tmp_dir()
            .join(format!("fetch-{}", unique_suffix()))
    }

    fn load_registry_index(&self, index_url: &str) -> Result<RegistryIndexDoc> {
        let response = reqwest::blocking::get(index_url)
            .with_context(|| format!("fetch-failed: could not reach registry index {index_url}"))?
            .error_for_status()
            .with_context(|| format!("fetch-failed: registry index rejected {index_url}"))?;
        response
            .json()
            .with_context(|| format!("fetch-failed: invalid registry index at {index_url}"))
    }
}

pub fn read_manifest(tree: &Path) -> Result<TemplateManifest> {
    let path = tree.join("template.json");
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("fetch-failed: missing template manifest {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("fetch-failed: invalid template manifest {}", path.display()))
}

/// Registry tarballs may nest the tree under one top-level directory
/// (archive prefixes); the manifest marks the real root.
fn locate_tree_root(staging: &Path) -> Result<PathBuf> {
    if staging.join("template.json").is_file() {
        return Ok(staging.to_path_buf());
    }

    let mut subdirs = Vec::new();
    for entry in fs::read_dir(staging)
        .with_context(|| format!("failed reading extracted archive {}", staging.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }
    if let [only] = subdirs.as_slice() {
        if only.join("template.json").is_file() {
            return Ok(only.clone());
        }
    }

    anyhow::bail!(
        "fetch-failed: extracted archive has no template manifest: {}",
        staging.display()
    )
}
