//! Build-artifact cache for compiled snippets.
//!
//! Scaffolding a project and compiling its dependency set dominates snippet
//! latency, so finished project trees are cached keyed by their dependency
//! set. A lookup picks the cached tree missing the fewest requested packages,
//! copies it into the working directory, and reports what still has to be
//! installed. The reserved empty entry guarantees a usable baseline even for
//! a cold cache.

mod build_tool;
mod snippet;

pub use build_tool::{BuildTool, CargoCli};
pub use snippet::SnippetRunner;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reserved key for the scaffolded no-dependency baseline project.
pub const EMPTY_KEY: &str = "__empty__";

/// Index file at the cache root.
const INDEX_FILE: &str = "cache.json";

/// Per-entry metadata file inside each cached tree, used to rebuild a
/// corrupt index.
const ENTRY_FILE: &str = "entry.json";

/// One requested package, optionally pinned to an exact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub version: Option<String>,
}

impl PackageSpec {
    /// Parse `name` or `name@version`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (name, version) = match text.split_once('@') {
            Some((name, version)) => (name, Some(version.to_string())),
            None => (text, None),
        };
        if name.is_empty() || version.as_deref() == Some("") {
            return Err(Error::InvalidRequest(format!(
                "invalid package spec '{text}', expected name or name@version"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            version,
        })
    }
}

impl std::fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Nothing usable was copied.
    Miss,
    /// A tree was copied but some packages still have to be installed.
    PartialHit,
    /// The copied tree already carries every requested package.
    FullHit,
}

/// Metadata for one cached project tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheEntry {
    /// How often this entry has been served.
    pub hit_count: u64,
    /// Installed packages, name to pinned version.
    pub packages: BTreeMap<String, Option<String>>,
}

impl CacheEntry {
    fn from_specs(specs: &[PackageSpec]) -> Self {
        Self {
            hit_count: 0,
            packages: specs
                .iter()
                .map(|s| (s.name.clone(), s.version.clone()))
                .collect(),
        }
    }

    /// A requested package is satisfied when the name is present and either
    /// no version was requested or the versions match exactly.
    fn satisfies(&self, spec: &PackageSpec) -> bool {
        match self.packages.get(&spec.name) {
            None => false,
            Some(_) if spec.version.is_none() => true,
            Some(installed) => installed.as_deref() == spec.version.as_deref(),
        }
    }

    fn missing<'a>(&self, deps: &'a [PackageSpec]) -> Vec<&'a PackageSpec> {
        deps.iter().filter(|d| !self.satisfies(d)).collect()
    }
}

/// Stable key over a dependency set: md5 of its canonical JSON form.
///
/// The map is ordered by name, so permutations of the same set collapse to
/// one key.
pub fn cache_key(deps: &[PackageSpec]) -> String {
    let canonical: BTreeMap<&str, Option<&str>> = deps
        .iter()
        .map(|d| (d.name.as_str(), d.version.as_deref()))
        .collect();
    // Serializing a string->string map cannot fail.
    let json = serde_json::to_string(&canonical).unwrap_or_default();
    format!("{:x}", md5::compute(json.as_bytes()))
}

/// On-disk cache of project trees keyed by dependency set.
pub struct ProjectCache {
    root: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl ProjectCache {
    /// Default cache location under the system temp directory.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("mercury").join("snippets")
    }

    /// Open (or create) the cache rooted at `root`.
    ///
    /// A corrupt or missing index is rebuilt from the per-entry metadata
    /// files rather than discarding the cached trees.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let index = root.join(INDEX_FILE);
        let entries = match std::fs::read(&index) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(index = %index.display(), "index unreadable, rebuilding: {e}");
                    Self::rebuild_index(&root)?
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(Error::Io(e)),
        };

        Ok(Self { root, entries })
    }

    /// Scan cached trees for their metadata files and reassemble the index.
    fn rebuild_index(root: &Path) -> Result<BTreeMap<String, CacheEntry>> {
        let mut entries = BTreeMap::new();
        for dir_entry in std::fs::read_dir(root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = dir_entry.path().join(ENTRY_FILE);
            let Ok(bytes) = std::fs::read(&meta_path) else {
                continue;
            };
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => {
                    let key = dir_entry.file_name().to_string_lossy().into_owned();
                    entries.insert(key, entry);
                }
                Err(e) => {
                    tracing::warn!(path = %meta_path.display(), "skipping unreadable entry: {e}");
                }
            }
        }
        tracing::info!(entries = entries.len(), "rebuilt cache index");
        Ok(entries)
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of cached trees.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make sure the reserved baseline entry exists, scaffolding it through
    /// `tool` on first use. The baseline is never evicted.
    pub fn ensure_baseline(&mut self, tool: &dyn BuildTool) -> Result<()> {
        let dir = self.root.join(EMPTY_KEY);
        if self.entries.contains_key(EMPTY_KEY) && dir.is_dir() {
            return Ok(());
        }
        tracing::info!(dir = %dir.display(), "scaffolding baseline cache entry");
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        tool.scaffold(&dir)?;

        let entry = CacheEntry::default();
        self.write_entry_file(EMPTY_KEY, &entry)?;
        self.entries.insert(EMPTY_KEY.to_string(), entry);
        self.save()
    }

    /// Copy the best-matching cached tree into `dest`.
    ///
    /// "Best" is the entry missing the fewest of the requested packages;
    /// the empty set is pinned to the reserved baseline so a previously
    /// served entry (extra packages, stale sources) never shadows it.
    /// Returns the lookup status and the packages the caller still has to
    /// install. The winner's hit count is bumped; the bump is rolled back if
    /// persisting it fails, so the index never counts a hit it could not
    /// record.
    pub fn try_load_from_cache(
        &mut self,
        dest: &Path,
        deps: &[PackageSpec],
    ) -> Result<(CacheStatus, Vec<PackageSpec>)> {
        let (key, missing) = if deps.is_empty() {
            if !self.entries.contains_key(EMPTY_KEY) || !self.root.join(EMPTY_KEY).is_dir() {
                return Ok((CacheStatus::Miss, Vec::new()));
            }
            (EMPTY_KEY.to_string(), Vec::new())
        } else {
            let Some((key, missing)) = self.select_candidate(deps) else {
                return Ok((CacheStatus::Miss, deps.to_vec()));
            };
            (key, missing.into_iter().cloned().collect())
        };

        let src = self.root.join(&key);
        copy_tree(&src, dest)?;
        // The copied tree carries the entry metadata file; the destination is
        // a working project, not a cache slot.
        let stray = dest.join(ENTRY_FILE);
        if stray.exists() {
            std::fs::remove_file(&stray)?;
        }

        let status = if missing.is_empty() {
            CacheStatus::FullHit
        } else {
            CacheStatus::PartialHit
        };

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.hit_count += 1;
            let snapshot = entry.clone();
            if let Err(e) = self
                .write_entry_file(&key, &snapshot)
                .and_then(|()| self.save())
            {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.hit_count -= 1;
                }
                return Err(e);
            }
        }

        tracing::debug!(key, ?status, missing = missing.len(), "cache lookup");
        Ok((status, missing))
    }

    /// Pick the entry with the fewest missing packages. Ties go to the most
    /// frequently served entry.
    fn select_candidate<'a>(
        &self,
        deps: &'a [PackageSpec],
    ) -> Option<(String, Vec<&'a PackageSpec>)> {
        self.entries
            .iter()
            .filter(|(key, _)| self.root.join(key).is_dir())
            .map(|(key, entry)| (key, entry, entry.missing(deps)))
            .min_by(|(_, a_entry, a_missing), (_, b_entry, b_missing)| {
                a_missing
                    .len()
                    .cmp(&b_missing.len())
                    .then(b_entry.hit_count.cmp(&a_entry.hit_count))
            })
            .map(|(key, _, missing)| (key.clone(), missing))
    }

    /// Snapshot `dest` into the cache under its full dependency-set key.
    ///
    /// The in-memory entry is rolled back if the tree copy or the metadata
    /// write fails, so the index never points at a half-written slot.
    pub fn add_to_cache(&mut self, dest: &Path, full_set: &[PackageSpec]) -> Result<String> {
        let key = cache_key(full_set);
        let slot = self.root.join(&key);

        let entry = CacheEntry::from_specs(full_set);
        self.entries.insert(key.clone(), entry.clone());

        let result = (|| {
            if slot.exists() {
                std::fs::remove_dir_all(&slot)?;
            }
            copy_tree(dest, &slot)?;
            self.write_entry_file(&key, &entry)?;
            self.save()
        })();

        if let Err(e) = result {
            self.entries.remove(&key);
            if slot.exists() {
                if let Err(cleanup) = std::fs::remove_dir_all(&slot) {
                    tracing::warn!(slot = %slot.display(), "failed to clean half-written slot: {cleanup}");
                }
            }
            return Err(e);
        }

        tracing::debug!(key, packages = full_set.len(), "cached project tree");
        Ok(key)
    }

    /// Persist the whole index.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.entries)?;
        std::fs::write(self.root.join(INDEX_FILE), json)?;
        Ok(())
    }

    fn write_entry_file(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let json = serde_json::to_vec_pretty(entry)?;
        std::fs::write(self.root.join(key).join(ENTRY_FILE), json)?;
        Ok(())
    }
}

/// Recursive copy of a directory tree.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for dir_entry in std::fs::read_dir(src)? {
        let dir_entry = dir_entry?;
        let target = dst.join(dir_entry.file_name());
        if dir_entry.file_type()?.is_dir() {
            copy_tree(&dir_entry.path(), &target)?;
        } else {
            std::fs::copy(dir_entry.path(), &target)?;
        }
    }
    Ok(())
}
