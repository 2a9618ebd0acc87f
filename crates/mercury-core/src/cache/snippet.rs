//! Compiled-snippet pipeline over the project cache.

use std::path::Path;

use crate::error::Result;
use crate::sink::Sink;

use super::{BuildTool, CacheStatus, PackageSpec, ProjectCache};

/// Runs a source snippet as a throwaway project, reusing cached trees for
/// its dependency set.
pub struct SnippetRunner {
    cache: Option<ProjectCache>,
}

impl SnippetRunner {
    /// Pipeline backed by `cache`.
    pub fn new(cache: ProjectCache) -> Self {
        Self { cache: Some(cache) }
    }

    /// Pipeline that never touches the cache; every run scaffolds from
    /// scratch and installs every package.
    pub fn uncached() -> Self {
        Self { cache: None }
    }

    /// Materialize a runnable project for `packages` in `dir` and run
    /// `code` in it.
    ///
    /// With a cache: the best cached tree is copied in, only the missing
    /// packages are installed, and any set not already cached in full is
    /// snapshotted for next time.
    pub fn run(
        &mut self,
        code: &str,
        packages: &[PackageSpec],
        dir: &Path,
        tool: &dyn BuildTool,
        sink: &mut dyn Sink,
    ) -> Result<()> {
        let to_install = match &mut self.cache {
            Some(cache) => {
                cache.ensure_baseline(tool)?;
                let (status, missing) = cache.try_load_from_cache(dir, packages)?;
                if status == CacheStatus::Miss {
                    tool.scaffold(dir)?;
                }
                missing
            }
            None => {
                tool.scaffold(dir)?;
                packages.to_vec()
            }
        };

        for package in &to_install {
            tracing::info!(%package, "installing");
            tool.add_package(dir, package)?;
        }

        let src_dir = dir.join("src");
        std::fs::create_dir_all(&src_dir)?;
        std::fs::write(src_dir.join("main.rs"), code)?;

        // Snapshot before running: the run's own failure should not cost us
        // the compiled dependency tree.
        if let Some(cache) = &mut self.cache {
            if !to_install.is_empty() {
                cache.add_to_cache(dir, packages)?;
            }
        }

        tool.run(dir, sink)
    }
}
