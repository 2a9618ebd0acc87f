//! Snippet command implementation: compiled-snippet pipeline over the cache.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;

use mercury_core::sink::ConsoleSink;
use mercury_core::{CargoCli, PackageSpec, ProjectCache, SnippetRunner};

/// Compile and run a snippet with the given package dependencies.
pub fn execute(
    file: Option<&Path>,
    packages: &[String],
    no_cache: bool,
    cache_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let code = read_code(file)?;
    let packages = packages
        .iter()
        .map(|p| PackageSpec::parse(p))
        .collect::<mercury_core::Result<Vec<_>>>()?;

    let mut runner = if no_cache {
        SnippetRunner::uncached()
    } else {
        let root = cache_dir.map(Path::to_path_buf).unwrap_or_else(default_cache_dir);
        tracing::debug!(root = %root.display(), "opening snippet cache");
        SnippetRunner::new(ProjectCache::open(root)?)
    };

    let tool = CargoCli::new()?;
    let project_dir = tempfile::Builder::new().prefix("mercury-snippet-").tempdir()?;

    let mut sink = ConsoleSink::new();
    runner
        .run(&code, &packages, project_dir.path(), &tool, &mut sink)
        .context("running snippet")?;
    Ok(())
}

/// Per-user cache directory, falling back to the system temp location.
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("mercury").join("snippets"))
        .unwrap_or_else(ProjectCache::default_root)
}

fn read_code(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading snippet {}", path.display())),
        None => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("reading snippet from stdin")?;
            Ok(code)
        }
    }
}
