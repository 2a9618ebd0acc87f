//! Build tool the snippet pipeline shells out to.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::sink::Sink;

use super::PackageSpec;

/// Project scaffolding, package installation, and execution.
///
/// Injected so the cache and snippet pipeline can be exercised without a
/// toolchain on the machine.
pub trait BuildTool {
    /// Create a fresh runnable project in `dir`.
    fn scaffold(&self, dir: &Path) -> Result<()>;

    /// Install one package into the project at `dir`.
    fn add_package(&self, dir: &Path, package: &PackageSpec) -> Result<()>;

    /// Build and run the project, streaming its output into `sink`.
    fn run(&self, dir: &Path, sink: &mut dyn Sink) -> Result<()>;
}

/// The real thing: the `cargo` binary.
pub struct CargoCli {
    cargo: PathBuf,
}

impl CargoCli {
    /// Locate `cargo` on the PATH.
    pub fn new() -> Result<Self> {
        let cargo = which::which("cargo").map_err(|_| Error::BuildTool(
            "cargo not found on PATH".to_string(),
        ))?;
        Ok(Self { cargo })
    }

    fn invoke(&self, dir: &Path, args: &[&str]) -> Result<std::process::Output> {
        tracing::debug!(dir = %dir.display(), ?args, "invoking cargo");
        let output = Command::new(&self.cargo)
            .args(args)
            .current_dir(dir)
            .output()?;
        if !output.status.success() {
            return Err(Error::BuildTool(format!(
                "cargo {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }
}

impl BuildTool for CargoCli {
    fn scaffold(&self, dir: &Path) -> Result<()> {
        self.invoke(dir, &["init", "--name", "snippet"])?;
        Ok(())
    }

    fn add_package(&self, dir: &Path, package: &PackageSpec) -> Result<()> {
        let spec = package.to_string();
        self.invoke(dir, &["add", &spec])?;
        Ok(())
    }

    fn run(&self, dir: &Path, sink: &mut dyn Sink) -> Result<()> {
        let output = Command::new(&self.cargo)
            .args(["run", "--release", "--quiet"])
            .current_dir(dir)
            .output()?;
        sink.write(&String::from_utf8_lossy(&output.stdout))?;
        if !output.status.success() {
            sink.write(&String::from_utf8_lossy(&output.stderr))?;
            return Err(Error::BuildTool(format!(
                "snippet exited with {}",
                output.status
            )));
        }
        Ok(())
    }
}
