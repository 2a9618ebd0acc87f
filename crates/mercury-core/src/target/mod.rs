//! Execution targets: where a command runs.
//!
//! A target is either the local host or a named container, and exposes the
//! same contract for both: filesystem primitives plus a `run` primitive that
//! drives the process runner. Directory state is external and can be
//! invalidated out of band at any time, so every accessor reports a missing
//! path as a recoverable error rather than panicking.

mod container;
mod local;

pub use container::{ContainerApi, ContainerTarget, ExecOutput};
pub use local::LocalTarget;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::runner::{CompletionInfo, RunRequest};

/// How a target file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read an existing file.
    Read,
    /// Create or truncate.
    Write,
    /// Create or extend.
    Append,
}

/// An open file on a target.
///
/// For container targets the handle is backed by a local temporary copy;
/// writes become visible in the container only at [`TargetFile::close`] (or
/// drop), making the round-trip atomic from the caller's point of view.
pub trait TargetFile: Read + Write + Send {
    /// Flush and commit the file to the target.
    fn close(self: Box<Self>) -> Result<()>;
}

impl std::fmt::Debug for dyn TargetFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TargetFile")
    }
}

/// The place a command runs: local host or a container.
pub trait ExecutionTarget {
    /// Whether `path` exists.
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Whether `path` is a directory.
    fn is_dir(&self, path: &Path) -> Result<bool>;

    /// Create `path` and any missing parents.
    fn makedirs(&self, path: &Path) -> Result<()>;

    /// Remove a file or directory tree. Removing a missing path is an
    /// error.
    fn remove(&self, path: &Path) -> Result<()>;

    /// Current working directory for relative operations.
    fn getcwd(&self) -> Result<PathBuf>;

    /// Change the working directory. A missing directory is the hard error
    /// [`Error::DirectoryNotExist`]; continuing silently would corrupt every
    /// subsequent relative-path operation.
    fn chdir(&mut self, path: &Path) -> Result<()>;

    /// Open a file on the target.
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn TargetFile>>;

    /// Execute shell content on the target.
    fn run(
        &mut self,
        command: &str,
        request: &RunRequest,
        namespace: &Namespace,
    ) -> Result<CompletionInfo>;
}

/// Validate and enter the working directory for a run.
///
/// `create` makes the directory if missing; `init` additionally wipes an
/// existing one first. Without `create`, a missing directory is a hard
/// error.
pub fn prepare_workdir(
    target: &mut dyn ExecutionTarget,
    cwd: &Path,
    create: bool,
    init: bool,
) -> Result<()> {
    let exists = target.exists(cwd)?;
    if create {
        if exists {
            if init {
                tracing::debug!(cwd = %cwd.display(), "re-initializing working directory");
                target.remove(cwd)?;
                target.makedirs(cwd)?;
            }
        } else {
            target.makedirs(cwd)?;
        }
    } else if !exists {
        return Err(Error::DirectoryNotExist(cwd.display().to_string()));
    }
    target.chdir(cwd)
}
