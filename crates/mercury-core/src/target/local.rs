//! Local host execution target.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::runner::{CompletionInfo, ProcessRunner, RunRequest};

use super::{ExecutionTarget, OpenMode, TargetFile};

/// Target mapping every primitive directly onto host OS calls.
pub struct LocalTarget {
    runner: ProcessRunner,
}

impl LocalTarget {
    /// Create a local target with a default shell runner.
    pub fn new() -> Result<Self> {
        Ok(Self {
            runner: ProcessRunner::new()?,
        })
    }

    /// Create a local target with an explicit runner (custom shell or poll
    /// settings).
    pub fn with_runner(runner: ProcessRunner) -> Self {
        Self { runner }
    }

    /// The underlying process runner.
    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }
}

struct LocalFile {
    file: File,
}

impl Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl TargetFile for LocalFile {
    fn close(mut self: Box<Self>) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

impl ExecutionTarget for LocalTarget {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(path.exists())
    }

    fn is_dir(&self, path: &Path) -> Result<bool> {
        Ok(path.is_dir())
    }

    fn makedirs(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::PathNotExist(path.display().to_string()));
        }
        if path.is_dir() {
            std::fs::remove_dir_all(path)?;
        } else {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn getcwd(&self) -> Result<PathBuf> {
        Ok(std::env::current_dir()?)
    }

    fn chdir(&mut self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(Error::DirectoryNotExist(path.display().to_string()));
        }
        std::env::set_current_dir(path)?;
        Ok(())
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn TargetFile>> {
        let file = match mode {
            OpenMode::Read => File::open(path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::PathNotExist(path.display().to_string())
                } else {
                    Error::Io(e)
                }
            })?,
            OpenMode::Write => File::create(path)?,
            OpenMode::Append => OpenOptions::new().create(true).append(true).open(path)?,
        };
        Ok(Box::new(LocalFile { file }))
    }

    fn run(
        &mut self,
        command: &str,
        request: &RunRequest,
        namespace: &Namespace,
    ) -> Result<CompletionInfo> {
        self.runner.run(command, request, namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_missing_path_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = LocalTarget::new().unwrap();
        let err = target.remove(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::PathNotExist(_)));
    }

    #[test]
    fn test_remove_handles_files_and_trees() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = LocalTarget::new().unwrap();

        let file = dir.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();
        target.remove(&file).unwrap();
        assert!(!file.exists());

        let tree = dir.path().join("a/b");
        std::fs::create_dir_all(&tree).unwrap();
        target.remove(&dir.path().join("a")).unwrap();
        assert!(!tree.exists());
    }

    #[test]
    fn test_chdir_to_missing_directory_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut target = LocalTarget::new().unwrap();
        let err = target.chdir(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::DirectoryNotExist(_)));
    }

    #[test]
    fn test_open_write_then_read_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = LocalTarget::new().unwrap();
        let path = dir.path().join("data.txt");

        let mut handle = target.open(&path, OpenMode::Write).unwrap();
        handle.write_all(b"payload").unwrap();
        handle.close().unwrap();

        let mut handle = target.open(&path, OpenMode::Read).unwrap();
        let mut content = String::new();
        handle.read_to_string(&mut content).unwrap();
        assert_eq!(content, "payload");
    }

    #[test]
    fn test_open_read_missing_file_is_path_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = LocalTarget::new().unwrap();
        let err = target
            .open(&dir.path().join("ghost"), OpenMode::Read)
            .unwrap_err();
        assert!(matches!(err, Error::PathNotExist(_)));
    }
}
