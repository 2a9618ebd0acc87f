//! Detached (background) execution.
//!
//! Background runs redirect the command's output to a file and return
//! immediately. The spawned process is a small wrapper shell; we make a
//! best-effort attempt to report the pid of the actual `shell script`
//! child by matching its exact command line against the live process table,
//! falling back to the wrapper's pid when no match is found.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use sysinfo::{ProcessesToUpdate, System};

use crate::error::{Error, Result};

/// Handle to a fire-and-forget background run.
#[derive(Debug, Clone)]
pub struct BackgroundHandle {
    /// Discovered process id (true child, or the wrapper on fallback).
    pub pid: u32,
    /// File receiving stdout and stderr of the command.
    pub out_file: PathBuf,
    /// True when pid identification fell back to the wrapper shell.
    ///
    /// The command-line match is inherently racy: two byte-identical scripts
    /// running concurrently cannot be told apart, so callers should treat the
    /// pid as a heuristic.
    pub pid_is_wrapper: bool,
}

impl BackgroundHandle {
    /// Ask the background process to terminate (SIGTERM).
    ///
    /// Delivered to the discovered pid, which may be the wrapper shell when
    /// `pid_is_wrapper` is set; the wrapper forwards its fate to the child
    /// through the pipeline exit.
    #[cfg(unix)]
    pub fn terminate(&self) -> Result<()> {
        // Safety: kill with a valid signal number has no memory effects.
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

/// Default output file used when the caller supplies none.
pub fn default_out_file() -> PathBuf {
    std::env::temp_dir().join("mercury.out.log")
}

/// Spawn `script_path` under `shell` detached, with output redirected to
/// `out_file`.
///
/// The script file must outlive this call (the child reads it after we
/// return), so callers pass a persisted path rather than a temp guard.
pub fn spawn_background(
    shell: &Path,
    script_path: &Path,
    out_file: &Path,
) -> Result<BackgroundHandle> {
    let shell_str = shell.to_string_lossy();
    let wrapped = format!(
        "{} '{}' > '{}' 2>&1",
        shell_str,
        script_path.display(),
        out_file.display()
    );

    let child = Command::new(shell)
        .arg("-c")
        .arg(&wrapped)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(Error::Io)?;

    let wrapper_pid = child.id();
    // Intentionally not waited on; the run is fire-and-forget.
    drop(child);

    let (pid, pid_is_wrapper) = match find_child_pid(shell, script_path) {
        Some(pid) => (pid, false),
        None => {
            tracing::warn!(
                wrapper_pid,
                "could not match background command line in the process table, \
                 reporting the wrapper pid instead"
            );
            (wrapper_pid, true)
        }
    };

    Ok(BackgroundHandle {
        pid,
        out_file: out_file.to_path_buf(),
        pid_is_wrapper,
    })
}

/// One scan of the live process table for an exact `[shell, script]` argv
/// match. Returns `None` if the child has not appeared yet (or already
/// exited); we do not rescan.
fn find_child_pid(shell: &Path, script_path: &Path) -> Option<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let shell_name = shell.as_os_str();
    let script = script_path.as_os_str();
    for (pid, process) in system.processes() {
        let cmd = process.cmd();
        if cmd.len() == 2 && cmd[0] == shell_name && cmd[1] == script {
            return Some(pid.as_u32());
        }
    }
    None
}
