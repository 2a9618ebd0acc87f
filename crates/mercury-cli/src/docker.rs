//! Docker adapter: implements the container boundary over the `docker` CLI.
//!
//! `exec` and the file transfers shell out to `docker exec` / `docker cp`.
//! Streaming runs spawn `docker exec -i` with piped stdio and adapt it to the
//! non-blocking socket surface the core multiplexer expects: a reader thread
//! accumulates output in a shared buffer and `try_read` drains it.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mercury_core::runner::ExecSocket;
use mercury_core::target::ExecOutput;
use mercury_core::{ContainerApi, Error, Result};

/// One named docker container reachable through the local docker binary.
pub struct DockerCli {
    docker: PathBuf,
    container: String,
}

impl DockerCli {
    pub fn new(container: &str) -> Result<Self> {
        let docker = which::which("docker")
            .map_err(|_| Error::Container("docker not found on PATH".to_string()))?;
        Ok(Self {
            docker,
            container: container.to_string(),
        })
    }

    fn exec_command(&self, cmd: &[String], workdir: Option<&str>, stream: bool) -> Command {
        let mut c = Command::new(&self.docker);
        c.arg("exec");
        if stream {
            c.arg("-i");
        }
        if let Some(dir) = workdir {
            c.args(["-w", dir]);
        }
        c.arg(&self.container);
        c.args(cmd);
        c
    }
}

impl ContainerApi for DockerCli {
    fn exec(&self, cmd: &[String], workdir: Option<&str>) -> Result<ExecOutput> {
        let output = self.exec_command(cmd, workdir, false).output()?;
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }

    fn exec_stream(&self, cmd: &[String], workdir: Option<&str>) -> Result<Box<dyn ExecSocket>> {
        let mut child = self
            .exec_command(cmd, workdir, true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Container("docker exec stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Container("docker exec stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Container("docker exec stderr unavailable".to_string()))?;

        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let open_streams = Arc::new(AtomicUsize::new(2));
        spawn_drain(Box::new(stdout), buffer.clone(), open_streams.clone());
        spawn_drain(Box::new(stderr), buffer.clone(), open_streams.clone());

        Ok(Box::new(DockerSocket {
            child,
            stdin,
            buffer,
            open_streams,
        }))
    }

    fn put_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let mut staging = tempfile::NamedTempFile::new()?;
        staging.write_all(bytes)?;
        staging.flush()?;

        let status = Command::new(&self.docker)
            .arg("cp")
            .arg(staging.path())
            .arg(format!("{}:{}", self.container, path))
            .status()?;
        if !status.success() {
            return Err(Error::Container(format!("docker cp to {path} failed")));
        }
        Ok(())
    }

    fn get_file(&self, path: &str) -> Result<Vec<u8>> {
        let staging = tempfile::TempDir::new()?;
        let local = staging.path().join("transfer");

        let status = Command::new(&self.docker)
            .arg("cp")
            .arg(format!("{}:{}", self.container, path))
            .arg(&local)
            .status()?;
        if !status.success() {
            return Err(Error::Container(format!("docker cp from {path} failed")));
        }
        Ok(std::fs::read(&local)?)
    }
}

fn spawn_drain(
    mut source: Box<dyn Read + Send>,
    buffer: Arc<Mutex<Vec<u8>>>,
    open_streams: Arc<AtomicUsize>,
) {
    std::thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match source.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut buf = buffer.lock().unwrap_or_else(|e| e.into_inner());
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
        open_streams.fetch_sub(1, Ordering::SeqCst);
    });
}

/// Non-blocking socket view over a `docker exec -i` child.
struct DockerSocket {
    child: Child,
    stdin: ChildStdin,
    buffer: Arc<Mutex<Vec<u8>>>,
    /// Drain threads still running; EOF only once both are done and the
    /// buffer is empty.
    open_streams: Arc<AtomicUsize>,
}

impl ExecSocket for DockerSocket {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut pending = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            if !pending.is_empty() {
                let n = pending.len().min(buf.len());
                buf[..n].copy_from_slice(&pending[..n]);
                pending.drain(..n);
                return Ok(n);
            }
        }
        if self.open_streams.load(Ordering::SeqCst) == 0 {
            return Ok(0);
        }
        Err(io::Error::from(io::ErrorKind::WouldBlock))
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.stdin.write(buf)?;
        self.stdin.flush()?;
        Ok(n)
    }
}

impl Drop for DockerSocket {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            if let Err(e) = self.child.kill() {
                tracing::warn!("failed to kill docker exec child: {e}");
            }
        }
        let _ = self.child.wait();
    }
}
