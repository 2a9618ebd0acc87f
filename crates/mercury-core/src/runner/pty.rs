//! Pseudo-terminal channel for spawned commands.
//!
//! Wraps `portable-pty` behind a poll-with-timeout surface: a reader thread
//! accumulates everything the child writes, and callers poll for "new output
//! pending" or "process exited" with a short timeout, mirroring the only
//! surface the underlying spawn primitive offers.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};

use crate::error::{Error, Result};

/// ASCII End-of-Text, the interrupt control byte (what ^C sends).
pub const ETX: u8 = 0x03;

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The timeout elapsed; the child is still running.
    Timeout,
    /// The child's output stream reached end-of-file.
    Eof,
}

/// A command running under a pseudo-terminal.
///
/// Output accumulates in an internal buffer; the accumulated bytes only ever
/// grow, so previously observed output is always a strict prefix of the next
/// snapshot (the basis of the runner's incremental diffing).
pub struct PtyChannel {
    child: Box<dyn Child + Send + Sync>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    buffer: Arc<Mutex<Vec<u8>>>,
    eof: Arc<AtomicBool>,
    // Dropping the master closes the channel, so hold it for the child's life.
    _master: Box<dyn MasterPty + Send>,
}

impl PtyChannel {
    /// Spawn `cmd` under a fresh pty and start draining its output.
    pub fn spawn(cmd: CommandBuilder) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Pty(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Pty(e.to_string()))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Pty(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Pty(e.to_string()))?;

        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let eof = Arc::new(AtomicBool::new(false));

        let thread_buffer = buffer.clone();
        let thread_eof = eof.clone();
        thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => {
                        // On a pty, child exit surfaces as EOF or EIO.
                        thread_eof.store(true, Ordering::SeqCst);
                        break;
                    }
                    Ok(n) => {
                        let mut buf = thread_buffer.lock().unwrap_or_else(|e| e.into_inner());
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        });

        Ok(Self {
            child,
            writer: Arc::new(Mutex::new(writer)),
            buffer,
            eof,
            _master: pair.master,
        })
    }

    /// Wait up to `timeout` for the channel to reach EOF.
    ///
    /// Returns [`PollStatus::Timeout`] when the child is still producing;
    /// any output read in the meantime is available via the snapshot
    /// accessors.
    pub fn poll(&self, timeout: Duration) -> PollStatus {
        let deadline = Instant::now() + timeout;
        loop {
            if self.eof.load(Ordering::SeqCst) {
                return PollStatus::Eof;
            }
            if Instant::now() >= deadline {
                return PollStatus::Timeout;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Total number of output bytes accumulated so far.
    pub fn output_len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Copy of the output bytes from `from` to the current end.
    pub fn output_since(&self, from: usize) -> Vec<u8> {
        let buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buf.get(from..).map(<[u8]>::to_vec).unwrap_or_default()
    }

    /// Lossy string snapshot of the entire accumulated output.
    pub fn snapshot_string(&self) -> String {
        let buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Send bytes to the child's input.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Send a line of input followed by a newline.
    pub fn send_line(&self, line: &str) -> Result<()> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.send(&bytes)
    }

    /// Deliver an interrupt to the child by writing the ETX control byte.
    ///
    /// The child gets a chance to clean up; the poll loop keeps running
    /// until EOF.
    pub fn send_interrupt(&self) -> Result<()> {
        self.send(&[ETX])
    }

    /// Shared handle to the pty writer, for read callbacks that forward
    /// sink-captured input into the child.
    pub fn writer_handle(&self) -> Arc<Mutex<Box<dyn Write + Send>>> {
        self.writer.clone()
    }

    /// Whether the child process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Process id of the child, if the platform exposes one.
    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Block until the child exits and return its exit code.
    pub fn wait(&mut self) -> Result<u32> {
        let status = self.child.wait().map_err(|e| Error::Pty(e.to_string()))?;
        Ok(status.exit_code())
    }

    /// Kill the child process.
    pub fn kill(&mut self) -> Result<()> {
        self.child.kill().map_err(Error::Io)
    }
}
