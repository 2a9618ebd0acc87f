//! Socket I/O multiplexing for container interactive runs.
//!
//! Container commands are started through an exec-attach socket rather than
//! a local pty. This module maps readable/writable socket events onto the
//! sink/runner contract: readable data is pumped into the sink, and input the
//! sink captures is queued and flushed when the socket is writable. The sink
//! read callback only ever enqueues; nothing writes to the socket from a
//! callback, so there are no cross-callback races.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sink::Sink;

use super::InterruptHandle;
use super::pty::ETX;

/// Read chunk size per readable event.
const READ_CHUNK: usize = 4096;

/// A bidirectional, non-blocking exec-attach socket.
///
/// Both operations return `io::ErrorKind::WouldBlock` when the socket is not
/// ready, which the mux treats as "poll again later".
pub trait ExecSocket: Send {
    /// Read available bytes; `Ok(0)` means the remote side closed.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Write some queued bytes, returning how many were accepted.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Queue of outbound chunks shared with sink read callbacks.
#[derive(Debug, Clone, Default)]
pub struct OutboundQueue {
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl OutboundQueue {
    /// Enqueue bytes for transmission on the next writable event.
    pub fn enqueue(&self, bytes: impl Into<Vec<u8>>) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_back(bytes.into());
    }

    fn pop(&self) -> Option<Vec<u8>> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.pop_front()
    }

    fn push_front(&self, bytes: Vec<u8>) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_front(bytes);
    }
}

/// Event demultiplexer for one exec socket.
pub struct SocketMux {
    outbound: OutboundQueue,
    poll_interval: Duration,
}

impl SocketMux {
    /// Create a mux with the given idle poll interval.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            outbound: OutboundQueue::default(),
            poll_interval,
        }
    }

    /// The queue sink read callbacks should enqueue input into.
    pub fn outbound(&self) -> OutboundQueue {
        self.outbound.clone()
    }

    /// Drive the socket until the remote side closes.
    ///
    /// A pending user interrupt enqueues a single ETX byte for the remote
    /// process; it never aborts the loop.
    pub fn run(
        &mut self,
        socket: &mut dyn ExecSocket,
        sink: &mut dyn Sink,
        interrupts: &InterruptHandle,
    ) -> Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let mut progressed = false;

            match socket.try_read(&mut buf) {
                Ok(0) => {
                    // Remote closed; nothing left to watch.
                    return Ok(());
                }
                Ok(n) => {
                    sink.write(&String::from_utf8_lossy(&buf[..n]))?;
                    progressed = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(Error::Io(e)),
            }

            if interrupts.take() {
                self.outbound.enqueue([ETX]);
            }

            sink.handle_read()?;

            if let Some(chunk) = self.outbound.pop() {
                match socket.try_write(&chunk) {
                    Ok(n) if n < chunk.len() => {
                        // Partially accepted; keep the remainder at the head
                        // so byte order is preserved.
                        self.outbound.push_front(chunk[n..].to_vec());
                        progressed = true;
                    }
                    Ok(_) => progressed = true,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.outbound.push_front(chunk);
                    }
                    Err(e) => return Err(Error::Io(e)),
                }
            }

            if !progressed {
                std::thread::sleep(self.poll_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use crate::sink::VariableSink;

    /// Scripted socket: serves queued inbound chunks, records writes, and
    /// closes after the script is exhausted.
    struct ScriptedSocket {
        inbound: VecDeque<Option<Vec<u8>>>, // None = WouldBlock
        written: Vec<u8>,
        echo_written: bool,
    }

    impl ScriptedSocket {
        fn new(chunks: Vec<Option<Vec<u8>>>) -> Self {
            Self {
                inbound: chunks.into(),
                written: Vec::new(),
                echo_written: false,
            }
        }
    }

    impl ExecSocket for ScriptedSocket {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.inbound.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
                None => Ok(0),
            }
        }

        fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.echo_written {
                // Echo written bytes back as inbound data before closing.
                self.inbound.push_front(Some(buf.to_vec()));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn test_mux_streams_until_remote_close() {
        let mut socket = ScriptedSocket::new(vec![
            Some(b"chunk1".to_vec()),
            None,
            Some(b"chunk2".to_vec()),
        ]);

        let ns = Namespace::new();
        let mut sink = VariableSink::new("out".to_string(), ns.clone());
        let mut mux = SocketMux::new(Duration::from_millis(1));
        let interrupts = InterruptHandle::new();

        mux.run(&mut socket, &mut sink, &interrupts).unwrap();

        assert_eq!(ns.get("out"), Some("chunk1chunk2".to_string()));
    }

    #[test]
    fn test_queued_input_is_sent_when_writable() {
        let mut socket = ScriptedSocket::new(vec![None, None]);
        let mut mux = SocketMux::new(Duration::from_millis(1));
        mux.outbound().enqueue(b"stdin line\n".to_vec());

        let ns = Namespace::new();
        let mut sink = VariableSink::new("out".to_string(), ns);
        let interrupts = InterruptHandle::new();
        mux.run(&mut socket, &mut sink, &interrupts).unwrap();

        assert_eq!(socket.written, b"stdin line\n");
    }

    #[test]
    fn test_interrupt_enqueues_single_etx() {
        let mut socket = ScriptedSocket::new(vec![None, None, None]);
        let mut mux = SocketMux::new(Duration::from_millis(1));

        let ns = Namespace::new();
        let mut sink = VariableSink::new("out".to_string(), ns);
        let interrupts = InterruptHandle::new();
        interrupts.interrupt();
        mux.run(&mut socket, &mut sink, &interrupts).unwrap();

        assert_eq!(socket.written, vec![ETX]);
    }
}
