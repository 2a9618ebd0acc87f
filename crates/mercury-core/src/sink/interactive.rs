//! Interactive sink: console output plus a bounded input queue.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::error::Result;

use super::{ReadCallback, Sink};

/// Upper bound on queued input chunks; producers past this point are
/// rejected rather than blocking the pump.
const MAX_QUEUED_CHUNKS: usize = 256;

/// Handle for feeding input to an [`InteractiveSink`] from any thread.
///
/// This is the boundary a UI (text box, stdin reader thread, ...) hands
/// user-supplied bytes across. Enqueueing never blocks.
#[derive(Debug, Clone, Default)]
pub struct InputQueue {
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl InputQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue input bytes. Returns `false` if the queue is full and the
    /// chunk was dropped.
    pub fn push_input(&self, bytes: impl Into<Vec<u8>>) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUED_CHUNKS {
            tracing::warn!("interactive input queue full, dropping chunk");
            return false;
        }
        queue.push_back(bytes.into());
        true
    }

    /// Enqueue a line of input followed by a newline.
    pub fn push_line(&self, line: &str) -> bool {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.push_input(bytes)
    }

    fn pop(&self) -> Option<Vec<u8>> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.pop_front()
    }
}

/// Sink for interactive runs: output goes to stdout, and input queued on the
/// [`InputQueue`] is forwarded to the process each time the pump polls
/// `handle_read`.
pub struct InteractiveSink {
    input: InputQueue,
    read_cb: Option<ReadCallback>,
}

impl InteractiveSink {
    /// Create an interactive sink with a fresh input queue.
    pub fn new() -> Self {
        Self {
            input: InputQueue::new(),
            read_cb: None,
        }
    }

    /// Create an interactive sink fed by an existing queue.
    pub fn with_queue(input: InputQueue) -> Self {
        Self {
            input,
            read_cb: None,
        }
    }

    /// The queue used to feed input into the process.
    pub fn input_queue(&self) -> InputQueue {
        self.input.clone()
    }
}

impl Default for InteractiveSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for InteractiveSink {
    fn write(&mut self, text: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }

    fn handle_read(&mut self) -> Result<()> {
        let Some(cb) = self.read_cb.as_mut() else {
            return Ok(());
        };
        while let Some(bytes) = self.input.pop() {
            cb(&bytes);
        }
        Ok(())
    }

    fn register_read_callback(&mut self, cb: ReadCallback) {
        self.read_cb = Some(cb);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_handle_read_forwards_queued_input() {
        let mut sink = InteractiveSink::new();
        let queue = sink.input_queue();

        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        sink.register_read_callback(Box::new(move |bytes| {
            seen_cb.lock().unwrap().extend_from_slice(bytes);
        }));

        queue.push_line("hi");
        queue.push_input(b"raw".to_vec());
        sink.handle_read().unwrap();

        assert_eq!(&*seen.lock().unwrap(), b"hi\nraw");
    }

    #[test]
    fn test_handle_read_without_callback_is_noop() {
        let mut sink = InteractiveSink::new();
        sink.input_queue().push_line("ignored");
        sink.handle_read().unwrap();
    }

    #[test]
    fn test_queue_bound() {
        let queue = InputQueue::new();
        for _ in 0..MAX_QUEUED_CHUNKS {
            assert!(queue.push_input(b"x".to_vec()));
        }
        assert!(!queue.push_input(b"overflow".to_vec()));
    }
}
