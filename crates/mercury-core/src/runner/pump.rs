//! Incremental output pumping.
//!
//! The runner busy-polls the pty channel and forwards only the new suffix of
//! output to the sink on each iteration. The previously seen output is always
//! a strict prefix of the next snapshot; if a tool rewinds or truncates its
//! own buffer the diff becomes invalid, which is an accepted limitation of
//! the polling protocol.

use std::time::Duration;

use crate::error::Result;
use crate::sink::Sink;

use super::InterruptHandle;
use super::pty::{PollStatus, PtyChannel};

/// Tracks how much of the cumulative output has already been emitted.
#[derive(Debug, Default)]
pub struct OutputCursor {
    seen: usize,
}

impl OutputCursor {
    /// Cursor at the start of the stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor that skips the first `offset` bytes (e.g. a banner that has
    /// already been handled).
    pub fn at(offset: usize) -> Self {
        Self { seen: offset }
    }

    /// Byte position up to which output has been emitted.
    pub fn position(&self) -> usize {
        self.seen
    }

    /// Advance past bytes without emitting them (echo stripping).
    pub fn skip(&mut self, n: usize) {
        self.seen += n;
    }

    /// Take the new suffix of `total` bytes of output, given a function that
    /// returns the bytes from an offset. Returns `None` when nothing new has
    /// arrived, so the sink is never handed an empty chunk.
    ///
    /// A multi-byte UTF-8 sequence split across two polls decodes lossily at
    /// the split point, matching the per-chunk decode of the wire.
    pub fn take_new(&mut self, channel: &PtyChannel) -> Option<String> {
        let bytes = channel.output_since(self.seen);
        if bytes.is_empty() {
            return None;
        }
        self.seen += bytes.len();
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Drive `channel` to completion, streaming new output into `sink`.
///
/// Each iteration: poll with a short timeout, translate a pending user
/// interrupt into ETX for the child, emit the new output suffix, then give
/// the sink one cooperative chance to forward queued input. After EOF the
/// channel is drained once more and the loop stops.
pub fn pump_to_completion(
    channel: &mut PtyChannel,
    sink: &mut dyn Sink,
    interrupts: &InterruptHandle,
    poll_timeout: Duration,
) -> Result<()> {
    let mut cursor = OutputCursor::new();
    loop {
        let status = channel.poll(poll_timeout);
        if interrupts.take() {
            channel.send_interrupt()?;
        }
        if let Some(chunk) = cursor.take_new(channel) {
            sink.write(&chunk)?;
        }
        sink.handle_read()?;
        if status == PollStatus::Eof {
            // One final drain; the reader thread has already seen EOF so the
            // buffer is complete.
            if let Some(chunk) = cursor.take_new(channel) {
                sink.write(&chunk)?;
            }
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Sink;

    /// Sink that records every chunk it receives.
    pub(crate) struct RecordingSink {
        pub chunks: Vec<String>,
    }

    impl RecordingSink {
        pub(crate) fn new() -> Self {
            Self { chunks: Vec::new() }
        }

        pub(crate) fn concatenated(&self) -> String {
            self.chunks.concat()
        }
    }

    impl Sink for RecordingSink {
        fn write(&mut self, text: &str) -> Result<()> {
            self.chunks.push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_pump_reconstructs_full_output_without_gaps() {
        let mut cmd = portable_pty::CommandBuilder::new("sh");
        cmd.arg("-c");
        cmd.arg("for i in 1 2 3 4 5; do printf \"line$i\\n\"; done");

        let mut channel = PtyChannel::spawn(cmd).unwrap();
        let mut sink = RecordingSink::new();
        let interrupts = InterruptHandle::new();

        pump_to_completion(
            &mut channel,
            &mut sink,
            &interrupts,
            Duration::from_millis(10),
        )
        .unwrap();

        let all = sink.concatenated();
        assert_eq!(all, channel.snapshot_string());
        for i in 1..=5 {
            assert!(all.contains(&format!("line{i}")));
        }
        // The prefix-diff never hands the sink an empty chunk.
        assert!(sink.chunks.iter().all(|c| !c.is_empty()));
        let _ = channel.wait();
    }

    #[test]
    fn test_cursor_skip_strips_prefix() {
        let mut cursor = OutputCursor::new();
        cursor.skip(4);
        assert_eq!(cursor.position(), 4);
    }
}
