//! Output sinks: pluggable destinations for streamed process output.
//!
//! A [`Sink`] receives output chunks from the process runner in real time and
//! may feed input back into the running process through a registered read
//! callback. The set of implementations is closed and selected by explicit
//! configuration ([`OutputSpec`]), not runtime type inspection.

mod basic;
mod interactive;

pub use basic::{ConsoleSink, FileSink, NullSink, VariableSink};
pub use interactive::{InputQueue, InteractiveSink};

use std::path::PathBuf;

use crate::error::Result;
use crate::namespace::Namespace;

/// Callback invoked with input bytes destined for the running process.
pub type ReadCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Destination for streamed process output.
///
/// A sink lives for a single invocation: it is created when a run starts and
/// dropped (flushed, closed) when the run finishes.
pub trait Sink: Send {
    /// Append a chunk of output. Must not block the producer for unbounded
    /// time.
    fn write(&mut self, text: &str) -> Result<()>;

    /// Cooperatively poll for pending input and forward it through the
    /// registered read callback. Called once per pump iteration; must not
    /// block the output pump.
    fn handle_read(&mut self) -> Result<()> {
        Ok(())
    }

    /// Register the callback that forwards input bytes to the process.
    /// Non-interactive sinks ignore this.
    fn register_read_callback(&mut self, _cb: ReadCallback) {}
}

/// Where non-interactive output should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSpec {
    /// Print to stdout.
    Console,
    /// Append to a file.
    File(PathBuf),
    /// Accumulate into a namespace variable.
    Variable(String),
}

impl OutputSpec {
    /// Build the sink for this spec.
    pub fn build(&self, namespace: &Namespace) -> Result<Box<dyn Sink>> {
        Ok(match self {
            OutputSpec::Console => Box::new(ConsoleSink::new()),
            OutputSpec::File(path) => Box::new(FileSink::create(path)?),
            OutputSpec::Variable(name) => {
                Box::new(VariableSink::new(name.clone(), namespace.clone()))
            }
        })
    }
}
