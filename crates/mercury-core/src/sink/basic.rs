//! Non-interactive sink implementations.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::namespace::Namespace;

use super::Sink;

/// Prints output directly to stdout, flushing after every chunk so partial
/// lines show up immediately.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    /// Create a console sink.
    pub fn new() -> Self {
        Self
    }
}

impl Sink for ConsoleSink {
    fn write(&mut self, text: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

/// Appends output to a file, flushing after every chunk.
///
/// The file is closed when the sink is dropped at the end of the invocation.
#[derive(Debug)]
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Create (truncate) the output file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }
}

impl Sink for FileSink {
    fn write(&mut self, text: &str) -> Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// Accumulates output into a namespace variable.
///
/// The first write resets the variable to the empty string so a re-run
/// replaces rather than extends a previous capture.
#[derive(Debug)]
pub struct VariableSink {
    var_name: String,
    namespace: Namespace,
    first_write: bool,
}

impl VariableSink {
    /// Create a sink writing into `var_name` of `namespace`.
    pub fn new(var_name: String, namespace: Namespace) -> Self {
        Self {
            var_name,
            namespace,
            first_write: true,
        }
    }
}

impl Sink for VariableSink {
    fn write(&mut self, text: &str) -> Result<()> {
        if self.first_write {
            self.namespace.set(self.var_name.clone(), "");
            self.first_write = false;
        }
        self.namespace.append(&self.var_name, text);
        Ok(())
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn write(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }
}
