//! Streaming directive detection in process output.
//!
//! Processes can emit out-of-band directives on their own output stream to
//! set variables in the caller's namespace:
//!
//! ```text
//! ##jmc[action.setvariable variable=answer]42
//! ```
//!
//! The detector is line oriented: chunks arrive at poll-timeout granularity
//! and may split a line anywhere, so a trailing incomplete line is left
//! unconsumed for the next chunk. Malformed directive lines are logged and
//! skipped; they never abort the output pump.

use std::collections::HashMap;

use crate::error::Result;
use crate::namespace::Namespace;
use crate::sink::Sink;

const DIRECTIVE_PREFIX: &str = "##jmc[";
const ACTION_SETVARIABLE: &str = "action.setvariable";

/// A parsed directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Dotted action name, e.g. `action.setvariable`.
    pub action: String,
    /// `key=value` parameters from the bracketed section.
    pub parameters: HashMap<String, String>,
    /// Everything after the closing bracket.
    pub value: Option<String>,
}

/// Parse one line as a directive.
///
/// Returns `None` when the line is not a directive or is structurally
/// malformed (missing bracket, bad identifier, ...).
pub fn parse_directive(line: &str) -> Option<Directive> {
    let rest = line.strip_prefix(DIRECTIVE_PREFIX)?;
    let close = rest.find(']')?;
    let header = &rest[..close];
    let value = &rest[close + 1..];

    // Header is "<action.name>" optionally followed by whitespace and
    // ";"-separated parameter assignments.
    let header = header.trim();
    let (action, params_part) = match header.split_once(char::is_whitespace) {
        Some((action, params)) => (action, params.trim()),
        None => (header, ""),
    };

    if action.is_empty() || !action.split('.').all(is_identifier) {
        return None;
    }

    let mut parameters = HashMap::new();
    if !params_part.is_empty() {
        for assignment in params_part.split(';') {
            let (key, val) = assignment.trim().split_once('=')?;
            if !is_identifier(key) || !is_identifier(val) {
                return None;
            }
            parameters.insert(key.to_string(), val.to_string());
        }
    }

    let value = if value.is_empty() {
        None
    } else {
        Some(value.trim_end_matches('\r').to_string())
    };

    Some(Directive {
        action: action.to_string(),
        parameters,
        value,
    })
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Scans output for directive lines and applies them to a namespace.
#[derive(Debug, Clone)]
pub struct ActionDetector {
    namespace: Namespace,
}

impl ActionDetector {
    /// Create a detector writing into `namespace`.
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    /// Inspect a single complete line (no newline) and apply its action.
    ///
    /// Non-directive and malformed lines are ignored.
    pub fn detect_by_line(&self, line: &str) {
        if !line.starts_with(DIRECTIVE_PREFIX) {
            return;
        }
        let Some(directive) = parse_directive(line) else {
            tracing::warn!(line, "unparseable directive line, skipping");
            return;
        };
        if directive.action != ACTION_SETVARIABLE {
            tracing::warn!(action = %directive.action, "unknown directive action, skipping");
            return;
        }
        let Some(variable) = directive.parameters.get("variable") else {
            tracing::warn!(line, "setvariable directive without a variable name, skipping");
            return;
        };
        let value = directive.value.unwrap_or_default();
        tracing::debug!(variable = %variable, value = %value, "setting variable from directive");
        self.namespace.set(variable.clone(), value);
    }

    /// Scan `chunk` starting at byte offset `start`, handling every complete
    /// line. Returns the offset up to which input was consumed; the trailing
    /// incomplete line (if any) is left for the next call.
    ///
    /// Calling this twice with the same arguments consumes the same range and
    /// performs the same variable sets, so the caller can resume scanning
    /// exactly once per new byte range.
    pub fn detect_by_chunk(&self, chunk: &str, start: usize) -> usize {
        let mut consumed = start;
        while consumed < chunk.len() {
            let Some(nl) = chunk[consumed..].find('\n') else {
                break;
            };
            let line = &chunk[consumed..consumed + nl];
            self.detect_by_line(line.trim_end_matches('\r'));
            consumed += nl + 1;
        }
        consumed
    }
}

/// Sink decorator that runs directive detection over the stream before
/// forwarding each chunk to the inner sink.
pub struct DetectingSink {
    inner: Box<dyn Sink>,
    detector: ActionDetector,
    /// Cumulative output as seen so far; needed because a directive line can
    /// span multiple chunks.
    buffer: String,
    consumed: usize,
}

impl DetectingSink {
    /// Wrap `inner`, detecting directives into `namespace`.
    pub fn new(inner: Box<dyn Sink>, namespace: Namespace) -> Self {
        Self {
            inner,
            detector: ActionDetector::new(namespace),
            buffer: String::new(),
            consumed: 0,
        }
    }
}

impl Sink for DetectingSink {
    fn write(&mut self, text: &str) -> Result<()> {
        self.buffer.push_str(text);
        self.consumed = self.detector.detect_by_chunk(&self.buffer, self.consumed);
        // Fully-consumed prefix is no longer needed.
        if self.consumed == self.buffer.len() {
            self.buffer.clear();
            self.consumed = 0;
        }
        self.inner.write(text)
    }

    fn handle_read(&mut self) -> Result<()> {
        self.inner.handle_read()
    }

    fn register_read_callback(&mut self, cb: crate::sink::ReadCallback) {
        self.inner.register_read_callback(cb);
    }
}
