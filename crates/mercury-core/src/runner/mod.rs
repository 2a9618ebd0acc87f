//! Process runner: spawns shell content and streams its output to a sink.
//!
//! Command text is always written to an intermediary script file and executed
//! as `shell <script>`, never passed as a raw shell argument string, so
//! arbitrarily large or quote-laden content is immune to shell-quoting bugs.
//!
//! Three execution modes are supported:
//! - foreground: busy-poll pump until the process exits
//! - interactive: same pump, plus sink-captured input forwarded to the child
//! - background: fire-and-forget with output redirected to a file

mod background;
mod mux;
mod pump;
mod pty;

pub use background::{BackgroundHandle, default_out_file, spawn_background};
pub use mux::{ExecSocket, OutboundQueue, SocketMux};
pub use pump::{OutputCursor, pump_to_completion};
pub use pty::{ETX, PollStatus, PtyChannel};

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use portable_pty::CommandBuilder;
use tempfile::TempPath;

use crate::detector::DetectingSink;
use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::sink::{InputQueue, InteractiveSink, OutputSpec, Sink};

/// Poll timeout for the foreground pump. A trade-off between CPU spin and
/// input latency.
pub const FOREGROUND_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// How a command should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run to completion, streaming output.
    Foreground,
    /// Run to completion, streaming output and forwarding sink input.
    Interactive,
    /// Detach; output goes to a file and the call returns immediately.
    Background,
}

/// Cooperative interrupt flag, settable from any thread (e.g. a ctrl-c
/// handler). The pump translates a pending interrupt into an interrupt
/// control byte for the child rather than exiting its loop.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Create a cleared handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an interrupt of the running child.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Consume a pending interrupt, if any.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    /// Whether an interrupt is pending.
    pub fn is_pending(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything a caller specifies about one run besides the command text.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Execution mode.
    pub mode: RunMode,
    /// Redirect output to this file.
    pub out_file: Option<PathBuf>,
    /// Capture output into this namespace variable.
    pub out_var: Option<String>,
    /// Scan output for `##jmc[...]` directives.
    pub detect_actions: bool,
    /// Input source for interactive mode; a fresh queue is created when
    /// unset.
    pub input: Option<InputQueue>,
}

impl RunRequest {
    /// A plain foreground run printing to the console.
    pub fn foreground() -> Self {
        Self {
            mode: RunMode::Foreground,
            out_file: None,
            out_var: None,
            detect_actions: false,
            input: None,
        }
    }

    /// An interactive run.
    pub fn interactive() -> Self {
        Self {
            mode: RunMode::Interactive,
            ..Self::foreground()
        }
    }

    /// A background run, optionally with an explicit output file.
    pub fn background(out_file: Option<PathBuf>) -> Self {
        Self {
            mode: RunMode::Background,
            out_file,
            ..Self::foreground()
        }
    }

    /// Redirect output to a file.
    pub fn with_out_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.out_file = Some(path.into());
        self
    }

    /// Capture output into a namespace variable.
    pub fn with_out_var(mut self, name: impl Into<String>) -> Self {
        self.out_var = Some(name.into());
        self
    }

    /// Enable directive detection on the output stream.
    pub fn with_action_detection(mut self) -> Self {
        self.detect_actions = true;
        self
    }

    /// Check option compatibility.
    pub fn validate(&self) -> Result<()> {
        if self.out_file.is_some() && self.out_var.is_some() {
            return Err(Error::InvalidRequest(
                "out_file and out_var cannot be set at the same time".to_string(),
            ));
        }
        if self.mode == RunMode::Interactive && (self.out_file.is_some() || self.out_var.is_some())
        {
            return Err(Error::InvalidRequest(
                "interactive mode cannot redirect to out_file/out_var".to_string(),
            ));
        }
        if self.mode == RunMode::Background && self.out_var.is_some() {
            return Err(Error::InvalidRequest(
                "background mode cannot capture into out_var; use out_file".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the sink this request asks for.
    pub fn build_sink(&self, namespace: &Namespace) -> Result<Box<dyn Sink>> {
        let sink: Box<dyn Sink> = if self.mode == RunMode::Interactive {
            match &self.input {
                Some(queue) => Box::new(InteractiveSink::with_queue(queue.clone())),
                None => Box::new(InteractiveSink::new()),
            }
        } else if let Some(path) = &self.out_file {
            OutputSpec::File(path.clone()).build(namespace)?
        } else if let Some(name) = &self.out_var {
            OutputSpec::Variable(name.clone()).build(namespace)?
        } else {
            OutputSpec::Console.build(namespace)?
        };

        Ok(if self.detect_actions {
            Box::new(DetectingSink::new(sink, namespace.clone()))
        } else {
            sink
        })
    }
}

/// Result of a completed (or detached) run.
#[derive(Debug)]
pub enum CompletionInfo {
    /// The process ran to completion.
    Finished {
        /// Exit code reported by the pty channel.
        exit_code: u32,
    },
    /// The process was detached.
    Background(BackgroundHandle),
}

/// Write command text into a temporary script file.
///
/// The returned guard deletes the file on drop, so foreground runs never
/// leak their script.
pub fn write_script(command: &str) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("mercury-")
        .suffix(".sh")
        .tempfile()?;
    file.write_all(command.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

/// Spawns commands on the local host and drives their output.
pub struct ProcessRunner {
    shell: PathBuf,
    poll_timeout: Duration,
    interrupts: InterruptHandle,
}

impl ProcessRunner {
    /// Create a runner using the first available POSIX shell.
    pub fn new() -> Result<Self> {
        let shell = which::which("bash")
            .or_else(|_| which::which("sh"))
            .map_err(|_| Error::ShellNotFound("bash, sh".to_string()))?;
        Ok(Self::with_shell(shell))
    }

    /// Create a runner using an explicit shell binary.
    pub fn with_shell(shell: PathBuf) -> Self {
        Self {
            shell,
            poll_timeout: FOREGROUND_POLL_TIMEOUT,
            interrupts: InterruptHandle::new(),
        }
    }

    /// The shell this runner executes scripts with.
    pub fn shell(&self) -> &PathBuf {
        &self.shell
    }

    /// Handle for delivering user interrupts to the running child.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupts.clone()
    }

    /// Execute `command` according to `request`.
    pub fn run(
        &self,
        command: &str,
        request: &RunRequest,
        namespace: &Namespace,
    ) -> Result<CompletionInfo> {
        request.validate()?;

        if request.mode == RunMode::Background {
            return self.run_background(command, request);
        }

        let mut sink = request.build_sink(namespace)?;
        self.run_with_sink(command, request.mode, sink.as_mut())
    }

    /// Execute `command` streaming into a caller-supplied sink.
    pub fn run_with_sink(
        &self,
        command: &str,
        mode: RunMode,
        sink: &mut dyn Sink,
    ) -> Result<CompletionInfo> {
        let script = write_script(command)?;

        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.arg(&*script);
        cmd.cwd(std::env::current_dir()?);
        tracing::debug!(shell = %self.shell.display(), script = %script.display(), "spawning");

        let mut channel = PtyChannel::spawn(cmd)?;

        if mode == RunMode::Interactive {
            let writer = channel.writer_handle();
            sink.register_read_callback(Box::new(move |bytes| {
                let mut writer = writer.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = writer.write_all(bytes).and_then(|()| writer.flush()) {
                    tracing::warn!("failed to forward input to child: {e}");
                }
            }));
        }

        pump_to_completion(&mut channel, sink, &self.interrupts, self.poll_timeout)?;
        let exit_code = channel.wait()?;
        Ok(CompletionInfo::Finished { exit_code })
    }

    fn run_background(&self, command: &str, request: &RunRequest) -> Result<CompletionInfo> {
        let out_file = match &request.out_file {
            Some(path) => path.clone(),
            None => {
                let path = default_out_file();
                println!(
                    "WARNING: out_file is not set, the default output file is {}",
                    path.display()
                );
                path
            }
        };

        // The detached child reads the script after we return, so persist it
        // instead of holding a self-deleting guard. The file is left behind
        // (one small script per background run); deleting it here would race
        // the child's open.
        let (_file, script_path) = tempfile::Builder::new()
            .prefix("mercury-")
            .suffix(".sh")
            .tempfile()?
            .keep()
            .map_err(|e| Error::Io(e.error))?;
        std::fs::write(&script_path, command)?;

        let handle = spawn_background(&self.shell, &script_path, &out_file)?;
        println!(
            "Run subprocess with pid: {}. Output to '{}'",
            handle.pid,
            handle.out_file.display()
        );
        Ok(CompletionInfo::Background(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_conflicting_outputs() {
        let mut request = RunRequest::foreground();
        request.out_file = Some(PathBuf::from("/tmp/a"));
        request.out_var = Some("v".to_string());
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_interactive_redirection() {
        let request = RunRequest::interactive().with_out_var("v");
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_background_variable_capture() {
        let request = RunRequest::background(None).with_out_var("v");
        assert!(request.validate().is_err());

        // File redirection stays valid for background runs.
        let request = RunRequest::background(Some(PathBuf::from("/tmp/bg.log")));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_foreground_run_captures_into_variable() {
        let runner = ProcessRunner::new().unwrap();
        let ns = Namespace::new();
        let request = RunRequest::foreground().with_out_var("captured");

        let info = runner.run("echo hello", &request, &ns).unwrap();

        assert!(matches!(
            info,
            CompletionInfo::Finished { exit_code: 0 }
        ));
        let captured = ns.get("captured").unwrap();
        assert!(captured.contains("hello"));
    }

    #[test]
    fn test_foreground_run_with_action_detection() {
        let runner = ProcessRunner::new().unwrap();
        let ns = Namespace::new();
        let request = RunRequest::foreground()
            .with_out_var("ignored")
            .with_action_detection();

        runner
            .run(
                "echo '##jmc[action.setvariable variable=result]42'",
                &request,
                &ns,
            )
            .unwrap();

        assert_eq!(ns.get("result"), Some("42".to_string()));
    }

    #[test]
    fn test_script_file_is_removed_after_run() {
        let script = write_script("echo hi").unwrap();
        let path = script.to_path_buf();
        assert!(path.exists());
        drop(script);
        assert!(!path.exists());
    }

    #[test]
    fn test_quote_laden_command_survives_script_indirection() {
        let runner = ProcessRunner::new().unwrap();
        let ns = Namespace::new();
        let request = RunRequest::foreground().with_out_var("out");

        runner
            .run(r#"echo "it's a \"test\"""#, &request, &ns)
            .unwrap();

        assert!(ns.get("out").unwrap().contains(r#"it's a "test""#));
    }
}
