//! Persistent interactive shell sessions.
//!
//! A session keeps one shell process alive under a pty across many command
//! invocations. Completion of a command is detected with a prompt sentinel:
//! at startup the shell's prompt is redefined to an improbable fixed string,
//! and each invocation then polls the output until the sentinel reappears.
//! The echoed command line at the head of the output and the sentinel at the
//! tail are both stripped, so the sink sees only the command's own output.

mod registry;

pub use registry::{ManagedSession, SessionRegistry};

use std::time::{Duration, Instant};

use portable_pty::CommandBuilder;

use crate::error::{Error, Result};
use crate::runner::{PollStatus, PtyChannel};
use crate::sink::Sink;

/// Prompt sentinel. Improbable in real output; a collision would end an
/// invocation early.
pub const SENTINEL: &str = "XYZJMCSENTINELZYX";

/// Poll timeout while waiting on session output. Wider than the foreground
/// pump's because an idle prompt wait dominates a session's lifetime.
pub const SESSION_POLL_TIMEOUT: Duration = Duration::from_millis(20);

/// Upper bound on the startup handshake (banner plus prompt redefinition).
const STARTUP_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptStyle {
    PowerShell,
    Posix,
}

/// How to launch and talk to one kind of shell.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    program: String,
    args: Vec<String>,
    startup_delay: Duration,
    style: PromptStyle,
}

impl SessionProfile {
    /// PowerShell session (the default profile).
    pub fn powershell() -> Self {
        Self {
            program: "pwsh".to_string(),
            args: vec!["-NoLogo".to_string()],
            startup_delay: Duration::from_millis(500),
            style: PromptStyle::PowerShell,
        }
    }

    /// POSIX `sh` session. Lighter startup; also what the tests use.
    pub fn posix_sh() -> Self {
        Self {
            program: "sh".to_string(),
            args: Vec::new(),
            startup_delay: Duration::from_millis(200),
            style: PromptStyle::Posix,
        }
    }

    /// Override the launched program (e.g. `powershell` instead of `pwsh`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// The program this profile launches.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Command that replaces the shell's native prompt with the sentinel.
    fn redefine_command(&self) -> String {
        match self.style {
            PromptStyle::PowerShell => format!("Function prompt{{\"{SENTINEL}\"}}"),
            PromptStyle::Posix => format!("PS1='{SENTINEL}'"),
        }
    }

    /// Whether the startup banner shows a recognizable native prompt yet.
    fn banner_ready(&self, banner: &str) -> bool {
        match self.style {
            // "PS <drive>:" e.g. "PS C:\Users" or "PS /home".
            PromptStyle::PowerShell => banner.lines().any(|line| {
                line.strip_prefix("PS ").is_some_and(|rest| {
                    let mut chars = rest.chars();
                    matches!(
                        (chars.next(), chars.next()),
                        (Some(c), Some(':')) if c.is_ascii_alphabetic()
                    ) || rest.starts_with('/')
                })
            }),
            // sh prints its prompt immediately; any delay already elapsed.
            PromptStyle::Posix => true,
        }
    }
}

/// One live shell process driven through the sentinel protocol.
pub struct Session {
    channel: PtyChannel,
    profile: SessionProfile,
    /// Output bytes already consumed by past invocations.
    consumed: usize,
    poll_timeout: Duration,
}

impl Session {
    /// Spawn the shell and complete the prompt-redefinition handshake.
    pub fn start(profile: SessionProfile) -> Result<Self> {
        let mut cmd = CommandBuilder::new(&profile.program);
        for arg in &profile.args {
            cmd.arg(arg);
        }
        cmd.cwd(std::env::current_dir()?);
        tracing::debug!(program = %profile.program, "starting session");

        let channel = PtyChannel::spawn(cmd)?;
        std::thread::sleep(profile.startup_delay);

        let mut session = Self {
            channel,
            profile,
            consumed: 0,
            poll_timeout: SESSION_POLL_TIMEOUT,
        };
        session.handshake()?;
        Ok(session)
    }

    /// Wait for the banner prompt, redefine it, and confirm the sentinel
    /// shows up twice (once in the echo, once as the new prompt).
    fn handshake(&mut self) -> Result<()> {
        let deadline = Instant::now() + STARTUP_DEADLINE;

        self.wait_until(deadline, "shell banner prompt", |s| {
            let banner = s.channel.snapshot_string();
            s.profile.banner_ready(&banner)
        })?;

        self.channel.send_line(&self.profile.redefine_command())?;

        self.wait_until(deadline, "redefined prompt", |s| {
            s.channel.snapshot_string().matches(SENTINEL).count() >= 2
        })?;

        // Everything up to here is handshake noise, not command output.
        self.consumed = self.channel.output_len();
        Ok(())
    }

    fn wait_until(
        &mut self,
        deadline: Instant,
        what: &str,
        ready: impl Fn(&Self) -> bool,
    ) -> Result<()> {
        loop {
            if ready(self) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Session(format!(
                    "timed out waiting for {what} from '{}'",
                    self.profile.program
                )));
            }
            if self.channel.poll(self.poll_timeout) == PollStatus::Eof && !ready(self) {
                return Err(Error::Session(format!(
                    "'{}' exited while waiting for {what}",
                    self.profile.program
                )));
            }
        }
    }

    /// Run one command and stream its output into `sink`.
    ///
    /// Output between the echoed command line and the next sentinel prompt is
    /// emitted incrementally. A sentinel-length tail is held back each round
    /// so a prompt split across polls is never leaked to the sink.
    pub fn invoke(&mut self, command: &str, sink: &mut dyn Sink) -> Result<()> {
        // Anything printed since the last invocation is stale.
        self.consumed = self.channel.output_len();

        self.channel.send_line(command)?;

        // The pty echoes the command plus "\r\n" before any real output.
        let mut echo_left = command.len() + 2;
        let mut pending = String::new();

        loop {
            let status = self.channel.poll(self.poll_timeout);

            let new = self.channel.output_since(self.consumed);
            if !new.is_empty() {
                self.consumed += new.len();
                pending.push_str(&String::from_utf8_lossy(&new));
            }

            if echo_left > 0 {
                let mut skip = echo_left.min(pending.len());
                // Lossy decoding can shift byte boundaries; never split a char.
                while !pending.is_char_boundary(skip) {
                    skip -= 1;
                }
                pending.drain(..skip);
                echo_left -= skip;
            }

            if let Some(pos) = pending.find(SENTINEL) {
                if pos > 0 {
                    sink.write(&pending[..pos])?;
                }
                return Ok(());
            }

            if status == PollStatus::Eof {
                if !pending.is_empty() {
                    sink.write(&pending)?;
                }
                return Err(Error::Session(format!(
                    "'{}' exited mid-command",
                    self.profile.program
                )));
            }

            // Emit all but a sentinel-length tail.
            if pending.len() > SENTINEL.len() {
                let mut cut = pending.len() - SENTINEL.len();
                while !pending.is_char_boundary(cut) {
                    cut -= 1;
                }
                if cut > 0 {
                    let head: String = pending.drain(..cut).collect();
                    sink.write(&head)?;
                }
            }

            sink.handle_read()?;
        }
    }

    /// Whether the shell process is still running.
    pub fn is_alive(&mut self) -> bool {
        self.channel.is_alive()
    }

    /// Process id of the shell, if the platform exposes one.
    pub fn process_id(&self) -> Option<u32> {
        self.channel.process_id()
    }

    /// Terminate the shell process.
    pub fn shutdown(mut self) -> Result<()> {
        self.channel.kill()
    }
}

impl ManagedSession for Session {
    fn is_alive(&mut self) -> bool {
        Session::is_alive(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use crate::sink::VariableSink;

    fn capture(ns: &Namespace, var: &str) -> VariableSink {
        VariableSink::new(var.to_string(), ns.clone())
    }

    #[test]
    fn test_posix_session_handshake_and_invoke() {
        let mut session = Session::start(SessionProfile::posix_sh()).unwrap();
        assert!(session.is_alive());

        let ns = Namespace::new();
        let mut sink = capture(&ns, "out");
        session.invoke("echo marker-one", &mut sink).unwrap();

        let out = ns.get("out").unwrap();
        assert!(out.contains("marker-one"), "got: {out:?}");
        assert!(!out.contains(SENTINEL), "sentinel leaked: {out:?}");

        session.shutdown().unwrap();
    }

    #[test]
    fn test_session_state_persists_between_invocations() {
        let mut session = Session::start(SessionProfile::posix_sh()).unwrap();
        let ns = Namespace::new();

        let mut sink = capture(&ns, "ignored");
        session.invoke("STASH=hello42", &mut sink).unwrap();

        let mut sink = capture(&ns, "out");
        session.invoke("echo \"$STASH\"", &mut sink).unwrap();

        assert!(ns.get("out").unwrap().contains("hello42"));
        session.shutdown().unwrap();
    }

    #[test]
    fn test_echoed_command_is_stripped() {
        let mut session = Session::start(SessionProfile::posix_sh()).unwrap();
        let ns = Namespace::new();

        let mut sink = capture(&ns, "out");
        session.invoke("printf distinctive-output", &mut sink).unwrap();

        let out = ns.get("out").unwrap();
        assert!(!out.contains("printf"), "echo leaked: {out:?}");
        assert!(out.contains("distinctive-output"));
        session.shutdown().unwrap();
    }

    #[test]
    fn test_invoke_on_dead_session_is_an_error() {
        let mut session = Session::start(SessionProfile::posix_sh()).unwrap();
        let ns = Namespace::new();

        let mut sink = capture(&ns, "ignored");
        session.invoke("exit 0", &mut sink).unwrap_err();
        assert!(!session.is_alive());
    }
}
