//! Shell command implementation: a persistent session driven from stdin.

use std::io::{BufRead, Write};

use mercury_core::sink::ConsoleSink;
use mercury_core::{Session, SessionProfile, SessionRegistry};

/// Read lines from stdin and run each through the named session.
///
/// The session survives between lines, so state (variables, cwd) carries
/// over. A session that dies is re-created transparently by the registry.
pub fn execute(session_id: &str, program: Option<&str>) -> anyhow::Result<()> {
    let profile = profile_for(program);
    let registry: SessionRegistry<Session> = SessionRegistry::new();

    eprintln!(
        "Session '{session_id}' using {}; one command per line, ctrl-d to quit.",
        profile.program()
    );

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        let profile = profile.clone();
        let session = registry.get_or_create(session_id, || Session::start(profile.clone()))?;
        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());

        let mut sink = ConsoleSink::new();
        if let Err(e) = session.invoke(command, &mut sink) {
            // The command output already streamed; report and keep the loop
            // alive so the next line gets a fresh session.
            eprintln!("mercury: {e}");
        }
        std::io::stdout().flush()?;
    }

    Ok(())
}

fn profile_for(program: Option<&str>) -> SessionProfile {
    match program {
        None => SessionProfile::powershell(),
        Some(p) if p.contains("pwsh") || p.contains("powershell") => {
            SessionProfile::powershell().with_program(p)
        }
        Some(p) => SessionProfile::posix_sh().with_program(p),
    }
}
