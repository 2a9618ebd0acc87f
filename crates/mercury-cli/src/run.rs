//! Run command implementation.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use mercury_core::{
    CompletionInfo, ContainerTarget, ExecutionTarget, InputQueue, LocalTarget, Namespace,
    RunRequest, prepare_workdir,
};

use crate::docker::DockerCli;

pub struct Options {
    pub cwd: Option<PathBuf>,
    pub create: bool,
    pub init: bool,
    pub container: Option<String>,
    pub interactive: bool,
    pub background: bool,
    pub out_file: Option<PathBuf>,
    pub out_var: Option<String>,
    pub detect: bool,
}

/// Execute shell content on the selected target, returning the child's exit
/// code.
pub fn execute(script: Option<&Path>, command: Option<&str>, options: Options) -> anyhow::Result<i32> {
    let content = read_content(script, command)?;

    let mut target: Box<dyn ExecutionTarget> = match &options.container {
        Some(name) => Box::new(ContainerTarget::new(Arc::new(DockerCli::new(name)?))?),
        None => Box::new(LocalTarget::new()?),
    };

    if let Some(cwd) = &options.cwd {
        prepare_workdir(target.as_mut(), cwd, options.create, options.init)
            .with_context(|| format!("preparing working directory {}", cwd.display()))?;
    }

    let mut request = if options.interactive {
        let mut request = RunRequest::interactive();
        request.input = Some(stdin_input_queue());
        request
    } else if options.background {
        RunRequest::background(options.out_file.clone())
    } else {
        RunRequest::foreground()
    };
    if !options.background {
        if let Some(path) = &options.out_file {
            request = request.with_out_file(path);
        }
    }
    if let Some(var) = &options.out_var {
        request = request.with_out_var(var);
    }
    if options.detect {
        request = request.with_action_detection();
    }

    let namespace = Namespace::new();
    let info = target.run(&content, &request, &namespace)?;

    if let Some(var) = &options.out_var {
        if let Some(value) = namespace.get(var) {
            print!("{value}");
        }
    }

    Ok(match info {
        CompletionInfo::Finished { exit_code } => exit_code as i32,
        CompletionInfo::Background(_) => 0,
    })
}

/// Feed stdin lines into an input queue from a detached reader thread.
fn stdin_input_queue() -> InputQueue {
    let queue = InputQueue::new();
    let feeder = queue.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if !feeder.push_line(line.trim_end_matches('\n')) {
                        tracing::warn!("input queue full, dropping line");
                    }
                }
            }
        }
    });
    queue
}

fn read_content(script: Option<&Path>, command: Option<&str>) -> anyhow::Result<String> {
    if let Some(command) = command {
        return Ok(command.to_string());
    }
    if let Some(path) = script {
        return std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()));
    }
    let mut content = String::new();
    std::io::stdin()
        .read_to_string(&mut content)
        .context("reading script from stdin")?;
    Ok(content)
}
