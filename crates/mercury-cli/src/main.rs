//! Mercury CLI - shell execution, persistent sessions, compiled snippets.

mod docker;
mod run;
mod shell;
mod snippet;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mercury")]
#[command(about = "Shell execution engine with sessions and a snippet cache")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute shell content on the local host or in a container
    Run {
        /// Script file to execute (reads stdin when neither this nor -c is given)
        script: Option<PathBuf>,

        /// Inline command text instead of a script file
        #[arg(short = 'c', long = "command", conflicts_with = "script")]
        command: Option<String>,

        /// Working directory for the command
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Create the working directory if it does not exist
        #[arg(long, requires = "cwd")]
        create: bool,

        /// Wipe and re-create the working directory (implies an existing --create)
        #[arg(long, requires = "create")]
        init: bool,

        /// Run inside this docker container instead of the host
        #[arg(long)]
        container: Option<String>,

        /// Interactive mode: forward stdin lines to the running command
        #[arg(short = 'i', long, conflicts_with = "bg")]
        interactive: bool,

        /// Detach and run in the background
        #[arg(long)]
        bg: bool,

        /// Redirect output to this file
        #[arg(long, conflicts_with = "out_var")]
        out_file: Option<PathBuf>,

        /// Capture output into a variable and print it when done
        #[arg(long)]
        out_var: Option<String>,

        /// Scan output for ##jmc[...] directives
        #[arg(long)]
        detect: bool,
    },

    /// Drive a persistent shell session from stdin lines
    Shell {
        /// Session id; reusing an id reuses the live session
        #[arg(long, default_value = "default")]
        session: String,

        /// Shell program to launch (pwsh, powershell, sh, ...)
        #[arg(long)]
        program: Option<String>,
    },

    /// Compile and run a source snippet through the project cache
    Snippet {
        /// Snippet source file (reads stdin when omitted)
        file: Option<PathBuf>,

        /// Package dependency, name or name@version (repeatable)
        #[arg(short, long = "package")]
        packages: Vec<String>,

        /// Bypass the cache: scaffold fresh and install every package
        #[arg(long)]
        no_cache: bool,

        /// Cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            script,
            command,
            cwd,
            create,
            init,
            container,
            interactive,
            bg,
            out_file,
            out_var,
            detect,
        } => {
            let options = run::Options {
                cwd,
                create,
                init,
                container,
                interactive,
                background: bg,
                out_file,
                out_var,
                detect,
            };
            let exit_code = run::execute(script.as_deref(), command.as_deref(), options)?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }

        Commands::Shell { session, program } => {
            shell::execute(&session, program.as_deref())?;
        }

        Commands::Snippet {
            file,
            packages,
            no_cache,
            cache_dir,
        } => {
            snippet::execute(file.as_deref(), &packages, no_cache, cache_dir.as_deref())?;
        }
    }

    Ok(())
}
