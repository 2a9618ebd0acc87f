//! Core engine for the Mercury command execution toolkit.
//!
//! This crate provides:
//! - Execution targets (local host and containers) behind one contract
//! - A process runner with foreground, interactive and background modes
//! - Output sinks (console, file, variable capture, interactive, null)
//! - Directive detection over output streams
//! - Persistent interactive shell sessions with a prompt-sentinel protocol
//! - A build-artifact cache for compiled snippets

pub mod cache;
pub mod detector;
pub mod error;
pub mod namespace;
pub mod runner;
pub mod session;
pub mod sink;
pub mod target;

pub use error::{Error, Result};
pub use namespace::Namespace;
pub use cache::{
    BuildTool, CacheStatus, CargoCli, PackageSpec, ProjectCache, SnippetRunner, cache_key,
};
pub use detector::{ActionDetector, DetectingSink, Directive, parse_directive};
pub use runner::{
    BackgroundHandle, CompletionInfo, InterruptHandle, ProcessRunner, RunMode, RunRequest,
};
pub use session::{Session, SessionProfile, SessionRegistry};
pub use sink::{InputQueue, OutputSpec, Sink};
pub use target::{
    ContainerApi, ContainerTarget, ExecutionTarget, LocalTarget, OpenMode, prepare_workdir,
};
