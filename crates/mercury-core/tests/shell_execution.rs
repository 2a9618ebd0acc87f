//! End-to-end tests for shell execution on the local target.

use std::time::{Duration, Instant};

use mercury_core::{
    CompletionInfo, ExecutionTarget, LocalTarget, Namespace, ProcessRunner, RunRequest,
};

#[test]
fn foreground_run_streams_exact_output() {
    let runner = ProcessRunner::new().unwrap();
    let ns = Namespace::new();
    let request = RunRequest::foreground().with_out_var("out");

    let info = runner.run("printf 'hello world'", &request, &ns).unwrap();

    assert!(matches!(info, CompletionInfo::Finished { exit_code: 0 }));
    assert!(ns.get("out").unwrap().contains("hello world"));
}

#[test]
fn foreground_run_reports_nonzero_exit() {
    let runner = ProcessRunner::new().unwrap();
    let ns = Namespace::new();

    let info = runner
        .run("exit 7", &RunRequest::foreground().with_out_var("out"), &ns)
        .unwrap();

    assert!(matches!(info, CompletionInfo::Finished { exit_code: 7 }));
}

#[test]
fn output_file_redirection_captures_everything() {
    let dir = tempfile::TempDir::new().unwrap();
    let out_file = dir.path().join("captured.log");
    let runner = ProcessRunner::new().unwrap();
    let ns = Namespace::new();

    runner
        .run(
            "echo line-one; echo line-two >&2",
            &RunRequest::foreground().with_out_file(&out_file),
            &ns,
        )
        .unwrap();

    let content = std::fs::read_to_string(&out_file).unwrap();
    // Under a pty both streams interleave onto one channel.
    assert!(content.contains("line-one"));
    assert!(content.contains("line-two"));
}

#[test]
fn background_run_returns_immediately_and_writes_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let out_file = dir.path().join("bg.log");
    let runner = ProcessRunner::new().unwrap();
    let ns = Namespace::new();

    let started = Instant::now();
    let info = runner
        .run(
            "sleep 1; echo finally-done",
            &RunRequest::background(Some(out_file.clone())),
            &ns,
        )
        .unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(900),
        "background run must not wait for the child"
    );

    let CompletionInfo::Background(handle) = info else {
        panic!("expected a background handle");
    };
    assert_eq!(handle.out_file, out_file);

    // The detached child finishes on its own schedule.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let content = std::fs::read_to_string(&out_file).unwrap_or_default();
        if content.contains("finally-done") {
            break;
        }
        assert!(Instant::now() < deadline, "background output never arrived");
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn background_run_without_out_file_uses_default_log() {
    let runner = ProcessRunner::new().unwrap();
    let ns = Namespace::new();

    let info = runner
        .run(
            "echo landed-in-default-log",
            &RunRequest::background(None),
            &ns,
        )
        .unwrap();

    let CompletionInfo::Background(handle) = info else {
        panic!("expected a background handle");
    };
    let default_path = mercury_core::runner::default_out_file();
    assert_eq!(handle.out_file, default_path);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let content = std::fs::read_to_string(&default_path).unwrap_or_default();
        if content.contains("landed-in-default-log") {
            break;
        }
        assert!(Instant::now() < deadline, "default log never got the output");
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn directive_in_output_sets_namespace_variable() {
    let runner = ProcessRunner::new().unwrap();
    let ns = Namespace::new();
    let request = RunRequest::foreground()
        .with_out_var("sink")
        .with_action_detection();

    runner
        .run(
            "echo before; echo '##jmc[action.setvariable variable=answer]42'; echo after",
            &request,
            &ns,
        )
        .unwrap();

    assert_eq!(ns.get("answer"), Some("42".to_string()));
    let streamed = ns.get("sink").unwrap();
    assert!(streamed.contains("before"));
    assert!(streamed.contains("after"));
}

#[test]
fn target_run_uses_prepared_working_directory() {
    let dir = tempfile::TempDir::new().unwrap();
    let old_cwd = std::env::current_dir().unwrap();
    let mut target = LocalTarget::new().unwrap();
    let workdir = dir.path().join("scratch");

    mercury_core::prepare_workdir(&mut target, &workdir, true, false).unwrap();

    let ns = Namespace::new();
    target
        .run(
            "pwd",
            &RunRequest::foreground().with_out_var("out"),
            &ns,
        )
        .unwrap();

    let reported = ns.get("out").unwrap();
    assert!(
        reported.contains("scratch"),
        "expected cwd in output, got {reported:?}"
    );

    std::env::set_current_dir(old_cwd).unwrap();
}
