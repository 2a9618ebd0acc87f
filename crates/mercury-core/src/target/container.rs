//! Container execution target.
//!
//! There is no filesystem syscall bridge into a container, so every
//! primitive is implemented by shelling a small inline script in through the
//! container runtime's exec API and inspecting its output. File handles are
//! backed by a local temporary copy that is pushed back on close.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::runner::{
    BackgroundHandle, CompletionInfo, ExecSocket, InterruptHandle, RunMode, RunRequest, SocketMux,
    default_out_file,
};

use super::{ExecutionTarget, OpenMode, TargetFile};

/// Sentinel printed by the existence-check scripts; its presence in the
/// output is the answer.
const EXISTS_SENTINEL: &str = "__mercury_exists__";

/// Shells probed, in order of preference, when detecting the container's
/// default shell.
const SHELL_CANDIDATES: &[&str] = &["bash", "sh", "dash", "ash"];

/// Result of a non-streaming exec in the container.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code of the command.
    pub exit_code: i32,
    /// Combined stdout/stderr bytes.
    pub output: Vec<u8>,
}

impl ExecOutput {
    /// Output decoded lossily as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Boundary to the container runtime (collaborator interface).
pub trait ContainerApi: Send + Sync {
    /// Run a command to completion and collect its output.
    fn exec(&self, cmd: &[String], workdir: Option<&str>) -> Result<ExecOutput>;

    /// Start a command attached to a bidirectional exec socket.
    fn exec_stream(&self, cmd: &[String], workdir: Option<&str>) -> Result<Box<dyn ExecSocket>>;

    /// Write a file into the container.
    fn put_file(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a file out of the container.
    fn get_file(&self, path: &str) -> Result<Vec<u8>>;
}

/// Inline script templates shelled into the container.
mod scripts {
    use super::EXISTS_SENTINEL;

    pub fn exists(path: &str) -> String {
        format!("if [ -e '{path}' ]; then echo {EXISTS_SENTINEL}; fi\n")
    }

    pub fn is_dir(path: &str) -> String {
        format!("if [ -d '{path}' ]; then echo {EXISTS_SENTINEL}; fi\n")
    }

    pub fn makedirs(path: &str) -> String {
        format!("mkdir -p '{path}'\n")
    }

    pub fn remove(path: &str) -> String {
        format!("rm -rf '{path}'\n")
    }

    pub fn background(shell: &str, script: &str, out_file: &str) -> String {
        format!("nohup {shell} '{script}' > '{out_file}' 2>&1 &\necho $!\n")
    }
}

/// Target running everything inside one container.
pub struct ContainerTarget {
    api: Arc<dyn ContainerApi>,
    /// Working directory inside the container, always absolute.
    cwd: String,
    /// Default shell detected once at construction.
    shell: String,
    interrupts: InterruptHandle,
    poll_interval: Duration,
}

impl std::fmt::Debug for ContainerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerTarget")
            .field("cwd", &self.cwd)
            .field("shell", &self.shell)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ContainerTarget {
    /// Connect to a container and detect its default shell.
    pub fn new(api: Arc<dyn ContainerApi>) -> Result<Self> {
        let shell = Self::detect_default_shell(api.as_ref())?;
        tracing::debug!(shell, "detected container default shell");
        Ok(Self {
            api,
            cwd: "/".to_string(),
            shell,
            interrupts: InterruptHandle::new(),
            poll_interval: Duration::from_millis(10),
        })
    }

    /// The shell used for every scripted primitive.
    pub fn default_shell(&self) -> &str {
        &self.shell
    }

    /// Handle for delivering user interrupts to a streaming run.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupts.clone()
    }

    /// Probe the ranked shell list by executing each candidate and keeping
    /// the first one that runs successfully.
    fn detect_default_shell(api: &dyn ContainerApi) -> Result<String> {
        for candidate in SHELL_CANDIDATES {
            let cmd = vec![
                candidate.to_string(),
                "-c".to_string(),
                "true".to_string(),
            ];
            match api.exec(&cmd, None) {
                Ok(out) if out.exit_code == 0 => return Ok(candidate.to_string()),
                Ok(_) | Err(_) => continue,
            }
        }
        Err(Error::ShellNotFound(SHELL_CANDIDATES.join(", ")))
    }

    /// Write `content` to a uniquely-named script inside the container and
    /// return its path.
    fn stage_script(&self, content: &str) -> Result<String> {
        let path = format!("/tmp/mercury-{}.sh", Uuid::new_v4());
        self.api.put_file(&path, content.as_bytes())?;
        Ok(path)
    }

    /// Run an inline script through the detected shell in the current
    /// working directory.
    fn exec_script(&self, content: &str) -> Result<ExecOutput> {
        let script = self.stage_script(content)?;
        let cmd = vec![self.shell.clone(), script.clone()];
        let result = self.api.exec(&cmd, Some(&self.cwd));
        // Best-effort cleanup of the staged script.
        let rm = vec![
            self.shell.clone(),
            "-c".to_string(),
            format!("rm -f '{script}'"),
        ];
        if let Err(e) = self.api.exec(&rm, None) {
            tracing::debug!("failed to remove staged script {script}: {e}");
        }
        result
    }

    fn exec_script_checked(&self, content: &str) -> Result<ExecOutput> {
        let out = self.exec_script(content)?;
        if out.exit_code != 0 {
            return Err(Error::Container(out.text()));
        }
        Ok(out)
    }

    /// Resolve a path against the container working directory.
    fn resolve(&self, path: &Path) -> String {
        let s = path.to_string_lossy();
        if s.starts_with('/') {
            s.into_owned()
        } else if self.cwd == "/" {
            format!("/{s}")
        } else {
            format!("{}/{s}", self.cwd.trim_end_matches('/'))
        }
    }

    fn run_streamed(
        &self,
        command: &str,
        request: &RunRequest,
        namespace: &Namespace,
    ) -> Result<CompletionInfo> {
        let script = self.stage_script(command)?;
        let cmd = vec![self.shell.clone(), script];
        let mut socket = self.api.exec_stream(&cmd, Some(&self.cwd))?;

        let mut sink = request.build_sink(namespace)?;
        let mut mux = SocketMux::new(self.poll_interval);
        if request.mode == RunMode::Interactive {
            let outbound = mux.outbound();
            sink.register_read_callback(Box::new(move |bytes| {
                // Queued, not written: the mux owns the socket.
                outbound.enqueue(bytes.to_vec());
            }));
        }
        mux.run(socket.as_mut(), sink.as_mut(), &self.interrupts)?;

        // The exec socket does not carry an exit status; completion is
        // signalled by remote close.
        Ok(CompletionInfo::Finished { exit_code: 0 })
    }

    fn run_background(&self, command: &str, request: &RunRequest) -> Result<CompletionInfo> {
        let out_file = match &request.out_file {
            Some(path) => path.to_string_lossy().into_owned(),
            None => {
                let path = default_out_file();
                println!(
                    "WARNING: out_file is not set, the default output file is {}",
                    path.display()
                );
                path.to_string_lossy().into_owned()
            }
        };

        let script = self.stage_script(command)?;
        let out = self.exec_script_checked(&scripts::background(&self.shell, &script, &out_file))?;
        let pid: u32 = out
            .text()
            .trim()
            .parse()
            .map_err(|_| Error::Container(format!("unexpected pid output: {}", out.text())))?;

        println!("Run subprocess with pid: {pid}. Output to '{out_file}'");
        Ok(CompletionInfo::Background(BackgroundHandle {
            pid,
            out_file: PathBuf::from(out_file),
            pid_is_wrapper: false,
        }))
    }
}

impl ExecutionTarget for ContainerTarget {
    fn exists(&self, path: &Path) -> Result<bool> {
        let out = self.exec_script_checked(&scripts::exists(&self.resolve(path)))?;
        Ok(out.text().contains(EXISTS_SENTINEL))
    }

    fn is_dir(&self, path: &Path) -> Result<bool> {
        let out = self.exec_script_checked(&scripts::is_dir(&self.resolve(path)))?;
        Ok(out.text().contains(EXISTS_SENTINEL))
    }

    fn makedirs(&self, path: &Path) -> Result<()> {
        self.exec_script_checked(&scripts::makedirs(&self.resolve(path)))?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if !self.exists(path)? {
            return Err(Error::PathNotExist(self.resolve(path)));
        }
        self.exec_script_checked(&scripts::remove(&self.resolve(path)))?;
        Ok(())
    }

    fn getcwd(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(&self.cwd))
    }

    fn chdir(&mut self, path: &Path) -> Result<()> {
        let resolved = self.resolve(path);
        if !self.is_dir(Path::new(&resolved))? {
            return Err(Error::DirectoryNotExist(resolved));
        }
        self.cwd = resolved;
        Ok(())
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn TargetFile>> {
        let remote = self.resolve(path);
        let mut local = tempfile::tempfile()?;

        match mode {
            OpenMode::Read | OpenMode::Append => {
                if self.exists(path)? {
                    let bytes = self.api.get_file(&remote)?;
                    local.write_all(&bytes)?;
                    if mode == OpenMode::Read {
                        local.seek(SeekFrom::Start(0))?;
                    }
                } else if mode == OpenMode::Read {
                    return Err(Error::PathNotExist(remote));
                }
            }
            OpenMode::Write => {}
        }

        Ok(Box::new(ContainerFile {
            api: self.api.clone(),
            shell: self.shell.clone(),
            remote,
            local,
            writable: mode != OpenMode::Read,
            committed: false,
        }))
    }

    fn run(
        &mut self,
        command: &str,
        request: &RunRequest,
        namespace: &Namespace,
    ) -> Result<CompletionInfo> {
        request.validate()?;
        match request.mode {
            RunMode::Background => self.run_background(command, request),
            RunMode::Foreground | RunMode::Interactive => {
                if request.out_file.is_some() {
                    return Err(Error::InvalidRequest(
                        "out_file is not supported for container targets; use out_var".to_string(),
                    ));
                }
                self.run_streamed(command, request, namespace)
            }
        }
    }
}

/// A container file materialized as a local temporary copy.
///
/// Writes stay invisible in the container until `close` (or drop) pushes the
/// local copy back.
struct ContainerFile {
    api: Arc<dyn ContainerApi>,
    shell: String,
    remote: String,
    local: std::fs::File,
    writable: bool,
    committed: bool,
}

impl ContainerFile {
    fn commit(&mut self) -> Result<()> {
        if !self.writable || self.committed {
            return Ok(());
        }
        self.local.flush()?;
        self.local.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.local.read_to_end(&mut bytes)?;

        // Make sure the remote parent directory exists before the push.
        if let Some(parent) = Path::new(&self.remote).parent() {
            let cmd = vec![
                self.shell.clone(),
                "-c".to_string(),
                format!("mkdir -p '{}'", parent.display()),
            ];
            self.api.exec(&cmd, None)?;
        }
        self.api.put_file(&self.remote, &bytes)?;
        self.committed = true;
        Ok(())
    }
}

impl Read for ContainerFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.local.read(buf)
    }
}

impl Write for ContainerFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.local.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.local.flush()
    }
}

impl TargetFile for ContainerFile {
    fn close(mut self: Box<Self>) -> Result<()> {
        self.commit()
    }
}

impl Drop for ContainerFile {
    fn drop(&mut self) {
        if let Err(e) = self.commit() {
            tracing::warn!(remote = %self.remote, "failed to push file back to container: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// In-memory container: a fake filesystem plus an exec that interprets
    /// the handful of inline scripts the target generates.
    #[derive(Default)]
    struct FakeContainer {
        files: Mutex<HashMap<String, Vec<u8>>>,
        dirs: Mutex<HashSet<String>>,
        /// Shells that "exist" in this container.
        shells: Vec<&'static str>,
    }

    impl FakeContainer {
        fn with_shells(shells: Vec<&'static str>) -> Self {
            Self {
                shells,
                ..Self::default()
            }
        }

        fn entry_exists(&self, path: &str) -> bool {
            self.files.lock().unwrap().contains_key(path)
                || self.dirs.lock().unwrap().contains(path)
        }

        fn interpret(&self, script: &str) -> ExecOutput {
            let mut output = Vec::new();
            for line in script.lines() {
                if let Some(rest) = line.strip_prefix("if [ -e '") {
                    let path = rest.split('\'').next().unwrap_or_default();
                    if self.entry_exists(path) {
                        output.extend_from_slice(EXISTS_SENTINEL.as_bytes());
                    }
                } else if let Some(rest) = line.strip_prefix("if [ -d '") {
                    let path = rest.split('\'').next().unwrap_or_default();
                    if self.dirs.lock().unwrap().contains(path) {
                        output.extend_from_slice(EXISTS_SENTINEL.as_bytes());
                    }
                } else if let Some(rest) = line.strip_prefix("mkdir -p '") {
                    let path = rest.split('\'').next().unwrap_or_default();
                    self.dirs.lock().unwrap().insert(path.to_string());
                } else if let Some(rest) = line.strip_prefix("rm -rf '") {
                    let path = rest.split('\'').next().unwrap_or_default();
                    self.dirs.lock().unwrap().remove(path);
                    self.files.lock().unwrap().remove(path);
                }
            }
            ExecOutput {
                exit_code: 0,
                output,
            }
        }
    }

    impl ContainerApi for FakeContainer {
        fn exec(&self, cmd: &[String], _workdir: Option<&str>) -> Result<ExecOutput> {
            let program = cmd.first().map(String::as_str).unwrap_or_default();
            if !self.shells.contains(&program) {
                return Err(Error::Container(format!("no such shell: {program}")));
            }
            if cmd.get(1).map(String::as_str) == Some("-c") {
                let inline = cmd.get(2).cloned().unwrap_or_default();
                if inline == "true" {
                    return Ok(ExecOutput {
                        exit_code: 0,
                        output: Vec::new(),
                    });
                }
                return Ok(self.interpret(&inline));
            }
            // `shell <script>`: load the staged script and interpret it.
            let script_path = cmd.get(1).cloned().unwrap_or_default();
            let script = self
                .files
                .lock()
                .unwrap()
                .get(&script_path)
                .cloned()
                .ok_or_else(|| Error::Container(format!("missing script {script_path}")))?;
            Ok(self.interpret(&String::from_utf8_lossy(&script)))
        }

        fn exec_stream(
            &self,
            _cmd: &[String],
            _workdir: Option<&str>,
        ) -> Result<Box<dyn ExecSocket>> {
            Err(Error::Container("streaming not supported in fake".to_string()))
        }

        fn put_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), bytes.to_vec());
            Ok(())
        }

        fn get_file(&self, path: &str) -> Result<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::Container(format!("no such file: {path}")))
        }
    }

    fn target_with(fake: FakeContainer) -> ContainerTarget {
        ContainerTarget::new(Arc::new(fake)).unwrap()
    }

    #[test]
    fn test_default_shell_detection_prefers_ranked_order() {
        let target = target_with(FakeContainer::with_shells(vec!["sh", "bash"]));
        assert_eq!(target.default_shell(), "bash");

        let target = target_with(FakeContainer::with_shells(vec!["sh"]));
        assert_eq!(target.default_shell(), "sh");
    }

    #[test]
    fn test_no_usable_shell_is_an_error() {
        let err = ContainerTarget::new(Arc::new(FakeContainer::with_shells(vec![]))).unwrap_err();
        assert!(matches!(err, Error::ShellNotFound(_)));
    }

    #[test]
    fn test_makedirs_then_exists_and_chdir() {
        let mut target = target_with(FakeContainer::with_shells(vec!["bash"]));
        let path = Path::new("/data/work");

        assert!(!target.exists(path).unwrap());
        target.makedirs(path).unwrap();
        assert!(target.exists(path).unwrap());

        target.chdir(path).unwrap();
        assert_eq!(target.getcwd().unwrap(), PathBuf::from("/data/work"));
    }

    #[test]
    fn test_chdir_to_missing_directory_fails() {
        let mut target = target_with(FakeContainer::with_shells(vec!["bash"]));
        let err = target.chdir(Path::new("/missing")).unwrap_err();
        assert!(matches!(err, Error::DirectoryNotExist(_)));
    }

    #[test]
    fn test_relative_paths_resolve_against_cwd() {
        let mut target = target_with(FakeContainer::with_shells(vec!["bash"]));
        target.makedirs(Path::new("/base")).unwrap();
        target.chdir(Path::new("/base")).unwrap();

        target.makedirs(Path::new("sub")).unwrap();
        assert!(target.exists(Path::new("/base/sub")).unwrap());
    }

    #[test]
    fn test_file_write_is_visible_only_after_close() {
        let fake = Arc::new(FakeContainer::with_shells(vec!["bash"]));
        let target = ContainerTarget::new(fake.clone()).unwrap();

        let mut handle = target.open(Path::new("/etc/app.conf"), OpenMode::Write).unwrap();
        handle.write_all(b"key=value").unwrap();
        assert!(fake.get_file("/etc/app.conf").is_err());

        handle.close().unwrap();
        assert_eq!(fake.get_file("/etc/app.conf").unwrap(), b"key=value");
    }

    #[test]
    fn test_file_read_materializes_remote_copy() {
        let fake = Arc::new(FakeContainer::with_shells(vec!["bash"]));
        fake.put_file("/etc/motd", b"welcome").unwrap();
        let target = ContainerTarget::new(fake).unwrap();

        let mut handle = target.open(Path::new("/etc/motd"), OpenMode::Read).unwrap();
        let mut content = String::new();
        handle.read_to_string(&mut content).unwrap();
        assert_eq!(content, "welcome");
    }
}
