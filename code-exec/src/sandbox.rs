use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::{
    fs,
    process::Command,
    time::{self, Duration},
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::encoding::{validate_file_name, validate_relative_path};
use crate::error::Error;
use crate::types::{ExecEvent, StageResult, TIMEOUT_EXIT_CODE, TIMEOUT_SIGNAL};

/// Largest file a sandboxed process may write (RLIMIT_FSIZE).
const FILE_SIZE_LIMIT: u64 = 64 * 1024 * 1024;

/// How long to wait for output pipes to drain once the process group is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8192;

const SYSTEM_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// One process to run inside a sandbox.
#[derive(Debug)]
pub struct ProcessSpec<'a> {
    pub program: &'a Path,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<&'a str>,
    /// Relative to the sandbox root.
    pub working_dir: Option<&'a str>,
    /// CPU seconds allowed (RLIMIT_CPU).
    pub cpu_seconds: u64,
    /// Budget named in the timeout message. Defaults to the run's own timeout.
    pub budget_ms: Option<u64>,
}

/// Per-call execution context: a private directory and the processes started in it.
///
/// Caller files live under `work/`, next to the `home/` and `tmp/` directories
/// handed to the process. The directory is removed when the sandbox is
/// dropped. Every process runs in its own process group, which is killed when
/// the run ends or is abandoned.
pub struct Sandbox {
    pub root_dir: PathBuf,
    pub work_dir: PathBuf,
    id: String,
    max_output_bytes: usize,
}

impl Sandbox {
    pub async fn new(base: &Path, max_output_bytes: usize) -> Result<Self, Error> {
        let id = Uuid::new_v4().to_string();
        let root_dir = base.join(format!("sandbox-{}", id));

        fs::create_dir_all(&root_dir).await.map_err(|e| {
            Error::HostInternal(format!("Failed to create sandbox directory: {}", e))
        })?;

        let sandbox = Sandbox {
            work_dir: root_dir.join("work"),
            root_dir,
            id,
            max_output_bytes,
        };

        for dir in ["work", "home", "tmp"] {
            fs::create_dir_all(sandbox.root_dir.join(dir))
                .await
                .map_err(|e| {
                    Error::HostInternal(format!("Failed to create {} directory: {}", dir, e))
                })?;
        }

        debug!(sandbox = %sandbox.id, root = ?sandbox.root_dir, "Sandbox created");
        Ok(sandbox)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Location of caller file `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    /// Writes `content` to `name`, creating parent directories.
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<PathBuf, Error> {
        validate_file_name(name)?;
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::HostInternal(format!("Failed to create directory for {}: {}", name, e))
            })?;
        }
        fs::write(&path, content)
            .await
            .map_err(|e| Error::HostInternal(format!("Failed to write {}: {}", name, e)))?;
        Ok(path)
    }

    /// Runs a process to completion or until `timeout` elapses.
    ///
    /// Output chunks are forwarded to `events` as they arrive. A process still
    /// running at the deadline has its group killed and its stage marked as
    /// timed out; output produced before the kill is kept.
    pub async fn run(
        &self,
        spec: ProcessSpec<'_>,
        timeout: Duration,
        events: Option<&mpsc::Sender<ExecEvent>>,
    ) -> Result<StageResult, Error> {
        let cwd = match spec.working_dir {
            Some(dir) => {
                validate_relative_path(dir)?;
                let cwd = self.work_dir.join(dir);
                fs::create_dir_all(&cwd).await.map_err(|e| {
                    Error::HostInternal(format!("Failed to create working directory: {}", e))
                })?;
                cwd
            }
            None => self.work_dir.clone(),
        };

        debug!("Sandbox execute - Command: {:?}", spec.program);
        debug!("Sandbox execute - Args: {:?}", spec.args);
        debug!("Sandbox execute - Cwd: {:?}", cwd);

        let path = match spec.program.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                format!("{}:{}", dir.display(), SYSTEM_PATH)
            }
            _ => SYSTEM_PATH.to_string(),
        };

        let mut command = Command::new(spec.program);
        command
            .args(&spec.args)
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .env("PATH", path)
            .env("HOME", self.root_dir.join("home"))
            .env("TMPDIR", self.root_dir.join("tmp"))
            .current_dir(&cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .process_group(0)
            .kill_on_drop(true);

        let cpu_time = spec.cpu_seconds;
        let budget_ms = spec.budget_ms.unwrap_or(timeout.as_millis() as u64);
        unsafe {
            command.pre_exec(move || {
                setrlimit(Resource::RLIMIT_FSIZE, FILE_SIZE_LIMIT, FILE_SIZE_LIMIT)
                    .map_err(std::io::Error::from)?;
                setrlimit(Resource::RLIMIT_CPU, cpu_time, cpu_time)
                    .map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|e| {
            Error::HostInternal(format!("Failed to spawn {:?}: {}", spec.program, e))
        })?;

        let mut group = ProcessGroup::new(child.id());

        if let (Some(input), Some(mut stdin)) = (spec.stdin, child.stdin.take()) {
            let input = input.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        warn!("Failed to write stdin: {}", e);
                    }
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .map(|out| spawn_reader(out, self.max_output_bytes, events.cloned(), ExecEvent::StdoutChunk));
        let stderr = child
            .stderr
            .take()
            .map(|err| spawn_reader(err, self.max_output_bytes, events.cloned(), ExecEvent::StderrChunk));

        let status = match time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                return Err(Error::HostInternal(format!("Failed to wait for process: {}", e)))
            }
            Err(_) => None,
        };

        // Kill whatever is left of the group, including stray grandchildren
        // that would otherwise hold the output pipes open.
        group.kill();

        if status.is_none() {
            if let Err(e) = child.wait().await {
                warn!("Failed to reap timed out process: {}", e);
            }
        }

        let stdout = collect(stdout).await;
        let mut stderr = collect(stderr).await;

        let stage = match status {
            Some(status) => StageResult {
                stdout,
                stderr,
                exit_code: status.code(),
                signal: status.signal(),
            },
            None => {
                debug!(sandbox = %self.id, "Process timed out after {} ms", budget_ms);
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("execution timed out after {} ms\n", budget_ms));
                StageResult {
                    stdout,
                    stderr,
                    exit_code: Some(TIMEOUT_EXIT_CODE),
                    signal: Some(TIMEOUT_SIGNAL),
                }
            }
        };

        Ok(stage)
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!("Failed to clean up sandbox directory: {}", e);
            }
        }
    }
}

/// Process group of a spawned child, killed at most once.
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.map(|pid| Pid::from_raw(pid as i32)),
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

fn spawn_reader<R>(
    mut reader: R,
    limit: usize,
    events: Option<mpsc::Sender<ExecEvent>>,
    wrap: fn(Vec<u8>) -> ExecEvent,
) -> JoinHandle<Capture>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut capture = Capture {
            bytes: Vec::new(),
            truncated: false,
        };
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("Output pipe closed: {}", e);
                    break;
                }
            };

            let room = limit.saturating_sub(capture.bytes.len());
            let kept = n.min(room);
            if kept < n {
                capture.truncated = true;
            }
            if kept == 0 {
                // Keep draining so the child never blocks on a full pipe.
                continue;
            }

            let chunk = &buf[..kept];
            capture.bytes.extend_from_slice(chunk);
            if let Some(tx) = &events {
                // A closed receiver means the caller cancelled; the run task notices.
                let _ = tx.send(wrap(chunk.to_vec())).await;
            }
        }
        capture
    })
}

async fn collect(reader: Option<JoinHandle<Capture>>) -> String {
    let Some(mut handle) = reader else {
        return String::new();
    };

    let capture = match time::timeout(READER_GRACE, &mut handle).await {
        Ok(Ok(capture)) => capture,
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            return String::new();
        }
        Err(_) => {
            warn!("Output pipe still open after the process exited");
            handle.abort();
            return String::new();
        }
    };

    let mut text = String::from_utf8_lossy(&capture.bytes).into_owned();
    if capture.truncated {
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("[output truncated after {} bytes]\n", capture.bytes.len()));
    }
    text
}
