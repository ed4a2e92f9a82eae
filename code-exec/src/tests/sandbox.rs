use crate::{
    sandbox::{ProcessSpec, Sandbox},
    ExecEvent, Result,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::Duration;

fn tool(name: &str) -> PathBuf {
    which::which(name).unwrap_or_else(|_| panic!("{} is not installed", name))
}

fn spec<'a>(program: &'a Path, args: &[&str]) -> ProcessSpec<'a> {
    ProcessSpec {
        program,
        args: args.iter().map(|s| s.to_string()).collect(),
        env: Vec::new(),
        stdin: None,
        working_dir: None,
        cpu_seconds: 10,
        budget_ms: None,
    }
}

async fn new_sandbox(max_output_bytes: usize) -> Result<(tempfile::TempDir, Sandbox)> {
    let base = tempfile::tempdir()?;
    let sandbox = Sandbox::new(base.path(), max_output_bytes).await?;
    Ok((base, sandbox))
}

#[tokio::test]
async fn test_sandbox_basic() -> Result<()> {
    let (_base, sandbox) = new_sandbox(4096).await?;
    let echo = tool("echo");
    let stage = sandbox
        .run(spec(&echo, &["Hello"]), Duration::from_secs(5), None)
        .await?;
    assert_eq!(stage.stdout.trim(), "Hello");
    assert!(stage.stderr.is_empty());
    assert_eq!(stage.exit_code, Some(0));
    assert_eq!(stage.signal, None);
    Ok(())
}

#[tokio::test]
async fn test_sandbox_input() -> Result<()> {
    let (_base, sandbox) = new_sandbox(4096).await?;
    let cat = tool("cat");
    let mut process = spec(&cat, &[]);
    process.stdin = Some("test input");
    let stage = sandbox.run(process, Duration::from_secs(5), None).await?;
    assert_eq!(stage.stdout, "test input");
    assert!(stage.stderr.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_sandbox_exit_code_and_stderr() -> Result<()> {
    let (_base, sandbox) = new_sandbox(4096).await?;
    let sh = tool("sh");
    let stage = sandbox
        .run(
            spec(&sh, &["-c", "echo oops >&2; exit 7"]),
            Duration::from_secs(5),
            None,
        )
        .await?;
    assert_eq!(stage.exit_code, Some(7));
    assert_eq!(stage.stderr.trim(), "oops");
    assert!(!stage.timed_out());
    Ok(())
}

#[tokio::test]
async fn test_sandbox_timeout() -> Result<()> {
    let (_base, sandbox) = new_sandbox(4096).await?;
    let sleep = tool("sleep");
    let started = Instant::now();
    let stage = sandbox
        .run(spec(&sleep, &["10"]), Duration::from_millis(200), None)
        .await?;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(stage.timed_out());
    assert!(stage.stderr.contains("execution timed out after 200 ms"));
    Ok(())
}

#[tokio::test]
async fn test_sandbox_timeout_keeps_partial_output() -> Result<()> {
    let (_base, sandbox) = new_sandbox(4096).await?;
    let sh = tool("sh");
    let stage = sandbox
        .run(
            spec(&sh, &["-c", "echo before; while :; do :; done"]),
            Duration::from_millis(300),
            None,
        )
        .await?;
    assert!(stage.timed_out());
    assert_eq!(stage.stdout, "before\n");
    Ok(())
}

#[tokio::test]
async fn test_sandbox_kills_process_group() -> Result<()> {
    let (_base, sandbox) = new_sandbox(4096).await?;
    let sh = tool("sh");
    let stage = sandbox
        .run(
            spec(&sh, &["-c", "sleep 30 & echo $!; wait"]),
            Duration::from_millis(300),
            None,
        )
        .await?;
    assert!(stage.timed_out());

    let pid: u32 = stage.stdout.trim().parse().expect("background pid");
    let deadline = Instant::now() + Duration::from_secs(5);
    while is_running(pid) {
        assert!(
            Instant::now() < deadline,
            "background process survived the timeout"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

/// Zombies count as gone: they are waiting for a parent outside the sandbox.
fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .map_or(false, |state| state != 'Z' && state != 'X'),
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_sandbox_output_is_truncated() -> Result<()> {
    let (_base, sandbox) = new_sandbox(16).await?;
    let sh = tool("sh");
    let stage = sandbox
        .run(
            spec(&sh, &["-c", "i=0; while [ $i -lt 100 ]; do echo line$i; i=$((i+1)); done"]),
            Duration::from_secs(5),
            None,
        )
        .await?;
    assert_eq!(stage.exit_code, Some(0));
    assert!(stage.stdout.starts_with("line0\nline1\n"));
    assert!(stage.stdout.contains("[output truncated after 16 bytes]"));
    Ok(())
}

#[tokio::test]
async fn test_sandbox_timeout_reports_budget() -> Result<()> {
    let (_base, sandbox) = new_sandbox(4096).await?;
    let sleep = tool("sleep");
    let mut process = spec(&sleep, &["10"]);
    process.budget_ms = Some(60_000);

    let stage = sandbox
        .run(process, Duration::from_millis(100), None)
        .await?;
    assert!(stage.timed_out());
    assert!(stage.stderr.contains("execution timed out after 60000 ms"));
    Ok(())
}

#[tokio::test]
async fn test_sandbox_environment_is_cleared() -> Result<()> {
    std::env::set_var("CODE_EXEC_TEST_SECRET", "leaked");
    let (_base, sandbox) = new_sandbox(4096).await?;
    let sh = tool("sh");

    let mut process = spec(&sh, &["-c", "echo \"[$CODE_EXEC_TEST_SECRET][$GREETING]\""]);
    process.env = vec![("GREETING".to_string(), "hi".to_string())];
    let stage = sandbox.run(process, Duration::from_secs(5), None).await?;
    assert_eq!(stage.stdout.trim(), "[][hi]");
    Ok(())
}

#[tokio::test]
async fn test_sandbox_working_dir() -> Result<()> {
    let (_base, sandbox) = new_sandbox(4096).await?;
    sandbox.write_file("sub/data.txt", b"payload").await?;
    let cat = tool("cat");

    let mut process = spec(&cat, &["data.txt"]);
    process.working_dir = Some("sub");
    let stage = sandbox.run(process, Duration::from_secs(5), None).await?;
    assert_eq!(stage.stdout, "payload");
    Ok(())
}

#[tokio::test]
async fn test_sandbox_streams_chunks() -> Result<()> {
    let (_base, sandbox) = new_sandbox(4096).await?;
    let echo = tool("echo");
    let (tx, mut rx) = mpsc::channel(16);

    let stage = sandbox
        .run(spec(&echo, &["streamed"]), Duration::from_secs(5), Some(&tx))
        .await?;
    drop(tx);

    let mut streamed = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            ExecEvent::StdoutChunk(bytes) => streamed.extend(bytes),
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(String::from_utf8(streamed).unwrap(), stage.stdout);
    Ok(())
}

#[tokio::test]
async fn test_sandbox_spawn_failure_is_host_internal() -> Result<()> {
    let (_base, sandbox) = new_sandbox(4096).await?;
    let missing = PathBuf::from("/nonexistent/interpreter");
    let err = sandbox
        .run(spec(&missing, &[]), Duration::from_secs(1), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::HostInternal);
    Ok(())
}
