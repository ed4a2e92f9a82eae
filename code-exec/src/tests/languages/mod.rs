use super::utils::{defaults::*, requests::*};
use crate::{Error, ExecResult, Guest, Language, Result};
use std::time::Instant;
use tokio::time::Duration;

pub mod javascript;
pub mod python;
pub mod rust;

// Common test utilities for language tests
pub(crate) async fn test_language_execution(language: Language, code: &str) -> Result<()> {
    let service = test_service();
    let request = single_file(language, code).with_limits(extended_limits());

    let result = service.run(request).await?;
    assert!(result.run.stdout.contains("Hello from"));
    assert!(result.run.stderr.is_empty());
    assert_eq!(result.run.exit_code, Some(0));
    Ok(())
}

/// Runs a program that fails and checks the failure is reported in the result.
pub(crate) async fn test_language_fault(language: Language, code: &str) -> Result<ExecResult> {
    let service = test_service();
    let request = single_file(language, code).with_limits(extended_limits());

    let result = service.run(request).await?;
    assert_ne!(result.run.exit_code, Some(0));
    assert!(
        result.run.stderr.contains("boom"),
        "stderr: {}",
        result.run.stderr
    );
    Ok(result)
}

/// Runs a program that never finishes within `time_ms`.
///
/// Compiled languages may exhaust the budget while compiling, which is
/// reported as an error instead of a timed out run.
pub(crate) async fn test_language_timeout(
    language: Language,
    code: &str,
    time_ms: u64,
) -> Result<()> {
    let service = test_service();
    let started = Instant::now();

    let result = service.run(with_time(language, code, time_ms)).await;
    assert!(started.elapsed() < Duration::from_millis(time_ms) + timeout_overhead());

    match result {
        Ok(result) => {
            assert!(result.run.timed_out(), "run: {:?}", result.run);
            let marker = format!("execution timed out after {} ms", time_ms);
            assert!(result.run.stderr.contains(&marker), "stderr: {}", result.run.stderr);
        }
        Err(Error::Timeout(_)) if language.has_compile_stage() => {}
        Err(e) => return Err(e),
    }
    Ok(())
}
