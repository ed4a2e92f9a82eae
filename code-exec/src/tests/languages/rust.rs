use super::*;
use crate::languages::skip_if_not_available;
use crate::tests::fixtures::{
    code_samples::RUST_HELLO,
    faults::{RUST_COMPILE_ERROR, RUST_PANIC},
    test_scenarios::{RUST_WITH_INPUT, RUST_WITH_TIMEOUT},
};
use crate::StageResult;

fn rustc_missing() -> bool {
    skip_if_not_available(&["rustc"])
}

#[tokio::test]
async fn test_rust_basic() -> Result<()> {
    if rustc_missing() {
        return Ok(());
    }
    test_language_execution(Language::Rust, RUST_HELLO).await
}

#[tokio::test]
async fn test_rust_reports_compile_stage() -> Result<()> {
    if rustc_missing() {
        return Ok(());
    }
    let request = single_file(Language::Rust, RUST_HELLO).with_limits(extended_limits());
    let result = test_service().run(request).await?;

    let compile = result.compile.expect("rust has a compile stage");
    assert_eq!(compile.exit_code, Some(0));
    assert_eq!(result.run.stdout.trim(), "Hello from Rust!");
    Ok(())
}

#[tokio::test]
async fn test_rust_compile_error_is_a_result() -> Result<()> {
    if rustc_missing() {
        return Ok(());
    }
    let request = single_file(Language::Rust, RUST_COMPILE_ERROR).with_limits(extended_limits());
    let result = test_service().run(request).await?;

    let compile = result.compile.expect("rust has a compile stage");
    assert_ne!(compile.exit_code, Some(0));
    assert!(compile.stderr.contains("mismatched types"), "{}", compile.stderr);
    assert_eq!(result.run, StageResult::skipped());
    Ok(())
}

#[tokio::test]
async fn test_rust_panic() -> Result<()> {
    if rustc_missing() {
        return Ok(());
    }
    let result = test_language_fault(Language::Rust, RUST_PANIC).await?;
    assert_eq!(result.run.exit_code, Some(101));
    Ok(())
}

#[tokio::test]
async fn test_rust_input() -> Result<()> {
    if rustc_missing() {
        return Ok(());
    }
    let request = single_file(Language::Rust, RUST_WITH_INPUT)
        .with_limits(extended_limits())
        .with_stdin("1 2 3 4\n");
    let result = test_service().run(request).await?;
    assert_eq!(result.run.stdout.trim(), "sum=10");
    Ok(())
}

#[tokio::test]
async fn test_rust_timeout() -> Result<()> {
    if rustc_missing() {
        return Ok(());
    }
    test_language_timeout(Language::Rust, RUST_WITH_TIMEOUT, 4000).await
}

#[tokio::test]
async fn test_rust_budget_spent_while_compiling() -> Result<()> {
    if rustc_missing() {
        return Ok(());
    }
    let result = test_service()
        .run(with_time(Language::Rust, RUST_HELLO, 1))
        .await;
    assert!(
        matches!(result, Err(Error::Timeout(1))),
        "expected a timeout before the run stage, got {:?}",
        result
    );
    Ok(())
}
