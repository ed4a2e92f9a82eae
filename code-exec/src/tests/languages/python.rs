use super::*;
use crate::languages::skip_if_not_available;
use crate::tests::fixtures::{code_samples::PYTHON_HELLO, faults::*, test_scenarios::*};
use crate::{
    executor::{Engine, ExecutionEngine},
    ExecutionStatus, File, ResourceLimiter, RunRequest,
};

fn python_missing() -> bool {
    skip_if_not_available(&["python3"])
}

#[tokio::test]
async fn test_python_basic() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    test_language_execution(Language::Python, PYTHON_HELLO).await
}

#[tokio::test]
async fn test_python_exception() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let result = test_language_fault(Language::Python, PYTHON_RAISE).await?;
    assert!(result.run.stderr.contains("Exception"));
    assert!(result.compile.is_none());
    Ok(())
}

#[tokio::test]
async fn test_python_syntax_error_is_a_result() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let result = test_service()
        .run(single_file(Language::Python, PYTHON_SYNTAX_ERROR))
        .await?;
    assert_ne!(result.run.exit_code, Some(0));
    assert!(result.run.stderr.contains("SyntaxError"));
    Ok(())
}

#[tokio::test]
async fn test_python_exit_code() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let result = test_service()
        .run(single_file(Language::Python, PYTHON_EXIT_CODE))
        .await?;
    assert_eq!(result.run.exit_code, Some(3));
    assert!(result.run.stderr.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_python_timeout() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    test_language_timeout(Language::Python, PYTHON_INFINITE_LOOP, 50).await
}

#[tokio::test]
async fn test_python_input() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let request = single_file(Language::Python, PYTHON_WITH_INPUT).with_stdin("test user\n");
    let result = test_service().run(request).await?;
    assert!(result.run.stdout.contains("Hello, test user"));
    assert!(result.run.stderr.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_python_args_and_env() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let mut request = single_file(Language::Python, PYTHON_ARGS_AND_ENV);
    request.args = vec!["one".to_string(), "two".to_string()];
    request.env = vec![("GREETING".to_string(), "hola".to_string())];

    let result = test_service().run(request).await?;
    assert_eq!(result.run.stdout, "one two\nhola\n");
    Ok(())
}

#[tokio::test]
async fn test_python_multiple_files() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let mut request = RunRequest::new(
        Language::Python,
        File::new("main.py", PYTHON_MAIN_WITH_HELPER),
    );
    request.files.push(File::new("helper.py", PYTHON_HELPER));
    request.entrypoint = Some("main.py".to_string());

    let result = test_service().run(request).await?;
    assert_eq!(result.run.stdout.trim(), "Hello, session!");
    Ok(())
}

// Engine level tests
#[tokio::test]
async fn test_python_engine_execute() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let engine = Engine::new(Language::Python, &test_config())?;
    assert_eq!(engine.language(), Language::Python);
    assert_eq!(engine.default_entry(), "main.py");

    let result = engine.execute(PYTHON_MULTILINE).await?;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout().trim(), "Factorial of 5 is 120");
    Ok(())
}

#[tokio::test]
async fn test_python_engine_with_limits() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let engine = Engine::new(Language::Python, &test_config())?;
    let limiter = ResourceLimiter::with_time_ms(1000);

    let result = engine
        .execute_with_limits(PYTHON_PRINT_THEN_LOOP, &limiter)
        .await?;
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert_eq!(result.stdout(), "started\n");
    Ok(())
}
