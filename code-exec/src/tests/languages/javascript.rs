use super::*;
use crate::languages::skip_if_not_available;
use crate::tests::fixtures::{code_samples::JS_HELLO, faults::JS_THROW, test_scenarios::*};

fn node_missing() -> bool {
    skip_if_not_available(&["node"])
}

#[tokio::test]
async fn test_javascript_basic() -> Result<()> {
    if node_missing() {
        return Ok(());
    }
    test_language_execution(Language::JavaScript, JS_HELLO).await
}

#[tokio::test]
async fn test_javascript_throw() -> Result<()> {
    if node_missing() {
        return Ok(());
    }
    let result = test_language_fault(Language::JavaScript, JS_THROW).await?;
    assert!(result.run.stderr.contains("Error"));
    Ok(())
}

#[tokio::test]
async fn test_javascript_busy_loop_timeout() -> Result<()> {
    if node_missing() {
        return Ok(());
    }
    test_language_timeout(Language::JavaScript, JS_INFINITE_LOOP, 500).await
}

#[tokio::test]
async fn test_javascript_pending_timer_timeout() -> Result<()> {
    if node_missing() {
        return Ok(());
    }
    test_language_timeout(Language::JavaScript, JS_WITH_TIMEOUT, 1000).await
}
