use async_trait::async_trait;

use crate::error::Error;
use crate::stream::ExecStream;
use crate::types::{ExecResult, RunRequest};

/// Entry points a host calls for each supported language.
#[async_trait]
pub trait Guest: Send + Sync {
    /// Runs a self-contained request and returns its result.
    ///
    /// Failures of the program itself are part of the result; `Err` means the
    /// request could not be executed.
    async fn run(&self, request: RunRequest) -> Result<ExecResult, Error>;

    /// Like [`Guest::run`], but reports output as it is produced.
    async fn run_streaming(&self, request: RunRequest) -> Result<ExecStream, Error>;
}
