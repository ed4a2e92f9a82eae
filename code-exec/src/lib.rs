//! # Code Execution Service
//!
//! Runs untrusted Python, JavaScript and Rust programs in per-call sandboxes
//! under a wall-clock budget, and reports what they did as a structured
//! compile/run result. Programs can be run one-shot or against the files of
//! a named session.

mod config;
mod encoding;
mod error;
mod executor;
mod guest;
mod languages;
mod limits;
mod sandbox;
mod service;
mod session;
mod stream;
mod types;

#[cfg(test)]
mod tests;

pub use config::{env_vars, ExecConfig, ToolchainConfig, DEFAULT_TIME_MS};
pub use encoding::{decode_entry_text, decode_file, normalize_file_name, validate_file_name};
pub use error::{Error, ErrorKind, ErrorResponse};
pub use executor::{
    Backend, Engine, ExecutionEngine, ExecutionResult, LanguageExecutor, StageCommand,
};
pub use guest::Guest;
pub use languages::{JavaScriptExecutor, PythonExecutor, RustExecutor};
pub use limits::ResourceLimiter;
pub use sandbox::{ProcessSpec, Sandbox};
pub use service::CodeExecutionService;
pub use session::{Session, SessionGuard, SessionInfo, SessionManager};
pub use stream::ExecStream;
pub use types::{
    Encoding, ExecEvent, ExecResult, ExecutionStatus, File, Language, Limits, Program,
    RunRequest, SessionRunRequest, StageResult, TIMEOUT_EXIT_CODE, TIMEOUT_SIGNAL,
};

/// Result type for code execution operations
pub type Result<T> = std::result::Result<T, Error>;
