use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ErrorResponse};

/// Exit code reported for a stage that was killed at its time budget.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Signal used to stop a stage that overran its time budget.
pub const TIMEOUT_SIGNAL: i32 = 9;

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    #[serde(alias = "js")]
    JavaScript,
    Rust,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Rust => "rust",
        }
    }

    /// Whether the language runs a distinct compile stage before running.
    pub fn has_compile_stage(&self) -> bool {
        matches!(self, Language::Rust)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::JavaScript),
            "rust" | "rs" => Ok(Language::Rust),
            _ => Err(Error::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Transport encoding of a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Utf8,
    Base64,
    Hex,
}

/// A named source or data file handed to an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub content: Vec<u8>,
    /// How `content` is encoded. `None` means raw bytes.
    #[serde(default)]
    pub encoding: Option<Encoding>,
}

impl File {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            encoding: None,
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }
}

/// Caller supplied resource ceilings for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Wall-clock budget. Falls back to the configured default when absent.
    #[serde(default)]
    pub time_ms: Option<u64>,
    /// Memory ceiling. Advisory: reported, not enforced by the engine.
    #[serde(default)]
    pub memory_bytes: Option<u64>,
}

impl Limits {
    pub fn time(time_ms: u64) -> Self {
        Self {
            time_ms: Some(time_ms),
            memory_bytes: None,
        }
    }
}

/// Captured output of one phase (compile or run) of an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl StageResult {
    /// A stage that never ran, e.g. the run stage after a failed compile.
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none()
    }

    /// Timed out stages carry both an exit code and a signal, which a
    /// normally terminated process never does.
    pub fn timed_out(&self) -> bool {
        self.exit_code == Some(TIMEOUT_EXIT_CODE) && self.signal == Some(TIMEOUT_SIGNAL)
    }
}

/// Result of an invocation: an optional compile stage and the run stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    #[serde(default)]
    pub compile: Option<StageResult>,
    pub run: StageResult,
    #[serde(default)]
    pub time_ms: Option<u64>,
    #[serde(default)]
    pub memory_bytes: Option<u64>,
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
    CompilationError,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::CompilationError => "compilation_error",
        };
        f.write_str(s)
    }
}

/// Events produced by a streaming execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ExecEvent {
    StdoutChunk(Vec<u8>),
    StderrChunk(Vec<u8>),
    Finished(ExecResult),
    Failed(ErrorResponse),
}

impl ExecEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecEvent::Finished(_) | ExecEvent::Failed(_))
    }
}

/// Stateless invocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub language: Language,
    pub files: Vec<File>,
    /// Entry file name. Required when more than one file is supplied.
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub limits: Option<Limits>,
}

impl RunRequest {
    /// Single-file request with no input, arguments or limits.
    pub fn new(language: Language, file: File) -> Self {
        Self {
            language,
            files: vec![file],
            entrypoint: None,
            stdin: None,
            args: Vec::new(),
            env: Vec::new(),
            limits: None,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// Run against the files stored in a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRunRequest {
    /// Entry file name. Required when the session holds more than one file.
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub limits: Option<Limits>,
}

impl SessionRunRequest {
    pub fn entry(entrypoint: impl Into<String>) -> Self {
        Self {
            entrypoint: Some(entrypoint.into()),
            ..Default::default()
        }
    }
}

/// Everything an execution needs besides the language and the budget.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub entrypoint: String,
    /// Decoded files, written into the sandbox under their names.
    pub files: Vec<(String, Vec<u8>)>,
    pub stdin: Option<String>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Process working directory, relative to the sandbox root.
    pub working_dir: Option<String>,
}

impl Program {
    pub fn from_source(entrypoint: impl Into<String>, code: &str) -> Self {
        let entrypoint = entrypoint.into();
        Self {
            files: vec![(entrypoint.clone(), code.as_bytes().to_vec())],
            entrypoint,
            ..Default::default()
        }
    }
}
