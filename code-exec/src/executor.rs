use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    config::{ExecConfig, DEFAULT_TIME_MS},
    error::Error,
    languages::{JavaScriptExecutor, PythonExecutor, RustExecutor},
    limits::ResourceLimiter,
    sandbox::{ProcessSpec, Sandbox},
    types::{ExecEvent, ExecResult, ExecutionStatus, Language, Program, StageResult},
};

/// A program and its arguments, as one stage of an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Describes how a language is compiled and run.
pub trait LanguageExecutor: Send + Sync {
    fn language(&self) -> Language;

    /// Get the file extension for source files
    fn file_extension(&self) -> &str;

    /// Entry file name used for single-source execution.
    fn default_entry(&self) -> String {
        format!("main.{}", self.file_extension())
    }

    /// Resolved toolchain executable.
    fn tool(&self) -> &Path;

    /// Compile stage, for languages that have one.
    fn compile_command(&self, _sandbox: &Sandbox, _entry: &Path) -> Option<StageCommand> {
        None
    }

    /// Run stage. Caller arguments are appended.
    fn run_command(&self, sandbox: &Sandbox, entry: &Path) -> StageCommand;

    /// Environment the run stage starts with.
    fn env(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Environment of the compile stage. The caller's program never sees it.
    fn compile_env(&self) -> Vec<(String, String)> {
        self.env()
    }
}

/// Outcome of one execution, before it is reported at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub compile: Option<StageResult>,
    pub run: StageResult,
    pub status: ExecutionStatus,
    pub duration: Duration,
    pub memory_bytes: Option<u64>,
}

impl ExecutionResult {
    fn new(
        compile: Option<StageResult>,
        run: StageResult,
        duration: Duration,
        memory_bytes: Option<u64>,
    ) -> Self {
        let status = match &compile {
            Some(stage) if !stage.success() => ExecutionStatus::CompilationError,
            _ if run.timed_out() => ExecutionStatus::Timeout,
            _ if run.success() => ExecutionStatus::Success,
            _ => ExecutionStatus::Error,
        };
        Self {
            compile,
            run,
            status,
            duration,
            memory_bytes,
        }
    }

    pub fn stdout(&self) -> &str {
        &self.run.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.run.stderr
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.run.exit_code
    }

    pub fn signal(&self) -> Option<i32> {
        self.run.signal
    }
}

impl From<ExecutionResult> for ExecResult {
    fn from(result: ExecutionResult) -> Self {
        ExecResult {
            compile: result.compile,
            run: result.run,
            time_ms: Some(result.duration.as_millis() as u64),
            memory_bytes: result.memory_bytes,
        }
    }
}

/// Runs source code of one language.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn language(&self) -> Language;

    fn default_entry(&self) -> String;

    /// Runs `code` with the default time budget.
    async fn execute(&self, code: &str) -> Result<ExecutionResult, Error> {
        self.execute_with_limits(code, &ResourceLimiter::with_time_ms(DEFAULT_TIME_MS))
            .await
    }

    async fn execute_with_limits(
        &self,
        code: &str,
        limiter: &ResourceLimiter,
    ) -> Result<ExecutionResult, Error> {
        let program = Program::from_source(self.default_entry(), code);
        self.execute_program(&program, limiter, None).await
    }

    /// Runs a multi-file program. Output chunks go to `events` when given.
    async fn execute_program(
        &self,
        program: &Program,
        limiter: &ResourceLimiter,
        events: Option<&mpsc::Sender<ExecEvent>>,
    ) -> Result<ExecutionResult, Error>;
}

/// The supported backends.
pub enum Backend {
    Python(PythonExecutor),
    JavaScript(JavaScriptExecutor),
    Rust(RustExecutor),
}

impl Backend {
    fn executor(&self) -> &dyn LanguageExecutor {
        match self {
            Backend::Python(executor) => executor,
            Backend::JavaScript(executor) => executor,
            Backend::Rust(executor) => executor,
        }
    }
}

/// Execution engine for one language.
///
/// Holds no per-run state: every call builds and tears down its own sandbox.
pub struct Engine {
    backend: Backend,
    sandbox_root: PathBuf,
    max_output_bytes: usize,
}

impl Engine {
    /// Resolves the toolchain for `language`.
    pub fn new(language: Language, config: &ExecConfig) -> Result<Self, Error> {
        let toolchains = &config.toolchains;
        let backend = match language {
            Language::Python => Backend::Python(PythonExecutor::new(&toolchains.python)?),
            Language::JavaScript => {
                Backend::JavaScript(JavaScriptExecutor::new(&toolchains.node)?)
            }
            Language::Rust => Backend::Rust(RustExecutor::new(&toolchains.rustc)?),
        };
        Ok(Self {
            backend,
            sandbox_root: config.sandbox_root.clone(),
            max_output_bytes: config.max_output_bytes,
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }
}

#[async_trait]
impl ExecutionEngine for Engine {
    fn language(&self) -> Language {
        self.backend.executor().language()
    }

    fn default_entry(&self) -> String {
        self.backend.executor().default_entry()
    }

    async fn execute_program(
        &self,
        program: &Program,
        limiter: &ResourceLimiter,
        events: Option<&mpsc::Sender<ExecEvent>>,
    ) -> Result<ExecutionResult, Error> {
        let executor = self.backend.executor();
        let start = Instant::now();

        if !program.files.iter().any(|(name, _)| *name == program.entrypoint) {
            return Err(Error::file_not_found(&program.entrypoint));
        }

        let sandbox = Sandbox::new(&self.sandbox_root, self.max_output_bytes).await?;
        for (name, content) in &program.files {
            sandbox.write_file(name, content).await?;
        }
        let entry = sandbox.path(&program.entrypoint);

        debug!(
            sandbox = %sandbox.id(),
            language = %executor.language(),
            entry = %program.entrypoint,
            "Program materialized"
        );

        let compile = match executor.compile_command(&sandbox, &entry) {
            Some(command) => {
                limiter.check_timeout(start)?;
                let spec = ProcessSpec {
                    program: &command.program,
                    args: command.args,
                    env: executor.compile_env(),
                    stdin: None,
                    working_dir: None,
                    cpu_seconds: limiter.cpu_seconds(),
                    budget_ms: Some(limiter.time_budget_ms()),
                };
                let stage = sandbox.run(spec, limiter.remaining(start), None).await?;
                if stage.timed_out() {
                    return Err(Error::Timeout(limiter.time_budget_ms()));
                }
                Some(stage)
            }
            None => None,
        };

        let compile_exit = compile
            .as_ref()
            .filter(|stage| !stage.success())
            .map(|stage| stage.exit_code);
        if let Some(exit_code) = compile_exit {
            debug!(?exit_code, "Compilation failed, skipping run stage");
            let result = ExecutionResult::new(
                compile,
                StageResult::skipped(),
                start.elapsed(),
                limiter.memory_bytes(),
            );
            info!(language = %executor.language(), status = %result.status, "Execution finished");
            return Ok(result);
        }

        limiter.check_timeout(start)?;

        let command = executor.run_command(&sandbox, &entry);
        let mut args = command.args;
        args.extend(program.args.iter().cloned());
        let mut env = executor.env();
        env.extend(program.env.iter().cloned());

        let spec = ProcessSpec {
            program: &command.program,
            args,
            env,
            stdin: program.stdin.as_deref(),
            working_dir: program.working_dir.as_deref(),
            cpu_seconds: limiter.cpu_seconds(),
            budget_ms: Some(limiter.time_budget_ms()),
        };
        let run = sandbox.run(spec, limiter.remaining(start), events).await?;

        let result = ExecutionResult::new(compile, run, start.elapsed(), limiter.memory_bytes());
        info!(
            language = %executor.language(),
            status = %result.status,
            duration_ms = result.duration.as_millis() as u64,
            "Execution finished"
        );
        Ok(result)
    }
}
