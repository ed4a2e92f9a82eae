use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, instrument};

use crate::{
    config::ExecConfig,
    encoding::{decode_entry_text, decode_file, normalize_file_name},
    error::Error,
    executor::{Engine, ExecutionEngine},
    guest::Guest,
    limits::ResourceLimiter,
    session::{conflicting_path, SessionManager},
    stream::ExecStream,
    types::{ExecEvent, ExecResult, Language, Limits, Program, RunRequest, SessionRunRequest},
};

/// A validated request, ready to run.
struct Prepared {
    engine: Engine,
    program: Program,
    limiter: ResourceLimiter,
}

/// The execution boundary: stateless runs, sessions and session runs.
#[derive(Clone)]
pub struct CodeExecutionService {
    config: Arc<ExecConfig>,
    sessions: SessionManager,
    semaphore: Arc<Semaphore>,
}

impl CodeExecutionService {
    pub fn new(config: ExecConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            sessions: SessionManager::new(&config),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_executions)),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn get_available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Runs against a snapshot of the session's files, in its language and working directory.
    #[instrument(skip(self, request))]
    pub async fn run_session(
        &self,
        session_id: &str,
        request: SessionRunRequest,
    ) -> Result<ExecResult, Error> {
        let prepared = self.prepare_session(session_id, request).await?;
        let result = self.execute(prepared, None).await;
        log_outcome(&result);
        result
    }

    #[instrument(skip(self, request))]
    pub async fn run_session_streaming(
        &self,
        session_id: &str,
        request: SessionRunRequest,
    ) -> Result<ExecStream, Error> {
        let prepared = self.prepare_session(session_id, request).await?;
        Ok(self.stream(prepared))
    }

    async fn prepare_session(
        &self,
        session_id: &str,
        request: SessionRunRequest,
    ) -> Result<Prepared, Error> {
        let session = self.sessions.get(session_id).await?;
        let program = Program {
            entrypoint: String::new(),
            files: session
                .files()
                .iter()
                .map(|(name, content)| (name.clone(), content.clone()))
                .collect(),
            stdin: request.stdin,
            args: request.args,
            env: request.env,
            working_dir: session.working_dir().map(str::to_string),
        };
        self.prepare(
            session.language,
            program,
            request.entrypoint,
            request.limits.as_ref(),
        )
    }

    fn prepare_request(&self, request: RunRequest) -> Result<Prepared, Error> {
        // Later files replace earlier ones of the same name.
        let mut files = BTreeMap::new();
        for file in &request.files {
            let name = normalize_file_name(&file.name)?;
            if let Some(existing) = conflicting_path(&files, &name) {
                return Err(Error::InvalidInput(format!(
                    "file '{}' conflicts with '{}'",
                    file.name, existing
                )));
            }
            let content = decode_file(file)?;
            if content.len() > self.config.max_file_size_bytes {
                return Err(Error::InvalidInput(format!(
                    "file '{}' is {} bytes, limit is {}",
                    file.name,
                    content.len(),
                    self.config.max_file_size_bytes
                )));
            }
            files.insert(name, content);
        }

        let program = Program {
            entrypoint: String::new(),
            files: files.into_iter().collect(),
            stdin: request.stdin,
            args: request.args,
            env: request.env,
            working_dir: None,
        };
        self.prepare(
            request.language,
            program,
            request.entrypoint,
            request.limits.as_ref(),
        )
    }

    fn prepare(
        &self,
        language: Language,
        mut program: Program,
        entrypoint: Option<String>,
        limits: Option<&Limits>,
    ) -> Result<Prepared, Error> {
        let limiter = ResourceLimiter::from_limits(limits, &self.config)?;

        let entrypoint = entrypoint
            .map(|entry| normalize_file_name(&entry))
            .transpose()?;
        program.entrypoint = resolve_entry(&program.files, entrypoint)?;
        if let Some((name, content)) = program
            .files
            .iter()
            .find(|(name, _)| *name == program.entrypoint)
        {
            decode_entry_text(name, content)?;
        }
        validate_env(&program.env)?;

        let engine = Engine::new(language, &self.config)?;
        debug!(%language, entry = %program.entrypoint, files = program.files.len(), "Request prepared");
        Ok(Prepared {
            engine,
            program,
            limiter,
        })
    }

    async fn execute(
        &self,
        prepared: Prepared,
        events: Option<&mpsc::Sender<ExecEvent>>,
    ) -> Result<ExecResult, Error> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| Error::HostInternal(format!("Failed to acquire execution permit: {}", e)))?;

        prepared
            .engine
            .execute_program(&prepared.program, &prepared.limiter, events)
            .await
            .map(ExecResult::from)
    }

    fn stream(&self, prepared: Prepared) -> ExecStream {
        let service = self.clone();
        ExecStream::spawn(move |tx| async move {
            let result = service.execute(prepared, Some(&tx)).await;
            log_outcome(&result);
            result
        })
    }
}

#[async_trait]
impl Guest for CodeExecutionService {
    #[instrument(skip_all, fields(language = %request.language))]
    async fn run(&self, request: RunRequest) -> Result<ExecResult, Error> {
        let prepared = self.prepare_request(request)?;
        let result = self.execute(prepared, None).await;
        log_outcome(&result);
        result
    }

    #[instrument(skip_all, fields(language = %request.language))]
    async fn run_streaming(&self, request: RunRequest) -> Result<ExecStream, Error> {
        let prepared = self.prepare_request(request)?;
        Ok(self.stream(prepared))
    }
}

fn log_outcome(result: &Result<ExecResult, Error>) {
    match result {
        Ok(result) => info!(
            exit_code = ?result.run.exit_code,
            time_ms = ?result.time_ms,
            "Code execution completed"
        ),
        Err(e) => error!("Code execution failed: {}", e),
    }
}

/// Picks the entry file: the only file, or the named one.
fn resolve_entry(
    files: &[(String, Vec<u8>)],
    entrypoint: Option<String>,
) -> Result<String, Error> {
    if files.is_empty() {
        return Err(Error::InvalidInput("no files to run".to_string()));
    }
    match entrypoint {
        Some(entry) if files.iter().any(|(name, _)| *name == entry) => Ok(entry),
        Some(entry) => Err(Error::file_not_found(&entry)),
        None if files.len() == 1 => Ok(files[0].0.clone()),
        None => Err(Error::InvalidInput(format!(
            "entrypoint is required when {} files are supplied",
            files.len()
        ))),
    }
}

fn validate_env(env: &[(String, String)]) -> Result<(), Error> {
    for (key, value) in env {
        if key.is_empty() || key.contains('=') || key.contains('\0') || value.contains('\0') {
            return Err(Error::InvalidInput(format!(
                "invalid environment variable '{}'",
                key.escape_default()
            )));
        }
    }
    Ok(())
}
