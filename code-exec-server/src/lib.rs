use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use code_exec::{
    CodeExecutionService, Encoding, ErrorKind, ErrorResponse, ExecEvent, ExecResult, ExecStream,
    File, Guest, Language, Limits, RunRequest, SessionInfo, SessionRunRequest,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, convert::Infallible, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Execution(#[from] code_exec::Error),
    #[error("Server error: {0}")]
    Server(String),
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::LimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::HostInternal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::ConfigurationError
        | ErrorKind::DecodeError
        | ErrorKind::UnsupportedLanguage
        | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = match &self {
            ServerError::Execution(e) => ErrorResponse::from(e),
            ServerError::Server(_) => ErrorResponse {
                kind: ErrorKind::HostInternal,
                message: "Internal server error".to_string(),
            },
        };
        if body.kind == ErrorKind::HostInternal {
            error!("Request failed: {}", self);
        }
        (status_for(body.kind), Json(body)).into_response()
    }
}

/// A file as carried in JSON. Without an encoding the content is taken as text.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireFile {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub encoding: Option<Encoding>,
}

impl From<WireFile> for File {
    fn from(file: WireFile) -> Self {
        File {
            name: file.name,
            content: file.content.into_bytes(),
            encoding: file.encoding,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RunPayload {
    pub language: String,
    pub files: Vec<WireFile>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: Option<Limits>,
}

impl TryFrom<RunPayload> for RunRequest {
    type Error = code_exec::Error;

    fn try_from(payload: RunPayload) -> Result<Self, Self::Error> {
        Ok(RunRequest {
            language: payload.language.parse()?,
            files: payload.files.into_iter().map(File::from).collect(),
            entrypoint: payload.entrypoint,
            stdin: payload.stdin,
            args: payload.args,
            env: payload.env.into_iter().collect(),
            limits: payload.limits,
        })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SessionRunPayload {
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: Option<Limits>,
}

impl From<SessionRunPayload> for SessionRunRequest {
    fn from(payload: SessionRunPayload) -> Self {
        SessionRunRequest {
            entrypoint: payload.entrypoint,
            args: payload.args,
            stdin: payload.stdin,
            env: payload.env.into_iter().collect(),
            limits: payload.limits,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateSessionPayload {
    pub language: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SessionCreated {
    pub id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkingDirPayload {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FileListing {
    pub entries: Vec<String>,
}

/// One line of a streamed run. Output chunks are sent as (lossy) text.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    Stdout { data: String },
    Stderr { data: String },
    Finished { result: ExecResult },
    Failed { error: ErrorResponse },
}

impl From<ExecEvent> for WireEvent {
    fn from(event: ExecEvent) -> Self {
        match event {
            ExecEvent::StdoutChunk(bytes) => WireEvent::Stdout {
                data: String::from_utf8_lossy(&bytes).into_owned(),
            },
            ExecEvent::StderrChunk(bytes) => WireEvent::Stderr {
                data: String::from_utf8_lossy(&bytes).into_owned(),
            },
            ExecEvent::Finished(result) => WireEvent::Finished { result },
            ExecEvent::Failed(error) => WireEvent::Failed { error },
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    service: Arc<CodeExecutionService>,
}

pub fn create_app(service: CodeExecutionService) -> Router {
    let state = AppState {
        service: Arc::new(service),
    };

    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run))
        .route("/run/stream", post(run_stream))
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/files", put(upload_file).get(list_files))
        .route(
            "/sessions/:id/files/*name",
            get(download_file).delete(delete_file),
        )
        .route("/sessions/:id/working-dir", put(set_working_dir))
        .route("/sessions/:id/run", post(run_session))
        .route("/sessions/:id/run/stream", post(run_session_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting code execution server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Server(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::Server(e.to_string()))?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn run(
    State(state): State<AppState>,
    Json(payload): Json<RunPayload>,
) -> Result<Json<ExecResult>, ServerError> {
    let request = RunRequest::try_from(payload)?;
    Ok(Json(state.service.run(request).await?))
}

async fn run_stream(
    State(state): State<AppState>,
    Json(payload): Json<RunPayload>,
) -> Result<Response, ServerError> {
    let request = RunRequest::try_from(payload)?;
    let stream = state.service.run_streaming(request).await?;
    Ok(ndjson(stream))
}

fn ndjson(stream: ExecStream) -> Response {
    let lines = stream.map(|event| {
        let mut line = serde_json::to_vec(&WireEvent::from(event)).unwrap_or_default();
        line.push(b'\n');
        Ok::<_, Infallible>(line)
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response()
}

async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<(StatusCode, Json<SessionCreated>), ServerError> {
    let language: Language = payload.language.parse()?;
    let sessions = state.service.sessions();
    let id = match payload.id {
        Some(id) => {
            sessions.create(id.clone(), language)?;
            id
        }
        None => sessions.create_anonymous(language)?,
    };
    Ok((StatusCode::CREATED, Json(SessionCreated { id })))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.service.sessions().list().await)
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ServerError> {
    let session = state.service.sessions().get(&id).await?;
    Ok(Json(session.info()))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    state.service.sessions().remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(file): Json<WireFile>,
) -> Result<StatusCode, ServerError> {
    state.service.sessions().upload(&id, file.into()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<FileListing>, ServerError> {
    let dir = query.dir.unwrap_or_default();
    let entries = state.service.sessions().list_files(&id, &dir).await?;
    Ok(Json(FileListing { entries }))
}

async fn download_file(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    let content = state.service.sessions().download(&id, &name).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], content).into_response())
}

async fn delete_file(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<StatusCode, ServerError> {
    state.service.sessions().remove_file(&id, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_working_dir(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<WorkingDirPayload>,
) -> Result<StatusCode, ServerError> {
    state
        .service
        .sessions()
        .set_working_dir(&id, &payload.path)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SessionRunPayload>,
) -> Result<Json<ExecResult>, ServerError> {
    let result = state.service.run_session(&id, payload.into()).await?;
    Ok(Json(result))
}

async fn run_session_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SessionRunPayload>,
) -> Result<Response, ServerError> {
    let stream = state
        .service
        .run_session_streaming(&id, payload.into())
        .await?;
    Ok(ndjson(stream))
}
