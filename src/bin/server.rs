#![forbid(unsafe_code)]

//! HTTP front for the video library.
//!
//! Handlers are thin: every catalog call runs on the blocking pool because the
//! catalog lock may be held for the whole length of a download.

use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::{Arc, LazyLock},
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path as AxumPath, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use clipvault::{
    acquire::Gateway,
    catalog::{Catalog, CatalogReport, DeleteOutcome},
    config::{RuntimeConfig, RuntimeOverrides, resolve_runtime_config},
    cookies::{CookieFileStatus, cookie_status},
    error::LibraryError,
    library::{MetadataStore, VideoRecord},
    security::ensure_not_root,
    ytdlp::YtDlp,
};
use mime_guess::MimeGuess;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

static YOUTUBE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtu\.be/|youtube\.com/(?:embed/|v/|watch\?v=|watch\?.+&v=))([^&?/]+)")
        .unwrap_or_else(|err| panic!("invalid YouTube id pattern: {err}"))
});

#[derive(Debug, Parser)]
#[command(name = "clipvault", about = "Serve and grow a local video library")]
struct ServerArgs {
    /// Directory holding `downloads/` and `videos.json`.
    #[arg(long)]
    media_root: Option<PathBuf>,
    /// Static front-end files.
    #[arg(long)]
    www_root: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    host: Option<IpAddr>,
    /// Alternate `.env` file to read configuration from.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl ServerArgs {
    fn into_config(self) -> Result<(RuntimeConfig, IpAddr)> {
        let config = resolve_runtime_config(RuntimeOverrides {
            media_root: self.media_root,
            www_root: self.www_root,
            port: self.port,
            host: self.host.map(|host| host.to_string()),
            env_path: self.env_file,
        })?;
        let host = config
            .host
            .parse::<IpAddr>()
            .context("expected a valid IPv4 or IPv6 address for --host/CLIPVAULT_HOST")?;
        Ok((config, host))
    }
}

#[derive(Clone)]
struct AppState {
    catalog: Arc<Catalog>,
    gateway: Gateway,
    ytdlp: Arc<YtDlp>,
    www_root: Arc<PathBuf>,
    cookies_dir: Arc<PathBuf>,
}

impl AppState {
    fn new(config: &RuntimeConfig) -> Result<Self> {
        let catalog = Catalog::open(
            MetadataStore::new(config.metadata_path()),
            config.storage_dir(),
        )?;
        let ytdlp = Arc::new(
            YtDlp::new(&config.ytdlp_program)
                .with_cookies_dir(&config.cookies_dir)
                .with_timeout(config.acquire_timeout),
        );
        Ok(Self {
            catalog: Arc::new(catalog),
            gateway: Gateway::new(ytdlp.clone()),
            ytdlp,
            www_root: Arc::new(config.www_root.clone()),
            cookies_dir: Arc::new(config.cookies_dir.clone()),
        })
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        if err.is_not_found() {
            Self::not_found(err.to_string())
        } else {
            error!("request failed: {err}");
            Self::internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Runs catalog work off the async reactor.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::internal(format!("worker task failed: {err}")))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config, host) = ServerArgs::parse().into_config()?;
    ensure_not_root("clipvault")?;

    let state = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || AppState::new(&config))
            .await
            .context("opening video catalog")??
    };
    let probe = state.ytdlp.clone();
    match tokio::task::spawn_blocking(move || probe.version())
        .await
        .ok()
        .flatten()
    {
        Some(version) => info!(%version, "found {}", state.ytdlp.program().display()),
        None => warn!(
            "{} did not answer --version; downloads will fail until it is installed",
            state.ytdlp.program().display()
        ),
    }

    let app = router(state);
    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/download", post(download))
        .route("/delete/{id}", post(delete_video))
        .route("/videos", get(list_videos))
        .route("/video/{id}", get(get_video))
        .route("/watch/{id}", get(watch_video))
        .route("/embed/{id}", get(embed_video))
        .route("/debug", get(debug_info))
        .fallback(static_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {err}");
    }
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
struct DownloadResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl DownloadResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            video_id: None,
            title: None,
            kind: None,
        }
    }
}

async fn download(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<DownloadResponse>) {
    let Ok(request) = serde_json::from_slice::<DownloadRequest>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(DownloadResponse::failure("Invalid request data")),
        );
    };
    let Some(url) = request
        .url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(DownloadResponse::failure("No URL provided")),
        );
    };

    let AppState {
        catalog, gateway, ..
    } = state;
    let outcome = blocking(move || catalog.acquire(&gateway, &url)).await;
    match outcome {
        Ok(Ok(record)) => (
            StatusCode::OK,
            Json(DownloadResponse {
                success: true,
                message: "Video downloaded successfully!".to_string(),
                video_id: Some(record.id),
                title: Some(record.title),
                kind: None,
            }),
        ),
        Ok(Err(LibraryError::Acquisition(failure))) => (
            StatusCode::OK,
            Json(DownloadResponse {
                kind: Some(failure.kind.as_str()),
                ..DownloadResponse::failure(failure.user_message())
            }),
        ),
        Ok(Err(err)) => {
            error!("download could not be registered: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DownloadResponse::failure(format!("Server error: {err}"))),
            )
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(DownloadResponse::failure(format!("Server error: {}", err.message))),
        ),
    }
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    success: bool,
    message: String,
}

async fn delete_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> (StatusCode, Json<DeleteResponse>) {
    let catalog = state.catalog;
    let outcome = blocking(move || catalog.delete(&id)).await;
    let (status, success, message) = match outcome {
        Ok(Ok(DeleteOutcome::FileRemoved | DeleteOutcome::FileAlreadyMissing)) => {
            (StatusCode::OK, true, "Video deleted successfully".to_string())
        }
        Ok(Ok(DeleteOutcome::FileRemovalFailed)) => (
            StatusCode::OK,
            true,
            "Video removed from library; its file could not be deleted".to_string(),
        ),
        Ok(Err(err)) if err.is_not_found() => {
            (StatusCode::NOT_FOUND, false, "Video not found".to_string())
        }
        Ok(Err(err)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            false,
            format!("Error deleting video: {err}"),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            false,
            format!("Error deleting video: {}", err.message),
        ),
    };
    (status, Json(DeleteResponse { success, message }))
}

async fn list_videos(State(state): State<AppState>) -> (StatusCode, Json<Vec<VideoRecord>>) {
    let catalog = state.catalog;
    match blocking(move || catalog.list()).await {
        Ok(Ok(records)) => (StatusCode::OK, Json(records)),
        Ok(Err(err)) => {
            error!("error listing videos: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Vec::new()))
        }
        Err(err) => {
            error!("error listing videos: {}", err.message);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Vec::new()))
        }
    }
}

async fn get_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<VideoRecord>> {
    let catalog = state.catalog;
    let record = blocking(move || catalog.get(&id)).await??;
    Ok(Json(record))
}

async fn watch_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Response> {
    let catalog = state.catalog;
    let path = blocking(move || catalog.media_path(&id)).await??;
    stream_file(path).await
}

#[derive(Debug, Serialize)]
struct EmbedPayload {
    video: VideoRecord,
    youtube_id: Option<String>,
}

async fn embed_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<EmbedPayload>> {
    let catalog = state.catalog;
    let video = blocking(move || catalog.get(&id)).await??;
    let youtube_id = youtube_id(&video.source_url);
    Ok(Json(EmbedPayload { video, youtube_id }))
}

/// Extracts the video id from the usual YouTube URL shapes.
fn youtube_id(url: &str) -> Option<String> {
    YOUTUBE_ID
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

#[derive(Debug, Serialize)]
struct DirectoryStatus {
    path: PathBuf,
    exists: bool,
    readable: bool,
    writable: bool,
}

impl DirectoryStatus {
    fn probe(path: &Path) -> Self {
        let exists = path.is_dir();
        Self {
            path: path.to_path_buf(),
            exists,
            readable: exists && fs::read_dir(path).is_ok(),
            writable: exists && tempfile::tempfile_in(path).is_ok(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DebugReport {
    storage: DirectoryStatus,
    www_root: DirectoryStatus,
    cookies_dir: PathBuf,
    files_in_storage: Vec<String>,
    #[serde(flatten)]
    catalog: CatalogReport,
    cookie_files: Vec<CookieFileStatus>,
    ytdlp_program: PathBuf,
    ytdlp_version: Option<String>,
}

fn collect_debug_report(state: &AppState) -> DebugReport {
    let storage_dir = state.catalog.storage_dir();
    let mut files_in_storage: Vec<String> = fs::read_dir(storage_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    files_in_storage.sort();

    DebugReport {
        storage: DirectoryStatus::probe(storage_dir),
        www_root: DirectoryStatus::probe(&state.www_root),
        cookies_dir: state.cookies_dir.to_path_buf(),
        files_in_storage,
        catalog: state.catalog.report(),
        cookie_files: cookie_status(&state.cookies_dir),
        ytdlp_program: state.ytdlp.program().to_path_buf(),
        ytdlp_version: state.ytdlp.version(),
    }
}

async fn debug_info(State(state): State<AppState>) -> ApiResult<Json<DebugReport>> {
    let report = blocking(move || collect_debug_report(&state)).await?;
    Ok(Json(report))
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    match serve_www_path(&state.www_root, req.uri().path()).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(root.join("index.html")).await,
        Ok(_) => stream_file(target).await,
        Err(_) if should_fallback_to_index(request_path) => {
            stream_file(root.join("index.html")).await
        }
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Extension-less paths are front-end routes and get `index.html`.
fn should_fallback_to_index(request_path: &str) -> bool {
    Path::new(request_path.trim_start_matches('/'))
        .extension()
        .is_none()
}

/// Streams a whole file. Range requests are not honoured.
async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?
        .len();

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}
