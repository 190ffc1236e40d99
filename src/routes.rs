use std::{path::PathBuf, sync::Arc, time::SystemTime};

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::{ApiError, ExtractorError},
    extractor::{DownloadPlan, Extractor},
    jobs::{DownloadJob, JobRegistry, JobStatus},
    quality::{QualityOption, build_quality_options, parse_quality_token},
    storage::{self, DOWNLOADS_ROUTE, FILE_RETENTION},
    video_id::extract_video_id,
};

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<dyn Extractor>,
    pub jobs: JobRegistry,
    pub downloads_dir: PathBuf,
}

impl AppState {
    pub fn new(extractor: Arc<dyn Extractor>, downloads_dir: PathBuf) -> Self {
        Self {
            extractor,
            jobs: JobRegistry::new(),
            downloads_dir,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VideoInfoRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VideoInfoResponse {
    #[serde(rename = "videoId")]
    pub video_id: String,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
    pub qualities: Vec<QualityOption>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub download_url: String,
    pub filename: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: DownloadJob,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(rename = "ytDlp")]
    pub yt_dlp: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub success: bool,
    pub deleted_files: usize,
    pub message: String,
}

pub fn router(state: AppState) -> Router {
    let downloads = ServeDir::new(&state.downloads_dir);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/video-info", post(video_info))
        .route("/api/download", post(start_download))
        .route("/api/download/{job_id}", get(download_job))
        .route("/api/cleanup", delete(cleanup))
        .nest_service(DOWNLOADS_ROUTE, downloads)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let available = state.extractor.probe().await;

    Json(StatusResponse {
        status: "running",
        yt_dlp: if available { "available" } else { "unavailable" },
        message: if available {
            "The server is ready to use."
        } else {
            "Please install yt-dlp."
        },
    })
}

fn required_field(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

async fn ensure_extractor(state: &AppState) -> Result<(), ApiError> {
    if state.extractor.probe().await {
        Ok(())
    } else {
        error!("yt-dlp is not available on this host");
        Err(ApiError::extractor_unavailable())
    }
}

pub async fn video_info(
    State(state): State<AppState>,
    Json(payload): Json<VideoInfoRequest>,
) -> Result<Json<VideoInfoResponse>, ApiError> {
    let url = required_field(payload.url.as_deref())
        .ok_or_else(|| ApiError::bad_request("A video URL is required."))?;
    if extract_video_id(url).is_none() {
        return Err(ApiError::bad_request("The YouTube URL is not valid."));
    }

    ensure_extractor(&state).await?;

    let info = state.extractor.fetch_metadata(url).await.map_err(|error| {
        error!("Failed to fetch video information for {:?}: {error}", url);
        ApiError::from(error)
    })?;

    Ok(Json(VideoInfoResponse {
        qualities: build_quality_options(&info.formats),
        video_id: info.id,
        title: info.title,
        thumbnail: info.thumbnail,
        duration: info.duration,
        uploader: info.uploader,
        view_count: info.view_count,
    }))
}

pub async fn start_download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let (Some(url), Some(quality)) = (
        required_field(payload.url.as_deref()),
        required_field(payload.quality.as_deref()),
    ) else {
        return Err(ApiError::bad_request(
            "A video URL and a quality are both required.",
        ));
    };
    let video_id = extract_video_id(url)
        .ok_or_else(|| ApiError::bad_request("The YouTube URL is not valid."))?
        .to_string();
    let tier = parse_quality_token(quality)
        .ok_or_else(|| ApiError::bad_request("The requested quality is not supported."))?;

    ensure_extractor(&state).await?;

    let quality = tier.token();
    let job = state.jobs.create(&video_id, &quality).await;
    let stem = storage::download_stem(&video_id, &quality, Utc::now().timestamp_millis(), job.id);
    let plan = DownloadPlan {
        url: url.to_string(),
        tier,
        output_template: storage::output_template(&state.downloads_dir, &stem),
    };

    info!("Starting download {} of {video_id} at {quality}", job.id);

    // Detached so a client disconnect does not abort the extractor run.
    let task = tokio::spawn(run_download(state.clone(), job.id, stem, plan));
    let filename = task.await.map_err(|error| {
        error!("Download task {} panicked: {error}", job.id);
        ApiError::internal("Server error.")
    })??;

    Ok(Json(DownloadResponse {
        success: true,
        job_id: job.id,
        download_url: storage::download_url(&filename),
        filename,
        message: "The video was downloaded successfully.".to_string(),
    }))
}

async fn run_download(
    state: AppState,
    job_id: Uuid,
    stem: String,
    plan: DownloadPlan,
) -> Result<String, ApiError> {
    if let Err(error) = state.jobs.mark_running(job_id).await {
        warn!("Job {job_id} could not start: {error:?}");
        return Err(ApiError::internal("Server error."));
    }

    let printed_path = match state.extractor.download(&plan).await {
        Ok(printed_path) => printed_path,
        Err(error) => {
            error!("Download {job_id} failed: {error}");
            let status = match error {
                ExtractorError::TimedOut(_) => JobStatus::TimedOut,
                _ => JobStatus::Failed,
            };
            record_failure(&state, job_id, status, error.to_string()).await;
            return Err(ApiError::internal("Failed to download the video."));
        }
    };

    let resolved =
        storage::resolve_downloaded_file(&state.downloads_dir, &stem, printed_path.as_deref())
            .await
            .map_err(|error| {
                error!("Could not read the downloads directory: {error}");
                ApiError::internal("Could not access the downloaded files.")
            });
    let filename = match resolved {
        Ok(Some(path)) => path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string),
        Ok(None) => None,
        Err(error) => {
            record_failure(&state, job_id, JobStatus::Failed, error.message.clone()).await;
            return Err(error);
        }
    };

    let Some(filename) = filename else {
        warn!("Download {job_id} finished but no file named {stem}.* was found");
        record_failure(
            &state,
            job_id,
            JobStatus::Failed,
            "downloaded file not found".to_string(),
        )
        .await;
        return Err(ApiError::internal("The downloaded file could not be found."));
    };

    if let Err(error) = state.jobs.mark_succeeded(job_id, filename.clone()).await {
        warn!("Job {job_id} could not be marked as finished: {error:?}");
    }
    info!("Download {job_id} stored as {filename}");

    Ok(filename)
}

async fn record_failure(state: &AppState, job_id: Uuid, status: JobStatus, message: String) {
    if let Err(error) = state.jobs.mark_failed(job_id, status, message).await {
        warn!("Job {job_id} could not be marked as failed: {error:?}");
    }
}

pub async fn download_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id = Uuid::parse_str(job_id.trim())
        .map_err(|_| ApiError::not_found("Unknown download job."))?;
    let job = state
        .jobs
        .get(job_id)
        .await
        .ok_or_else(|| ApiError::not_found("Unknown download job."))?;

    Ok(Json(JobResponse {
        download_url: job.filename.as_deref().map(storage::download_url),
        job,
    }))
}

pub async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupResponse>, ApiError> {
    let deleted_files = storage::sweep_expired(&state.downloads_dir, SystemTime::now(), FILE_RETENTION)
        .await
        .map_err(|error| {
            error!("Cleanup of {:?} failed: {error}", state.downloads_dir);
            ApiError::internal("Failed to clean up files.")
        })?;

    let retention = chrono::Duration::from_std(FILE_RETENTION).unwrap_or(chrono::Duration::hours(24));
    let pruned_jobs = state.jobs.prune_finished(Utc::now(), retention).await;
    info!("Cleanup removed {deleted_files} file(s) and {pruned_jobs} finished job(s)");

    Ok(Json(CleanupResponse {
        success: true,
        deleted_files,
        message: format!("Deleted {deleted_files} old file(s)."),
    }))
}
