use std::{io::ErrorKind, path::PathBuf, process::Output, process::Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    process::Command,
    time::{Duration, timeout},
};
use tracing::{debug, warn};

use crate::{error::ExtractorError, quality::QualityTier};

pub const METADATA_TIMEOUT_SECONDS: u64 = 30;
pub const DOWNLOAD_TIMEOUT_SECONDS: u64 = 300;
pub const PROBE_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Deserialize)]
pub struct YtDlpVideoInfo {
    pub id: String,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
    #[serde(default)]
    pub formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YtDlpFormat {
    pub format_id: String,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub height: Option<u32>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
}

/// Everything the extractor needs to fetch one file.
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub url: String,
    pub tier: QualityTier,
    /// Output template, e.g. `/srv/downloads/<stem>.%(ext)s`.
    pub output_template: String,
}

/// The seam between HTTP handlers and the external extraction tool.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Whether the tool can be executed at all.
    async fn probe(&self) -> bool;

    async fn fetch_metadata(&self, url: &str) -> Result<YtDlpVideoInfo, ExtractorError>;

    /// Runs the download and returns the path the tool reports having written,
    /// if it printed one.
    async fn download(&self, plan: &DownloadPlan) -> Result<Option<String>, ExtractorError>;
}

pub struct YtDlp {
    binary: PathBuf,
    probe_timeout: Duration,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECONDS),
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    async fn run(&self, args: Vec<String>, timeout_seconds: u64) -> Result<Output, ExtractorError> {
        debug!("Running {:?} {:?}", self.binary, args);

        let command_future = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = timeout(Duration::from_secs(timeout_seconds), command_future)
            .await
            .map_err(|_| ExtractorError::TimedOut(timeout_seconds))?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ExtractorError::Unavailable
                } else {
                    ExtractorError::Spawn(error)
                }
            })?;

        if !output.status.success() {
            let message = run_error_message(&output.stderr);
            warn!("yt-dlp exited with {}: {message}", output.status);
            return Err(ExtractorError::Failed(message));
        }

        Ok(output)
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn probe(&self) -> bool {
        let status_future = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match timeout(self.probe_timeout, status_future).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(
                    "{:?} --version did not answer within {:?}",
                    self.binary, self.probe_timeout
                );
                false
            }
        }
    }

    async fn fetch_metadata(&self, url: &str) -> Result<YtDlpVideoInfo, ExtractorError> {
        let output = self
            .run(metadata_args(url), METADATA_TIMEOUT_SECONDS)
            .await?;

        parse_video_info(&output.stdout)
    }

    async fn download(&self, plan: &DownloadPlan) -> Result<Option<String>, ExtractorError> {
        let output = self
            .run(download_args(plan), DOWNLOAD_TIMEOUT_SECONDS)
            .await?;

        Ok(extract_printed_path(&output.stdout))
    }
}

pub fn metadata_args(url: &str) -> Vec<String> {
    vec![
        "-j".to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        url.to_string(),
    ]
}

pub fn download_args(plan: &DownloadPlan) -> Vec<String> {
    vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--newline".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        "-f".to_string(),
        plan.tier.format_selector(),
        "-o".to_string(),
        plan.output_template.clone(),
        "--".to_string(),
        plan.url.clone(),
    ]
}

/// `-j` prints one JSON document per video; only the first line matters.
pub fn parse_video_info(stdout: &[u8]) -> Result<YtDlpVideoInfo, ExtractorError> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    Ok(serde_json::from_str(line)?)
}

fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string()
}

fn extract_printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::tier_for_height;

    const SAMPLE_INFO: &str = r#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","thumbnail":"https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg","duration":212,"uploader":"Rick Astley","view_count":1500000000,"formats":[{"format_id":"18","ext":"mp4","vcodec":"avc1.42001E","acodec":"mp4a.40.2","height":360,"filesize":11500000},{"format_id":"140","ext":"m4a","vcodec":"none","acodec":"mp4a.40.2","height":null}],"extra_field":true}"#;

    #[test]
    fn parses_single_line_metadata() {
        let stdout = format!("{SAMPLE_INFO}\n");
        let info = parse_video_info(stdout.as_bytes()).unwrap();

        assert_eq!(info.id, "dQw4w9WgXcQ");
        assert_eq!(info.title.as_deref(), Some("Never Gonna Give You Up"));
        assert_eq!(info.duration, Some(212.0));
        assert_eq!(info.view_count, Some(1_500_000_000));
        assert_eq!(info.formats.len(), 2);
        assert_eq!(info.formats[1].height, None);
    }

    #[test]
    fn missing_formats_default_to_empty() {
        let info = parse_video_info(br#"{"id":"abc"}"#).unwrap();
        assert!(info.formats.is_empty());
        assert!(info.title.is_none());
    }

    #[test]
    fn malformed_output_is_a_parse_error() {
        let result = parse_video_info(b"ERROR: not json at all");
        assert!(matches!(result, Err(ExtractorError::Parse(_))));

        let result = parse_video_info(b"");
        assert!(matches!(result, Err(ExtractorError::Parse(_))));
    }

    #[test]
    fn download_args_are_an_argument_vector() {
        let plan = DownloadPlan {
            url: "https://youtu.be/dQw4w9WgXcQ\"; rm -rf /".to_string(),
            tier: tier_for_height(720).unwrap(),
            output_template: "/tmp/downloads/x.%(ext)s".to_string(),
        };

        let args = download_args(&plan);

        assert_eq!(args.last(), Some(&plan.url));
        assert_eq!(args[args.len() - 2], "--");
        let selector_index = args.iter().position(|arg| arg == "-f").unwrap();
        assert_eq!(args[selector_index + 1], "best[height<=720][ext=mp4]");
        let output_index = args.iter().position(|arg| arg == "-o").unwrap();
        assert_eq!(args[output_index + 1], "/tmp/downloads/x.%(ext)s");
    }

    #[test]
    fn picks_last_non_empty_lines() {
        assert_eq!(
            run_error_message(b"WARNING: x\nERROR: Video unavailable\n\n"),
            "ERROR: Video unavailable"
        );
        assert_eq!(run_error_message(b""), "yt-dlp could not complete the operation");
        assert_eq!(
            extract_printed_path(b"[download] 100%\n/srv/downloads/a.mp4\n"),
            Some("/srv/downloads/a.mp4".to_string())
        );
        assert_eq!(extract_printed_path(b"\n  \n"), None);
    }

    #[tokio::test]
    async fn missing_binary_probes_unavailable() {
        let extractor = YtDlp::new("/nonexistent/definitely-not-yt-dlp");

        assert!(!extractor.probe().await);
        let result = extractor.fetch_metadata("https://youtu.be/dQw4w9WgXcQ").await;
        assert!(matches!(result, Err(ExtractorError::Unavailable)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_binary_reports_unavailable_after_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("yt-dlp");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let extractor = YtDlp::new(&script).with_probe_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();

        assert!(!extractor.probe().await);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
