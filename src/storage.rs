use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tracing::{info, warn};
use uuid::Uuid;

/// Files older than this are removed by the cleanup endpoint.
pub const FILE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// URL prefix the downloads directory is served under.
pub const DOWNLOADS_ROUTE: &str = "/downloads";

/// `{videoId}_{quality}_{timestampMillis}_{jobId}`; the job id keeps it unique.
pub fn download_stem(video_id: &str, quality: &str, timestamp_millis: i64, job_id: Uuid) -> String {
    format!("{video_id}_{quality}_{timestamp_millis}_{}", job_id.simple())
}

/// yt-dlp output template for `stem`. Literal `%` in the stem is doubled so
/// yt-dlp writes it verbatim instead of expanding it as a field.
pub fn output_template(downloads_dir: &Path, stem: &str) -> String {
    let escaped_stem = stem.replace('%', "%%");
    downloads_dir
        .join(format!("{escaped_stem}.%(ext)s"))
        .to_string_lossy()
        .into_owned()
}

pub fn download_url(filename: &str) -> String {
    format!("{DOWNLOADS_ROUTE}/{}", urlencoding::encode(filename))
}

/// Finds the file a download produced: the path the extractor printed if it
/// lies inside `downloads_dir`, otherwise the single entry named `<stem>.*`.
pub async fn resolve_downloaded_file(
    downloads_dir: &Path,
    stem: &str,
    printed_path: Option<&str>,
) -> io::Result<Option<PathBuf>> {
    let canonical_dir = tokio::fs::canonicalize(downloads_dir).await?;

    if let Some(path_value) = printed_path
        && let Some(path) = resolve_candidate(&canonical_dir, Path::new(path_value)).await?
    {
        return Ok(Some(path));
    }

    let prefix = format!("{stem}.");
    let mut entries = tokio::fs::read_dir(downloads_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(&prefix) || name.ends_with(".part") {
            continue;
        }

        if let Some(path) = resolve_candidate(&canonical_dir, &entry.path()).await? {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

async fn resolve_candidate(canonical_dir: &Path, candidate: &Path) -> io::Result<Option<PathBuf>> {
    let metadata = match tokio::fs::metadata(candidate).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical_candidate = tokio::fs::canonicalize(candidate).await?;
    if !canonical_candidate.starts_with(canonical_dir) {
        warn!(
            "Ignoring file outside the downloads directory: {:?}",
            canonical_candidate
        );
        return Ok(None);
    }

    Ok(Some(canonical_candidate))
}

/// Deletes regular files whose modification time is more than `max_age`
/// before `now`. The first I/O error aborts the sweep.
pub async fn sweep_expired(dir: &Path, now: SystemTime, max_age: Duration) -> io::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut deleted = 0;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        let age = now
            .duration_since(metadata.modified()?)
            .unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }

        let path = entry.path();
        tokio::fs::remove_file(&path).await?;
        info!("Removed expired download {:?}", path);
        deleted += 1;
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str, modified: SystemTime) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(modified).unwrap();
        path
    }

    #[test]
    fn stem_embeds_video_id_and_quality() {
        let job_id = Uuid::new_v4();
        let stem = download_stem("dQw4w9WgXcQ", "720p", 1_700_000_000_000, job_id);

        assert!(stem.starts_with("dQw4w9WgXcQ_720p_1700000000000_"));
        assert!(stem.ends_with(&job_id.simple().to_string()));
    }

    #[test]
    fn template_and_url_shapes() {
        let template = output_template(Path::new("/srv/downloads"), "abc_720p_1_x");
        assert_eq!(template, "/srv/downloads/abc_720p_1_x.%(ext)s");
        assert_eq!(download_url("a b.mp4"), "/downloads/a%20b.mp4");
    }

    #[test]
    fn template_escapes_percent_in_stem() {
        let stem = download_stem("%(title)s12", "720p", 1, Uuid::nil());
        let template = output_template(Path::new("/srv/downloads"), &stem);

        assert!(!template.contains("/%(title)s"));
        assert!(template.starts_with("/srv/downloads/%%(title)s12_720p_1_"));
        assert!(template.ends_with(".%(ext)s"));
    }

    #[tokio::test]
    async fn sweep_deletes_only_files_past_retention() {
        let dir = tempdir().unwrap();
        let now = SystemTime::now();
        let fresh = touch(dir.path(), "fresh.mp4", now - Duration::from_secs(23 * 3600));
        let stale = touch(dir.path(), "stale.mp4", now - Duration::from_secs(25 * 3600));

        let deleted = sweep_expired(dir.path(), now, FILE_RETENTION).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(fresh.exists());
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn sweep_skips_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let later = SystemTime::now() + Duration::from_secs(48 * 3600);
        let deleted = sweep_expired(dir.path(), later, FILE_RETENTION).await.unwrap();

        assert_eq!(deleted, 0);
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn sweep_of_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("gone");

        assert!(sweep_expired(&missing, SystemTime::now(), FILE_RETENTION).await.is_err());
    }

    #[tokio::test]
    async fn resolves_printed_path_inside_directory() {
        let dir = tempdir().unwrap();
        let path = touch(dir.path(), "abc_720p_1_x.mp4", SystemTime::now());

        let resolved = resolve_downloaded_file(dir.path(), "abc_720p_1_x", path.to_str())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.file_name().unwrap(), "abc_720p_1_x.mp4");
    }

    #[tokio::test]
    async fn falls_back_to_stem_and_ignores_other_jobs() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "abc_720p_1_other.mp4", SystemTime::now());
        touch(dir.path(), "abc_720p_1_mine.mp4.part", SystemTime::now());
        touch(dir.path(), "abc_720p_1_mine.mp4", SystemTime::now());

        let resolved = resolve_downloaded_file(dir.path(), "abc_720p_1_mine", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.file_name().unwrap(), "abc_720p_1_mine.mp4");

        let missing = resolve_downloaded_file(dir.path(), "abc_720p_2_none", None)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn rejects_printed_path_outside_directory() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let foreign = touch(outside.path(), "abc_720p_1_x.mp4", SystemTime::now());

        let resolved = resolve_downloaded_file(dir.path(), "abc_720p_1_x", foreign.to_str())
            .await
            .unwrap();

        assert!(resolved.is_none());
    }
}
