use std::sync::LazyLock;

use regex::Regex;

static VIDEO_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:youtube\.com/(?:[^/]+/.+/|(?:v|e(?:mbed)?|shorts)/|.*[?&]v=)|youtu\.be/)([^"&?/\s]{11})"#,
    )
    .expect("video id pattern is valid")
});

/// Pulls the 11-character video identifier out of a watch, embed, shorts or
/// short-link URL.
pub fn extract_video_id(url: &str) -> Option<&str> {
    VIDEO_ID_PATTERN
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str())
}
