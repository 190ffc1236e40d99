use std::collections::HashSet;

use serde::Serialize;

use crate::extractor::YtDlpFormat;

/// One row of the static resolution table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityTier {
    pub height: u32,
    pub label: &'static str,
    pub priority: u8,
}

impl QualityTier {
    /// The `"720p"` style token clients send back when downloading.
    pub fn token(&self) -> String {
        format!("{}p", self.height)
    }

    /// yt-dlp selector for the best progressive mp4 at or below this height.
    pub fn format_selector(&self) -> String {
        format!("best[height<={}][ext=mp4]", self.height)
    }
}

pub const QUALITY_TIERS: [QualityTier; 8] = [
    QualityTier {
        height: 144,
        label: "Lowest quality (144p)",
        priority: 1,
    },
    QualityTier {
        height: 240,
        label: "Poor quality (240p)",
        priority: 2,
    },
    QualityTier {
        height: 360,
        label: "Low quality (360p)",
        priority: 3,
    },
    QualityTier {
        height: 480,
        label: "Medium quality (480p)",
        priority: 4,
    },
    QualityTier {
        height: 720,
        label: "HD (720p)",
        priority: 5,
    },
    QualityTier {
        height: 1080,
        label: "Full HD (1080p)",
        priority: 6,
    },
    QualityTier {
        height: 1440,
        label: "2K (1440p)",
        priority: 7,
    },
    QualityTier {
        height: 2160,
        label: "4K (2160p)",
        priority: 8,
    },
];

pub fn tier_for_height(height: u32) -> Option<QualityTier> {
    QUALITY_TIERS
        .iter()
        .find(|tier| tier.height == height)
        .copied()
}

/// Accepts `"720p"`, `"720P"` or `"720"`. Anything outside the table is rejected.
pub fn parse_quality_token(token: &str) -> Option<QualityTier> {
    let trimmed = token.trim();
    let digits = trimmed
        .strip_suffix('p')
        .or_else(|| trimmed.strip_suffix('P'))
        .unwrap_or(trimmed);

    if digits.is_empty() || !digits.chars().all(|character| character.is_ascii_digit()) {
        return None;
    }

    digits.parse::<u32>().ok().and_then(tier_for_height)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QualityOption {
    pub quality: String,
    pub label: String,
    pub size: String,
    #[serde(rename = "formatId")]
    pub format_id: String,
    pub priority: u8,
}

pub fn is_mp4_video(format: &YtDlpFormat) -> bool {
    let has_video = matches!(
        format.vcodec.as_deref(),
        Some(value) if !value.is_empty() && value != "none"
    );

    has_video && format.ext.as_deref() == Some("mp4")
}

/// Projects raw format entries onto the resolution table: mp4 video only,
/// first entry per height wins, highest priority first.
pub fn build_quality_options(formats: &[YtDlpFormat]) -> Vec<QualityOption> {
    let mut seen_heights = HashSet::new();
    let mut options = Vec::new();

    for format in formats.iter().filter(|format| is_mp4_video(format)) {
        let Some(tier) = format.height.and_then(tier_for_height) else {
            continue;
        };
        if !seen_heights.insert(tier.height) {
            continue;
        }

        options.push(QualityOption {
            quality: tier.token(),
            label: tier.label.to_string(),
            size: format
                .filesize
                .or(format.filesize_approx)
                .map(format_filesize_mb)
                .unwrap_or_else(|| "unknown".to_string()),
            format_id: format.format_id.clone(),
            priority: tier.priority,
        });
    }

    options.sort_by(|a, b| b.priority.cmp(&a.priority));
    options
}

fn format_filesize_mb(bytes: f64) -> String {
    let mb = bytes / 1_048_576.0;
    format!("~{} MB", mb.round() as u64)
}
