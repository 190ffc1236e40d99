//! HTTP front end for `yt-dlp`: look up the qualities a video offers, download
//! one of them into a shared directory, serve it back and purge old files.

pub mod config;
pub mod error;
pub mod extractor;
pub mod jobs;
pub mod quality;
pub mod routes;
pub mod storage;
pub mod video_id;

pub use error::{ApiError, ExtractorError};
pub use routes::{AppState, router};
