//! HTTP request handlers organized by functionality

pub mod download;
pub mod error;

// Re-export handler functions
pub use download::{DownloadQuery, download_video, health};
pub use error::{WebError, status_for};
