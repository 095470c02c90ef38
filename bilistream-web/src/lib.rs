//! Bilistream Web - HTTP front-end for the download pipeline

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! Thin axum layer mapping download requests onto the core
//! [`DownloadService`](bilistream_core::DownloadService) and its typed
//! failures onto HTTP statuses.

pub mod handlers;
pub mod server;

// Re-export main types
pub use handlers::WebError;
pub use server::{AppState, router, run_server};
