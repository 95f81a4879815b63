//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Source not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Unsupported source locator: {0}")]
    UnsupportedSource(String),

    #[error("Failed to fetch source: {0}")]
    SourceFetch(String),

    #[error("FFmpeg produced an empty output")]
    EmptyOutput,

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// One-line reason suitable for a job's `errorDetail`.
    pub fn reason(&self) -> String {
        match self {
            MediaError::FfmpegFailed {
                message,
                stderr: Some(stderr),
                ..
            } if !stderr.trim().is_empty() => {
                let last = stderr.lines().rev().find(|l| !l.trim().is_empty());
                format!("{}: {}", message, last.unwrap_or_default().trim())
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_uses_last_stderr_line() {
        let err = MediaError::ffmpeg_failed(
            "FFmpeg exited with status 1",
            Some("first\nDecoder not found: unsupported codec\n\n".to_string()),
            Some(1),
        );
        assert_eq!(
            err.reason(),
            "FFmpeg exited with status 1: Decoder not found: unsupported codec"
        );
        assert_eq!(MediaError::EmptyOutput.reason(), "FFmpeg produced an empty output");
    }
}
