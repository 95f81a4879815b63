//! Clipping capability built on the FFmpeg CLI.
//!
//! This crate provides:
//! - The `Clipper` trait the worker drives
//! - FFmpeg command building and execution with `-progress` parsing
//! - `FfmpegClipper`, which cuts a range, stores it and returns the locator

pub mod clipper;
pub mod command;
pub mod error;
pub mod progress;

pub use clipper::{ClipFailure, ClipOutput, ClipRequest, Clipper, FfmpegClipper, ProgressSink};
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use progress::FfmpegProgress;
