//! The clipping capability.
//!
//! `Clipper::run` takes a source locator and a time range, reports whole
//! percent progress through a callback, and yields either the locator of the
//! stored clip or a failure reason meant for the job's `errorDetail`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use clipper_models::{format_seconds, Job, JobId};
use clipper_storage::ArtifactStore;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Receives progress in whole percent. Values may repeat; they never
/// exceed 100.
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// What to cut.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRequest {
    pub job_id: JobId,
    pub source_locator: String,
    pub start_offset: f64,
    pub end_offset: f64,
}

impl ClipRequest {
    pub fn duration(&self) -> f64 {
        self.end_offset - self.start_offset
    }

    /// Artifact key for the finished clip.
    pub fn artifact_key(&self) -> String {
        format!("{}.mp4", self.job_id)
    }
}

impl From<&Job> for ClipRequest {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            source_locator: job.source_locator.clone(),
            start_offset: job.start_offset,
            end_offset: job.end_offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipOutput {
    pub locator: String,
}

/// The clipping operation failed; `reason` is reported to the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ClipFailure {
    pub reason: String,
}

impl ClipFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<MediaError> for ClipFailure {
    fn from(err: MediaError) -> Self {
        Self::new(err.reason())
    }
}

#[async_trait]
pub trait Clipper: Send + Sync {
    async fn run(
        &self,
        request: &ClipRequest,
        progress: ProgressSink,
    ) -> Result<ClipOutput, ClipFailure>;
}

/// Where FFmpeg reads the source from.
#[derive(Debug, PartialEq)]
enum Source {
    /// Handed to FFmpeg as-is.
    Direct(String),
    /// Must be fetched from the artifact store first.
    Artifact(String),
}

/// Cuts clips with FFmpeg and stores them in an artifact store.
pub struct FfmpegClipper {
    runner: FfmpegRunner,
    store: Arc<dyn ArtifactStore>,
    work_dir: PathBuf,
    reencode: bool,
}

impl FfmpegClipper {
    pub fn new(
        runner: FfmpegRunner,
        store: Arc<dyn ArtifactStore>,
        work_dir: impl Into<PathBuf>,
        reencode: bool,
    ) -> Self {
        Self {
            runner,
            store,
            work_dir: work_dir.into(),
            reencode,
        }
    }

    fn classify(&self, locator: &str) -> MediaResult<Source> {
        if self.store.owns(locator) {
            return Ok(Source::Artifact(locator.to_string()));
        }

        match Url::parse(locator) {
            // Single-letter schemes are Windows drive letters, not URLs.
            Ok(url) if url.scheme().len() > 1 => match url.scheme() {
                "http" | "https" => Ok(Source::Direct(locator.to_string())),
                "file" => url
                    .to_file_path()
                    .map(|path| Source::Direct(path.to_string_lossy().into_owned()))
                    .map_err(|_| MediaError::UnsupportedSource(locator.to_string())),
                _ => Err(MediaError::UnsupportedSource(locator.to_string())),
            },
            _ => Ok(Source::Direct(locator.to_string())),
        }
    }

    async fn resolve(&self, locator: &str, scratch: &Path) -> MediaResult<String> {
        match self.classify(locator)? {
            Source::Direct(input) => {
                let remote = input.starts_with("http://") || input.starts_with("https://");
                if !remote && tokio::fs::metadata(&input).await.is_err() {
                    return Err(MediaError::FileNotFound(PathBuf::from(input)));
                }
                Ok(input)
            }
            Source::Artifact(locator) => {
                let bytes = self
                    .store
                    .get(&locator)
                    .await
                    .map_err(|e| MediaError::SourceFetch(e.to_string()))?;
                let path = scratch.join(source_file_name(&locator));
                tokio::fs::write(&path, bytes).await?;
                debug!("Fetched {} into {}", locator, path.display());
                Ok(path.to_string_lossy().into_owned())
            }
        }
    }

    fn build_command(&self, input: String, output: &Path, request: &ClipRequest) -> FfmpegCommand {
        let cmd = FfmpegCommand::new(input, output)
            .seek(request.start_offset)
            .duration(request.duration());

        if self.reencode {
            cmd.video_codec("libx264")
                .preset("veryfast")
                .crf(23)
                .audio_codec("aac")
                .audio_bitrate("128k")
                .faststart()
        } else {
            cmd.codec_copy().faststart()
        }
    }

    async fn clip(&self, request: &ClipRequest, progress: ProgressSink, scratch: &Path) -> MediaResult<ClipOutput> {
        let input = self.resolve(&request.source_locator, scratch).await?;
        let output = scratch.join(request.artifact_key());
        let cmd = self.build_command(input, &output, request);

        let total_ms = (request.duration() * 1000.0).round() as i64;
        self.runner
            .run_with_progress(&cmd, move |p| progress(p.percent(total_ms)))
            .await?;

        let size = tokio::fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(MediaError::EmptyOutput);
        }

        let locator = self
            .store
            .put_file(&request.artifact_key(), &output)
            .await
            .map_err(|e| MediaError::Upload(e.to_string()))?;

        Ok(ClipOutput { locator })
    }
}

/// Scratch file name for a fetched source, keeping its extension.
fn source_file_name(locator: &str) -> String {
    let ext = locator
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin");
    format!("source.{ext}")
}

#[async_trait]
impl Clipper for FfmpegClipper {
    async fn run(
        &self,
        request: &ClipRequest,
        progress: ProgressSink,
    ) -> Result<ClipOutput, ClipFailure> {
        info!(
            job_id = %request.job_id,
            "Clipping {} [{} - {}]",
            request.source_locator,
            format_seconds(request.start_offset),
            format_seconds(request.end_offset)
        );

        let scratch = self.work_dir.join(request.job_id.as_str());
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| ClipFailure::from(MediaError::Io(e)))?;

        let result = self.clip(request, progress, &scratch).await;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!(job_id = %request.job_id, "Failed to remove scratch dir: {}", e);
        }

        result.map_err(ClipFailure::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_storage::LocalArtifactStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    async fn clipper(dir: &TempDir) -> FfmpegClipper {
        let store = LocalArtifactStore::new(dir.path().join("clips")).await.unwrap();
        FfmpegClipper::new(
            FfmpegRunner::with_binary("ffmpeg"),
            Arc::new(store),
            dir.path().join("work"),
            true,
        )
    }

    fn request(source: &str) -> ClipRequest {
        ClipRequest {
            job_id: JobId::from_string("J"),
            source_locator: source.to_string(),
            start_offset: 10.0,
            end_offset: 20.0,
        }
    }

    #[tokio::test]
    async fn test_classify_sources() {
        let dir = TempDir::new().unwrap();
        let clipper = clipper(&dir).await;

        assert_eq!(
            clipper.classify("https://cdn.example.com/a.mp4").unwrap(),
            Source::Direct("https://cdn.example.com/a.mp4".into())
        );
        assert_eq!(
            clipper.classify("file:///videos/a.mp4").unwrap(),
            Source::Direct("/videos/a.mp4".into())
        );
        assert_eq!(
            clipper.classify("/videos/a.mp4").unwrap(),
            Source::Direct("/videos/a.mp4".into())
        );

        let owned = format!("{}/in.mp4", dir.path().join("clips").display());
        assert_eq!(clipper.classify(&owned).unwrap(), Source::Artifact(owned.clone()));

        assert!(matches!(
            clipper.classify("s3://someone-else/in.mp4"),
            Err(MediaError::UnsupportedSource(_))
        ));
    }

    #[test]
    fn test_request_helpers() {
        let req = request("a.mp4");
        assert_eq!(req.duration(), 10.0);
        assert_eq!(req.artifact_key(), "J.mp4");
        assert_eq!(source_file_name("s3://b/dir/in.mov"), "source.mov");
        assert_eq!(source_file_name("s3://b/dir/noext"), "source.bin");
    }

    #[tokio::test]
    async fn test_build_command_modes() {
        let dir = TempDir::new().unwrap();
        let mut clipper = clipper(&dir).await;
        let req = request("in.mp4");

        let args = clipper.build_command("in.mp4".into(), Path::new("out.mp4"), &req).build_args();
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"10.000".to_string()));

        clipper.reencode = false;
        let args = clipper.build_command("in.mp4".into(), Path::new("out.mp4"), &req).build_args();
        assert!(args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));
    }

    #[tokio::test]
    async fn test_missing_local_source_fails_without_ffmpeg() {
        let dir = TempDir::new().unwrap();
        let clipper = clipper(&dir).await;

        let failure = clipper
            .run(&request("/definitely/not/here.mp4"), Arc::new(|_: u8| {}))
            .await
            .unwrap_err();
        assert!(failure.reason.contains("not found"), "{}", failure.reason);
        assert!(!dir.path().join("work").join("J").exists());
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_clip_generated_video() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in.mp4");
        let status = tokio::process::Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-f", "lavfi", "-i", "testsrc=duration=30:size=320x240:rate=25"])
            .arg(&source)
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let clipper = FfmpegClipper::new(
            FfmpegRunner::locate().unwrap(),
            Arc::new(LocalArtifactStore::new(dir.path().join("clips")).await.unwrap()),
            dir.path().join("work"),
            true,
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            Arc::new(move |p: u8| seen.lock().unwrap().push(p)) as ProgressSink
        };

        let output = clipper
            .run(&request(&source.to_string_lossy()), sink)
            .await
            .unwrap();
        assert!(output.locator.ends_with("/J.mp4"));
        assert!(seen.lock().unwrap().iter().all(|p| *p <= 100));
    }
}
