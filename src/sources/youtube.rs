use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    audio::{AcquisitionBackend, AcquisitionError, AcquisitionRequest, Track},
    config::Config,
};

const VIDEO_LINK: &str =
    r"^.*((youtu\.be/)|(v/)|(/u/\w/)|(embed/)|(shorts/)|(watch\?))\??v?=?(?P<id>[^#&?]*).*";
const VIDEO_ID_LEN: usize = 11;
const PRINT_TEMPLATE: &str = "%(title)s\t%(uploader)s\t%(duration)s\t%(thumbnail)s";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum YoutubeError {
    #[error("'{0}' is not a valid YouTube video link")]
    InvalidLink(String),

    #[error("video link pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),
}

/// Extracts the 11 character video id from a watch, short, or embed link.
pub fn video_id(link: &str) -> Result<String, YoutubeError> {
    Regex::new(VIDEO_LINK)?
        .captures(link.trim())
        .and_then(|captures| captures.name("id"))
        .map(|id| id.as_str())
        .filter(|id| id.len() == VIDEO_ID_LEN)
        .map(str::to_string)
        .ok_or_else(|| YoutubeError::InvalidLink(link.to_string()))
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[derive(Debug, Clone, PartialEq)]
struct VideoMetadata {
    title: String,
    uploader: String,
    duration: Duration,
    thumbnail: String,
}

/// yt-dlp prints `NA` for fields it doesn't know.
fn known(field: &str) -> Option<&str> {
    let field = field.trim();
    (!field.is_empty() && field != "NA").then_some(field)
}

fn parse_print_line(line: &str) -> Option<VideoMetadata> {
    let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');
    let title = known(fields.next()?)?.to_string();
    let uploader = fields.next().and_then(known).unwrap_or_default().to_string();
    let duration = fields
        .next()
        .and_then(known)
        .and_then(|secs| secs.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or_default();
    let thumbnail = fields.next().and_then(known).unwrap_or_default().to_string();

    Some(VideoMetadata {
        title,
        uploader,
        duration,
        thumbnail,
    })
}

/// Looks up YouTube videos through yt-dlp.
pub struct YouTubeClient {
    ytdlp_path: String,
}

impl YouTubeClient {
    pub fn new(config: &Config) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone(),
        }
    }

    /// Resolves a video link into a downloadable track.
    pub async fn track_from_link(&self, link: &str) -> Result<Track> {
        let id = video_id(link)?;
        let url = watch_url(&id);
        debug!("📊 Fetching metadata of {}", url);

        let output = Command::new(&self.ytdlp_path)
            .args([
                "--no-playlist",
                "--no-warnings",
                "--skip-download",
                "--print",
                PRINT_TEMPLATE,
                url.as_str(),
            ])
            .output()
            .await
            .context("Failed to run yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metadata = stdout
            .lines()
            .find_map(parse_print_line)
            .with_context(|| format!("yt-dlp returned no metadata for {}", url))?;

        info!("🎬 Found '{}' by {}", metadata.title, metadata.uploader);
        Ok(Track::downloadable(id, metadata.title, url)
            .with_artist(metadata.uploader)
            .with_duration(metadata.duration)
            .with_artwork(metadata.thumbnail))
    }
}

/// Downloads audio into the cache directory as `yt_<id>.mp3`.
///
/// Two tracks can share a video id, so runs writing the same artifact are
/// serialized; the second one then finds the file already cached.
pub struct YtDlpBackend {
    ytdlp_path: String,
    cache_dir: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl YtDlpBackend {
    pub fn new(ytdlp_path: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            cache_dir: cache_dir.into(),
            locks: DashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ytdlp_path.clone(), config.cache_dir.clone())
    }

    fn file_stem(track_id: &str) -> String {
        let safe: String = track_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("yt_{safe}")
    }

    pub fn artifact_path(&self, track_id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.mp3", Self::file_stem(track_id)))
    }

    fn output_template(&self, track_id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.%(ext)s", Self::file_stem(track_id)))
    }

    fn artifact_lock(&self, artifact: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(artifact.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the lock entry once no other run is holding or waiting on it.
    fn release_lock(&self, artifact: &Path) {
        self.locks
            .remove_if(artifact, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn download(
        &self,
        request: &AcquisitionRequest,
        artifact: PathBuf,
    ) -> Result<PathBuf, AcquisitionError> {
        if exists(&artifact).await {
            debug!("💾 Using cached {}", artifact.display());
            return Ok(artifact);
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let template = self.output_template(&request.track_id);
        let output = Command::new(&self.ytdlp_path)
            .arg(&request.locator)
            .args(["-x", "--audio-format", "mp3", "--audio-quality", "256K"])
            .args(["-f", "bestaudio", "-o"])
            .arg(&template)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(AcquisitionError::ExitStatus {
                code: output.status.code(),
                stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
            });
        }

        if !exists(&artifact).await {
            return Err(AcquisitionError::MissingArtifact(artifact));
        }
        Ok(artifact)
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[async_trait]
impl AcquisitionBackend for YtDlpBackend {
    async fn acquire(&self, request: AcquisitionRequest) -> Result<PathBuf, AcquisitionError> {
        let artifact = self.artifact_path(&request.track_id);
        let lock = self.artifact_lock(&artifact);

        let result = {
            let _guard = lock.lock().await;
            self.download(&request, artifact.clone()).await
        };

        drop(lock);
        self.release_lock(&artifact);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn video_ids_are_extracted_from_common_links() {
        for link in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123&index=2",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=42",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "  https://m.youtube.com/watch?v=dQw4w9WgXcQ#comments ",
        ] {
            assert_eq!(video_id(link).as_deref(), Ok("dQw4w9WgXcQ"), "{link}");
        }
    }

    #[test]
    fn malformed_links_are_rejected() {
        for link in [
            "",
            "never gonna give you up",
            "https://www.youtube.com/watch?v=short",
            "https://example.com/page",
        ] {
            assert_eq!(
                video_id(link),
                Err(YoutubeError::InvalidLink(link.to_string()))
            );
        }
    }

    #[test]
    fn print_lines_become_metadata() {
        let metadata =
            parse_print_line("Song\tChannel\t212.5\thttps://i.ytimg.com/vi/x/maxres.jpg\n")
                .unwrap();
        assert_eq!(metadata.title, "Song");
        assert_eq!(metadata.uploader, "Channel");
        assert_eq!(metadata.duration, Duration::from_millis(212_500));
        assert_eq!(metadata.thumbnail, "https://i.ytimg.com/vi/x/maxres.jpg");

        let live = parse_print_line("Stream\tNA\tNA\tNA").unwrap();
        assert_eq!(live.uploader, "");
        assert_eq!(live.duration, Duration::ZERO);

        assert_eq!(parse_print_line("NA\tChannel\t1\tx"), None);
    }

    #[test]
    fn artifact_names_are_filesystem_safe() {
        let backend = YtDlpBackend::new("yt-dlp", "/cache");
        assert_eq!(
            backend.artifact_path("dQw4w9WgXcQ"),
            PathBuf::from("/cache/yt_dQw4w9WgXcQ.mp3")
        );
        assert_eq!(
            backend.artifact_path("../etc"),
            PathBuf::from("/cache/yt____etc.mp3")
        );
        assert_eq!(
            backend.output_template("abc"),
            PathBuf::from("/cache/yt_abc.%(ext)s")
        );
    }

    #[tokio::test]
    async fn cached_artifact_skips_the_download() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("yt_dQw4w9WgXcQ.mp3");
        std::fs::write(&cached, b"mp3").unwrap();

        let backend = YtDlpBackend::new("/nonexistent/yt-dlp", dir.path());
        let path = backend
            .acquire(AcquisitionRequest {
                track_id: "dQw4w9WgXcQ".into(),
                locator: watch_url("dQw4w9WgXcQ"),
            })
            .await
            .unwrap();

        assert_eq!(path, cached);
    }

    #[tokio::test]
    async fn runs_for_the_same_artifact_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(YtDlpBackend::new("/nonexistent/yt-dlp", dir.path()));
        let artifact = backend.artifact_path("dQw4w9WgXcQ");

        let lock = backend.artifact_lock(&artifact);
        assert!(Arc::ptr_eq(&lock, &backend.artifact_lock(&artifact)));
        let guard = lock.lock().await;

        let waiting = tokio::spawn({
            let backend = backend.clone();
            async move {
                backend
                    .acquire(AcquisitionRequest {
                        track_id: "dQw4w9WgXcQ".into(),
                        locator: watch_url("dQw4w9WgXcQ"),
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        // The run holding the lock produces the file; the waiter must reuse it.
        std::fs::write(&artifact, b"mp3").unwrap();
        drop(guard);
        drop(lock);

        assert_eq!(waiting.await.unwrap().unwrap(), artifact);
        assert!(backend.locks.is_empty());
    }

    #[tokio::test]
    async fn missing_tool_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let backend = YtDlpBackend::new("/nonexistent/yt-dlp", dir.path().join("nested"));

        let result = backend
            .acquire(AcquisitionRequest {
                track_id: "dQw4w9WgXcQ".into(),
                locator: watch_url("dQw4w9WgXcQ"),
            })
            .await;

        assert!(matches!(result, Err(AcquisitionError::Spawn(_))));
        assert!(dir.path().join("nested").is_dir());
    }
}
