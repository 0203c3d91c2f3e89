use async_trait::async_trait;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::track::{AcquisitionState, Track, TrackSource};

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("failed to launch the acquisition tool: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("acquisition tool exited with {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("acquisition finished but {0} does not exist")]
    MissingArtifact(PathBuf),
}

/// What a backend needs to fetch one downloadable track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionRequest {
    pub track_id: String,
    pub locator: String,
}

/// Turns a downloadable track into a local file.
///
/// Implementations must be idempotent: an artifact that already exists is
/// returned without fetching again.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AcquisitionBackend: Send + Sync {
    async fn acquire(&self, request: AcquisitionRequest) -> Result<PathBuf, AcquisitionError>;
}

/// Result of asking the pipeline to make a track playable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureReady {
    AlreadyReady,
    Started,
    AlreadyInProgress,
    Failed,
}

/// Drives acquisition jobs for downloadable tracks.
///
/// Jobs run on their own tasks and are never cancelled. A job that finishes
/// after the session moved on only warms the cache.
pub struct AcquisitionPipeline {
    backend: Arc<dyn AcquisitionBackend>,
}

impl AcquisitionPipeline {
    pub fn new(backend: Arc<dyn AcquisitionBackend>) -> Self {
        Self { backend }
    }

    /// Must be called from within a tokio runtime; `Started` spawns the job.
    pub fn ensure_ready(&self, track: &Track) -> EnsureReady {
        let TrackSource::Downloadable(source) = track.source() else {
            return EnsureReady::AlreadyReady;
        };
        let acquisition = source.acquisition();

        match acquisition.state() {
            AcquisitionState::Ready => return EnsureReady::AlreadyReady,
            AcquisitionState::Failed => return EnsureReady::Failed,
            AcquisitionState::Acquiring => return EnsureReady::AlreadyInProgress,
            AcquisitionState::NotStarted => {}
        }

        if !acquisition.try_begin() {
            debug!("Acquisition of '{}' was claimed concurrently", track.id());
            return EnsureReady::AlreadyInProgress;
        }

        let request = AcquisitionRequest {
            track_id: track.id().to_string(),
            locator: source.locator().to_string(),
        };
        let acquisition = acquisition.clone();
        let backend = self.backend.clone();
        let name = track.name().to_string();

        info!("⬇️ Acquiring '{}' from {}", name, request.locator);
        tokio::spawn(async move {
            match backend.acquire(request).await {
                Ok(path) => {
                    info!("✅ '{}' is ready at {}", name, path.display());
                    acquisition.complete(path);
                }
                Err(e) => {
                    warn!("❌ Acquisition of '{}' failed: {}", name, e);
                    acquisition.fail();
                }
            }
        });

        EnsureReady::Started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for_state(track: &Track, wanted: AcquisitionState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while track.acquisition_state() != Some(wanted) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("acquisition did not settle in time");
    }

    #[tokio::test]
    async fn remote_streams_are_always_ready() {
        let backend = MockAcquisitionBackend::new();
        let pipeline = AcquisitionPipeline::new(Arc::new(backend));
        let track = Track::remote_stream("item", "Song");

        assert_eq!(pipeline.ensure_ready(&track), EnsureReady::AlreadyReady);
    }

    #[tokio::test]
    async fn successful_job_marks_track_ready() {
        let mut backend = MockAcquisitionBackend::new();
        backend
            .expect_acquire()
            .withf(|request| request.track_id == "vid" && request.locator == "https://yt/vid")
            .times(1)
            .returning(|_| Ok(PathBuf::from("/cache/yt_vid.mp3")));
        let pipeline = AcquisitionPipeline::new(Arc::new(backend));
        let track = Track::downloadable("vid", "Song", "https://yt/vid");

        assert_eq!(pipeline.ensure_ready(&track), EnsureReady::Started);
        wait_for_state(&track, AcquisitionState::Ready).await;

        let TrackSource::Downloadable(source) = track.source() else {
            unreachable!()
        };
        assert_eq!(
            source.acquisition().artifact(),
            Some(PathBuf::from("/cache/yt_vid.mp3"))
        );

        // Ready twice, backend still called only once.
        assert_eq!(pipeline.ensure_ready(&track), EnsureReady::AlreadyReady);
        assert_eq!(pipeline.ensure_ready(&track), EnsureReady::AlreadyReady);
    }

    #[tokio::test]
    async fn failed_job_is_terminal() {
        let mut backend = MockAcquisitionBackend::new();
        backend.expect_acquire().times(1).returning(|_| {
            Err(AcquisitionError::ExitStatus {
                code: Some(1),
                stderr: "video unavailable".into(),
            })
        });
        let pipeline = AcquisitionPipeline::new(Arc::new(backend));
        let track = Track::downloadable("vid", "Song", "https://yt/vid");

        assert_eq!(pipeline.ensure_ready(&track), EnsureReady::Started);
        wait_for_state(&track, AcquisitionState::Failed).await;
        assert_eq!(pipeline.ensure_ready(&track), EnsureReady::Failed);
    }

    #[tokio::test]
    async fn in_flight_job_is_not_duplicated() {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = parking_lot::Mutex::new(Some(release_rx));

        struct Gated(parking_lot::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>);

        #[async_trait]
        impl AcquisitionBackend for Gated {
            async fn acquire(
                &self,
                request: AcquisitionRequest,
            ) -> Result<PathBuf, AcquisitionError> {
                let gate = self.0.lock().take().expect("backend called twice");
                let _ = gate.await;
                Ok(PathBuf::from(format!("/cache/yt_{}.mp3", request.track_id)))
            }
        }

        let pipeline = AcquisitionPipeline::new(Arc::new(Gated(release_rx)));
        let track = Track::downloadable("vid", "Song", "https://yt/vid");

        assert_eq!(pipeline.ensure_ready(&track), EnsureReady::Started);
        assert_eq!(pipeline.ensure_ready(&track), EnsureReady::AlreadyInProgress);
        assert_eq!(pipeline.ensure_ready(&track.clone()), EnsureReady::AlreadyInProgress);

        release_tx.send(()).unwrap();
        wait_for_state(&track, AcquisitionState::Ready).await;
    }
}
