use parking_lot::Mutex;
use std::{path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;

/// Reasons a track is rejected before it can enter a queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("track has an empty id")]
    EmptyId,
    #[error("downloadable track '{0}' has no source locator")]
    EmptyLocator(String),
}

/// Lifecycle of a downloadable track's local artifact.
///
/// Only ever moves `NotStarted -> Acquiring -> {Ready, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    NotStarted,
    Acquiring,
    Ready,
    Failed,
}

#[derive(Debug)]
struct AcquisitionSlot {
    state: AcquisitionState,
    artifact: Option<PathBuf>,
}

/// Shared acquisition state of one downloadable track instance.
///
/// Every clone of a [`Track`] points at the same `Acquisition`, so the queue
/// observes what the acquisition pipeline writes. Writers are restricted to
/// the audio module.
#[derive(Debug)]
pub struct Acquisition {
    slot: Mutex<AcquisitionSlot>,
}

impl Acquisition {
    fn new() -> Self {
        Self {
            slot: Mutex::new(AcquisitionSlot {
                state: AcquisitionState::NotStarted,
                artifact: None,
            }),
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.slot.lock().state
    }

    /// Local file produced by the acquisition, present only once `Ready`.
    pub fn artifact(&self) -> Option<PathBuf> {
        self.slot.lock().artifact.clone()
    }

    /// Atomically claims the acquisition. Returns `false` if it already left `NotStarted`.
    pub(in crate::audio) fn try_begin(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.state != AcquisitionState::NotStarted {
            return false;
        }
        slot.state = AcquisitionState::Acquiring;
        true
    }

    pub(in crate::audio) fn complete(&self, artifact: PathBuf) -> bool {
        let mut slot = self.slot.lock();
        if slot.state != AcquisitionState::Acquiring {
            return false;
        }
        slot.state = AcquisitionState::Ready;
        slot.artifact = Some(artifact);
        true
    }

    pub(in crate::audio) fn fail(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.state != AcquisitionState::Acquiring {
            return false;
        }
        slot.state = AcquisitionState::Failed;
        true
    }
}

/// Downloadable variant payload: where to fetch from, plus acquisition state.
#[derive(Debug, Clone)]
pub struct DownloadableSource {
    locator: String,
    acquisition: Arc<Acquisition>,
}

impl DownloadableSource {
    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn acquisition(&self) -> &Arc<Acquisition> {
        &self.acquisition
    }
}

/// How a track becomes playable.
#[derive(Debug, Clone)]
pub enum TrackSource {
    /// Streamed from the media server; the URL is built from the id at play time.
    RemoteStream,
    /// Must be downloaded and converted into a local file before playing.
    Downloadable(DownloadableSource),
}

/// A playable item.
///
/// Metadata is immutable once built. Cloning is cheap and shares the
/// acquisition state, so a clone refers to the same track instance.
#[derive(Debug, Clone)]
pub struct Track {
    id: String,
    name: String,
    artist: String,
    album: String,
    duration: Duration,
    artwork_url: Option<String>,
    source: TrackSource,
}

impl Track {
    pub fn remote_stream(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_source(id.into(), name.into(), TrackSource::RemoteStream)
    }

    pub fn downloadable(
        id: impl Into<String>,
        name: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        let source = TrackSource::Downloadable(DownloadableSource {
            locator: locator.into(),
            acquisition: Arc::new(Acquisition::new()),
        });
        Self::with_source(id.into(), name.into(), source)
    }

    fn with_source(id: String, name: String, source: TrackSource) -> Self {
        Self {
            id,
            name,
            artist: String::new(),
            album: String::new(),
            duration: Duration::ZERO,
            artwork_url: None,
            source,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_artwork(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.artwork_url = (!url.is_empty()).then_some(url);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn artist(&self) -> &str {
        &self.artist
    }
    pub fn album(&self) -> &str {
        &self.album
    }
    pub fn duration(&self) -> Duration {
        self.duration
    }
    pub fn artwork_url(&self) -> Option<&str> {
        self.artwork_url.as_deref()
    }
    pub fn source(&self) -> &TrackSource {
        &self.source
    }

    pub fn is_remote_stream(&self) -> bool {
        matches!(self.source, TrackSource::RemoteStream)
    }

    /// Acquisition state, or `None` for tracks that never need acquiring.
    pub fn acquisition_state(&self) -> Option<AcquisitionState> {
        match &self.source {
            TrackSource::RemoteStream => None,
            TrackSource::Downloadable(source) => Some(source.acquisition.state()),
        }
    }

    /// Whether `other` is the same track instance (not merely the same id).
    pub fn same_instance(&self, other: &Track) -> bool {
        match (&self.source, &other.source) {
            (TrackSource::Downloadable(a), TrackSource::Downloadable(b)) => {
                Arc::ptr_eq(&a.acquisition, &b.acquisition)
            }
            (TrackSource::RemoteStream, TrackSource::RemoteStream) => self.id == other.id,
            _ => false,
        }
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        if self.id.trim().is_empty() {
            return Err(TrackError::EmptyId);
        }
        if let TrackSource::Downloadable(source) = &self.source {
            if source.locator.trim().is_empty() {
                return Err(TrackError::EmptyLocator(self.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_only_moves_forward() {
        let track = Track::downloadable("abc", "Song", "https://www.youtube.com/watch?v=abc");
        let TrackSource::Downloadable(source) = track.source() else {
            panic!("expected a downloadable track");
        };
        let acquisition = source.acquisition();

        assert!(!acquisition.complete(PathBuf::from("/tmp/x.mp3")));
        assert_eq!(acquisition.state(), AcquisitionState::NotStarted);

        assert!(acquisition.try_begin());
        assert!(!acquisition.try_begin());
        assert!(acquisition.complete(PathBuf::from("/tmp/x.mp3")));
        assert!(!acquisition.fail());
        assert_eq!(acquisition.state(), AcquisitionState::Ready);
        assert_eq!(acquisition.artifact(), Some(PathBuf::from("/tmp/x.mp3")));
    }

    #[test]
    fn clones_share_acquisition_state() {
        let track = Track::downloadable("abc", "Song", "locator");
        let clone = track.clone();
        if let TrackSource::Downloadable(source) = track.source() {
            assert!(source.acquisition().try_begin());
        }
        assert_eq!(clone.acquisition_state(), Some(AcquisitionState::Acquiring));
        assert!(clone.same_instance(&track));

        let fresh = Track::downloadable("abc", "Song", "locator");
        assert!(!fresh.same_instance(&track));
        assert_eq!(fresh.acquisition_state(), Some(AcquisitionState::NotStarted));
    }

    #[test]
    fn malformed_tracks_are_rejected() {
        assert_eq!(Track::remote_stream("", "x").validate(), Err(TrackError::EmptyId));
        assert_eq!(
            Track::downloadable("id", "x", " ").validate(),
            Err(TrackError::EmptyLocator("id".into()))
        );
        assert!(Track::remote_stream("id", "x").validate().is_ok());
        assert_eq!(Track::remote_stream("id", "x").acquisition_state(), None);
    }

    #[test]
    fn empty_artwork_is_treated_as_missing() {
        let track = Track::remote_stream("id", "x").with_artwork("");
        assert_eq!(track.artwork_url(), None);
        let track = Track::remote_stream("id", "x").with_artwork("https://img/1.jpg");
        assert_eq!(track.artwork_url(), Some("https://img/1.jpg"));
    }
}
