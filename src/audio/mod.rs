//! # Audio Module
//!
//! Per-guild playback orchestration.
//!
//! ## Architecture
//!
//! ### [`session`] - Playback Sessions
//! - One actor task per guild owns that guild's [`queue::PlayQueue`]
//! - Commands, transport signals and acquisition re-checks are serialized
//!   through the session's channel
//!
//! ### [`acquisition`] - Acquisition Pipeline
//! - Downloads tracks that can't be streamed, at most once per track instance
//! - Prefetches the upcoming track near the end of the current one
//!
//! ### [`events`] - Event Bridge
//! - Inbound transport signals and remote-control commands
//! - Outbound transport commands and playback events on broadcast channels
//!
//! ### [`transport`] and [`reporter`] - Bus Consumers
//! - Songbird playback driven by transport commands
//! - Playstate reports for media-server tracks
//!
//! ## Example Usage
//!
//! ```text
//! let session = manager.session(guild_id);
//! session.enqueue(vec![Track::remote_stream("item-id", "Song")]).await?;
//! session.toggle_pause().await?;
//! session.next().await?;
//! ```

pub mod acquisition;
pub mod error;
pub mod events;
pub mod player;
pub mod queue;
pub mod reporter;
pub mod session;
pub mod track;
pub mod transport;

pub use acquisition::{
    AcquisitionBackend, AcquisitionError, AcquisitionPipeline, AcquisitionRequest, EnsureReady,
};
pub use error::PlaybackError;
pub use events::{
    ControlCommand, EnqueuePosition, EventBus, PlaybackEvent, ResolvedSource, TransportCommand,
    TransportSignal,
};
pub use player::PlaybackManager;
pub use queue::{PlayQueue, QueueInfo, QueuePage};
pub use session::{PlaybackState, SessionHandle, SessionSettings, SessionSnapshot};
pub use track::{AcquisitionState, Track, TrackError, TrackSource};
