//! Signals exchanged between playback sessions and their collaborators.
//!
//! Inbound signals come from the audio transport ([`TransportSignal`]) and
//! from remote controls ([`ControlCommand`]). Outbound signals are published
//! on an [`EventBus`]: [`TransportCommand`] for whatever drives the voice
//! connection, [`PlaybackEvent`] for reporters. Both outbound streams are
//! broadcast channels, so every subscriber sees each guild's events in the
//! order the session produced them.

use serenity::model::id::GuildId;
use std::{path::PathBuf, time::Duration};
use tokio::sync::broadcast;
use tracing::trace;

use super::track::Track;

/// Where a new track is placed in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnqueuePosition {
    #[default]
    Last,
    Next,
}

/// Reports from the audio transport about the track it is playing.
///
/// `generation` echoes the value carried by the [`TransportCommand::Play`]
/// that started the track, so a report about a track that has since been
/// replaced can be told apart from one about the current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    Ended { generation: u64 },
    Progress { generation: u64, elapsed: Duration },
}

impl TransportSignal {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Ended { generation } | Self::Progress { generation, .. } => *generation,
        }
    }
}

/// Remote-control requests for one guild.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    Enqueue {
        tracks: Vec<Track>,
        position: EnqueuePosition,
    },
    Next,
    Previous,
    Stop,
    Pause,
    Unpause,
    TogglePause,
    Goto {
        track_number: usize,
    },
    Remove {
        track_number: usize,
    },
}

/// A playable source resolved for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    Url(String),
    File(PathBuf),
}

impl std::fmt::Display for ResolvedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Requests to the audio transport.
#[derive(Debug, Clone)]
pub enum TransportCommand {
    Play {
        guild_id: GuildId,
        generation: u64,
        track: Track,
        source: ResolvedSource,
    },
    Stop {
        guild_id: GuildId,
    },
    Pause {
        guild_id: GuildId,
    },
    Unpause {
        guild_id: GuildId,
    },
}

impl TransportCommand {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::Play { guild_id, .. }
            | Self::Stop { guild_id }
            | Self::Pause { guild_id }
            | Self::Unpause { guild_id } => *guild_id,
        }
    }
}

/// Notifications for telemetry and playstate reporters.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Started { guild_id: GuildId, track: Track },
    Stopped { guild_id: GuildId },
    Paused { guild_id: GuildId },
    Resumed { guild_id: GuildId },
    Progress { guild_id: GuildId, elapsed: Duration },
}

impl PlaybackEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::Started { guild_id, .. }
            | Self::Stopped { guild_id }
            | Self::Paused { guild_id }
            | Self::Resumed { guild_id }
            | Self::Progress { guild_id, .. } => *guild_id,
        }
    }
}

/// Fan-out point for everything sessions publish.
#[derive(Debug, Clone)]
pub struct EventBus {
    transport: broadcast::Sender<TransportCommand>,
    playback: broadcast::Sender<PlaybackEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (transport, _) = broadcast::channel(capacity);
        let (playback, _) = broadcast::channel(capacity);
        Self {
            transport,
            playback,
        }
    }

    pub fn subscribe_transport(&self) -> broadcast::Receiver<TransportCommand> {
        self.transport.subscribe()
    }

    pub fn subscribe_playback(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.playback.subscribe()
    }

    pub fn send_transport(&self, command: TransportCommand) {
        // No subscriber is fine, e.g. before the transport is attached.
        if self.transport.send(command).is_err() {
            trace!("Transport command dropped, nobody is listening");
        }
    }

    pub fn send_playback(&self, event: PlaybackEvent) {
        if self.playback.send(event).is_err() {
            trace!("Playback event dropped, nobody is listening");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe_playback();
        let mut second = bus.subscribe_playback();
        let guild_id = GuildId::new(7);

        bus.send_playback(PlaybackEvent::Paused { guild_id });
        bus.send_playback(PlaybackEvent::Resumed { guild_id });

        for rx in [&mut first, &mut second] {
            assert!(matches!(rx.recv().await, Ok(PlaybackEvent::Paused { .. })));
            assert!(matches!(rx.recv().await, Ok(PlaybackEvent::Resumed { .. })));
        }
    }

    #[test]
    fn sending_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        bus.send_transport(TransportCommand::Stop {
            guild_id: GuildId::new(1),
        });
        bus.send_playback(PlaybackEvent::Stopped {
            guild_id: GuildId::new(1),
        });
    }

    #[test]
    fn resolved_sources_display_as_uris() {
        assert_eq!(
            ResolvedSource::Url("https://jf/Audio/1/universal".into()).to_string(),
            "https://jf/Audio/1/universal"
        );
        assert_eq!(
            ResolvedSource::File(PathBuf::from("cache/yt_a.mp3")).to_string(),
            "cache/yt_a.mp3"
        );
    }
}
