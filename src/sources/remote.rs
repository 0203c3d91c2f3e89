//! Remote control through media-server session messages.
//!
//! Messages arrive as JSON `{ "MessageType": ..., "Data": ... }`. Playstate
//! requests map directly onto control commands; play requests are resolved
//! into tracks first.

use anyhow::Result;
use serde::Deserialize;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ItemLookup;
use crate::audio::{ControlCommand, EnqueuePosition, PlaybackManager, PlaybackState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionMessage {
    message_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlaystateRequest {
    command: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlayRequest {
    #[serde(default)]
    item_ids: Vec<String>,
    #[serde(default)]
    play_command: String,
    start_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayCommand {
    /// Insert after the current track and switch to it.
    Now,
    Next,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteMessage {
    KeepAlive,
    Playstate(PlaystateCommand),
    Play { item_ids: Vec<String>, mode: PlayCommand },
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaystateCommand {
    PlayPause,
    Pause,
    Unpause,
    Stop,
    NextTrack,
    PreviousTrack,
}

impl PlaystateCommand {
    fn parse(command: &str) -> Option<Self> {
        Some(match command {
            "PlayPause" => Self::PlayPause,
            "Pause" => Self::Pause,
            "Unpause" => Self::Unpause,
            "Stop" => Self::Stop,
            "NextTrack" => Self::NextTrack,
            "PreviousTrack" => Self::PreviousTrack,
            _ => return None,
        })
    }

    pub fn to_control(self) -> ControlCommand {
        match self {
            Self::PlayPause => ControlCommand::TogglePause,
            Self::Pause => ControlCommand::Pause,
            Self::Unpause => ControlCommand::Unpause,
            Self::Stop => ControlCommand::Stop,
            Self::NextTrack => ControlCommand::Next,
            Self::PreviousTrack => ControlCommand::Previous,
        }
    }
}

/// Parses one session message.
pub fn decode(text: &str) -> Result<RemoteMessage> {
    let message: SessionMessage = serde_json::from_str(text)?;

    Ok(match message.message_type.as_str() {
        "KeepAlive" | "ForceKeepAlive" => RemoteMessage::KeepAlive,
        "Playstate" => {
            let request: PlaystateRequest = serde_json::from_value(message.data)?;
            match PlaystateCommand::parse(&request.command) {
                Some(command) => RemoteMessage::Playstate(command),
                None => RemoteMessage::Unsupported(format!("Playstate/{}", request.command)),
            }
        }
        "Play" => {
            let request: PlayRequest = serde_json::from_value(message.data)?;
            let mode = match request.play_command.as_str() {
                "PlayNow" => PlayCommand::Now,
                "PlayNext" => PlayCommand::Next,
                "PlayLast" => PlayCommand::Last,
                other => return Ok(RemoteMessage::Unsupported(format!("Play/{}", other))),
            };
            let skip = request.start_index.unwrap_or(0);
            RemoteMessage::Play {
                item_ids: request.item_ids.into_iter().skip(skip).collect(),
                mode,
            }
        }
        other => RemoteMessage::Unsupported(other.to_string()),
    })
}

/// Applies session messages to a guild's playback.
pub struct RemoteControl {
    lookup: Arc<dyn ItemLookup>,
    playback: Arc<PlaybackManager>,
}

impl RemoteControl {
    pub fn new(lookup: Arc<dyn ItemLookup>, playback: Arc<PlaybackManager>) -> Self {
        Self { lookup, playback }
    }

    pub async fn handle_message(&self, guild_id: GuildId, text: &str) -> Result<()> {
        match decode(text)? {
            RemoteMessage::KeepAlive => {
                debug!("Received a keep-alive for guild {}", guild_id);
            }
            RemoteMessage::Playstate(command) => {
                info!("🎮 Remote {:?} for guild {}", command, guild_id);
                self.playback
                    .dispatch(guild_id, command.to_control())
                    .await?;
            }
            RemoteMessage::Play { item_ids, mode } => {
                self.play(guild_id, item_ids, mode).await?;
            }
            RemoteMessage::Unsupported(kind) => {
                warn!("⚠️ Ignoring unsupported remote message '{}'", kind);
            }
        }
        Ok(())
    }

    async fn play(&self, guild_id: GuildId, item_ids: Vec<String>, mode: PlayCommand) -> Result<()> {
        let requested = item_ids.len();
        let tracks = self.lookup.tracks_by_id(item_ids).await?;
        info!(
            "🎮 Remote play of {} item(s) ({} track(s), {:?}) for guild {}",
            requested,
            tracks.len(),
            mode,
            guild_id
        );
        if tracks.is_empty() {
            return Ok(());
        }

        let session = self.playback.session(guild_id);
        let was_idle = session.snapshot().await?.state == PlaybackState::Idle;
        let position = match mode {
            PlayCommand::Last => EnqueuePosition::Last,
            PlayCommand::Now | PlayCommand::Next => EnqueuePosition::Next,
        };
        session.enqueue_at(tracks, position).await?;

        if mode == PlayCommand::Now && !was_idle {
            session.next().await?;
        }
        Ok(())
    }
}
