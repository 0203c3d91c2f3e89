use serenity::model::id::GuildId;
use thiserror::Error;

use super::track::TrackError;

/// Errors surfaced to whoever issued a playback command.
///
/// These are user-facing conditions: they are reported once and never
/// retried. Acquisition failures are not part of this set; a session
/// handles them by skipping to the next track.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("the playback reached the end, there is no next track")]
    NoNextTrack,

    #[error("the playback reached the start, there is no previous track")]
    NoPreviousTrack,

    #[error("there is no track number {0} in the queue")]
    InvalidTrackNumber(usize),

    #[error("the player is not currently playing")]
    NotPlaying,

    #[error("malformed track: {0}")]
    MalformedTrack(#[from] TrackError),

    #[error("the playback session of guild {0} is no longer running")]
    SessionClosed(GuildId),
}

impl PlaybackError {
    /// Whether the error comes from the user's request rather than the bot.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, Self::SessionClosed(_))
    }
}
