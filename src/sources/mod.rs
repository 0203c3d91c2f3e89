pub mod jellyfin;
pub mod remote;
pub mod socket;
pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::GuildId;

use crate::audio::Track;

pub use jellyfin::{JellyfinClient, SearchHint, SearchKind};
pub use remote::RemoteControl;
pub use socket::RemoteSockets;
pub use youtube::{YouTubeClient, YtDlpBackend};

/// Builds the URL a remote-stream track is played from.
///
/// Called by a session at the moment it starts a track, so the URL always
/// carries current credentials.
#[cfg_attr(test, mockall::automock)]
pub trait StreamUrlBuilder: Send + Sync {
    fn build_stream_url(&self, guild_id: GuildId, item_id: &str) -> Result<String>;
}

/// Resolves media-server item ids into playable tracks.
///
/// Album-like items expand into their tracks; unknown ids resolve to nothing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemLookup: Send + Sync {
    async fn tracks_by_id(&self, item_ids: Vec<String>) -> Result<Vec<Track>>;
}

/// Stand-in used when no media server is configured.
pub struct NoMediaServer;

impl StreamUrlBuilder for NoMediaServer {
    fn build_stream_url(&self, _guild_id: GuildId, item_id: &str) -> Result<String> {
        anyhow::bail!("no media server is configured to stream item '{}'", item_id)
    }
}

#[async_trait]
impl ItemLookup for NoMediaServer {
    async fn tracks_by_id(&self, _item_ids: Vec<String>) -> Result<Vec<Track>> {
        Ok(Vec::new())
    }
}
