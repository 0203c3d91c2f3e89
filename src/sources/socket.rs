//! Per-guild media-server session sockets.
//!
//! While the bot is in a guild's voice channel, that guild has its own
//! session on the media server. The server pushes remote-control messages
//! over the socket; they are handed to [`RemoteControl`] in arrival order.

use anyhow::{Context, Result};
use dashmap::{mapref::entry::Entry, DashMap};
use futures_util::{SinkExt, StreamExt};
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{remote::RemoteControl, JellyfinClient};

pub const KEEP_ALIVE: &str = r#"{"MessageType":"KeepAlive"}"#;
const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(15);

/// Open session sockets, one per guild in voice.
pub struct RemoteSockets {
    jellyfin: Arc<JellyfinClient>,
    control: Arc<RemoteControl>,
    connections: DashMap<GuildId, CancellationToken>,
    shutdown: CancellationToken,
}

impl RemoteSockets {
    pub fn new(
        jellyfin: Arc<JellyfinClient>,
        control: Arc<RemoteControl>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            jellyfin,
            control,
            connections: DashMap::new(),
            shutdown,
        }
    }

    /// Opens the guild's socket unless it is already open.
    pub fn connect(&self, guild_id: GuildId) {
        let token = self.shutdown.child_token();
        match self.connections.entry(guild_id) {
            Entry::Occupied(_) => return,
            Entry::Vacant(entry) => {
                entry.insert(token.clone());
            }
        }

        let worker = SocketWorker {
            guild_id,
            jellyfin: self.jellyfin.clone(),
            control: self.control.clone(),
        };
        tokio::spawn(worker.run(token));
    }

    pub fn disconnect(&self, guild_id: GuildId) {
        if let Some((_, token)) = self.connections.remove(&guild_id) {
            debug!("🔌 Closing session socket for guild {}", guild_id);
            token.cancel();
        }
    }
}

struct SocketWorker {
    guild_id: GuildId,
    jellyfin: Arc<JellyfinClient>,
    control: Arc<RemoteControl>,
}

impl SocketWorker {
    async fn run(self, token: CancellationToken) {
        info!("📡 Opening session socket for guild {}", self.guild_id);
        loop {
            let session = tokio::select! {
                _ = token.cancelled() => break,
                result = self.session(&token) => result,
            };

            match session {
                Ok(()) if token.is_cancelled() => break,
                Ok(()) => warn!("⚠️ Session socket for guild {} closed by the server", self.guild_id),
                Err(e) => error!("❌ Session socket for guild {} failed: {:#}", self.guild_id, e),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        debug!("Session socket for guild {} stopped", self.guild_id);
    }

    /// One connection, from capabilities report until the socket closes.
    async fn session(&self, token: &CancellationToken) -> Result<()> {
        self.jellyfin.report_capabilities(self.guild_id).await?;

        let url = self.jellyfin.socket_url(self.guild_id)?;
        let (socket, _) = connect_async(url.as_str())
            .await
            .context("session socket connect failed")?;
        info!("✅ Session socket connected for guild {}", self.guild_id);

        let (mut write, mut read) = socket.split();
        let mut keep_alive = tokio::time::interval(KEEP_ALIVE_PERIOD);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = keep_alive.tick() => {
                    write.send(Message::text(KEEP_ALIVE.to_string())).await?;
                    debug!("Sent a keep-alive for guild {}", self.guild_id);
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    async fn dispatch(&self, text: &str) {
        if let Err(e) = self.control.handle_message(self.guild_id, text).await {
            warn!("⚠️ Remote message for guild {} not applied: {:#}", self.guild_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            acquisition::MockAcquisitionBackend, AcquisitionPipeline, EventBus, PlaybackManager,
            SessionSettings,
        },
        config::Config,
        sources::{remote::decode, remote::RemoteMessage, MockItemLookup, MockStreamUrlBuilder},
    };

    fn sockets(shutdown: CancellationToken) -> RemoteSockets {
        let config = Config {
            // Nothing listens here; workers stay in their retry loop.
            jellyfin_server_address: "http://127.0.0.1:9".into(),
            ..Config::default()
        };
        let playback = Arc::new(PlaybackManager::new(
            Arc::new(AcquisitionPipeline::new(Arc::new(MockAcquisitionBackend::new()))),
            Arc::new(MockStreamUrlBuilder::new()),
            EventBus::new(8),
            SessionSettings::default(),
        ));
        let control = Arc::new(RemoteControl::new(Arc::new(MockItemLookup::new()), playback));
        RemoteSockets::new(
            Arc::new(JellyfinClient::new(&config).unwrap()),
            control,
            shutdown,
        )
    }

    #[test]
    fn keep_alive_is_a_session_message() {
        assert_eq!(decode(KEEP_ALIVE).unwrap(), RemoteMessage::KeepAlive);
    }

    #[tokio::test]
    async fn one_socket_per_guild_until_disconnect() {
        let sockets = sockets(CancellationToken::new());
        let guild = GuildId::new(8);

        sockets.connect(guild);
        let token = sockets.connections.get(&guild).unwrap().clone();
        sockets.connect(guild);
        assert_eq!(sockets.connections.len(), 1);
        assert!(!token.is_cancelled());

        sockets.disconnect(guild);
        assert!(token.is_cancelled());
        assert!(sockets.connections.is_empty());

        // Disconnecting twice is harmless.
        sockets.disconnect(guild);
    }

    #[tokio::test]
    async fn shutdown_cancels_every_socket() {
        let shutdown = CancellationToken::new();
        let sockets = sockets(shutdown.clone());
        sockets.connect(GuildId::new(1));
        sockets.connect(GuildId::new(2));

        shutdown.cancel();
        for entry in sockets.connections.iter() {
            assert!(entry.value().is_cancelled());
        }
    }
}
