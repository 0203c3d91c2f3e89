use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    acquisition::AcquisitionPipeline,
    error::PlaybackError,
    events::{ControlCommand, EventBus, TransportSignal},
    session::{SessionDeps, SessionHandle, SessionSettings},
};
use crate::sources::StreamUrlBuilder;

/// Owns one playback session per guild.
///
/// Sessions are created on first use and live until the process exits; a
/// voice disconnect only resets them.
pub struct PlaybackManager {
    sessions: DashMap<GuildId, SessionHandle>,
    deps: SessionDeps,
}

impl PlaybackManager {
    pub fn new(
        pipeline: Arc<AcquisitionPipeline>,
        streams: Arc<dyn StreamUrlBuilder>,
        bus: EventBus,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            deps: SessionDeps {
                pipeline,
                streams,
                bus,
                settings,
            },
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.deps.bus
    }

    /// Returns the guild's session, starting it if needed.
    pub fn session(&self, guild_id: GuildId) -> SessionHandle {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🆕 Creating playback session for guild {}", guild_id);
                SessionHandle::spawn(guild_id, self.deps.clone())
            })
            .clone()
    }

    /// The guild's session, if one was ever started.
    pub fn existing_session(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild_id).map(|entry| entry.clone())
    }

    pub fn active_guilds(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Routes a transport report to its session. Signals for guilds without a session are dropped.
    pub fn transport_signal(&self, guild_id: GuildId, signal: TransportSignal) {
        let Some(session) = self.existing_session(guild_id) else {
            debug!("Dropping {:?} for guild {} without a session", signal, guild_id);
            return;
        };
        if let Err(e) = session.notify(signal) {
            debug!("Transport signal lost: {}", e);
        }
    }

    /// Applies a remote-control command to the guild's session.
    pub async fn dispatch(
        &self,
        guild_id: GuildId,
        command: ControlCommand,
    ) -> Result<(), PlaybackError> {
        self.session(guild_id).control(command).await
    }

    /// Resets the guild's session after the bot left its voice channel.
    pub async fn disconnect(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        match self.existing_session(guild_id) {
            Some(session) => session.reset().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            acquisition::MockAcquisitionBackend,
            events::TransportCommand,
            session::PlaybackState,
            Track,
        },
        sources::MockStreamUrlBuilder,
    };
    use std::time::Duration;

    fn manager() -> PlaybackManager {
        let mut streams = MockStreamUrlBuilder::new();
        streams
            .expect_build_stream_url()
            .returning(|_, id| Ok(format!("https://jf/Audio/{id}/universal")));
        PlaybackManager::new(
            Arc::new(AcquisitionPipeline::new(Arc::new(MockAcquisitionBackend::new()))),
            Arc::new(streams),
            EventBus::new(32),
            SessionSettings::default(),
        )
    }

    #[tokio::test]
    async fn sessions_are_created_once_per_guild() {
        let manager = manager();
        let first = manager.session(GuildId::new(1));
        let again = manager.session(GuildId::new(1));
        manager.session(GuildId::new(2));

        assert_eq!(first.guild_id(), again.guild_id());
        let mut guilds = manager.active_guilds();
        guilds.sort();
        assert_eq!(guilds, vec![GuildId::new(1), GuildId::new(2)]);
    }

    #[tokio::test]
    async fn guilds_do_not_share_queues() {
        let manager = manager();
        manager
            .session(GuildId::new(1))
            .enqueue(vec![Track::remote_stream("a", "A")])
            .await
            .unwrap();

        let other = manager.session(GuildId::new(2)).snapshot().await.unwrap();
        assert!(other.queue.tracks.is_empty());
        assert_eq!(other.state, PlaybackState::Idle);
    }

    async fn next_play(
        transport: &mut tokio::sync::broadcast::Receiver<TransportCommand>,
        guild: GuildId,
    ) -> (String, u64) {
        let command = tokio::time::timeout(Duration::from_secs(2), transport.recv())
            .await
            .unwrap()
            .unwrap();
        match command {
            TransportCommand::Play {
                guild_id,
                generation,
                track,
                ..
            } => {
                assert_eq!(guild_id, guild);
                (track.id().to_string(), generation)
            }
            other => panic!("unexpected transport command {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_signals_reach_the_right_session() {
        let manager = manager();
        let mut transport = manager.bus().subscribe_transport();
        let guild = GuildId::new(5);
        manager
            .session(guild)
            .enqueue(vec![Track::remote_stream("a", "A"), Track::remote_stream("b", "B")])
            .await
            .unwrap();

        let (first, generation) = next_play(&mut transport, guild).await;
        manager.transport_signal(guild, TransportSignal::Ended { generation });
        manager.transport_signal(GuildId::new(99), TransportSignal::Ended { generation });
        let (second, _) = next_play(&mut transport, guild).await;

        let played = vec![first, second];
        assert_eq!(played, vec!["a", "b"]);
        assert!(manager.existing_session(GuildId::new(99)).is_none());
    }

    #[tokio::test]
    async fn disconnect_resets_without_dropping_the_session() {
        let manager = manager();
        let guild = GuildId::new(3);
        assert!(manager.disconnect(guild).await.is_ok());

        manager
            .dispatch(
                guild,
                ControlCommand::Enqueue {
                    tracks: vec![Track::remote_stream("a", "A")],
                    position: Default::default(),
                },
            )
            .await
            .unwrap();
        manager.disconnect(guild).await.unwrap();

        let snapshot = manager.session(guild).snapshot().await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.queue.tracks.is_empty());
        assert_eq!(manager.active_guilds(), vec![guild]);
    }
}
