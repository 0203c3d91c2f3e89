//! Songbird-backed audio transport.
//!
//! Executes the transport commands sessions publish and reports back when the
//! track it considers current ends, plus periodic progress for playing tracks.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::GuildId;
use songbird::{
    input::{File, HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    events::{ResolvedSource, TransportCommand, TransportSignal},
    player::PlaybackManager,
};

/// The track each guild is playing, tagged with the generation its session gave it.
#[derive(Clone)]
struct CurrentTrack {
    handle: TrackHandle,
    generation: u64,
}

type CurrentTracks = Arc<DashMap<GuildId, CurrentTrack>>;

pub struct SongbirdTransport {
    songbird: Arc<Songbird>,
    playback: Arc<PlaybackManager>,
    http: reqwest::Client,
    volume: f32,
    current: CurrentTracks,
}

impl SongbirdTransport {
    pub fn new(
        songbird: Arc<Songbird>,
        playback: Arc<PlaybackManager>,
        volume: f32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            songbird,
            playback,
            http,
            volume,
            current: Arc::new(DashMap::new()),
        })
    }

    pub async fn run(self: Arc<Self>, mut commands: broadcast::Receiver<TransportCommand>) {
        info!("🔊 Audio transport started");
        loop {
            match commands.recv().await {
                Ok(command) => {
                    let guild_id = command.guild_id();
                    if let Err(e) = self.apply(command).await {
                        error!("❌ Transport command failed in guild {}: {:?}", guild_id, e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("⚠️ Audio transport lagged, skipped {} command(s)", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Audio transport stopped");
    }

    async fn apply(&self, command: TransportCommand) -> Result<()> {
        match command {
            TransportCommand::Play {
                guild_id,
                generation,
                track,
                source,
            } => {
                info!("▶️ Streaming '{}' from {} in guild {}", track.name(), source, guild_id);
                self.play(guild_id, generation, source).await
            }
            TransportCommand::Stop { guild_id } => {
                self.forget(guild_id);
                Ok(())
            }
            TransportCommand::Pause { guild_id } => {
                if let Some(handle) = self.current_track(guild_id) {
                    handle
                        .pause()
                        .map_err(|e| anyhow::anyhow!("failed to pause: {}", e))?;
                }
                Ok(())
            }
            TransportCommand::Unpause { guild_id } => {
                if let Some(handle) = self.current_track(guild_id) {
                    handle
                        .play()
                        .map_err(|e| anyhow::anyhow!("failed to resume: {}", e))?;
                }
                Ok(())
            }
        }
    }

    async fn play(&self, guild_id: GuildId, generation: u64, source: ResolvedSource) -> Result<()> {
        let Some(call) = self.songbird.get(guild_id) else {
            anyhow::bail!("not connected to a voice channel");
        };

        // Stop the previous track first; its end event is then no longer current.
        self.forget(guild_id);

        let input: Input = match source {
            ResolvedSource::Url(url) => HttpRequest::new(self.http.clone(), url).into(),
            ResolvedSource::File(path) => File::new(path).into(),
        };

        let handle = call.lock().await.play_input(input);
        let _ = handle.set_volume(self.volume);

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackEndNotifier {
                        guild_id,
                        generation,
                        handle: handle.clone(),
                        current: self.current.clone(),
                        playback: self.playback.clone(),
                    },
                )
                .map_err(|e| anyhow::anyhow!("failed to watch track end: {}", e))?;
        }

        self.current
            .insert(guild_id, CurrentTrack { handle, generation });
        Ok(())
    }

    fn current_track(&self, guild_id: GuildId) -> Option<TrackHandle> {
        self.current.get(&guild_id).map(|entry| entry.handle.clone())
    }

    /// Stops and drops whatever the guild was playing, e.g. after leaving voice.
    pub fn forget(&self, guild_id: GuildId) {
        if let Some((_, current)) = self.current.remove(&guild_id) {
            debug!("⏹️ Stopping current track in guild {}", guild_id);
            let _ = current.handle.stop();
        }
    }

    /// Emits a progress signal for every playing track each `period`.
    pub async fn run_progress_ticker(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.report_progress().await,
            }
        }
        debug!("Progress ticker stopped");
    }

    async fn report_progress(&self) {
        let playing: Vec<(GuildId, CurrentTrack)> = self
            .current
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (guild_id, current) in playing {
            match current.handle.get_info().await {
                Ok(state) if matches!(state.playing, PlayMode::Play) => {
                    self.playback.transport_signal(
                        guild_id,
                        TransportSignal::Progress {
                            generation: current.generation,
                            elapsed: state.position,
                        },
                    );
                }
                Ok(_) => {}
                Err(e) => debug!("No track state for guild {}: {:?}", guild_id, e),
            }
        }
    }
}

/// Fires `Ended` for a track only while it is still the guild's current one.
struct TrackEndNotifier {
    guild_id: GuildId,
    generation: u64,
    handle: TrackHandle,
    current: CurrentTracks,
    playback: Arc<PlaybackManager>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let was_current = self
            .current
            .remove_if(&self.guild_id, |_, current| {
                current.handle.uuid() == self.handle.uuid()
            })
            .is_some();
        if !was_current {
            return None;
        }

        if let EventContext::Track(tracks) = ctx {
            for (state, _) in *tracks {
                if let PlayMode::Errored(e) = &state.playing {
                    warn!("❌ Track errored in guild {}: {:?}", self.guild_id, e);
                }
            }
        }

        debug!("🎵 Track ended in guild {}", self.guild_id);
        self.playback.transport_signal(
            self.guild_id,
            TransportSignal::Ended {
                generation: self.generation,
            },
        );
        None
    }
}
