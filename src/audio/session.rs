//! Per-guild playback state machine.
//!
//! Every guild gets one [`GuildSession`] running as an actor on its own task.
//! Commands, transport signals and acquisition re-checks all arrive through
//! one unbounded channel and are applied one at a time, in arrival order.
//! Nothing in here awaits: acquisition jobs run on their own tasks and the
//! session only re-checks their state on a timer.

use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{
    acquisition::{AcquisitionPipeline, EnsureReady},
    error::PlaybackError,
    events::{
        ControlCommand, EnqueuePosition, EventBus, PlaybackEvent, ResolvedSource,
        TransportCommand, TransportSignal,
    },
    queue::{PlayQueue, QueueInfo},
    track::{AcquisitionState, Track, TrackSource},
};
use crate::{config::Config, sources::StreamUrlBuilder};

/// Tunables shared by all sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Delay between two checks of a track that is still being acquired.
    pub poll_interval: Duration,
    /// Checks after which a still-acquiring track is skipped.
    pub max_polls: u32,
    /// Remaining play time below which the next track is prefetched.
    pub prefetch_window: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 600,
            prefetch_window: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.acquisition_poll_interval_ms),
            max_polls: config.max_acquisition_polls,
            prefetch_window: Duration::from_millis(config.prefetch_window_ms),
        }
    }
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub pipeline: Arc<AcquisitionPipeline>,
    pub streams: Arc<dyn StreamUrlBuilder>,
    pub bus: EventBus,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    pub active_track: Option<Track>,
    pub progress: Duration,
    pub queue: QueueInfo,
}

impl SessionSnapshot {
    pub fn active_track_number(&self) -> usize {
        self.queue.active_track_number
    }
}

type Reply<T> = oneshot::Sender<T>;

enum SessionCommand {
    Enqueue {
        tracks: Vec<Track>,
        position: EnqueuePosition,
        reply: Reply<Result<usize, PlaybackError>>,
    },
    Next(Reply<Result<(), PlaybackError>>),
    Previous(Reply<Result<(), PlaybackError>>),
    Goto {
        track_number: usize,
        reply: Reply<Result<(), PlaybackError>>,
    },
    Remove {
        track_number: usize,
        reply: Reply<bool>,
    },
    Pause(Reply<Result<(), PlaybackError>>),
    Unpause(Reply<Result<(), PlaybackError>>),
    TogglePause(Reply<Result<bool, PlaybackError>>),
    Stop(Reply<()>),
    Reset(Reply<()>),
    Snapshot(Reply<SessionSnapshot>),
    Transport(TransportSignal),
    AcquisitionPoll { generation: u64, attempt: u32 },
}

/// Cheap, cloneable entry point into one guild's session.
#[derive(Clone)]
pub struct SessionHandle {
    guild_id: GuildId,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Starts the session actor for `guild_id`. Must be called inside a tokio runtime.
    pub fn spawn(guild_id: GuildId, deps: SessionDeps) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = GuildSession::new(guild_id, deps, tx.downgrade());
        tokio::spawn(session.run(rx));
        Self { guild_id, tx }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, PlaybackError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| PlaybackError::SessionClosed(self.guild_id))?;
        response
            .await
            .map_err(|_| PlaybackError::SessionClosed(self.guild_id))
    }

    /// Appends tracks; starts playback when idle. Returns the new queue length.
    pub async fn enqueue(&self, tracks: Vec<Track>) -> Result<usize, PlaybackError> {
        self.enqueue_at(tracks, EnqueuePosition::Last).await
    }

    /// Inserts tracks after the active one; starts playback when idle.
    pub async fn enqueue_next(&self, tracks: Vec<Track>) -> Result<usize, PlaybackError> {
        self.enqueue_at(tracks, EnqueuePosition::Next).await
    }

    pub async fn enqueue_at(
        &self,
        tracks: Vec<Track>,
        position: EnqueuePosition,
    ) -> Result<usize, PlaybackError> {
        self.request(|reply| SessionCommand::Enqueue {
            tracks,
            position,
            reply,
        })
        .await?
    }

    pub async fn next(&self) -> Result<(), PlaybackError> {
        self.request(SessionCommand::Next).await?
    }

    pub async fn previous(&self) -> Result<(), PlaybackError> {
        self.request(SessionCommand::Previous).await?
    }

    pub async fn goto(&self, track_number: usize) -> Result<(), PlaybackError> {
        self.request(|reply| SessionCommand::Goto {
            track_number,
            reply,
        })
        .await?
    }

    pub async fn remove(&self, track_number: usize) -> Result<bool, PlaybackError> {
        self.request(|reply| SessionCommand::Remove {
            track_number,
            reply,
        })
        .await
    }

    pub async fn pause(&self) -> Result<(), PlaybackError> {
        self.request(SessionCommand::Pause).await?
    }

    pub async fn unpause(&self) -> Result<(), PlaybackError> {
        self.request(SessionCommand::Unpause).await?
    }

    /// Flips pause. Returns whether the session is paused afterwards.
    pub async fn toggle_pause(&self) -> Result<bool, PlaybackError> {
        self.request(SessionCommand::TogglePause).await?
    }

    pub async fn stop(&self) -> Result<(), PlaybackError> {
        self.request(SessionCommand::Stop).await
    }

    /// Returns the session to a fresh idle state, e.g. after a voice disconnect.
    pub async fn reset(&self) -> Result<(), PlaybackError> {
        self.request(SessionCommand::Reset).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, PlaybackError> {
        self.request(SessionCommand::Snapshot).await
    }

    /// Applies a remote-control command.
    pub async fn control(&self, command: ControlCommand) -> Result<(), PlaybackError> {
        match command {
            ControlCommand::Enqueue { tracks, position } => {
                self.enqueue_at(tracks, position).await.map(|_| ())
            }
            ControlCommand::Next => self.next().await,
            ControlCommand::Previous => self.previous().await,
            ControlCommand::Stop => self.stop().await,
            ControlCommand::Pause => self.pause().await,
            ControlCommand::Unpause => self.unpause().await,
            ControlCommand::TogglePause => self.toggle_pause().await.map(|_| ()),
            ControlCommand::Goto { track_number } => self.goto(track_number).await,
            ControlCommand::Remove { track_number } => {
                if self.remove(track_number).await? {
                    Ok(())
                } else {
                    Err(PlaybackError::InvalidTrackNumber(track_number))
                }
            }
        }
    }

    /// Forwards a transport signal without waiting for it to be applied.
    pub fn notify(&self, signal: TransportSignal) -> Result<(), PlaybackError> {
        self.tx
            .send(SessionCommand::Transport(signal))
            .map_err(|_| PlaybackError::SessionClosed(self.guild_id))
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Advance,
    Retreat,
    Jump(usize),
}

impl Step {
    fn error(self) -> PlaybackError {
        match self {
            Step::Advance => PlaybackError::NoNextTrack,
            Step::Retreat => PlaybackError::NoPreviousTrack,
            Step::Jump(track_number) => PlaybackError::InvalidTrackNumber(track_number),
        }
    }
}

struct GuildSession {
    guild_id: GuildId,
    queue: PlayQueue,
    playing: bool,
    paused: bool,
    progress: Duration,
    /// The transport was told to play the active track and hasn't finished it.
    sounding: bool,
    /// The active track is still being acquired.
    waiting: bool,
    /// A pause requested while waiting, applied once the track starts.
    pause_on_start: bool,
    /// Bumped on every cursor move; scheduled re-checks from older generations are stale.
    generation: u64,
    deps: SessionDeps,
    tx: mpsc::WeakUnboundedSender<SessionCommand>,
}

impl GuildSession {
    fn new(
        guild_id: GuildId,
        deps: SessionDeps,
        tx: mpsc::WeakUnboundedSender<SessionCommand>,
    ) -> Self {
        Self {
            guild_id,
            queue: PlayQueue::new(),
            playing: false,
            paused: false,
            progress: Duration::ZERO,
            sounding: false,
            waiting: false,
            pause_on_start: false,
            generation: 0,
            deps,
            tx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        debug!("🎛️ Playback session started for guild {}", self.guild_id);
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        debug!("Playback session for guild {} closed", self.guild_id);
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Enqueue {
                tracks,
                position,
                reply,
            } => {
                let _ = reply.send(self.enqueue(tracks, position));
            }
            SessionCommand::Next(reply) => {
                let _ = reply.send(self.move_and_play(Step::Advance));
            }
            SessionCommand::Previous(reply) => {
                let _ = reply.send(self.move_and_play(Step::Retreat));
            }
            SessionCommand::Goto {
                track_number,
                reply,
            } => {
                let _ = reply.send(self.move_and_play(Step::Jump(track_number)));
            }
            SessionCommand::Remove {
                track_number,
                reply,
            } => {
                let _ = reply.send(self.queue.remove_at(track_number));
            }
            SessionCommand::Pause(reply) => {
                let _ = reply.send(self.set_paused(true));
            }
            SessionCommand::Unpause(reply) => {
                let _ = reply.send(self.set_paused(false));
            }
            SessionCommand::TogglePause(reply) => {
                let wanted = !self.paused;
                let _ = reply.send(self.set_paused(wanted).map(|_| wanted));
            }
            SessionCommand::Stop(reply) => {
                self.stop();
                let _ = reply.send(());
            }
            SessionCommand::Reset(reply) => {
                info!("🔌 Resetting playback session for guild {}", self.guild_id);
                self.stop();
                let _ = reply.send(());
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Transport(signal) if signal.generation() != self.generation => {
                debug!(
                    "Dropping stale transport signal in guild {} (generation {} vs {})",
                    self.guild_id,
                    signal.generation(),
                    self.generation
                );
            }
            SessionCommand::Transport(TransportSignal::Ended { .. }) => self.on_track_ended(),
            SessionCommand::Transport(TransportSignal::Progress { elapsed, .. }) => {
                self.on_progress(elapsed)
            }
            SessionCommand::AcquisitionPoll {
                generation,
                attempt,
            } => self.on_acquisition_poll(generation, attempt),
        }
    }

    fn state(&self) -> PlaybackState {
        match (self.playing, self.paused) {
            (false, _) => PlaybackState::Idle,
            (true, false) => PlaybackState::Playing,
            (true, true) => PlaybackState::Paused,
        }
    }

    fn enqueue(
        &mut self,
        tracks: Vec<Track>,
        position: EnqueuePosition,
    ) -> Result<usize, PlaybackError> {
        for track in &tracks {
            track.validate()?;
        }

        let count = tracks.len();
        let length = match position {
            EnqueuePosition::Last => self.queue.enqueue_append(tracks),
            EnqueuePosition::Next => self.queue.enqueue_next(tracks),
        };
        info!(
            "➕ Enqueued {} track(s) ({:?}) in guild {}, queue length {}",
            count,
            position,
            self.guild_id,
            self.queue.len()
        );

        if self.state() == PlaybackState::Idle {
            if let Err(e) = self.move_and_play(Step::Advance) {
                debug!("Nothing to start in guild {}: {}", self.guild_id, e);
            }
        }

        Ok(length)
    }

    fn move_and_play(&mut self, step: Step) -> Result<(), PlaybackError> {
        let moved = match step {
            Step::Advance => self.queue.advance(),
            Step::Retreat => self.queue.retreat(),
            Step::Jump(track_number) => self.queue.jump_to(track_number),
        };
        if !moved {
            return Err(step.error());
        }

        self.start_active();
        Ok(())
    }

    /// Starts the track under the cursor, skipping forward past tracks that can't play.
    fn start_active(&mut self) {
        self.generation += 1;
        self.progress = Duration::ZERO;
        self.waiting = false;

        loop {
            let Some(track) = self.queue.active_track().cloned() else {
                self.settle_idle();
                return;
            };

            match self.deps.pipeline.ensure_ready(&track) {
                EnsureReady::AlreadyReady => match self.resolve_source(&track) {
                    Ok(source) => {
                        self.play(track, source);
                        return;
                    }
                    Err(e) => warn!(
                        "⚠️ No playable source for '{}' in guild {}: {:#}",
                        track.name(),
                        self.guild_id,
                        e
                    ),
                },
                EnsureReady::Started | EnsureReady::AlreadyInProgress => {
                    self.wait_for(&track);
                    return;
                }
                EnsureReady::Failed => warn!(
                    "⏭️ Skipping '{}' in guild {}, it could not be acquired",
                    track.name(),
                    self.guild_id
                ),
            }

            if !self.queue.advance() {
                info!("📭 No playable track left in guild {}", self.guild_id);
                self.settle_idle();
                return;
            }
            self.generation += 1;
        }
    }

    fn resolve_source(&self, track: &Track) -> anyhow::Result<ResolvedSource> {
        match track.source() {
            TrackSource::RemoteStream => self
                .deps
                .streams
                .build_stream_url(self.guild_id, track.id())
                .map(ResolvedSource::Url),
            TrackSource::Downloadable(source) => source
                .acquisition()
                .artifact()
                .map(ResolvedSource::File)
                .ok_or_else(|| anyhow::anyhow!("track '{}' has no local artifact", track.id())),
        }
    }

    fn play(&mut self, track: Track, source: ResolvedSource) {
        if self.sounding {
            self.deps.bus.send_playback(PlaybackEvent::Stopped {
                guild_id: self.guild_id,
            });
        }

        self.playing = true;
        self.paused = false;
        self.waiting = false;
        self.sounding = true;

        info!(
            "🎵 Playing '{}' ({}/{}) in guild {}",
            track.name(),
            self.queue.active_track_number(),
            self.queue.len(),
            self.guild_id
        );
        self.deps.bus.send_transport(TransportCommand::Play {
            guild_id: self.guild_id,
            generation: self.generation,
            track: track.clone(),
            source,
        });
        self.deps.bus.send_playback(PlaybackEvent::Started {
            guild_id: self.guild_id,
            track,
        });

        if std::mem::take(&mut self.pause_on_start) {
            if let Err(e) = self.set_paused(true) {
                debug!("Deferred pause not applied in guild {}: {}", self.guild_id, e);
            }
        }
    }

    fn wait_for(&mut self, track: &Track) {
        self.silence();
        self.playing = true;
        self.paused = self.pause_on_start;
        self.waiting = true;

        info!(
            "⏳ Waiting for '{}' to be acquired in guild {}",
            track.name(),
            self.guild_id
        );
        self.schedule_poll(1);
    }

    fn schedule_poll(&self, attempt: u32) {
        let tx = self.tx.clone();
        let generation = self.generation;
        let interval = self.deps.settings.poll_interval;

        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(SessionCommand::AcquisitionPoll {
                    generation,
                    attempt,
                });
            }
        });
    }

    fn on_acquisition_poll(&mut self, generation: u64, attempt: u32) {
        if generation != self.generation || !self.waiting {
            debug!(
                "Stale acquisition check in guild {} (generation {} vs {})",
                self.guild_id, generation, self.generation
            );
            return;
        }

        let still_acquiring = self
            .queue
            .active_track()
            .and_then(Track::acquisition_state)
            == Some(AcquisitionState::Acquiring);

        if !still_acquiring {
            self.start_active();
            return;
        }

        if attempt < self.deps.settings.max_polls {
            self.schedule_poll(attempt + 1);
            return;
        }

        warn!(
            "⌛ Gave up waiting for acquisition after {} checks in guild {}",
            attempt, self.guild_id
        );
        if let Err(e) = self.move_and_play(Step::Advance) {
            debug!("Nothing after the stalled track in guild {}: {}", self.guild_id, e);
            self.settle_idle();
        }
    }

    fn on_track_ended(&mut self) {
        if self.state() != PlaybackState::Playing || self.waiting || !self.sounding {
            debug!(
                "Ignoring track end in guild {} (state {:?}, waiting {})",
                self.guild_id,
                self.state(),
                self.waiting
            );
            return;
        }

        self.sounding = false;
        self.deps.bus.send_playback(PlaybackEvent::Stopped {
            guild_id: self.guild_id,
        });

        if self.move_and_play(Step::Advance).is_err() {
            info!("🏁 Reached the end of the queue in guild {}", self.guild_id);
            self.settle_idle();
        }
    }

    fn on_progress(&mut self, elapsed: Duration) {
        if !self.sounding || self.waiting || self.queue.active_track().is_none() {
            return;
        }

        self.progress = elapsed;
        self.deps.bus.send_playback(PlaybackEvent::Progress {
            guild_id: self.guild_id,
            elapsed,
        });
        self.prefetch_next();
    }

    fn prefetch_next(&self) {
        let (Some(active), Some(next)) = (self.queue.active_track(), self.queue.peek_next())
        else {
            return;
        };
        if next.acquisition_state() != Some(AcquisitionState::NotStarted) {
            return;
        }

        let remaining = active.duration().saturating_sub(self.progress);
        if remaining > self.deps.settings.prefetch_window {
            return;
        }

        debug!(
            "🔮 Prefetching '{}' in guild {}, {}s left on '{}'",
            next.name(),
            self.guild_id,
            remaining.as_secs(),
            active.name()
        );
        self.deps.pipeline.ensure_ready(next);
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), PlaybackError> {
        if !self.playing {
            return Err(PlaybackError::NotPlaying);
        }
        if self.paused == paused {
            return Ok(());
        }

        self.paused = paused;
        let guild_id = self.guild_id;
        if self.waiting {
            // Nothing is sounding yet; the transport hears about it once the track starts.
            self.pause_on_start = paused;
            info!(
                "⏸️ Pause set to {} for the track still being acquired in guild {}",
                paused, guild_id
            );
            return Ok(());
        }
        if paused {
            info!("⏸️ Paused playback in guild {}", guild_id);
            self.deps.bus.send_transport(TransportCommand::Pause { guild_id });
            self.deps.bus.send_playback(PlaybackEvent::Paused { guild_id });
        } else {
            info!("▶️ Resumed playback in guild {}", guild_id);
            self.deps.bus.send_transport(TransportCommand::Unpause { guild_id });
            self.deps.bus.send_playback(PlaybackEvent::Resumed { guild_id });
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.queue.clear();
        if std::mem::take(&mut self.sounding) {
            self.deps.bus.send_playback(PlaybackEvent::Stopped {
                guild_id: self.guild_id,
            });
        }
        self.deps.bus.send_transport(TransportCommand::Stop {
            guild_id: self.guild_id,
        });
        self.clear_flags();
        info!("⏹️ Playback stopped and queue cleared in guild {}", self.guild_id);
    }

    /// Goes idle, silencing the transport if it was still playing something.
    fn settle_idle(&mut self) {
        self.silence();
        self.clear_flags();
    }

    fn silence(&mut self) {
        if !std::mem::take(&mut self.sounding) {
            return;
        }
        self.deps.bus.send_transport(TransportCommand::Stop {
            guild_id: self.guild_id,
        });
        self.deps.bus.send_playback(PlaybackEvent::Stopped {
            guild_id: self.guild_id,
        });
    }

    fn clear_flags(&mut self) {
        self.playing = false;
        self.paused = false;
        self.waiting = false;
        self.pause_on_start = false;
        self.progress = Duration::ZERO;
        self.generation += 1;
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            active_track: self.queue.active_track().cloned(),
            progress: self.progress,
            queue: self.queue.info(),
        }
    }
}
