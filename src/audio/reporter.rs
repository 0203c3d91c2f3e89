use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serenity::model::id::GuildId;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::events::PlaybackEvent;
use crate::sources::jellyfin::TICKS_PER_MILLISECOND;

/// Body of a playstate report, serialized the way the media server expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaystateReport {
    pub item_id: String,
    pub position_ticks: u64,
    pub is_paused: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaystateSink: Send + Sync {
    async fn report_start(&self, report: PlaystateReport) -> Result<()>;
    async fn report_progress(&self, report: PlaystateReport) -> Result<()>;
    async fn report_stopped(&self, report: PlaystateReport) -> Result<()>;
}

pub fn to_ticks(position: Duration) -> u64 {
    (position.as_millis() as u64).saturating_mul(TICKS_PER_MILLISECOND)
}

struct GuildPlaystate {
    item_id: String,
    position: Duration,
    paused: bool,
    last_progress: DateTime<Utc>,
}

impl GuildPlaystate {
    fn report(&self) -> PlaystateReport {
        PlaystateReport {
            item_id: self.item_id.clone(),
            position_ticks: to_ticks(self.position),
            is_paused: self.paused,
        }
    }
}

/// Mirrors playback of media-server tracks back to the server.
///
/// Only remote-stream tracks are reported; downloaded tracks are unknown to
/// the server. Progress is throttled per guild.
pub struct PlaystateReporter {
    sink: Arc<dyn PlaystateSink>,
    interval: chrono::Duration,
    guilds: HashMap<GuildId, GuildPlaystate>,
}

impl PlaystateReporter {
    pub fn new(sink: Arc<dyn PlaystateSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval: chrono::Duration::from_std(interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
            guilds: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut events: broadcast::Receiver<PlaybackEvent>) {
        info!("📡 Playstate reporter started");
        loop {
            match events.recv().await {
                Ok(event) => self.handle(event, Utc::now()).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("⚠️ Playstate reporter lagged, skipped {} event(s)", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Playstate reporter stopped");
    }

    pub async fn handle(&mut self, event: PlaybackEvent, now: DateTime<Utc>) {
        match event {
            PlaybackEvent::Started { guild_id, track } => {
                if !track.is_remote_stream() {
                    self.guilds.remove(&guild_id);
                    return;
                }
                let state = GuildPlaystate {
                    item_id: track.id().to_string(),
                    position: Duration::ZERO,
                    paused: false,
                    last_progress: now,
                };
                debug!("Reporting start of '{}' in guild {}", state.item_id, guild_id);
                let report = state.report();
                self.guilds.insert(guild_id, state);
                log_failure(guild_id, "start", self.sink.report_start(report).await);
            }
            PlaybackEvent::Stopped { guild_id } => {
                if let Some(state) = self.guilds.remove(&guild_id) {
                    debug!("Reporting stop of '{}' in guild {}", state.item_id, guild_id);
                    log_failure(guild_id, "stop", self.sink.report_stopped(state.report()).await);
                }
            }
            PlaybackEvent::Paused { guild_id } => self.set_paused(guild_id, true).await,
            PlaybackEvent::Resumed { guild_id } => self.set_paused(guild_id, false).await,
            PlaybackEvent::Progress { guild_id, elapsed } => {
                let Some(state) = self.guilds.get_mut(&guild_id) else {
                    return;
                };
                state.position = elapsed;
                if now - state.last_progress < self.interval {
                    return;
                }
                state.last_progress = now;
                let report = state.report();
                log_failure(guild_id, "progress", self.sink.report_progress(report).await);
            }
        }
    }

    async fn set_paused(&mut self, guild_id: GuildId, paused: bool) {
        let Some(state) = self.guilds.get_mut(&guild_id) else {
            return;
        };
        state.paused = paused;
        let report = state.report();
        log_failure(guild_id, "pause state", self.sink.report_progress(report).await);
    }
}

fn log_failure(guild_id: GuildId, what: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("⚠️ Failed to report playback {} for guild {}: {:#}", what, guild_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Track;
    use chrono::TimeZone;
    use mockall::Sequence;

    const GUILD: GuildId = GuildId::new(11);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn started(track: Track) -> PlaybackEvent {
        PlaybackEvent::Started {
            guild_id: GUILD,
            track,
        }
    }

    fn progress(secs: u64) -> PlaybackEvent {
        PlaybackEvent::Progress {
            guild_id: GUILD,
            elapsed: Duration::from_secs(secs),
        }
    }

    #[test]
    fn ticks_are_ten_thousand_per_millisecond() {
        assert_eq!(to_ticks(Duration::from_millis(1)), 10_000);
        assert_eq!(to_ticks(Duration::from_secs(3)), 30_000_000);
    }

    #[test]
    fn reports_serialize_in_pascal_case() {
        let json = serde_json::to_value(PlaystateReport {
            item_id: "a".into(),
            position_ticks: 5,
            is_paused: true,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "ItemId": "a", "PositionTicks": 5, "IsPaused": true })
        );
    }

    #[tokio::test]
    async fn remote_stream_lifecycle_is_reported() {
        let mut sink = MockPlaystateSink::new();
        let mut seq = Sequence::new();
        sink.expect_report_start()
            .withf(|r| r.item_id == "a" && r.position_ticks == 0 && !r.is_paused)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        sink.expect_report_progress()
            .withf(|r| r.position_ticks == to_ticks(Duration::from_secs(6)) && !r.is_paused)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        sink.expect_report_progress()
            .withf(|r| r.is_paused)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        sink.expect_report_stopped()
            .withf(|r| r.item_id == "a" && r.position_ticks == to_ticks(Duration::from_secs(7)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut reporter = PlaystateReporter::new(Arc::new(sink), Duration::from_secs(5));
        reporter.handle(started(Track::remote_stream("a", "A")), at(0)).await;
        // Throttled: only the tick 5s after the start goes out.
        reporter.handle(progress(1), at(1)).await;
        reporter.handle(progress(6), at(6)).await;
        reporter.handle(progress(7), at(7)).await;
        reporter
            .handle(PlaybackEvent::Paused { guild_id: GUILD }, at(7))
            .await;
        reporter
            .handle(PlaybackEvent::Stopped { guild_id: GUILD }, at(8))
            .await;
        // Nothing is active any more.
        reporter.handle(progress(9), at(20)).await;
    }

    #[tokio::test]
    async fn downloaded_tracks_are_not_reported() {
        let sink = MockPlaystateSink::new();
        let mut reporter = PlaystateReporter::new(Arc::new(sink), Duration::from_secs(5));

        reporter
            .handle(started(Track::downloadable("v", "V", "https://yt/v")), at(0))
            .await;
        reporter.handle(progress(30), at(30)).await;
        reporter
            .handle(PlaybackEvent::Resumed { guild_id: GUILD }, at(31))
            .await;
        reporter
            .handle(PlaybackEvent::Stopped { guild_id: GUILD }, at(32))
            .await;
    }

    #[tokio::test]
    async fn sink_failures_are_swallowed() {
        let mut sink = MockPlaystateSink::new();
        sink.expect_report_start()
            .returning(|_| Err(anyhow::anyhow!("server unreachable")));
        sink.expect_report_stopped()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("server unreachable")));

        let mut reporter = PlaystateReporter::new(Arc::new(sink), Duration::from_secs(5));
        reporter.handle(started(Track::remote_stream("a", "A")), at(0)).await;
        reporter
            .handle(PlaybackEvent::Stopped { guild_id: GUILD }, at(1))
            .await;
    }

    #[tokio::test]
    async fn run_exits_when_the_bus_closes() {
        let mut sink = MockPlaystateSink::new();
        sink.expect_report_start().times(1).returning(|_| Ok(()));
        let (tx, rx) = broadcast::channel(4);
        tx.send(started(Track::remote_stream("a", "A"))).unwrap();
        drop(tx);

        let reporter = PlaystateReporter::new(Arc::new(sink), Duration::from_secs(5));
        tokio::time::timeout(Duration::from_secs(2), reporter.run(rx))
            .await
            .expect("reporter did not stop");
    }
}
