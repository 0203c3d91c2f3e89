use anyhow::Result;
use serenity::{
    model::{gateway::GatewayIntents, id::ApplicationId},
    Client,
};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod sources;
mod ui;

use crate::audio::{
    reporter::PlaystateReporter, transport::SongbirdTransport, AcquisitionPipeline, EventBus,
    PlaybackManager, SessionSettings,
};
use crate::bot::GuildTuneBot;
use crate::config::Config;
use crate::sources::{
    JellyfinClient, NoMediaServer, RemoteControl, RemoteSockets, StreamUrlBuilder, YouTubeClient,
    YtDlpBackend,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guildtune=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting guildtune v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("⚙️ {}", config.summary());
    let config = Arc::new(config);

    let bus = EventBus::default();
    let shutdown = CancellationToken::new();

    let jellyfin = if config.jellyfin_enabled {
        Some(Arc::new(JellyfinClient::new(&config)?))
    } else {
        None
    };
    let youtube = config
        .youtube_enabled
        .then(|| Arc::new(YouTubeClient::new(&config)));

    let streams: Arc<dyn StreamUrlBuilder> = match &jellyfin {
        Some(client) => client.clone(),
        None => Arc::new(NoMediaServer),
    };
    let pipeline = Arc::new(AcquisitionPipeline::new(Arc::new(
        YtDlpBackend::from_config(&config),
    )));
    let playback = Arc::new(PlaybackManager::new(
        pipeline,
        streams,
        bus.clone(),
        SessionSettings::from(config.as_ref()),
    ));

    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(
        songbird.clone(),
        playback.clone(),
        config.default_volume,
    )?);

    // Subscribe before anything can publish
    tokio::spawn(transport.clone().run(bus.subscribe_transport()));
    tokio::spawn(transport.clone().run_progress_ticker(
        Duration::from_millis(config.progress_interval_ms),
        shutdown.clone(),
    ));
    if let Some(client) = &jellyfin {
        let reporter = PlaystateReporter::new(
            client.clone(),
            Duration::from_secs(config.playstate_report_interval_secs),
        );
        tokio::spawn(reporter.run(bus.subscribe_playback()));
        info!("📡 Reporting playstate to Jellyfin");
    }

    // Sockets open per guild once the bot joins voice there
    let remote = jellyfin.as_ref().map(|client| {
        let control = Arc::new(RemoteControl::new(client.clone(), playback.clone()));
        Arc::new(RemoteSockets::new(client.clone(), control, shutdown.clone()))
    });

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = GuildTuneBot::new(
        config.clone(),
        playback,
        transport,
        jellyfin,
        youtube,
        remote,
    );

    let mut client = Client::builder(&config.discord_token, intents)
        .application_id(ApplicationId::new(config.application_id))
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {:?}", e);
            return;
        }
        warn!("⚠️ Shutdown signal received, closing...");
        shutdown.cancel();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

/// Checks that the external tools playback depends on are runnable.
async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Missing dependencies");
    }
}
