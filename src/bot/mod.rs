//! # Bot Module
//!
//! Discord front end of guildtune.
//!
//! - Slash command registration and dispatch, plus `/play` autocomplete
//! - Voice connection management through songbird
//! - Voice state tracking, so a kicked bot resets the guild's playback
//! - Media-server session sockets that follow the voice connection
//!
//! Playback itself lives in [`crate::audio`]; this module only turns
//! interactions into session calls and session state into replies.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{transport::SongbirdTransport, PlaybackManager},
    config::Config,
    sources::{JellyfinClient, RemoteSockets, YouTubeClient},
};

/// Serenity event handler for guildtune.
///
/// Holds the shared playback state; every field is cheap to share across the
/// handler's concurrent event callbacks.
pub struct GuildTuneBot {
    config: Arc<Config>,
    /// Per-guild playback sessions
    pub playback: Arc<PlaybackManager>,
    transport: Arc<SongbirdTransport>,
    /// Present when the media server is enabled
    pub jellyfin: Option<Arc<JellyfinClient>>,
    /// Present when YouTube playback is enabled
    pub youtube: Option<Arc<YouTubeClient>>,
    /// Remote control sockets, present with the media server
    remote: Option<Arc<RemoteSockets>>,
}

impl GuildTuneBot {
    pub fn new(
        config: Arc<Config>,
        playback: Arc<PlaybackManager>,
        transport: Arc<SongbirdTransport>,
        jellyfin: Option<Arc<JellyfinClient>>,
        youtube: Option<Arc<YouTubeClient>>,
        remote: Option<Arc<RemoteSockets>>,
    ) -> Self {
        Self {
            config,
            playback,
            transport,
            jellyfin,
            youtube,
            remote,
        }
    }

    /// Registers slash commands, per guild when `GUILD_ID` is set.
    ///
    /// Guild commands show up almost immediately; global ones can take up to
    /// an hour to propagate.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ The bot is not a member of guild {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id, &self.config)
                    .await
                    .map_err(|e| {
                        error!("❌ Failed to register guild commands: {:?}", e);
                        anyhow::anyhow!("Could not register guild commands. Check that the bot has the 'applications.commands' scope in the guild.")
                    })?;
                info!("✅ Guild commands registered for {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx, &self.config)
                    .await
                    .map_err(|e| {
                        error!("❌ Failed to register global commands: {:?}", e);
                        anyhow::anyhow!("Could not register global commands. Check that the bot has the 'applications.commands' scope.")
                    })?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }

    pub async fn is_connected(&self, ctx: &Context, guild_id: GuildId) -> Result<bool> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird not initialized"))?;
        Ok(manager.get(guild_id).is_some())
    }

    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird not initialized"))?;

        match manager.join(guild_id, channel_id).await {
            Ok(_) => {
                info!("🔊 Joined voice channel {} in guild {}", channel_id, guild_id);
                if let Some(remote) = &self.remote {
                    remote.connect(guild_id);
                }
                Ok(())
            }
            Err(e) => {
                error!("❌ Failed to join voice in guild {}: {:?}", guild_id, e);
                Err(anyhow::anyhow!("Could not connect to the voice channel"))
            }
        }
    }

    /// Leaves voice and resets the guild's playback.
    pub async fn leave_voice_channel(&self, ctx: &Context, guild_id: GuildId) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird not initialized"))?;

        self.transport.forget(guild_id);
        if let Some(remote) = &self.remote {
            remote.disconnect(guild_id);
        }
        self.playback.disconnect(guild_id).await?;
        if manager.get(guild_id).is_some() {
            manager.remove(guild_id).await?;
        }

        info!("👋 Left voice in guild {}", guild_id);
        Ok(())
    }
}

#[async_trait]
impl EventHandler for GuildTuneBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guild(s)", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Failed to register commands: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("❌ Command failed: {:?}", e);
                }
            }
            Interaction::Autocomplete(autocomplete) => {
                if let Err(e) = handlers::handle_autocomplete(&ctx, autocomplete, self).await {
                    error!("❌ Autocomplete failed: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Resets playback when the bot is disconnected from voice by someone else.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        info!("🔌 Bot disconnected from voice in guild {}", guild_id);
        self.transport.forget(guild_id);
        if let Some(remote) = &self.remote {
            remote.disconnect(guild_id);
        }
        if let Err(e) = self.playback.disconnect(guild_id).await {
            error!("Failed to reset playback in guild {}: {:?}", guild_id, e);
        }
    }
}
