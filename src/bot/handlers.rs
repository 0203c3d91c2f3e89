use anyhow::Result;
use rand::seq::SliceRandom;
use serenity::{
    builder::{
        CreateAutocompleteResponse, CreateEmbed, CreateInteractionResponse,
        CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    audio::{EnqueuePosition, PlaybackError, Track},
    bot::{commands::MAX_RANDOM_TRACKS, GuildTuneBot},
    sources::{SearchHint, SearchKind},
    ui::embeds,
};

/// Autocomplete values carry an item id behind this prefix instead of a search term.
const ITEM_PREFIX: &str = "item:";
const AUTOCOMPLETE_LIMIT: usize = 20;
/// Discord rejects choice names longer than 100 characters.
const CHOICE_NAME_LEN: usize = 90;
const DEFAULT_RANDOM_TRACKS: i64 = 20;
const SHUFFLE_MODE: i64 = 1;

/// Why the bot could not get into the caller's voice channel.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("you are not in a voice channel")]
    NotInVoice,
    #[error("guild {0} is not cached")]
    GuildUnavailable(GuildId),
    #[error("voice connection failed: {0:#}")]
    Connection(anyhow::Error),
}

/// Dispatches slash commands
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &GuildTuneBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside of a guild"))?;

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "playyt" => handle_playyt(ctx, &command, bot, guild_id).await?,
        "random" => handle_random(ctx, &command, bot, guild_id).await?,
        "next" => {
            let reply = describe(bot.playback.session(guild_id).next().await, |_| {
                "⏭️ Skipped".to_string()
            })?;
            respond(ctx, &command, reply).await?
        }
        "previous" => {
            let reply = describe(bot.playback.session(guild_id).previous().await, |_| {
                "⏮️ Back to the previous track".to_string()
            })?;
            respond(ctx, &command, reply).await?
        }
        "pause" => {
            let reply = describe(
                bot.playback.session(guild_id).toggle_pause().await,
                |paused| {
                    if paused {
                        "⏸️ Paused".to_string()
                    } else {
                        "▶️ Resumed".to_string()
                    }
                },
            )?;
            respond(ctx, &command, reply).await?
        }
        "stop" => {
            let reply = describe(bot.playback.session(guild_id).stop().await, |_| {
                "⏹️ Stopped and cleared the queue".to_string()
            })?;
            respond(ctx, &command, reply).await?
        }
        "go" => {
            let track_number = track_number_option(&command)?;
            let reply = describe(
                bot.playback.session(guild_id).goto(track_number).await,
                |_| format!("🎯 Jumped to track {}", track_number),
            )?;
            respond(ctx, &command, reply).await?
        }
        "remove" => {
            let track_number = track_number_option(&command)?;
            let removed = bot
                .playback
                .session(guild_id)
                .remove(track_number)
                .await
                .and_then(|removed| {
                    removed
                        .then_some(())
                        .ok_or(PlaybackError::InvalidTrackNumber(track_number))
                });
            let reply = describe(removed, |_| format!("🗑️ Removed track {}", track_number))?;
            respond(ctx, &command, reply).await?
        }
        "queue" => {
            let page = int_option(&command, "page").unwrap_or(1).max(1) as usize;
            let snapshot = bot.playback.session(guild_id).snapshot().await?;
            respond_embed(ctx, &command, embeds::queue_embed(&snapshot.queue, page)).await?
        }
        "playing" => {
            let snapshot = bot.playback.session(guild_id).snapshot().await?;
            respond_embed(ctx, &command, embeds::now_playing_embed(&snapshot)).await?
        }
        "summon" => {
            let reply = match join_member_channel(ctx, bot, guild_id, command.user.id).await {
                Ok(channel_id) => format!("🔊 Joined <#{}>", channel_id),
                Err(e) => {
                    warn!("⚠️ /summon could not join voice in guild {}: {}", guild_id, e);
                    join_failure_reply(&e)
                }
            };
            respond(ctx, &command, reply).await?
        }
        "disconnect" => {
            bot.leave_voice_channel(ctx, guild_id).await?;
            respond(ctx, &command, "👋 Disconnected".to_string()).await?
        }
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Unknown command")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &GuildTuneBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(jellyfin) = bot.jellyfin.clone() else {
        return respond(ctx, command, "❌ The media server is not enabled".to_string()).await;
    };
    let query = string_option(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Missing query"))?
        .trim()
        .to_string();
    let kinds = search_kinds(command);
    let shuffle = int_option(command, "mode") == Some(SHUFFLE_MODE);

    // Searching can take longer than the interaction deadline
    defer(ctx, command).await?;

    let found = match query.strip_prefix(ITEM_PREFIX) {
        Some(item_id) => jellyfin.tracks_for_item(item_id, &kinds).await,
        None => match jellyfin.search_items(&query, 1, &kinds).await {
            Ok(hints) => match hints.into_iter().next() {
                Some(hint) => jellyfin.tracks_for_item(&hint.id, &kinds).await,
                None => Ok(Vec::new()),
            },
            Err(e) => Err(e),
        },
    };

    let tracks = match found {
        Ok(tracks) if tracks.is_empty() => return edit(ctx, command, no_results(&query)).await,
        Ok(tracks) => tracks,
        Err(e) => {
            warn!("⚠️ Media server lookup for '{}' failed: {:#}", query, e);
            return edit(ctx, command, "❌ The media server could not be searched".to_string()).await;
        }
    };

    let tracks = if shuffle { shuffled(tracks) } else { tracks };
    enqueue_and_reply(ctx, command, bot, guild_id, tracks).await
}

async fn handle_random(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &GuildTuneBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(jellyfin) = bot.jellyfin.clone() else {
        return respond(ctx, command, "❌ The media server is not enabled".to_string()).await;
    };
    let count = int_option(command, "count")
        .unwrap_or(DEFAULT_RANDOM_TRACKS)
        .clamp(1, MAX_RANDOM_TRACKS as i64) as usize;

    defer(ctx, command).await?;

    let tracks = match jellyfin.random_tracks(count).await {
        Ok(tracks) if tracks.is_empty() => {
            return edit(ctx, command, "🔍 The media server has no tracks to pick from".to_string())
                .await
        }
        Ok(tracks) => tracks,
        Err(e) => {
            warn!("⚠️ Random track lookup failed: {:#}", e);
            return edit(ctx, command, "❌ The media server could not be reached".to_string()).await;
        }
    };

    enqueue_and_reply(ctx, command, bot, guild_id, tracks).await
}

async fn handle_playyt(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &GuildTuneBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(youtube) = bot.youtube.clone() else {
        return respond(ctx, command, "❌ YouTube playback is not enabled".to_string()).await;
    };
    let link = string_option(command, "link")
        .ok_or_else(|| anyhow::anyhow!("Missing link"))?
        .to_string();

    defer(ctx, command).await?;

    let track = match youtube.track_from_link(&link).await {
        Ok(track) => track,
        Err(e) => {
            warn!("⚠️ Could not resolve '{}': {:#}", link, e);
            return edit(ctx, command, format!("❌ Could not load that video: {}", e)).await;
        }
    };

    enqueue_and_reply(ctx, command, bot, guild_id, vec![track]).await
}

/// Joins the caller's channel when needed, enqueues, and edits the deferred reply.
async fn enqueue_and_reply(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &GuildTuneBot,
    guild_id: GuildId,
    tracks: Vec<Track>,
) -> Result<()> {
    if let Err(e) = ensure_in_voice(ctx, bot, guild_id, command.user.id).await {
        warn!("⚠️ Could not join voice in guild {}: {}", guild_id, e);
        return edit(ctx, command, join_failure_reply(&e)).await;
    }

    let next = bool_option(command, "next").unwrap_or(false);
    let position = if next {
        EnqueuePosition::Next
    } else {
        EnqueuePosition::Last
    };

    let session = bot.playback.session(guild_id);
    match session.enqueue_at(tracks.clone(), position).await {
        Ok(queue_len) => {
            let embed = match tracks.as_slice() {
                [track] => embeds::track_added_embed(track, queue_len, next),
                _ => embeds::tracks_added_embed(&tracks, queue_len, next),
            };
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
                .await?;
            Ok(())
        }
        Err(e) if e.is_user_error() => edit(ctx, command, format!("❌ {}", e)).await,
        Err(e) => Err(e.into()),
    }
}

/// Suggests media-server items while `/play query` is typed.
pub async fn handle_autocomplete(
    ctx: &Context,
    interaction: CommandInteraction,
    bot: &GuildTuneBot,
) -> Result<()> {
    if interaction.data.name != "play" {
        return Ok(());
    }
    let Some(jellyfin) = bot.jellyfin.clone() else {
        return Ok(());
    };

    let term = interaction
        .data
        .autocomplete()
        .map(|focused| focused.value.trim().to_string())
        .unwrap_or_default();

    let hints = if term.is_empty() {
        debug!("Skipping autocomplete search for an empty query");
        Vec::new()
    } else {
        jellyfin
            .search_items(&term, AUTOCOMPLETE_LIMIT, &search_kinds(&interaction))
            .await
            .unwrap_or_else(|e| {
                warn!("⚠️ Autocomplete search for '{}' failed: {:#}", term, e);
                Vec::new()
            })
    };

    let response = autocomplete_choices(&hints)
        .into_iter()
        .fold(CreateAutocompleteResponse::new(), |response, (name, value)| {
            response.add_string_choice(name, value)
        });
    interaction
        .create_response(&ctx.http, CreateInteractionResponse::Autocomplete(response))
        .await?;
    Ok(())
}

/// Choice name and value per hint; the value selects the item directly.
fn autocomplete_choices(hints: &[SearchHint]) -> Vec<(String, String)> {
    hints
        .iter()
        .map(|hint| {
            (
                shorten(&hint.to_string(), CHOICE_NAME_LEN),
                format!("{}{}", ITEM_PREFIX, hint.id),
            )
        })
        .collect()
}

fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn search_kinds(command: &CommandInteraction) -> Vec<SearchKind> {
    int_option(command, "type")
        .and_then(SearchKind::from_choice)
        .into_iter()
        .collect()
}

fn shuffled(mut tracks: Vec<Track>) -> Vec<Track> {
    tracks.shuffle(&mut rand::thread_rng());
    tracks
}

fn no_results(query: &str) -> String {
    format!(
        "🔍 No results for '{}'\n- Check for misspellings\n- Make sure the bot can see the library\n- Avoid special characters",
        query
    )
}

/// Joins the caller's voice channel unless the bot is already connected.
async fn ensure_in_voice(
    ctx: &Context,
    bot: &GuildTuneBot,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<(), JoinError> {
    if bot
        .is_connected(ctx, guild_id)
        .await
        .map_err(JoinError::Connection)?
    {
        return Ok(());
    }
    join_member_channel(ctx, bot, guild_id, user_id).await.map(|_| ())
}

async fn join_member_channel(
    ctx: &Context,
    bot: &GuildTuneBot,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<ChannelId, JoinError> {
    let channel_id = get_user_voice_channel(ctx, guild_id, user_id)?;
    bot.join_voice_channel(ctx, guild_id, channel_id)
        .await
        .map_err(JoinError::Connection)?;
    Ok(channel_id)
}

/// Reply shown when the bot can't get into the caller's channel.
pub fn join_failure_reply(error: &JoinError) -> String {
    match error {
        JoinError::NotInVoice => {
            "❌ Unable to join your channel: you don't seem to be in a voice channel. \
             Connect to one first."
                .to_string()
        }
        JoinError::GuildUnavailable(_) | JoinError::Connection(_) => {
            "❌ Unable to join your channel. Please try again in a moment.".to_string()
        }
    }
}

/// Turns a session result into reply text. User errors become the reply;
/// anything else is propagated.
pub fn describe<T>(
    result: Result<T, PlaybackError>,
    done: impl FnOnce(T) -> String,
) -> Result<String> {
    match result {
        Ok(value) => Ok(done(value)),
        Err(e) if e.is_user_error() => Ok(format!("❌ {}", capitalize(&e.to_string()))),
        Err(e) => Err(e.into()),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// Responses

async fn respond(ctx: &Context, command: &CommandInteraction, content: String) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;
    Ok(())
}

async fn respond_embed(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, content: String) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

// Options

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn bool_option(command: &CommandInteraction, name: &str) -> Option<bool> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_bool())
}

fn track_number_option(command: &CommandInteraction) -> Result<usize> {
    let value = int_option(command, "track").ok_or_else(|| anyhow::anyhow!("Missing track number"))?;
    usize::try_from(value).map_err(|_| anyhow::anyhow!("Invalid track number {}", value))
}

/// Voice channel the user is currently in
pub fn get_user_voice_channel(
    ctx: &Context,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<ChannelId, JoinError> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or(JoinError::GuildUnavailable(guild_id))?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or(JoinError::NotInVoice)
}
