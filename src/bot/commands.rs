use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use crate::config::Config;

/// Registers the command set globally.
pub async fn register_global_commands(ctx: &Context, config: &Config) -> Result<()> {
    for command in all_commands(config) {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registers the command set for one guild (development)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId, config: &Config) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands(config)).await?;

    Ok(())
}

/// Commands offered with the current configuration; source commands are left
/// out when their source is disabled.
pub fn all_commands(config: &Config) -> Vec<CreateCommand> {
    let mut commands = Vec::new();

    if config.jellyfin_enabled {
        commands.push(play_command());
        commands.push(random_command());
    }
    if config.youtube_enabled {
        commands.push(playyt_command());
    }

    commands.extend([
        next_command(),
        previous_command(),
        pause_command(),
        stop_command(),
        go_command(),
        remove_command(),
        queue_command(),
        playing_command(),
        summon_command(),
        disconnect_command(),
    ]);

    commands
}

// Enqueueing

fn next_option() -> CreateCommandOption {
    CreateCommandOption::new(
        CommandOptionType::Boolean,
        "next",
        "Play right after the current track instead of at the end",
    )
}

/// Upper bound for `/random`.
pub const MAX_RANDOM_TRACKS: u64 = 200;

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Search the media server and queue the best match")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Item name to search for")
                .required(true)
                .set_autocomplete(true),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "type", "Kind of item to look for")
                .add_int_choice("Track", 0)
                .add_int_choice("Album", 1)
                .add_int_choice("Playlist", 2),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "mode", "How the tracks are added")
                .add_int_choice("Normal", 0)
                .add_int_choice("Shuffle", 1),
        )
        .add_option(next_option())
}

fn random_command() -> CreateCommand {
    CreateCommand::new("random")
        .description("Queue a random selection of tracks from the media server")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "count", "Number of tracks")
                .min_int_value(1)
                .max_int_value(MAX_RANDOM_TRACKS),
        )
}

fn playyt_command() -> CreateCommand {
    CreateCommand::new("playyt")
        .description("Queue a YouTube video")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "link", "YouTube video link")
                .required(true),
        )
        .add_option(next_option())
}

// Playback control

fn next_command() -> CreateCommand {
    CreateCommand::new("next").description("Skip to the next track")
}

fn previous_command() -> CreateCommand {
    CreateCommand::new("previous").description("Go back to the previous track")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause or resume playback")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playback and clear the queue")
}

fn go_command() -> CreateCommand {
    CreateCommand::new("go")
        .description("Jump to a track in the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "track", "Track number")
                .min_int_value(1)
                .required(true),
        )
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Remove a track from the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "track", "Track number")
                .min_int_value(1)
                .required(true),
        )
}

// Queue

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Show the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Page number")
                .min_int_value(1),
        )
}

fn playing_command() -> CreateCommand {
    CreateCommand::new("playing").description("Show the current track")
}

// Voice connection

fn summon_command() -> CreateCommand {
    CreateCommand::new("summon").description("Join your voice channel")
}

fn disconnect_command() -> CreateCommand {
    CreateCommand::new("disconnect").description("Leave the voice channel and reset playback")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(config: &Config) -> Vec<String> {
        all_commands(config)
            .iter()
            .map(|command| {
                serde_json::to_value(command).unwrap()["name"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn source_commands_follow_the_configuration() {
        let mut config = Config::default();
        config.jellyfin_enabled = true;
        config.youtube_enabled = false;
        let enabled = names(&config);
        assert!(enabled.contains(&"play".to_string()));
        assert!(enabled.contains(&"random".to_string()));
        assert!(!enabled.contains(&"playyt".to_string()));

        config.jellyfin_enabled = false;
        config.youtube_enabled = true;
        let enabled = names(&config);
        assert!(!enabled.contains(&"play".to_string()));
        assert!(!enabled.contains(&"random".to_string()));
        assert!(enabled.contains(&"playyt".to_string()));
    }

    #[test]
    fn control_commands_are_always_offered() {
        let mut config = Config::default();
        config.jellyfin_enabled = false;
        config.youtube_enabled = false;
        assert_eq!(
            names(&config),
            vec![
                "next",
                "previous",
                "pause",
                "stop",
                "go",
                "remove",
                "queue",
                "playing",
                "summon",
                "disconnect"
            ]
        );
    }

    #[test]
    fn play_offers_kind_mode_and_autocomplete() {
        let play = serde_json::to_value(play_command()).unwrap();
        let options = play["options"].as_array().unwrap();
        let names: Vec<&str> = options.iter().map(|o| o["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["query", "type", "mode", "next"]);

        assert_eq!(options[0]["autocomplete"], true);
        let kinds: Vec<(&str, i64)> = options[1]["choices"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| (c["name"].as_str().unwrap(), c["value"].as_i64().unwrap()))
            .collect();
        assert_eq!(kinds, vec![("Track", 0), ("Album", 1), ("Playlist", 2)]);
        assert_eq!(options[2]["choices"][1]["name"], "Shuffle");
        assert_eq!(options[2]["choices"][1]["value"], 1);
    }

    #[test]
    fn random_count_is_bounded() {
        let random = serde_json::to_value(random_command()).unwrap();
        assert_eq!(random["options"][0]["name"], "count");
        assert_eq!(random["options"][0]["min_value"], 1);
        assert_eq!(random["options"][0]["max_value"], MAX_RANDOM_TRACKS);
    }

    #[test]
    fn track_number_options_are_required() {
        let go = serde_json::to_value(go_command()).unwrap();
        assert_eq!(go["options"][0]["name"], "track");
        assert_eq!(go["options"][0]["required"], true);
        assert_eq!(go["options"][0]["min_value"], 1);
    }
}
