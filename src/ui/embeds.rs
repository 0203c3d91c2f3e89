use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{PlaybackState, QueueInfo, SessionSnapshot, Track};

const QUEUE_PAGE_SIZE: usize = 10;

/// Shared palette for every embed the bot sends
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 guildtune";

/// Embed for `/playing`.
pub fn now_playing_embed(snapshot: &SessionSnapshot) -> CreateEmbed {
    let Some(track) = &snapshot.active_track else {
        return CreateEmbed::default()
            .title("😴 Nothing is playing")
            .description("Use `/play` or `/playyt` to queue something")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    };

    let status = match snapshot.state {
        PlaybackState::Paused => "⏸️ Paused",
        _ => "🎵 Now Playing",
    };

    let mut embed = CreateEmbed::default()
        .title(status)
        .description(format!("**{}**", track.name()))
        .color(colors::SUCCESS_GREEN)
        .field("🎤 Artist", or_unknown(track.artist()), true)
        .field(
            "⏱️ Progress",
            format!(
                "{} / {}",
                format_clock(snapshot.progress),
                format_clock(track.duration())
            ),
            true,
        )
        .field(
            "📋 Position",
            format!(
                "{} of {}",
                snapshot.active_track_number(),
                snapshot.queue.tracks.len()
            ),
            true,
        );

    if !track.album().is_empty() {
        embed = embed.field("💿 Album", track.album(), true);
    }
    if let Some(artwork) = track.artwork_url() {
        embed = embed.thumbnail(artwork);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed confirming an enqueue. `queue_len` is the queue length afterwards.
pub fn track_added_embed(track: &Track, queue_len: usize, next: bool) -> CreateEmbed {
    let description = if next {
        format!("**{}** will play next", track.name())
    } else {
        format!("**{}** was added to the queue", track.name())
    };

    let mut embed = CreateEmbed::default()
        .title("✅ Track Added")
        .description(description)
        .color(colors::MUSIC_PURPLE)
        .field("🎤 Artist", or_unknown(track.artist()), true)
        .field("⏱️ Duration", format_clock(track.duration()), true)
        .field("📋 Queue", format!("{} track(s)", queue_len), true);

    if let Some(artwork) = track.artwork_url() {
        embed = embed.thumbnail(artwork);
    }

    embed.footer(CreateEmbedFooter::new(
        "🎵 Playback starts automatically when nothing is playing",
    ))
}

/// Embed confirming an album, playlist or random selection was enqueued.
pub fn tracks_added_embed(tracks: &[Track], queue_len: usize, next: bool) -> CreateEmbed {
    let total: Duration = tracks.iter().map(Track::duration).sum();
    let length = humantime::format_duration(whole_seconds(total));
    let description = if next {
        format!("**{}** tracks ({}) will play next", tracks.len(), length)
    } else {
        format!("**{}** tracks ({}) were added to the queue", tracks.len(), length)
    };

    let mut embed = CreateEmbed::default()
        .title("✅ Tracks Added")
        .description(description)
        .color(colors::MUSIC_PURPLE)
        .field("📋 Queue", format!("{} track(s)", queue_len), true);

    if let Some(artwork) = tracks.iter().find_map(Track::artwork_url) {
        embed = embed.thumbnail(artwork);
    }

    embed.footer(CreateEmbedFooter::new(
        "🎵 Playback starts automatically when nothing is playing",
    ))
}

/// Embed for `/queue`. Pages start at 1.
pub fn queue_embed(queue: &QueueInfo, page: usize) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if queue.tracks.is_empty() {
        return embed
            .description("😴 **The queue is empty**\n\n💡 Use `/play <song>` to add music")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    let view = queue.page(page, QUEUE_PAGE_SIZE);
    let mut listing = String::new();
    for (number, track) in &view.items {
        let marker = if *number == queue.active_track_number {
            "▶️ "
        } else {
            ""
        };
        listing.push_str(&format!(
            "{}**{}**. {}{} `[{}]`\n",
            marker,
            number,
            track.name(),
            if track.artist().is_empty() {
                String::new()
            } else {
                format!(" - {}", track.artist())
            },
            format_clock(track.duration())
        ));
    }

    let info = format!(
        "**Total:** {} track(s) • **Duration:** {}",
        view.total_items,
        humantime::format_duration(whole_seconds(queue.total_duration()))
    );

    embed
        .description(listing)
        .field("Information", info, false)
        .footer(CreateEmbedFooter::new(format!(
            "Page {} of {} • guildtune",
            view.current_page, view.total_pages
        )))
        .timestamp(Timestamp::now())
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "Unknown"
    } else {
        value
    }
}

fn whole_seconds(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}

/// `m:ss`, or `h:mm:ss` past an hour.
pub fn format_clock(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn render(embed: CreateEmbed) -> Value {
        serde_json::to_value(embed).unwrap()
    }

    fn queue_of(count: usize, active: usize) -> QueueInfo {
        QueueInfo {
            tracks: (1..=count)
                .map(|n| {
                    Track::remote_stream(format!("id{n}"), format!("Song {n}"))
                        .with_duration(Duration::from_secs(60))
                })
                .collect(),
            active_track_number: active,
        }
    }

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(Duration::from_secs(5)), "0:05");
        assert_eq!(format_clock(Duration::from_secs(125)), "2:05");
        assert_eq!(format_clock(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn empty_queue_says_so() {
        let json = render(queue_embed(&queue_of(0, 0), 1));
        assert!(json["description"]
            .as_str()
            .unwrap()
            .contains("The queue is empty"));
    }

    #[test]
    fn queue_pages_mark_the_active_track() {
        let json = render(queue_embed(&queue_of(12, 11), 2));
        let listing = json["description"].as_str().unwrap();

        assert!(listing.contains("▶️ **11**. Song 11"));
        assert!(listing.contains("**12**. Song 12"));
        assert!(!listing.contains("**1**."));
        assert_eq!(json["footer"]["text"], "Page 2 of 2 • guildtune");
        assert!(json["fields"][0]["value"]
            .as_str()
            .unwrap()
            .contains("12m"));
    }

    #[test]
    fn bulk_adds_sum_their_durations() {
        let queue = queue_of(3, 1);
        let json = render(tracks_added_embed(&queue.tracks, 7, false));

        assert_eq!(json["title"], "✅ Tracks Added");
        assert_eq!(
            json["description"],
            "**3** tracks (3m) were added to the queue"
        );
        assert_eq!(json["fields"][0]["value"], "7 track(s)");
        assert!(json.get("thumbnail").is_none());
    }

    #[test]
    fn idle_snapshot_has_nothing_playing() {
        let snapshot = SessionSnapshot {
            state: PlaybackState::Idle,
            active_track: None,
            progress: Duration::ZERO,
            queue: queue_of(0, 0),
        };
        let json = render(now_playing_embed(&snapshot));
        assert_eq!(json["title"], "😴 Nothing is playing");
    }

    #[test]
    fn paused_snapshot_shows_progress() {
        let queue = queue_of(3, 2);
        let snapshot = SessionSnapshot {
            state: PlaybackState::Paused,
            active_track: queue.tracks.get(1).cloned(),
            progress: Duration::from_secs(30),
            queue,
        };
        let json = render(now_playing_embed(&snapshot));
        assert_eq!(json["title"], "⏸️ Paused");
        assert_eq!(json["fields"][1]["value"], "0:30 / 1:00");
        assert_eq!(json["fields"][2]["value"], "2 of 3");
    }
}
