//! Jellyfin media-server client.
//!
//! Covers what playback needs from the server: stream URLs for remote-stream
//! tracks, item search and lookup for `/play`, `/random` and remote control,
//! playstate reports, and the session socket that remote control arrives on.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serenity::model::id::GuildId;
use std::{collections::HashMap, fmt, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

use super::{ItemLookup, StreamUrlBuilder};
use crate::{
    audio::{
        reporter::{PlaystateReport, PlaystateSink},
        Track,
    },
    config::Config,
};

/// Jellyfin measures time in 100ns ticks.
pub const TICKS_PER_MILLISECOND: u64 = 10_000;

const TOKEN_HEADER: &str = "X-Emby-Token";
const AUDIO_FIELDS: &str = "Artists,Album,AlbumArtist,RunTimeTicks,ImageTags";
const ALBUM_ORDER: &str = "ParentIndexNumber,IndexNumber,SortName";

/// Item kinds `/play` can look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Audio,
    Album,
    Playlist,
}

impl SearchKind {
    pub const ALL: [SearchKind; 3] = [Self::Audio, Self::Album, Self::Playlist];

    /// Maps the `/play type` choice value.
    pub fn from_choice(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Audio),
            1 => Some(Self::Album),
            2 => Some(Self::Playlist),
            _ => None,
        }
    }

    fn item_type(self) -> &'static str {
        match self {
            Self::Audio => "Audio",
            Self::Album => "MusicAlbum",
            Self::Playlist => "Playlist",
        }
    }

    fn from_item_type(item_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.item_type() == item_type)
    }
}

fn item_types(kinds: &[SearchKind]) -> String {
    let kinds: &[SearchKind] = if kinds.is_empty() {
        &SearchKind::ALL
    } else {
        kinds
    };
    kinds
        .iter()
        .map(|kind| kind.item_type())
        .collect::<Vec<_>>()
        .join(",")
}

/// One search result, before it is expanded into tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHint {
    pub id: String,
    pub name: String,
    pub kind: SearchKind,
}

impl fmt::Display for SearchHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = match self.kind {
            SearchKind::Audio => "🎵",
            SearchKind::Album => "💿",
            SearchKind::Playlist => "📜",
        };
        write!(f, "{} {}", icon, self.name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<BaseItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BaseItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "Type", default)]
    kind: String,
    album: Option<String>,
    #[serde(default)]
    artists: Vec<String>,
    album_artist: Option<String>,
    run_time_ticks: Option<u64>,
    #[serde(default)]
    image_tags: HashMap<String, String>,
}

pub struct JellyfinClient {
    http: Client,
    base: Url,
    access_token: String,
    user_id: String,
    device_id: String,
    max_bitrate: u32,
}

impl JellyfinClient {
    pub fn new(config: &Config) -> Result<Self> {
        let base = Url::parse(config.jellyfin_server_address.trim())
            .with_context(|| {
                format!(
                    "invalid Jellyfin server address '{}'",
                    config.jellyfin_server_address
                )
            })?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Jellyfin server address '{}' cannot hold paths", base);
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("guildtune/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base,
            access_token: config.jellyfin_access_token.clone(),
            user_id: config.jellyfin_user_id.clone(),
            device_id: config.jellyfin_device_id.clone(),
            max_bitrate: config.stream_bitrate,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Universal audio endpoint; the server picks direct play or an Opus transcode.
    pub fn stream_url(&self, item_id: &str) -> Url {
        let mut url = self.endpoint(&["Audio", item_id, "universal"]);
        url.query_pairs_mut()
            .append_pair("UserId", &self.user_id)
            .append_pair("DeviceId", &self.device_id)
            .append_pair("MaxStreamingBitrate", &self.max_bitrate.to_string())
            .append_pair("Container", "ogg,opus")
            .append_pair("AudioCodec", "opus")
            .append_pair("TranscodingContainer", "ts")
            .append_pair("TranscodingProtocol", "hls")
            .append_pair("api_key", &self.access_token);
        url
    }

    fn artwork_url(&self, item: &BaseItem) -> Option<Url> {
        item.image_tags
            .contains_key("Primary")
            .then(|| self.endpoint(&["Items", item.id.as_str(), "Images", "Primary"]))
    }

    fn to_hint(item: BaseItem) -> Option<SearchHint> {
        let Some(kind) = SearchKind::from_item_type(&item.kind) else {
            warn!("⚠️ Unexpected Jellyfin item type '{}' in search results", item.kind);
            return None;
        };
        let name = match (kind, item.album_artist.as_deref()) {
            (SearchKind::Audio, Some(artist)) if !artist.is_empty() => {
                format!("{} ({})", item.name, artist)
            }
            _ => item.name,
        };
        Some(SearchHint {
            id: item.id,
            name,
            kind,
        })
    }

    fn to_track(&self, item: BaseItem) -> Option<Track> {
        if item.id.trim().is_empty() {
            warn!("⚠️ Ignoring a Jellyfin item without id");
            return None;
        }

        let artist = if item.artists.is_empty() {
            item.album_artist.clone().unwrap_or_default()
        } else {
            item.artists.join(", ")
        };
        let duration =
            Duration::from_millis(item.run_time_ticks.unwrap_or(0) / TICKS_PER_MILLISECOND);
        let artwork = self.artwork_url(&item).map(String::from).unwrap_or_default();

        Some(
            Track::remote_stream(item.id, item.name)
                .with_artist(artist)
                .with_album(item.album.unwrap_or_default())
                .with_duration(duration)
                .with_artwork(artwork),
        )
    }

    async fn get_items(&self, query: &[(&str, &str)]) -> Result<Vec<BaseItem>> {
        let response = self
            .http
            .get(self.endpoint(&["Items"]))
            .header(TOKEN_HEADER, &self.access_token)
            .query(&[("UserId", self.user_id.as_str()), ("Fields", AUDIO_FIELDS)])
            .query(query)
            .send()
            .await
            .context("Jellyfin item request failed")?
            .error_for_status()?;

        let body: ItemsResponse = response
            .json()
            .await
            .context("Unable to parse Jellyfin items")?;
        Ok(body.items)
    }

    /// Tracks under an album or playlist. Playlists keep their own order.
    async fn children(&self, parent_id: &str, sort_by: Option<&str>) -> Result<Vec<BaseItem>> {
        let mut query = vec![
            ("ParentId", parent_id),
            ("IncludeItemTypes", "Audio"),
            ("Recursive", "true"),
        ];
        query.extend(sort_by.map(|order| ("SortBy", order)));
        self.get_items(&query).await
    }

    /// Turns items into tracks, expanding albums and playlists in place.
    async fn expand(&self, items: Vec<BaseItem>) -> Result<Vec<Track>> {
        let mut tracks = Vec::new();
        for item in items {
            let children = match SearchKind::from_item_type(&item.kind) {
                Some(SearchKind::Audio) => {
                    tracks.extend(self.to_track(item));
                    continue;
                }
                Some(SearchKind::Album) => self.children(&item.id, Some(ALBUM_ORDER)).await?,
                Some(SearchKind::Playlist) => self.children(&item.id, None).await?,
                None => {
                    warn!("⚠️ Unsupported Jellyfin item type '{}' for '{}'", item.kind, item.id);
                    continue;
                }
            };
            debug!("📀 '{}' expands to {} track(s)", item.name, children.len());
            tracks.extend(children.into_iter().filter_map(|c| self.to_track(c)));
        }
        Ok(tracks)
    }

    /// Searches items of the given kinds by name; no kinds means all of them.
    pub async fn search_items(
        &self,
        term: &str,
        limit: usize,
        kinds: &[SearchKind],
    ) -> Result<Vec<SearchHint>> {
        info!("🔍 Searching Jellyfin for '{}'", term);
        let limit = limit.to_string();
        let types = item_types(kinds);
        let items = self
            .get_items(&[
                ("SearchTerm", term),
                ("IncludeItemTypes", types.as_str()),
                ("Recursive", "true"),
                ("Limit", limit.as_str()),
            ])
            .await?;

        debug!("Jellyfin returned {} item(s) for '{}'", items.len(), term);
        Ok(items.into_iter().filter_map(Self::to_hint).collect())
    }

    /// Tracks of one item, if it is one of `kinds`.
    pub async fn tracks_for_item(&self, item_id: &str, kinds: &[SearchKind]) -> Result<Vec<Track>> {
        let types = item_types(kinds);
        let items = self
            .get_items(&[("Ids", item_id), ("IncludeItemTypes", types.as_str())])
            .await?;
        if items.is_empty() {
            warn!("⚠️ No Jellyfin item '{}' of kind {}", item_id, types);
        }
        self.expand(items).await
    }

    /// Up to `count` tracks picked at random by the server.
    pub async fn random_tracks(&self, count: usize) -> Result<Vec<Track>> {
        info!("🎲 Picking {} random track(s) from Jellyfin", count);
        let limit = count.to_string();
        let items = self
            .get_items(&[
                ("IncludeItemTypes", "Audio"),
                ("SortBy", "Random"),
                ("Recursive", "true"),
                ("Limit", limit.as_str()),
            ])
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| self.to_track(item))
            .collect())
    }

    /// Device id a guild's remote-control session is registered under.
    pub fn guild_device_id(&self, guild_id: GuildId) -> String {
        format!("{}-{}", self.device_id, guild_id)
    }

    /// Session socket URL for a guild: the server address with a `ws` scheme.
    pub fn socket_url(&self, guild_id: GuildId) -> Result<Url> {
        let mut url = self.endpoint(&["socket"]);
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => anyhow::bail!("unsupported Jellyfin scheme '{}'", other),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("cannot switch '{}' to {}", url, scheme))?;
        url.query_pairs_mut()
            .append_pair("api_key", &self.access_token)
            .append_pair("deviceId", &self.guild_device_id(guild_id));
        Ok(url)
    }

    fn authorization(&self, guild_id: GuildId) -> String {
        format!(
            r#"MediaBrowser Client="guildtune", Device="Discord", DeviceId="{}", Version="{}", Token="{}""#,
            self.guild_device_id(guild_id),
            env!("CARGO_PKG_VERSION"),
            self.access_token
        )
    }

    /// Announces the guild's session as a remote-controllable audio player.
    pub async fn report_capabilities(&self, guild_id: GuildId) -> Result<()> {
        self.http
            .post(self.endpoint(&["Sessions", "Capabilities"]))
            .header(reqwest::header::AUTHORIZATION, self.authorization(guild_id))
            .query(&[
                ("PlayableMediaTypes", "Audio"),
                ("SupportedCommands", "Play,PlayState"),
                ("SupportsMediaControl", "true"),
            ])
            .send()
            .await
            .context("Jellyfin capabilities request failed")?
            .error_for_status()?;

        debug!("📡 Reported playback capabilities for guild {}", guild_id);
        Ok(())
    }

    async fn post_playstate(&self, segments: &[&str], report: &PlaystateReport) -> Result<()> {
        self.http
            .post(self.endpoint(segments))
            .header(TOKEN_HEADER, &self.access_token)
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl StreamUrlBuilder for JellyfinClient {
    fn build_stream_url(&self, guild_id: GuildId, item_id: &str) -> Result<String> {
        debug!("🔗 Building stream URL for item {} in guild {}", item_id, guild_id);
        Ok(self.stream_url(item_id).into())
    }
}

#[async_trait]
impl ItemLookup for JellyfinClient {
    async fn tracks_by_id(&self, item_ids: Vec<String>) -> Result<Vec<Track>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = item_ids.join(",");
        let items = self.get_items(&[("Ids", ids.as_str())]).await?;
        self.expand(items).await
    }
}

#[async_trait]
impl PlaystateSink for JellyfinClient {
    async fn report_start(&self, report: PlaystateReport) -> Result<()> {
        self.post_playstate(&["Sessions", "Playing"], &report).await
    }

    async fn report_progress(&self, report: PlaystateReport) -> Result<()> {
        self.post_playstate(&["Sessions", "Playing", "Progress"], &report)
            .await
    }

    async fn report_stopped(&self, report: PlaystateReport) -> Result<()> {
        self.post_playstate(&["Sessions", "Playing", "Stopped"], &report)
            .await
    }
}
