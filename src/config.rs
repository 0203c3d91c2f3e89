use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Register commands for a single guild while developing

    // Jellyfin
    pub jellyfin_enabled: bool,
    pub jellyfin_server_address: String,
    pub jellyfin_access_token: String,
    pub jellyfin_user_id: String,
    pub jellyfin_device_id: String,

    // YouTube
    pub youtube_enabled: bool,
    pub ytdlp_path: String,
    pub cache_dir: PathBuf,

    // Audio
    pub stream_bitrate: u32,
    pub default_volume: f32,

    // Playback timing
    pub acquisition_poll_interval_ms: u64,
    pub max_acquisition_polls: u32,
    pub prefetch_window_ms: u64,
    pub progress_interval_ms: u64,
    pub playstate_report_interval_secs: u64,
}

fn env_or<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value for {}: {:?} ({})", key, raw, e))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let application_id: u64 = std::env::var("APPLICATION_ID")?.parse()?;
        if application_id == 0 {
            anyhow::bail!("APPLICATION_ID must be a non-zero id");
        }

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id,
            guild_id: std::env::var("GUILD_ID")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|id| *id != 0),

            // Jellyfin
            jellyfin_enabled: env_or("JELLYFIN_ENABLED", "true")?,
            jellyfin_server_address: std::env::var("JELLYFIN_SERVER_ADDRESS").unwrap_or_default(),
            jellyfin_access_token: std::env::var("JELLYFIN_ACCESS_TOKEN").unwrap_or_default(),
            jellyfin_user_id: std::env::var("JELLYFIN_USER_ID").unwrap_or_default(),
            jellyfin_device_id: std::env::var("JELLYFIN_DEVICE_ID")
                .unwrap_or_else(|_| "guildtune".to_string()),

            // YouTube
            youtube_enabled: env_or("YOUTUBE_ENABLED", "false")?,
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            cache_dir: std::env::var("CACHE_DIR")
                .unwrap_or_else(|_| "./cache".to_string())
                .into(),

            // Audio
            stream_bitrate: env_or("STREAM_BITRATE", "96000")?, // 96kbps (Discord default)
            default_volume: env_or("DEFAULT_VOLUME", "0.5")?,

            // Playback timing
            acquisition_poll_interval_ms: env_or("ACQUISITION_POLL_INTERVAL_MS", "1000")?,
            max_acquisition_polls: env_or("MAX_ACQUISITION_POLLS", "600")?,
            prefetch_window_ms: env_or("PREFETCH_WINDOW_MS", "30000")?,
            progress_interval_ms: env_or("PROGRESS_INTERVAL_MS", "1000")?,
            playstate_report_interval_secs: env_or("PLAYSTATE_REPORT_INTERVAL_SECS", "5")?,
        };

        if config.youtube_enabled {
            std::fs::create_dir_all(&config.cache_dir)?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Sanity checks that catch common mistakes before the bot connects.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Stream bitrate must be non-zero and within Opus limits
    /// - Every interval must be non-zero
    /// - Jellyfin needs a server address when enabled
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 2.0, got: {}",
                self.default_volume
            );
        }

        if self.stream_bitrate == 0 {
            anyhow::bail!("Stream bitrate must be greater than 0");
        }

        if self.stream_bitrate > 510_000 {
            anyhow::bail!(
                "Stream bitrate cannot exceed 510kbps, got: {}",
                self.stream_bitrate
            );
        }

        if self.acquisition_poll_interval_ms == 0 || self.max_acquisition_polls == 0 {
            anyhow::bail!("Acquisition polling needs a non-zero interval and limit");
        }

        if self.progress_interval_ms == 0 || self.playstate_report_interval_secs == 0 {
            anyhow::bail!("Progress and playstate report intervals must be greater than 0");
        }

        if self.jellyfin_enabled && self.jellyfin_server_address.trim().is_empty() {
            anyhow::bail!("JELLYFIN_SERVER_ADDRESS is required when Jellyfin is enabled");
        }

        Ok(())
    }

    /// Token-free summary for the startup log.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Jellyfin: {} ({})\n  \
            YouTube: {} via {} (cache {})\n  \
            Audio: {}% vol, {}kbps\n  \
            Timing: poll {}ms x{}, prefetch {}ms, progress {}ms, report {}s",
            self.application_id,
            self.guild_id
                .map_or("global".to_string(), |id| id.to_string()),
            if self.jellyfin_enabled { "enabled" } else { "disabled" },
            if self.jellyfin_server_address.is_empty() {
                "no server"
            } else {
                self.jellyfin_server_address.as_str()
            },
            if self.youtube_enabled { "enabled" } else { "disabled" },
            self.ytdlp_path,
            self.cache_dir.display(),
            (self.default_volume * 100.0) as u32,
            self.stream_bitrate / 1000,
            self.acquisition_poll_interval_ms,
            self.max_acquisition_polls,
            self.prefetch_window_ms,
            self.progress_interval_ms,
            self.playstate_report_interval_secs
        )
    }
}

/// Same defaults as [`Config::load`] uses for unset variables.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            jellyfin_enabled: true,
            jellyfin_server_address: String::new(),
            jellyfin_access_token: String::new(),
            jellyfin_user_id: String::new(),
            jellyfin_device_id: "guildtune".to_string(),

            youtube_enabled: false,
            ytdlp_path: "yt-dlp".to_string(),
            cache_dir: "./cache".into(),

            stream_bitrate: 96_000,
            default_volume: 0.5,

            acquisition_poll_interval_ms: 1_000,
            max_acquisition_polls: 600,
            prefetch_window_ms: 30_000,
            progress_interval_ms: 1_000,
            playstate_report_interval_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            jellyfin_server_address: "http://jellyfin.local:8096".into(),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_with_a_server_are_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn jellyfin_needs_an_address() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("JELLYFIN_SERVER_ADDRESS"));

        let config = Config {
            jellyfin_enabled: false,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            Config { default_volume: 2.5, ..valid() },
            Config { stream_bitrate: 0, ..valid() },
            Config { stream_bitrate: 600_000, ..valid() },
            Config { acquisition_poll_interval_ms: 0, ..valid() },
            Config { max_acquisition_polls: 0, ..valid() },
            Config { progress_interval_ms: 0, ..valid() },
            Config { playstate_report_interval_secs: 0, ..valid() },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "accepted {:?}", config);
        }
    }

    #[test]
    fn summary_never_contains_secrets() {
        let config = Config {
            discord_token: "discord-secret".into(),
            jellyfin_access_token: "jellyfin-secret".into(),
            ..valid()
        };
        let summary = config.summary();
        assert!(!summary.contains("secret"));
        assert!(summary.contains("jellyfin.local"));
    }
}
