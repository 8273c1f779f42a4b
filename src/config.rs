use clap::Parser;
use std::time::Duration;

/// Command-line configuration for the station client.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "openair-tui",
    about = "Terminal client for the OpenAir community radio station"
)]
pub struct Config {
    /// Base URL of the station server (catalog and live-status proxy)
    #[arg(long, default_value = "https://radio.openair.example")]
    pub server_url: String,

    /// Mount path identifying the live broadcast in the status feed
    #[arg(long, default_value = "/live")]
    pub mount: String,

    /// Direct live stream URL; defaults to the server URL plus the mount
    #[arg(long)]
    pub live_url: Option<String>,

    /// Seconds between live status polls
    #[arg(long, default_value_t = 15)]
    pub status_interval_secs: u64,

    /// Station name used for media-session metadata fallbacks
    #[arg(long, default_value = "OpenAir Radio")]
    pub station_name: String,

    /// Label prefix for the live marquee
    #[arg(long, default_value = "LIVE NOW")]
    pub live_label: String,
}

impl Config {
    pub fn status_url(&self) -> String {
        format!("{}/api/live-status", self.server_url.trim_end_matches('/'))
    }

    pub fn live_stream_url(&self) -> String {
        self.live_url.clone().unwrap_or_else(|| {
            format!("{}{}", self.server_url.trim_end_matches('/'), self.mount)
        })
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}
