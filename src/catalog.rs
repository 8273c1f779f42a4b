use anyhow::Result;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};

/// A playable track as published by the catalog service. Immutable once
/// fetched; the track player consumes only `url` and `title`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackRef {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub filename: String,
    /// Seconds, as extracted by the upload pipeline.
    #[serde(default, deserialize_with = "deserialize_seconds")]
    pub duration: f64,
    #[serde(default)]
    pub order: u32,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Show {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tracks: Vec<TrackRef>,
}

// The catalog serves durations as numbers but older rows carry strings.
fn deserialize_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(f64),
    }

    match StringOrNumber::deserialize(deserializer) {
        Ok(StringOrNumber::String(s)) => s.parse().map_err(serde::de::Error::custom),
        Ok(StringOrNumber::Number(n)) => Ok(n),
        Err(_) => Ok(0.0),
    }
}

pub struct CatalogClient {
    client: reqwest::Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch the ordered show list, each with its ordered tracks.
    pub async fn get_shows(&self) -> Result<Vec<Show>> {
        let url = format!("{}/shows", self.base_url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("catalog returned {}", response.status());
        }

        let mut shows: Vec<Show> = response.json().await?;
        for show in &mut shows {
            show.tracks.sort_by_key(|track| track.order);
        }

        debug!("fetched {} shows from catalog", shows.len());
        Ok(shows)
    }
}
