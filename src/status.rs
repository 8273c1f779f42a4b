//! Live broadcast status: Icecast-style feed parsing and the poll loop.
//!
//! The server-side proxy returns `{ icestats: { source: ... } }` where
//! `source` is either a single object or a list. The parser picks the first
//! source in document order whose listen URL matches the configured mount
//! and reduces it to a small snapshot. The poller republishes a fresh
//! snapshot on a fixed cadence, scheduling the next fetch only after the
//! previous one settles, so two fetches are never in flight at once.

use anyhow::Result;
use log::debug;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub listenurl: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub yp_currently_playing: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
}

/// The feed reports one object when a single source is mounted and an array
/// when there are several.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceList {
    Many(Vec<SourceInfo>),
    One(SourceInfo),
}

#[derive(Debug, Clone, Deserialize)]
pub struct IceStats {
    #[serde(default)]
    pub source: Option<SourceList>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusDocument {
    pub icestats: IceStats,
}

/// What the rest of the app knows about the live broadcast. Recomputed on
/// every poll tick; superseded snapshots are discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveStatusSnapshot {
    pub is_live: bool,
    pub now_playing: Option<String>,
    pub show_title: Option<String>,
    pub error: Option<String>,
}

impl LiveStatusSnapshot {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            is_live: false,
            now_playing: None,
            show_title: None,
            error: Some(message.into()),
        }
    }

    /// Whether the live stream should be offered to the user. A snapshot
    /// carrying an error is never live, whatever the flag says.
    pub fn live_now(&self) -> bool {
        self.error.is_none() && self.is_live
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reduce a raw status document to the live-status snapshot for `mount`.
pub fn parse_status(document: &StatusDocument, mount: &str) -> LiveStatusSnapshot {
    let sources: Vec<&SourceInfo> = match &document.icestats.source {
        None => Vec::new(),
        Some(SourceList::One(source)) => vec![source],
        Some(SourceList::Many(sources)) => sources.iter().collect(),
    };

    let matched = sources.iter().find(|source| {
        source
            .listenurl
            .as_deref()
            .map(|url| url == mount || url.ends_with(mount))
            .unwrap_or(false)
    });

    match matched {
        None => LiveStatusSnapshot::default(),
        Some(source) => LiveStatusSnapshot {
            is_live: true,
            now_playing: non_empty(source.yp_currently_playing.as_deref())
                .or_else(|| non_empty(source.title.as_deref())),
            show_title: non_empty(source.server_name.as_deref()),
            error: None,
        },
    }
}

async fn request_status(client: &reqwest::Client, url: &str) -> Result<StatusDocument> {
    let response = client
        .get(url)
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .send()
        .await?;
    // The proxy reports upstream failure as JSON with a non-2xx status; a
    // thrown transport error and a non-OK response are treated the same.
    if !response.status().is_success() {
        anyhow::bail!("status endpoint returned {}", response.status());
    }
    Ok(response.json().await?)
}

async fn fetch_snapshot(client: &reqwest::Client, url: &str, mount: &str) -> LiveStatusSnapshot {
    match request_status(client, url).await {
        Ok(document) => parse_status(&document, mount),
        Err(e) => {
            debug!("live status fetch failed: {}", e);
            LiveStatusSnapshot::failed(e.to_string())
        }
    }
}

/// Background poll loop publishing `LiveStatusSnapshot`s over a watch channel.
pub struct StatusPoller {
    snapshot_rx: watch::Receiver<LiveStatusSnapshot>,
    token: CancellationToken,
}

impl StatusPoller {
    /// Spawn the poll loop against the status proxy at `status_url`.
    pub fn spawn(status_url: String, mount: String, interval: Duration) -> Self {
        let client = reqwest::Client::new();
        Self::spawn_with(interval, move || {
            let client = client.clone();
            let status_url = status_url.clone();
            let mount = mount.clone();
            async move { fetch_snapshot(&client, &status_url, &mount).await }
        })
    }

    /// Spawn the poll loop over an arbitrary fetch function. The next fetch
    /// starts only after the previous one settles.
    pub fn spawn_with<F, Fut>(interval: Duration, mut fetch: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = LiveStatusSnapshot> + Send,
    {
        let (snapshot_tx, snapshot_rx) = watch::channel(LiveStatusSnapshot::default());
        let token = CancellationToken::new();
        let task_token = token.clone();

        tokio::spawn(async move {
            loop {
                let snapshot = fetch().await;
                // An in-flight fetch may finish after shutdown; its result
                // must not be published.
                if task_token.is_cancelled() {
                    debug!("status poller cancelled, dropping in-flight result");
                    break;
                }
                if snapshot_tx.send(snapshot).is_err() {
                    debug!("status poller has no subscribers left");
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = task_token.cancelled() => break,
                }
            }
        });

        Self { snapshot_rx, token }
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveStatusSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn latest(&self) -> LiveStatusSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Stop rescheduling. An in-flight fetch is allowed to complete but its
    /// result is discarded.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}
