//! Live broadcast playback. Simpler than track control: there is only ever
//! one "track" (the live mount) and no queue, so ownership of the single
//! connection plus the arbiter's claim is enough to stay race-free.

use anyhow::{Context, Result};
use log::debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::arbiter::{PlaybackSource, SessionArbiter};
use crate::output::{AudioHandle, AudioOutput};

#[derive(Default)]
struct LiveState {
    generation: u64,
    url: Option<String>,
    handle: Option<Arc<dyn AudioHandle>>,
}

pub struct LiveController {
    state: Arc<Mutex<LiveState>>,
    output: Arc<dyn AudioOutput>,
    arbiter: Arc<SessionArbiter>,
}

/// Arbiter force-stop hook. Bumping the generation invalidates any in-flight
/// connect. Must not call back into the arbiter.
fn force_stop(state: &Mutex<LiveState>) {
    if let Ok(mut state) = state.lock() {
        state.generation += 1;
        state.url = None;
        if let Some(handle) = state.handle.take() {
            handle.stop();
        }
    }
}

impl LiveController {
    pub fn new(output: Arc<dyn AudioOutput>, arbiter: Arc<SessionArbiter>) -> Arc<Self> {
        let state = Arc::new(Mutex::new(LiveState::default()));
        {
            let state = state.clone();
            arbiter.set_live_stopper(Box::new(move || force_stop(&state)));
        }
        Arc::new(Self {
            state,
            output,
            arbiter,
        })
    }

    /// Claim the output (force-stopping any track audio) and start the live
    /// stream. Reconnects only when the mount URL actually changed. Connects
    /// are last-call-wins: every new connect (and every stop) bumps a
    /// generation counter, and a completion belonging to a stale generation
    /// stops its handle instead of becoming the active stream.
    pub async fn play_live(&self, url: &str) -> Result<()> {
        self.arbiter.claim_live();

        let (generation, existing) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("live state lock poisoned"))?;
            if state.url.as_deref() == Some(url) && state.handle.is_some() {
                (state.generation, state.handle.clone())
            } else {
                // Tear down a connection to a different mount before
                // switching.
                state.generation += 1;
                state.url = None;
                if let Some(previous) = state.handle.take() {
                    previous.stop();
                }
                (state.generation, None)
            }
        };
        if let Some(handle) = existing {
            debug!("live stream already connected, resuming");
            handle.play();
            return Ok(());
        }

        debug!("connecting live stream: {}", url);
        let handle = match self.output.connect(url).await {
            Ok(handle) => handle,
            Err(e) => {
                // Give the output back unless a newer connect owns the claim.
                let still_current = self
                    .state
                    .lock()
                    .map(|state| state.generation == generation)
                    .unwrap_or(false);
                if still_current {
                    self.arbiter.release(PlaybackSource::Live);
                }
                return Err(e).context("failed to connect live stream");
            }
        };

        // A track claim may have taken the output while we were connecting;
        // its force-stop saw no handle, so discard ours instead of starting.
        if self.arbiter.current() != PlaybackSource::Live {
            debug!("live claim lost during connect, discarding handle");
            handle.stop();
            return Ok(());
        }

        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("live state lock poisoned"))?;
            if state.generation != generation {
                drop(state);
                debug!("live connect superseded, discarding handle");
                handle.stop();
                return Ok(());
            }
            if let Some(previous) = state.handle.take() {
                previous.stop();
            }
            handle.play();
            state.url = Some(url.to_string());
            state.handle = Some(handle.clone());
        }

        self.spawn_end_monitor(handle);
        Ok(())
    }

    /// Pause, clear the source and hand the output back. Bumps the
    /// generation so an in-flight connect discards its result.
    pub fn stop_live(&self) {
        let handle = match self.state.lock() {
            Ok(mut state) => {
                state.generation += 1;
                state.url = None;
                state.handle.take()
            }
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.pause();
            handle.stop();
        }
        self.arbiter.release(PlaybackSource::Live);
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.handle.is_some())
            .unwrap_or(false)
    }

    /// Network error and natural stream end both come back as `finished`;
    /// either way the output is released and the user may simply retry.
    fn spawn_end_monitor(&self, handle: Arc<dyn AudioHandle>) {
        let state = self.state.clone();
        let arbiter = self.arbiter.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;

                let current = match state.lock() {
                    Ok(state) => state.handle.clone(),
                    Err(_) => break,
                };
                match current {
                    Some(active) if Arc::ptr_eq(&active, &handle) => {}
                    // Stopped or replaced; this monitor is done.
                    _ => break,
                }

                if handle.status().finished {
                    debug!("live stream ended");
                    if let Ok(mut state) = state.lock() {
                        state.url = None;
                        state.handle = None;
                    }
                    handle.stop();
                    arbiter.release(PlaybackSource::Live);
                    break;
                }
            }
        });
    }
}
