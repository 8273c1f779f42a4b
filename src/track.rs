//! On-demand track playback with last-call-wins load semantics.
//!
//! There is no true cancellation of an in-flight load, so each `load_and_play`
//! bumps a generation counter and every continuation re-checks it before
//! touching shared state. A completion belonging to a stale generation only
//! releases the handle it produced; it never becomes the active session and
//! is never started.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::arbiter::{PlaybackSource, SessionArbiter};
use crate::catalog::TrackRef;
use crate::output::{AudioHandle, AudioOutput, HandleStatus};

pub type EndedCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TrackState {
    generation: u64,
    handle: Option<Arc<dyn AudioHandle>>,
    current: Option<TrackRef>,
}

pub struct TrackController {
    state: Arc<Mutex<TrackState>>,
    output: Arc<dyn AudioOutput>,
    arbiter: Arc<SessionArbiter>,
    on_ended: Arc<Mutex<Option<EndedCallback>>>,
}

/// Synchronous teardown used both by `unload` and by the arbiter's
/// force-stop hook. Bumping the generation invalidates any in-flight load
/// and retires its monitor. Must not call into the arbiter.
fn force_stop(state: &Mutex<TrackState>) {
    if let Ok(mut state) = state.lock() {
        state.generation += 1;
        state.current = None;
        if let Some(handle) = state.handle.take() {
            handle.stop();
        }
    }
}

impl TrackController {
    pub fn new(output: Arc<dyn AudioOutput>, arbiter: Arc<SessionArbiter>) -> Arc<Self> {
        let state = Arc::new(Mutex::new(TrackState::default()));
        {
            let state = state.clone();
            arbiter.set_track_stopper(Box::new(move || force_stop(&state)));
        }
        Arc::new(Self {
            state,
            output,
            arbiter,
            on_ended: Arc::new(Mutex::new(None)),
        })
    }

    /// Callback fired exactly once when a track finishes on its own,
    /// typically wired to advance-to-next.
    pub fn set_on_ended(&self, callback: EndedCallback) {
        if let Ok(mut on_ended) = self.on_ended.lock() {
            *on_ended = Some(callback);
        }
    }

    /// Load `track` and start playing it from the beginning, tearing down
    /// whatever was playing before. For a rapid sequence of calls only the
    /// last one ends up audible; earlier handles are released even when
    /// their loads complete out of order.
    pub async fn load_and_play(&self, track: TrackRef) -> Result<()> {
        let generation = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("track state lock poisoned"))?;
            state.generation += 1;
            state.current = None;
            if let Some(previous) = state.handle.take() {
                previous.stop();
            }
            state.generation
        };

        self.arbiter.claim_track();
        debug!("loading track '{}' (generation {})", track.title, generation);

        let handle = match self.output.load(&track.url).await {
            Ok(handle) => handle,
            Err(e) => {
                // Give the output back unless a newer load owns the claim.
                let still_current = self
                    .state
                    .lock()
                    .map(|state| state.generation == generation)
                    .unwrap_or(false);
                if still_current {
                    self.arbiter.release(PlaybackSource::Track);
                }
                return Err(e).context(format!("failed to load track '{}'", track.title));
            }
        };

        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("track state lock poisoned"))?;
            if state.generation != generation {
                drop(state);
                debug!(
                    "discarding stale load of '{}' (generation {})",
                    track.title, generation
                );
                handle.stop();
                return Ok(());
            }
            handle.play();
            state.handle = Some(handle.clone());
            state.current = Some(track);
        }

        self.spawn_ended_monitor(generation, handle);
        Ok(())
    }

    /// Pause if playing, resume if paused. No-op without an active handle;
    /// UI callbacks may legitimately fire after teardown.
    pub fn toggle_play_pause(&self) {
        if let Ok(state) = self.state.lock() {
            if let Some(handle) = state.handle.as_ref() {
                if handle.status().is_playing {
                    debug!("pausing track");
                    handle.pause();
                } else {
                    debug!("resuming track");
                    handle.play();
                }
            }
        }
    }

    pub fn seek(&self, position: Duration) {
        if let Ok(state) = self.state.lock() {
            if let Some(handle) = state.handle.as_ref() {
                handle.seek(position);
            }
        }
    }

    pub fn set_volume(&self, volume: f32) {
        if let Ok(state) = self.state.lock() {
            if let Some(handle) = state.handle.as_ref() {
                handle.set_volume(volume);
            }
        }
    }

    /// Stop and release the active handle, if any, and give the output back.
    /// Safe to call while a load is still in flight; the generation bump
    /// makes that load discard its result.
    pub fn unload(&self) {
        force_stop(&self.state);
        self.arbiter.release(PlaybackSource::Track);
    }

    pub fn current_track(&self) -> Option<TrackRef> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.current.clone())
    }

    pub fn status(&self) -> Option<HandleStatus> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.handle.as_ref().map(|handle| handle.status()))
    }

    fn spawn_ended_monitor(&self, generation: u64, handle: Arc<dyn AudioHandle>) {
        let state = self.state.clone();
        let arbiter = self.arbiter.clone();
        let on_ended = self.on_ended.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(250)).await;

                let current_generation = match state.lock() {
                    Ok(state) => state.generation,
                    Err(_) => break,
                };
                if current_generation != generation {
                    // Superseded; a newer load has its own monitor.
                    break;
                }

                if handle.status().finished {
                    if let Ok(mut state) = state.lock() {
                        if state.generation != generation {
                            break;
                        }
                        state.handle = None;
                        state.current = None;
                    }
                    debug!("track finished (generation {})", generation);
                    arbiter.release(PlaybackSource::Track);
                    match on_ended.lock() {
                        Ok(on_ended) => {
                            if let Some(callback) = on_ended.as_ref() {
                                callback();
                            }
                        }
                        Err(_) => warn!("ended callback lock poisoned"),
                    }
                    break;
                }
            }
        });
    }
}
