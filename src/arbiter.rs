//! Exclusive ownership of the audio output device.
//!
//! Exactly one physical output exists, so exactly one of the two players may
//! hold it at a time. The arbiter is the sole gatekeeper: controllers ask for
//! the output via `claim_track`/`claim_live` and hand it back via `release`.
//! Claiming force-stops the other side synchronously before the ownership
//! cell changes hands, so there is no window where both players are audible.

use log::debug;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Which player currently owns the audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSource {
    None,
    Track,
    Live,
}

type Stopper = Box<dyn Fn() + Send>;

struct ArbiterState {
    current: PlaybackSource,
    stop_track: Option<Stopper>,
    stop_live: Option<Stopper>,
}

pub struct SessionArbiter {
    state: Mutex<ArbiterState>,
    source_tx: watch::Sender<PlaybackSource>,
}

impl SessionArbiter {
    pub fn new() -> Arc<Self> {
        let (source_tx, _) = watch::channel(PlaybackSource::None);
        Arc::new(Self {
            state: Mutex::new(ArbiterState {
                current: PlaybackSource::None,
                stop_track: None,
                stop_live: None,
            }),
            source_tx,
        })
    }

    /// Register the callback used to force-stop track playback when the live
    /// player claims the output. The callback must not call back into the
    /// arbiter; it only tears down the player's own handle.
    pub fn set_track_stopper(&self, stopper: Stopper) {
        if let Ok(mut state) = self.state.lock() {
            state.stop_track = Some(stopper);
        }
    }

    /// Counterpart of `set_track_stopper` for the live player.
    pub fn set_live_stopper(&self, stopper: Stopper) {
        if let Ok(mut state) = self.state.lock() {
            state.stop_live = Some(stopper);
        }
    }

    pub fn current(&self) -> PlaybackSource {
        self.state
            .lock()
            .map(|state| state.current)
            .unwrap_or(PlaybackSource::None)
    }

    /// Observe ownership changes. The cell behind `current()` stays the
    /// authoritative value; the channel only mirrors it for the UI loop.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackSource> {
        self.source_tx.subscribe()
    }

    /// Grant the output to the track player, force-stopping live playback
    /// first if it holds the output. Never fails; the whole claim runs with
    /// the state lock held, so two claims cannot interleave.
    pub fn claim_track(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.current == PlaybackSource::Live {
                debug!("claim_track: force-stopping live playback");
                if let Some(stop_live) = state.stop_live.as_ref() {
                    stop_live();
                }
            }
            state.current = PlaybackSource::Track;
            let _ = self.source_tx.send(PlaybackSource::Track);
        }
    }

    /// Grant the output to the live player, force-stopping track playback
    /// first if it holds the output.
    pub fn claim_live(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.current == PlaybackSource::Track {
                debug!("claim_live: force-stopping track playback");
                if let Some(stop_track) = state.stop_track.as_ref() {
                    stop_track();
                }
            }
            state.current = PlaybackSource::Live;
            let _ = self.source_tx.send(PlaybackSource::Live);
        }
    }

    /// Hand the output back, but only if `source` still owns it. A stale
    /// release (a track-ended callback firing after the user switched to
    /// live) must not clobber the newer claim.
    pub fn release(&self, source: PlaybackSource) {
        if let Ok(mut state) = self.state.lock() {
            if state.current == source {
                debug!("releasing audio output held by {:?}", source);
                state.current = PlaybackSource::None;
                let _ = self.source_tx.send(PlaybackSource::None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_stopper(counter: Arc<AtomicUsize>) -> Stopper {
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn starts_with_no_owner() {
        let arbiter = SessionArbiter::new();
        assert_eq!(arbiter.current(), PlaybackSource::None);
    }

    #[test]
    fn claim_track_stops_live_and_takes_ownership() {
        let arbiter = SessionArbiter::new();
        let live_stops = Arc::new(AtomicUsize::new(0));
        arbiter.set_live_stopper(counting_stopper(live_stops.clone()));

        arbiter.claim_live();
        assert_eq!(arbiter.current(), PlaybackSource::Live);

        arbiter.claim_track();
        assert_eq!(arbiter.current(), PlaybackSource::Track);
        assert_eq!(live_stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn claim_live_stops_track_and_takes_ownership() {
        let arbiter = SessionArbiter::new();
        let track_stops = Arc::new(AtomicUsize::new(0));
        arbiter.set_track_stopper(counting_stopper(track_stops.clone()));

        arbiter.claim_track();
        arbiter.claim_live();
        assert_eq!(arbiter.current(), PlaybackSource::Live);
        assert_eq!(track_stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reclaiming_the_same_source_does_not_stop_anything() {
        let arbiter = SessionArbiter::new();
        let track_stops = Arc::new(AtomicUsize::new(0));
        let live_stops = Arc::new(AtomicUsize::new(0));
        arbiter.set_track_stopper(counting_stopper(track_stops.clone()));
        arbiter.set_live_stopper(counting_stopper(live_stops.clone()));

        arbiter.claim_track();
        arbiter.claim_track();
        assert_eq!(track_stops.load(Ordering::SeqCst), 0);
        assert_eq!(live_stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_release_is_a_no_op() {
        let arbiter = SessionArbiter::new();

        arbiter.release(PlaybackSource::Track);
        assert_eq!(arbiter.current(), PlaybackSource::None);

        arbiter.claim_live();
        arbiter.release(PlaybackSource::Track);
        assert_eq!(arbiter.current(), PlaybackSource::Live);

        arbiter.release(PlaybackSource::Live);
        assert_eq!(arbiter.current(), PlaybackSource::None);
    }

    #[test]
    fn observers_see_every_transition() {
        let arbiter = SessionArbiter::new();
        let rx = arbiter.subscribe();

        arbiter.claim_track();
        assert_eq!(*rx.borrow(), PlaybackSource::Track);

        arbiter.claim_live();
        assert_eq!(*rx.borrow(), PlaybackSource::Live);

        arbiter.release(PlaybackSource::Live);
        assert_eq!(*rx.borrow(), PlaybackSource::None);
    }
}
