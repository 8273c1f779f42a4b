//! Projection of playback state onto the OS media-session surface.
//!
//! The platform control surface (lock screen, notification, keyboard media
//! keys) is modeled as a capability trait so the projection logic runs the
//! same against a desktop integration, a browser session, or the in-memory
//! fake used in tests. Handlers do not act directly; they post transport
//! commands back to the app loop, which owns the controllers.

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::arbiter::PlaybackSource;
use crate::status::LiveStatusSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionAction {
    Play,
    Pause,
    Stop,
    NextTrack,
    PreviousTrack,
}

pub const ALL_ACTIONS: [SessionAction; 5] = [
    SessionAction::Play,
    SessionAction::Pause,
    SessionAction::Stop,
    SessionAction::NextTrack,
    SessionAction::PreviousTrack,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPlaybackState {
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub artwork_url: Option<String>,
}

pub type ActionHandler = Box<dyn Fn() + Send + Sync>;

/// The platform media-session capability the projector drives.
pub trait MediaSessionApi: Send + Sync {
    fn set_metadata(&self, metadata: &SessionMetadata);
    fn set_playback_state(&self, state: SessionPlaybackState);
    fn set_handler(&self, action: SessionAction, handler: ActionHandler);
    fn clear_handler(&self, action: SessionAction);
}

/// What a transport-control tap should do, resolved per active source by the
/// projector and executed by the app loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    PlayLive,
    StopLive,
    ToggleTrack,
    UnloadTrack,
    NextTrack,
    PreviousTrack,
}

/// Everything the projector needs to know about the current playback state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NowPlayingView {
    pub source: Option<PlaybackSource>,
    pub live: LiveStatusSnapshot,
    pub track_title: Option<String>,
    pub show_name: Option<String>,
    /// Whether the active source is actually audible. A paused track keeps
    /// source `Track` but must project as paused.
    pub is_playing: bool,
    pub has_next: bool,
    pub has_previous: bool,
}

impl NowPlayingView {
    fn source(&self) -> PlaybackSource {
        self.source.unwrap_or(PlaybackSource::None)
    }
}

pub struct SessionProjector {
    session: Arc<dyn MediaSessionApi>,
    commands: mpsc::UnboundedSender<TransportCommand>,
    station_name: String,
    /// Last source that was actually `Track` or `Live`, kept across `None`
    /// transitions so a lock-screen play tap can still resume something.
    last_real_source: Option<PlaybackSource>,
}

impl SessionProjector {
    pub fn new(
        session: Arc<dyn MediaSessionApi>,
        commands: mpsc::UnboundedSender<TransportCommand>,
        station_name: impl Into<String>,
    ) -> Self {
        Self {
            session,
            commands,
            station_name: station_name.into(),
            last_real_source: None,
        }
    }

    pub fn last_real_source(&self) -> Option<PlaybackSource> {
        self.last_real_source
    }

    /// Re-project metadata, playback state and transport handlers for the
    /// given view. Called on every source or metadata change.
    pub fn update(&mut self, view: &NowPlayingView) {
        match view.source() {
            PlaybackSource::None => {
                // Keep metadata and the previous source's handlers wired so a
                // resume tap still works; only flag the session as paused.
                self.session.set_playback_state(SessionPlaybackState::Paused);
            }
            PlaybackSource::Live => {
                self.last_real_source = Some(PlaybackSource::Live);
                self.session.set_metadata(&SessionMetadata {
                    title: view
                        .live
                        .now_playing
                        .clone()
                        .unwrap_or_else(|| "Live Stream".to_string()),
                    artist: view
                        .live
                        .show_title
                        .clone()
                        .unwrap_or_else(|| self.station_name.clone()),
                    ..Default::default()
                });
                self.session
                    .set_playback_state(SessionPlaybackState::Playing);
                self.wire(SessionAction::Play, TransportCommand::PlayLive);
                self.wire(SessionAction::Pause, TransportCommand::StopLive);
                self.wire(SessionAction::Stop, TransportCommand::StopLive);
                // Live has no queue.
                self.session.clear_handler(SessionAction::NextTrack);
                self.session.clear_handler(SessionAction::PreviousTrack);
            }
            PlaybackSource::Track => {
                self.last_real_source = Some(PlaybackSource::Track);
                self.session.set_metadata(&SessionMetadata {
                    title: view.track_title.clone().unwrap_or_default(),
                    artist: view
                        .show_name
                        .clone()
                        .unwrap_or_else(|| self.station_name.clone()),
                    ..Default::default()
                });
                self.session.set_playback_state(if view.is_playing {
                    SessionPlaybackState::Playing
                } else {
                    SessionPlaybackState::Paused
                });
                self.wire(SessionAction::Play, TransportCommand::ToggleTrack);
                self.wire(SessionAction::Pause, TransportCommand::ToggleTrack);
                self.wire(SessionAction::Stop, TransportCommand::UnloadTrack);
                if view.has_next {
                    self.wire(SessionAction::NextTrack, TransportCommand::NextTrack);
                } else {
                    self.session.clear_handler(SessionAction::NextTrack);
                }
                if view.has_previous {
                    self.wire(SessionAction::PreviousTrack, TransportCommand::PreviousTrack);
                } else {
                    self.session.clear_handler(SessionAction::PreviousTrack);
                }
            }
        }
    }

    /// Unregister everything so no stale callback leaks into a future mount.
    pub fn teardown(&mut self) {
        for action in ALL_ACTIONS {
            self.session.clear_handler(action);
        }
        self.session
            .set_playback_state(SessionPlaybackState::Stopped);
        self.last_real_source = None;
    }

    fn wire(&self, action: SessionAction, command: TransportCommand) {
        let commands = self.commands.clone();
        self.session.set_handler(
            action,
            Box::new(move || {
                let _ = commands.send(command);
            }),
        );
    }
}

/// Media session for environments without an OS control surface: remembers
/// handlers so transport taps can still be routed (and tested), and logs the
/// metadata it would have published.
#[derive(Default)]
pub struct LogMediaSession {
    handlers: Mutex<HashMap<SessionAction, ActionHandler>>,
}

impl LogMediaSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Invoke the registered handler for `action`, as the OS would on a
    /// transport-control tap. Returns false if none is registered.
    pub fn invoke(&self, action: SessionAction) -> bool {
        if let Ok(handlers) = self.handlers.lock() {
            if let Some(handler) = handlers.get(&action) {
                handler();
                return true;
            }
        }
        false
    }
}

impl MediaSessionApi for LogMediaSession {
    fn set_metadata(&self, metadata: &SessionMetadata) {
        debug!(
            "media session metadata: '{}' by '{}'",
            metadata.title, metadata.artist
        );
    }

    fn set_playback_state(&self, state: SessionPlaybackState) {
        debug!("media session playback state: {:?}", state);
    }

    fn set_handler(&self, action: SessionAction, handler: ActionHandler) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.insert(action, handler);
        }
    }

    fn clear_handler(&self, action: SessionAction) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.remove(&action);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSession;
    use super::*;

    fn projector(
        session: Arc<FakeSession>,
    ) -> (
        SessionProjector,
        mpsc::UnboundedReceiver<TransportCommand>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionProjector::new(session, tx, "OpenAir Radio"), rx)
    }

    fn live_view(now_playing: Option<&str>, show_title: Option<&str>) -> NowPlayingView {
        NowPlayingView {
            source: Some(PlaybackSource::Live),
            live: LiveStatusSnapshot {
                is_live: true,
                now_playing: now_playing.map(str::to_string),
                show_title: show_title.map(str::to_string),
                error: None,
            },
            is_playing: true,
            ..Default::default()
        }
    }

    fn track_view(title: &str, has_next: bool, has_previous: bool) -> NowPlayingView {
        NowPlayingView {
            source: Some(PlaybackSource::Track),
            track_title: Some(title.to_string()),
            show_name: Some("Morning Show".to_string()),
            is_playing: true,
            has_next,
            has_previous,
            ..Default::default()
        }
    }

    #[test]
    fn live_source_wires_live_transport_and_drops_queue_controls() {
        let session = FakeSession::new();
        let (mut projector, mut rx) = projector(session.clone());

        projector.update(&live_view(Some("DJ Set"), Some("Friday Night")));

        let metadata = session.last_metadata().unwrap();
        assert_eq!(metadata.title, "DJ Set");
        assert_eq!(metadata.artist, "Friday Night");
        assert_eq!(session.last_state(), Some(SessionPlaybackState::Playing));

        assert!(session.invoke(SessionAction::Play));
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::PlayLive);
        assert!(session.invoke(SessionAction::Pause));
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::StopLive);
        assert!(!session.has_handler(SessionAction::NextTrack));
        assert!(!session.has_handler(SessionAction::PreviousTrack));
    }

    #[test]
    fn live_metadata_falls_back_to_station_defaults() {
        let session = FakeSession::new();
        let (mut projector, _rx) = projector(session.clone());

        projector.update(&live_view(None, None));

        let metadata = session.last_metadata().unwrap();
        assert_eq!(metadata.title, "Live Stream");
        assert_eq!(metadata.artist, "OpenAir Radio");
    }

    #[test]
    fn track_source_wires_toggle_and_navigation() {
        let session = FakeSession::new();
        let (mut projector, mut rx) = projector(session.clone());

        projector.update(&track_view("Episode 3", true, true));

        let metadata = session.last_metadata().unwrap();
        assert_eq!(metadata.title, "Episode 3");
        assert_eq!(metadata.artist, "Morning Show");

        assert!(session.invoke(SessionAction::Pause));
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::ToggleTrack);
        assert!(session.invoke(SessionAction::Stop));
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::UnloadTrack);
        assert!(session.invoke(SessionAction::NextTrack));
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::NextTrack);
        assert!(session.invoke(SessionAction::PreviousTrack));
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::PreviousTrack);
    }

    #[test]
    fn paused_track_projects_paused_not_playing() {
        let session = FakeSession::new();
        let (mut projector, _rx) = projector(session.clone());

        let mut view = track_view("Episode 3", true, true);
        projector.update(&view);
        assert_eq!(session.last_state(), Some(SessionPlaybackState::Playing));

        // Pausing keeps the source; only the audibility flag flips.
        view.is_playing = false;
        projector.update(&view);
        assert_eq!(session.last_state(), Some(SessionPlaybackState::Paused));
        assert!(session.has_handler(SessionAction::Play));
        assert_eq!(projector.last_real_source(), Some(PlaybackSource::Track));
    }

    #[test]
    fn single_track_show_gets_no_navigation_handlers() {
        let session = FakeSession::new();
        let (mut projector, _rx) = projector(session.clone());

        projector.update(&track_view("Only Episode", false, false));

        assert!(!session.has_handler(SessionAction::NextTrack));
        assert!(!session.has_handler(SessionAction::PreviousTrack));
        assert!(session.has_handler(SessionAction::Play));
    }

    #[test]
    fn none_keeps_metadata_and_handlers_but_marks_paused() {
        let session = FakeSession::new();
        let (mut projector, mut rx) = projector(session.clone());

        projector.update(&track_view("Episode 3", true, false));
        let metadata_before = session.metadata_count();

        projector.update(&NowPlayingView {
            source: Some(PlaybackSource::None),
            ..Default::default()
        });

        assert_eq!(session.metadata_count(), metadata_before);
        assert_eq!(session.last_state(), Some(SessionPlaybackState::Paused));
        assert_eq!(projector.last_real_source(), Some(PlaybackSource::Track));

        // The resume tap still reaches the track transport.
        assert!(session.invoke(SessionAction::Play));
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::ToggleTrack);
    }

    #[test]
    fn teardown_unregisters_every_handler() {
        let session = FakeSession::new();
        let (mut projector, _rx) = projector(session.clone());

        projector.update(&track_view("Episode 3", true, true));
        projector.teardown();

        for action in ALL_ACTIONS {
            assert!(!session.has_handler(action));
        }
        assert_eq!(session.last_state(), Some(SessionPlaybackState::Stopped));
        assert_eq!(projector.last_real_source(), None);
    }

    #[test]
    fn log_session_routes_taps_through_registered_handlers() {
        let session = LogMediaSession::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut projector = SessionProjector::new(session.clone(), tx, "OpenAir Radio");

        projector.update(&live_view(Some("DJ Set"), None));
        assert!(session.invoke(SessionAction::Stop));
        assert_eq!(rx.try_recv().unwrap(), TransportCommand::StopLive);
        assert!(!session.invoke(SessionAction::NextTrack));
    }
}
