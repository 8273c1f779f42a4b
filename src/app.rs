//! Application controller: owns the UI state, routes key presses and
//! transport commands to the playback controllers, and keeps the
//! media-session projection in sync with what is actually audible.
//!
//! Playback controllers are the source of truth; the controller re-derives
//! the UI's view of them every frame instead of tracking it separately, so a
//! force-stop or a finished track can never leave a stale "playing" marker.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use log::warn;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::actions::{Request, Response};
use crate::arbiter::{PlaybackSource, SessionArbiter};
use crate::catalog::Show;
use crate::config::Config;
use crate::live::LiveController;
use crate::media_session::{
    MediaSessionApi, NowPlayingView, SessionProjector, TransportCommand,
};
use crate::output::AudioOutput;
use crate::status::LiveStatusSnapshot;
use crate::ticker::ticker_line;
use crate::track::TrackController;
use crate::ui::{PlayingTrack, UIState};

const SEEK_STEP: Duration = Duration::from_secs(10);
const VOLUME_STEP: f32 = 0.1;
// Marquee advances every few frames, not every frame.
const TICKER_FRAME_DIVIDER: u64 = 3;

pub struct AppController {
    pub ui_app: UIState,
    config: Config,
    arbiter: Arc<SessionArbiter>,
    track: Arc<TrackController>,
    live: Arc<LiveController>,
    projector: SessionProjector,
    status_rx: watch::Receiver<LiveStatusSnapshot>,
    req_tx: mpsc::UnboundedSender<Request>,
    resp_rx: mpsc::UnboundedReceiver<Response>,
    transport_rx: mpsc::UnboundedReceiver<TransportCommand>,
    last_view: NowPlayingView,
    frames: u64,
}

impl AppController {
    pub fn new(
        config: Config,
        output: Arc<dyn AudioOutput>,
        session: Arc<dyn MediaSessionApi>,
        status_rx: watch::Receiver<LiveStatusSnapshot>,
        req_tx: mpsc::UnboundedSender<Request>,
        resp_rx: mpsc::UnboundedReceiver<Response>,
    ) -> Self {
        let arbiter = SessionArbiter::new();
        let track = TrackController::new(output.clone(), arbiter.clone());
        let live = LiveController::new(output, arbiter.clone());

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let projector = SessionProjector::new(session, transport_tx.clone(), &config.station_name);

        // A finished track behaves like a lock-screen "next" tap.
        track.set_on_ended(Box::new(move || {
            let _ = transport_tx.send(TransportCommand::NextTrack);
        }));

        let mut ui_app = UIState::new();
        ui_app.is_fetching_shows = req_tx.send(Request::LoadShows).is_ok();

        Self {
            ui_app,
            config,
            arbiter,
            track,
            live,
            projector,
            status_rx,
            req_tx,
            resp_rx,
            transport_rx,
            last_view: NowPlayingView::default(),
            frames: 0,
        }
    }

    /// Per-frame work: drain worker responses and transport commands, then
    /// refresh the UI fields and the media-session projection from the
    /// controllers' current state.
    pub fn pump(&mut self) {
        while let Ok(response) = self.resp_rx.try_recv() {
            self.handle_response(response);
        }
        while let Ok(command) = self.transport_rx.try_recv() {
            self.handle_transport(command);
        }

        self.ui_app.live_status = self.status_rx.borrow().clone();
        self.ui_app.source = self.arbiter.current();
        self.ui_app.track_status = self.track.status();

        let current_track = self.track.current_track();
        let playing = current_track
            .as_ref()
            .and_then(|track| locate_track(&self.ui_app.shows, &track.id));
        self.ui_app.playing = playing;

        let view = self.build_view(current_track.map(|track| track.title));
        if view != self.last_view {
            self.projector.update(&view);
            self.last_view = view;
        }

        self.refresh_ticker();
    }

    /// Unregister the media-session surface. Called once on exit.
    pub fn teardown(&mut self) {
        self.projector.teardown();
    }

    pub fn handle_key_event(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.ui_app.quit()
            }
            KeyCode::Char('q') | KeyCode::Esc => self.ui_app.quit(),
            KeyCode::Up => self.ui_app.previous_track(),
            KeyCode::Down => self.ui_app.next_track(),
            KeyCode::Tab => self.ui_app.next_show(),
            KeyCode::BackTab => self.ui_app.previous_show(),
            KeyCode::Enter => self.play_selected(),
            KeyCode::Char(' ') => self.toggle_active_source(),
            KeyCode::Char('l') => self.toggle_live(),
            KeyCode::Char('n') => self.advance(1),
            KeyCode::Char('p') => self.advance(-1),
            KeyCode::Char('+') | KeyCode::Char('=') => self.adjust_volume(VOLUME_STEP),
            KeyCode::Char('-') => self.adjust_volume(-VOLUME_STEP),
            KeyCode::Left => self.seek_by(-1),
            KeyCode::Right => self.seek_by(1),
            KeyCode::Char('r') => self.refresh_shows(),
            _ => {}
        }
    }

    fn handle_response(&mut self, response: Response) {
        match response {
            Response::ShowsLoaded(Ok(shows)) => {
                self.ui_app.is_fetching_shows = false;
                self.ui_app.shows = shows;
                if self.ui_app.selected_show >= self.ui_app.shows.len() {
                    self.ui_app.select_show(0);
                }
                self.ui_app.status_message.clear();
            }
            Response::ShowsLoaded(Err(e)) => {
                self.ui_app.is_fetching_shows = false;
                self.ui_app.status_message = format!("Failed to load shows: {}", e);
            }
        }
    }

    fn handle_transport(&mut self, command: TransportCommand) {
        match command {
            TransportCommand::PlayLive => self.start_live(),
            TransportCommand::StopLive => self.live.stop_live(),
            // After an unload the session keeps the track handlers wired so a
            // lock-screen play tap can resume; with no handle left, toggling
            // would be a silent no-op, so restart instead.
            TransportCommand::ToggleTrack => match self.arbiter.current() {
                PlaybackSource::None => self.resume_idle(),
                _ => self.track.toggle_play_pause(),
            },
            TransportCommand::UnloadTrack => self.track.unload(),
            TransportCommand::NextTrack => self.advance(1),
            TransportCommand::PreviousTrack => self.advance(-1),
        }
    }

    /// Start the currently highlighted track. The load runs in the
    /// background; the UI catches up once the controller owns the output.
    fn play_selected(&mut self) {
        let track_ref = match self.ui_app.selected_track_ref() {
            Some(track) => track.clone(),
            None => return,
        };
        self.ui_app.status_message.clear();

        let controller = self.track.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.load_and_play(track_ref).await {
                warn!("{:#}", e);
            }
        });
    }

    fn start_live(&mut self) {
        let controller = self.live.clone();
        let url = self.config.live_stream_url();
        tokio::spawn(async move {
            if let Err(e) = controller.play_live(&url).await {
                warn!("{:#}", e);
            }
        });
    }

    /// Space bar: pause/resume whatever is audible. With nothing active it
    /// resumes the side that played last, falling back to the highlighted
    /// track.
    fn toggle_active_source(&mut self) {
        match self.arbiter.current() {
            PlaybackSource::Track => self.track.toggle_play_pause(),
            PlaybackSource::Live => self.live.stop_live(),
            PlaybackSource::None => self.resume_idle(),
        }
    }

    /// Restart the side that played last; with no history, the highlighted
    /// track. Track playback restarts from the beginning since its handle
    /// was released at teardown.
    fn resume_idle(&mut self) {
        match self.projector.last_real_source() {
            Some(PlaybackSource::Live) => self.start_live(),
            _ => self.play_selected(),
        }
    }

    /// The live key only connects while the status feed says the broadcast
    /// is on air; a stale or failed snapshot keeps the stream unreachable.
    fn toggle_live(&mut self) {
        if self.arbiter.current() == PlaybackSource::Live {
            self.live.stop_live();
            return;
        }
        if !self.status_rx.borrow().live_now() {
            self.ui_app.status_message = "Live stream is not on air right now".to_string();
            return;
        }
        self.ui_app.status_message.clear();
        self.start_live();
    }

    /// Move within the playing show's track order. Off either end there is
    /// nothing further to play and the track side goes idle.
    fn advance(&mut self, offset: isize) {
        let (show_idx, track_idx) = match self.ui_app.playing_position() {
            Some(position) => position,
            None => return,
        };
        let track_count = self.ui_app.shows[show_idx].tracks.len();
        let target = track_idx as isize + offset;
        if target < 0 || target >= track_count as isize {
            self.track.unload();
            self.ui_app.playing = None;
            return;
        }

        if self.ui_app.selected_show != show_idx {
            self.ui_app.select_show(show_idx);
        }
        self.ui_app.select_track(target as usize);
        self.play_selected();
    }

    fn adjust_volume(&mut self, delta: f32) {
        let volume = (self.ui_app.volume + delta).clamp(0.0, 1.0);
        self.track.set_volume(volume);
        self.ui_app.volume = volume;
    }

    fn seek_by(&self, direction: i64) {
        if let Some(status) = self.track.status() {
            let position = if direction < 0 {
                status.position.saturating_sub(SEEK_STEP)
            } else {
                status.position + SEEK_STEP
            };
            self.track.seek(position);
        }
    }

    fn refresh_shows(&mut self) {
        self.ui_app.is_fetching_shows = self.req_tx.send(Request::LoadShows).is_ok();
    }

    fn build_view(&self, track_title: Option<String>) -> NowPlayingView {
        let (has_next, has_previous) = match self.ui_app.playing_position() {
            Some((show_idx, track_idx)) => {
                let count = self.ui_app.shows[show_idx].tracks.len();
                (track_idx + 1 < count, track_idx > 0)
            }
            None => (false, false),
        };
        let show_name = self
            .ui_app
            .playing_position()
            .map(|(show_idx, _)| self.ui_app.shows[show_idx].title.clone());

        let is_playing = match self.ui_app.source {
            PlaybackSource::Track => self
                .ui_app
                .track_status
                .map(|status| status.is_playing)
                .unwrap_or(false),
            PlaybackSource::Live => true,
            PlaybackSource::None => false,
        };

        NowPlayingView {
            source: Some(self.ui_app.source),
            live: self.ui_app.live_status.clone(),
            track_title,
            show_name,
            is_playing,
            has_next,
            has_previous,
        }
    }

    fn refresh_ticker(&mut self) {
        let track_title = self.ui_app.playing_position().map(|(show_idx, track_idx)| {
            self.ui_app.shows[show_idx].tracks[track_idx].title.clone()
        });
        let line = ticker_line(
            self.ui_app.source,
            &self.config.live_label,
            self.ui_app.live_status.now_playing.as_deref(),
            track_title.as_deref(),
        );
        if line != self.ui_app.ticker {
            self.ui_app.ticker = line;
            self.ui_app.ticker_offset = 0;
        }

        self.frames = self.frames.wrapping_add(1);
        if self.frames % TICKER_FRAME_DIVIDER == 0 {
            self.ui_app.advance_ticker();
        }
    }
}

fn locate_track(shows: &[Show], track_id: &str) -> Option<PlayingTrack> {
    shows.iter().find_map(|show| {
        show.tracks
            .iter()
            .find(|track| track.id == track_id)
            .map(|track| PlayingTrack {
                show_id: show.id.clone(),
                track_id: track.id.clone(),
            })
    })
}
