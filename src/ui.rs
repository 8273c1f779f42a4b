use crate::arbiter::PlaybackSource;
use crate::catalog::{Show, TrackRef};
use crate::output::HandleStatus;
use crate::status::LiveStatusSnapshot;
use crate::ticker::{ticker_line, TickerLine};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};
use std::time::Duration;

// Layout constants for better maintainability
const HEADER_HEIGHT: u16 = 6;
const FOOTER_HEIGHT: u16 = 3;
const STATUS_HEIGHT: u16 = 3;
const MARGIN: u16 = 1;

// Gap inserted between repetitions of the marquee text
const MARQUEE_GAP: &str = "   +++   ";

/// Identity of the track that currently owns playback, kept as ids so a
/// catalog refresh cannot silently repoint it at a different row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayingTrack {
    pub show_id: String,
    pub track_id: String,
}

pub struct UIState {
    pub shows: Vec<Show>,
    pub selected_show: usize,
    pub selected_track: usize,
    pub track_list_state: ListState,
    pub should_quit: bool,
    pub source: PlaybackSource,
    pub live_status: LiveStatusSnapshot,
    pub playing: Option<PlayingTrack>,
    pub track_status: Option<HandleStatus>,
    pub volume: f32,
    pub status_message: String,
    pub is_fetching_shows: bool,
    pub ticker: TickerLine,
    pub ticker_offset: usize,
}

impl UIState {
    pub fn new() -> Self {
        let mut track_list_state = ListState::default();
        track_list_state.select(Some(0));

        Self {
            shows: Vec::new(),
            selected_show: 0,
            selected_track: 0,
            track_list_state,
            should_quit: false,
            source: PlaybackSource::None,
            live_status: LiveStatusSnapshot::default(),
            playing: None,
            track_status: None,
            volume: 1.0,
            status_message: String::new(),
            is_fetching_shows: false,
            ticker: ticker_line(PlaybackSource::None, "", None, None),
            ticker_offset: 0,
        }
    }

    pub fn current_show(&self) -> Option<&Show> {
        self.shows.get(self.selected_show)
    }

    pub fn selected_track_ref(&self) -> Option<&TrackRef> {
        self.current_show()
            .and_then(|show| show.tracks.get(self.selected_track))
    }

    pub fn select_show(&mut self, index: usize) {
        if index < self.shows.len() {
            self.selected_show = index;
            self.select_track(0);
        }
    }

    pub fn next_show(&mut self) {
        if !self.shows.is_empty() {
            let next = (self.selected_show + 1) % self.shows.len();
            self.select_show(next);
        }
    }

    pub fn previous_show(&mut self) {
        if !self.shows.is_empty() {
            let prev = if self.selected_show == 0 {
                self.shows.len() - 1
            } else {
                self.selected_show - 1
            };
            self.select_show(prev);
        }
    }

    pub fn select_track(&mut self, index: usize) {
        self.selected_track = index;
        self.track_list_state.select(Some(index));
    }

    pub fn next_track(&mut self) {
        let count = self.current_show().map(|s| s.tracks.len()).unwrap_or(0);
        if count > 0 {
            self.select_track((self.selected_track + 1) % count);
        }
    }

    pub fn previous_track(&mut self) {
        let count = self.current_show().map(|s| s.tracks.len()).unwrap_or(0);
        if count > 0 {
            let prev = if self.selected_track == 0 {
                count - 1
            } else {
                self.selected_track - 1
            };
            self.select_track(prev);
        }
    }

    /// Resolve the playing-track ids back to indices in the current catalog.
    pub fn playing_position(&self) -> Option<(usize, usize)> {
        let playing = self.playing.as_ref()?;
        let show_idx = self.shows.iter().position(|s| s.id == playing.show_id)?;
        let track_idx = self.shows[show_idx]
            .tracks
            .iter()
            .position(|t| t.id == playing.track_id)?;
        Some((show_idx, track_idx))
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn advance_ticker(&mut self) {
        self.ticker_offset = self.ticker_offset.wrapping_add(1);
    }
}

pub fn render_ui(f: &mut Frame, app: &mut UIState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(MARGIN)
        .constraints([
            Constraint::Length(HEADER_HEIGHT), // Header with source + marquee
            Constraint::Min(10),               // Show and track browser
            Constraint::Length(STATUS_HEIGHT), // Status bar
            Constraint::Length(FOOTER_HEIGHT), // Footer
        ])
        .split(f.area());

    render_header(f, chunks[0], app);

    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(34), Constraint::Percentage(66)])
        .split(chunks[1]);
    render_show_list(f, panes[0], app);
    render_track_list(f, panes[1], app);

    render_status(f, chunks[2], app);
    render_footer(f, chunks[3]);
}

fn source_status_word(app: &UIState) -> &'static str {
    match app.source {
        PlaybackSource::Live => "LIVE",
        PlaybackSource::Track => {
            if app
                .track_status
                .map(|status| status.is_playing)
                .unwrap_or(false)
            {
                "PLAYING"
            } else {
                "PAUSED"
            }
        }
        PlaybackSource::None => "STOPPED",
    }
}

fn live_status_line(snapshot: &LiveStatusSnapshot) -> Line<'static> {
    if snapshot.error.is_some() {
        return Line::from(vec![
            Span::styled("Live: ", Style::default()),
            Span::styled("unavailable", Style::default().fg(Color::DarkGray)),
        ]);
    }
    if snapshot.live_now() {
        let mut spans = vec![
            Span::styled("Live: ", Style::default()),
            Span::styled(
                "ON AIR",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ),
        ];
        if let Some(now_playing) = &snapshot.now_playing {
            spans.push(Span::styled(
                format!(" • {}", now_playing),
                Style::default().fg(Color::White),
            ));
        }
        if let Some(show_title) = &snapshot.show_title {
            spans.push(Span::styled(
                format!(" ({})", show_title),
                Style::default().fg(Color::Cyan),
            ));
        }
        Line::from(spans)
    } else {
        Line::from(vec![
            Span::styled("Live: ", Style::default()),
            Span::styled("off air", Style::default().fg(Color::Gray)),
        ])
    }
}

fn render_header(f: &mut Frame, area: Rect, app: &UIState) {
    let marquee_width = area.width.saturating_sub(4) as usize;
    let marquee_style = if app.ticker.is_empty {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    };

    let content = vec![
        Line::from(vec![
            Span::styled(
                "OPENAIR",
                Style::default()
                    .fg(Color::Magenta)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" - community radio ", Style::default().fg(Color::Cyan)),
            Span::styled(
                source_status_word(app),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
        live_status_line(&app.live_status),
        Line::from(Span::styled(
            marquee_window(&app.ticker.text, app.ticker_offset, marquee_width),
            marquee_style,
        )),
    ];

    let header = Paragraph::new(Text::from(content)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta))
            .title("Now Playing"),
    );

    f.render_widget(header, area);
}

fn render_show_list(f: &mut Frame, area: Rect, app: &UIState) {
    let playing_show = app.playing_position().map(|(show_idx, _)| show_idx);
    let items: Vec<ListItem> = app
        .shows
        .iter()
        .enumerate()
        .map(|(index, show)| {
            let marker = if Some(index) == playing_show { "♪ " } else { "  " };
            let row = format!("{}{} ({})", marker, show.title, show.tracks.len());
            let mut item = ListItem::new(row);
            if index == app.selected_show {
                item = item.style(
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                );
            } else if Some(index) == playing_show {
                item = item.style(Style::default().fg(Color::Green));
            }
            item
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(format!("Shows ({})", app.shows.len())),
    );

    f.render_widget(list, area);
}

fn render_track_list(f: &mut Frame, area: Rect, app: &mut UIState) {
    let playing = app.playing_position();
    let show_idx = app.selected_show;
    let title = app
        .current_show()
        .map(|show| format!("Tracks - {}", show.title))
        .unwrap_or_else(|| "Tracks".to_string());

    let items: Vec<ListItem> = app
        .current_show()
        .map(|show| show.tracks.as_slice())
        .unwrap_or(&[])
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let row = format!(
                "{:>2}. {}  {}",
                track.order,
                track.title,
                format_seconds(track.duration)
            );
            let item = ListItem::new(row);
            if playing == Some((show_idx, index)) {
                item.style(Style::default().fg(Color::Green).add_modifier(Modifier::DIM))
            } else {
                item
            }
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(title),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(" > ");

    f.render_stateful_widget(list, area, &mut app.track_list_state);
}

fn render_status(f: &mut Frame, area: Rect, app: &UIState) {
    let text = if app.is_fetching_shows {
        "Fetching shows…".to_string()
    } else if !app.status_message.is_empty() {
        app.status_message.clone()
    } else {
        match (app.source, app.track_status) {
            (PlaybackSource::Track, Some(status)) => {
                let position = format_duration(status.position);
                match status.duration {
                    Some(duration) => format!(
                        "♪ {} / {}  vol {:.0}%",
                        position,
                        format_duration(duration),
                        app.volume * 100.0
                    ),
                    None => format!("♪ {}  vol {:.0}%", position, app.volume * 100.0),
                }
            }
            (PlaybackSource::Live, _) => "♪ live broadcast".to_string(),
            _ => String::new(),
        }
    };

    let status = Paragraph::new(Text::from(Line::from(vec![Span::styled(
        text,
        Style::default().fg(Color::White),
    )])))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue))
            .title("Status"),
    );

    f.render_widget(status, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let controls_text = vec![Line::from(vec![
        Span::styled(
            "↑/↓ ",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("Track • ", Style::default().fg(Color::White)),
        Span::styled(
            "TAB ",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("Show • ", Style::default().fg(Color::White)),
        Span::styled(
            "ENTER ",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("Play • ", Style::default().fg(Color::White)),
        Span::styled(
            "L ",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::styled("Live • ", Style::default().fg(Color::White)),
        Span::styled(
            "SPACE ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("Pause • ", Style::default().fg(Color::White)),
        Span::styled(
            "N/P ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("Next/Prev • ", Style::default().fg(Color::White)),
        Span::styled(
            "←/→ ",
            Style::default()
                .fg(Color::Blue)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("Seek • ", Style::default().fg(Color::White)),
        Span::styled(
            "Q ",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::styled("Quit", Style::default().fg(Color::White)),
    ])];

    let controls = Paragraph::new(Text::from(controls_text))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Gray))
                .title("Controls"),
        );

    f.render_widget(controls, area);
}

/// Window of the marquee text at `offset`, looping when the text is wider
/// than the viewport.
fn marquee_window(text: &str, offset: usize, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        return text.to_string();
    }
    let looped: Vec<char> = text.chars().chain(MARQUEE_GAP.chars()).collect();
    let start = offset % looped.len();
    looped
        .iter()
        .cycle()
        .skip(start)
        .take(width)
        .collect()
}

fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}:{:02}", total / 60, total % 60)
}

fn format_seconds(seconds: f64) -> String {
    format_duration(Duration::from_secs_f64(seconds.max(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_marquee_text_does_not_scroll() {
        assert_eq!(marquee_window("hello", 3, 20), "hello");
    }

    #[test]
    fn long_marquee_text_wraps_around() {
        let text = "abcdef";
        let window = marquee_window(text, 0, 4);
        assert_eq!(window, "abcd");
        let shifted = marquee_window(text, 2, 4);
        assert_eq!(shifted, "cdef");
        // Past the end the gap and the restart show through.
        let wrapped = marquee_window(text, text.len() + MARQUEE_GAP.len() - 1, 4);
        assert_eq!(wrapped.chars().count(), 4);
    }

    #[test]
    fn durations_format_as_minutes_and_seconds() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(65)), "1:05");
        assert_eq!(format_seconds(1800.0), "30:00");
        assert_eq!(format_seconds(-5.0), "0:00");
    }
}
