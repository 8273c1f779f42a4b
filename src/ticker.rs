//! Text projection for the scrolling now-playing marquee.

use crate::arbiter::PlaybackSource;

pub const IDLE_TEXT: &str = "NOTHING ON AIR RIGHT NOW";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerLine {
    pub text: String,
    /// True only when nothing is playing. Presentation hint, not control flow.
    pub is_empty: bool,
}

/// Build the marquee line for the current playback source.
pub fn ticker_line(
    source: PlaybackSource,
    live_label: &str,
    now_playing: Option<&str>,
    track_title: Option<&str>,
) -> TickerLine {
    match source {
        PlaybackSource::Live => {
            let text = match now_playing.map(str::trim).filter(|s| !s.is_empty()) {
                // Avoid "LIVE NOW: DJ Set: DJ Set" when the label already
                // carries the track name.
                Some(now_playing) if live_label.contains(now_playing) => live_label.to_string(),
                Some(now_playing) => format!("{}: {}", live_label, now_playing),
                None => live_label.to_string(),
            };
            TickerLine {
                text,
                is_empty: false,
            }
        }
        PlaybackSource::Track => TickerLine {
            text: format!("PLAYING NOW: {}", track_title.unwrap_or_default()),
            is_empty: false,
        },
        PlaybackSource::None => TickerLine {
            text: IDLE_TEXT.to_string(),
            is_empty: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_prefixes_the_label() {
        let line = ticker_line(PlaybackSource::Live, "LIVE NOW", Some("DJ Set"), None);
        assert_eq!(line.text, "LIVE NOW: DJ Set");
        assert!(!line.is_empty);
    }

    #[test]
    fn live_skips_now_playing_already_in_label() {
        let line = ticker_line(
            PlaybackSource::Live,
            "LIVE NOW: DJ Set",
            Some("DJ Set"),
            None,
        );
        assert_eq!(line.text, "LIVE NOW: DJ Set");
    }

    #[test]
    fn live_without_track_info_shows_label_alone() {
        let line = ticker_line(PlaybackSource::Live, "LIVE NOW", None, None);
        assert_eq!(line.text, "LIVE NOW");

        let blank = ticker_line(PlaybackSource::Live, "LIVE NOW", Some("  "), None);
        assert_eq!(blank.text, "LIVE NOW");
    }

    #[test]
    fn track_shows_playing_now() {
        let line = ticker_line(PlaybackSource::Track, "LIVE NOW", None, Some("Episode 3"));
        assert_eq!(line.text, "PLAYING NOW: Episode 3");
        assert!(!line.is_empty);
    }

    #[test]
    fn idle_line_is_fixed_and_empty() {
        let line = ticker_line(PlaybackSource::None, "LIVE NOW", Some("DJ Set"), Some("x"));
        assert_eq!(line.text, IDLE_TEXT);
        assert!(line.is_empty);
    }
}
