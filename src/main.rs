mod actions;
mod app;
mod arbiter;
mod catalog;
mod config;
mod live;
mod media_session;
mod output;
mod status;
mod ticker;
mod track;
mod ui;

use actions::{Request, Response};
use anyhow::Result;
use app::AppController;
use catalog::CatalogClient;
use clap::Parser;
use config::Config;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use media_session::LogMediaSession;
use output::RodioOutput;
use ratatui::{backend::CrosstermBackend, Terminal};
use status::StatusPoller;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = Config::parse();

    // Set up panic handler to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // The audio device stream must outlive every sink, so it stays anchored
    // here for the whole run.
    let (_stream, stream_handle) = rodio::OutputStream::try_default()?;
    let audio_output: Arc<dyn output::AudioOutput> = Arc::new(RodioOutput::new(stream_handle)?);

    let poller = StatusPoller::spawn(
        config.status_url(),
        config.mount.clone(),
        config.status_interval(),
    );

    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    spawn_catalog_worker(config.server_url.clone(), req_rx, resp_tx);

    let session = LogMediaSession::new();
    let mut app_controller = AppController::new(
        config,
        audio_output,
        session,
        poller.subscribe(),
        req_tx,
        resp_rx,
    );

    // Run the main loop
    let res = run_app(&mut terminal, &mut app_controller).await;

    app_controller.teardown();
    poller.shutdown();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

/// Catalog fetches run off the UI loop; requests come in over a channel and
/// results go back the same way.
fn spawn_catalog_worker(
    server_url: String,
    mut req_rx: mpsc::UnboundedReceiver<Request>,
    resp_tx: mpsc::UnboundedSender<Response>,
) {
    tokio::spawn(async move {
        let client = CatalogClient::new(server_url);
        while let Some(request) = req_rx.recv().await {
            let response = match request {
                Request::LoadShows => Response::ShowsLoaded(client.get_shows().await),
            };
            if resp_tx.send(response).is_err() {
                break;
            }
        }
    });
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app_controller: &mut AppController,
) -> Result<()> {
    loop {
        app_controller.pump();

        if let Err(_e) = terminal.draw(|f| ui::render_ui(f, &mut app_controller.ui_app)) {
            break;
        }

        // Handle input with shorter timeout for better responsiveness
        if event::poll(Duration::from_millis(50))? {
            match event::read() {
                Ok(Event::Key(key)) => {
                    app_controller.handle_key_event(key);
                }
                Ok(Event::Resize(_, _)) => {
                    // Terminal was resized, UI will automatically adjust on next render
                }
                Ok(_) => {}  // Ignore other events
                Err(_) => {} // Ignore read errors
            }
        }

        // Small delay to prevent high CPU usage but keep responsive
        sleep(Duration::from_millis(16)).await; // ~60 FPS

        if app_controller.ui_app.should_quit {
            break;
        }
    }

    Ok(())
}
