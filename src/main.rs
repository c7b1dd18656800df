use std::error::Error;
use std::io;
use std::time::{Duration, Instant};

mod app;
mod clipboard;
mod command;
mod config;
mod cursor;
mod dispatch;
mod envelope;
mod event;
mod registry;
mod session;
mod snapshot;
mod tail;
mod transport;
mod ui;

use app::App;
use clap::Parser;
use config::{Config, init_logging};
use crossterm::cursor::Show;
use crossterm::event::{Event, EventStream};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use envelope::{Envelope, HttpBackend};
use futures_util::StreamExt;
use ratatui::Terminal;
use tail::Tail;
use tokio::sync::mpsc;
use tracing::info;
use transport::{TailTransport, WsConnector};

const TICK: Duration = Duration::from_millis(250);

async fn run_app() -> Result<(), Box<dyn Error>> {
    struct TerminalCleanup;
    impl Drop for TerminalCleanup {
        fn drop(&mut self) {
            let _ = disable_raw_mode();
            let mut stdout = io::stdout();
            let _ = execute!(stdout, Show, terminal::LeaveAlternateScreen);
        }
    }

    let config = Config::parse();
    init_logging(config.log_file.as_deref())?;
    let server = config.server_url()?;
    let hydration = config
        .snapshot
        .as_deref()
        .map(snapshot::load)
        .transpose()?;
    let backend = HttpBackend::new(server.clone(), config.csrf_token.clone())?;

    let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
    let (completion_tx, mut completion_rx) = mpsc::unbounded_channel();
    let tail = if config.poll {
        Tail::<WsConnector>::pull()
    } else {
        let connector = WsConnector::from_server(&server)?;
        info!(url = %connector.url(), "streaming tail");
        Tail::push(TailTransport::new(
            connector,
            config.reconnect_policy(),
            transport_tx,
        ))
    }
    .with_limit(config.tail_limit());
    info!(%server, poll = config.poll, "console starting");

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen)?;
    let _cleanup = TerminalCleanup;
    let backend_term = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend_term)?;

    let mut app = App::new(
        tail,
        hydration,
        Envelope::new(backend),
        completion_tx,
        config.rule_action,
        config.poll_interval(),
    );
    app.start();

    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(TICK);
    loop {
        terminal.draw(|frame| ui::draw(frame, &mut app))?;
        tokio::select! {
            _ = ticker.tick() => {
                app.on_tick(Instant::now());
            }
            Some(message) = transport_rx.recv() => {
                app.on_transport(message);
            }
            Some(completion) = completion_rx.recv() => {
                app.on_completion(completion);
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) => {
                        if app.handle_key(key) {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                    None => break,
                }
            }
        }
    }

    info!("console exiting");
    terminal.show_cursor()?;
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_app().await {
        eprintln!("Error: {}", err);
    }
}
