use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tinker_core::{Config, ConnectionManager, Dispatcher, WebSocketConnector};
use tracing::{info, warn};

mod app;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use tui::{AppEvent, EventHandler, Tui};

#[derive(Parser)]
#[command(name = "tinker")]
#[command(about = "Terminal chat for a Tinker device")]
#[command(version)]
struct Cli {
    /// WebSocket URL of the device (overrides TINKER_ENDPOINT and the config file)
    #[arg(short, long)]
    endpoint: Option<String>,
    /// Seconds to wait for the connection to open
    #[arg(long, value_name = "SECS")]
    open_timeout: Option<u64>,
    /// Write the effective settings back to the config file
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, load_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::new(), Some(e)),
    };
    config.apply_env();
    config.apply_cli(cli.endpoint, cli.open_timeout);
    config.validate()?;

    if cli.save {
        config.save()?;
    }

    let log_path = logging::init(&config)?;
    if let Some(e) = load_error {
        warn!(error = %e, "Could not read config file; using defaults");
    }
    info!(endpoint = %config.endpoint, log = %log_path.display(), "Starting");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, &config).await;
    tui::restore()?;

    result
}

async fn run(terminal: &mut Tui, config: &Config) -> Result<()> {
    let mut events = EventHandler::new(config.status_poll_interval());

    let mut manager = ConnectionManager::new(
        Arc::new(WebSocketConnector),
        config.endpoint.clone(),
        config.open_timeout(),
    );
    let remote_tx = events.sender();
    manager.on_incoming(move |event| {
        let _ = remote_tx.send(AppEvent::Remote(event));
    });

    let outcome_tx = events.sender();
    let dispatcher = Dispatcher::spawn(manager, move |outcome| {
        let _ = outcome_tx.send(AppEvent::Outcome(outcome));
    });

    let mut app = App::new(dispatcher);
    app.mount();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(&mut app, event)?;
    }

    app.shutdown().await;
    info!("Stopped");
    Ok(())
}
