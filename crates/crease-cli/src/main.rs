// Scorer console entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, stdout is the scoreboard)
// 2. Load config
// 3. Resolve the match id (argument, then config)
// 4. Build the data service and channel connector
// 5. Create mpsc channels and the session
// 6. Spawn the session task
// 7. Spawn the stdin reader
// 8. Print updates until the session ends
// 9. Cleanup on exit

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

use crease_app::messages::{ScorerCommand, UiUpdate};
use crease_app::session::ScoringSession;
use crease_cli::input::{self, Input};
use crease_cli::render;
use crease_core::api::HttpDataService;
use crease_core::config;
use crease_core::ws_client::WsConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    let log_path = init_tracing()?;
    info!("Scorer console starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: api={}, ws={}",
        config.server.api_base_url, config.server.ws_url
    );

    // 3. Resolve the match id
    let match_id = std::env::args()
        .nth(1)
        .or_else(|| config.session.match_id.clone())
        .context("no match id given: pass one as the first argument or set [session] match_id")?;
    info!("Scoring match {match_id}");

    // 4. Data service and channel connector
    let service = Arc::new(HttpDataService::from_config(&config));
    let connector = Arc::new(WsConnector::new(config.clone()));

    // 5. Channels and session
    let (cmd_tx, cmd_rx) = mpsc::channel::<ScorerCommand>(64);
    let (ui_tx, mut ui_rx) = mpsc::channel::<UiUpdate>(256);
    let (session, events_rx) = ScoringSession::new(&config, match_id.clone(), service, connector);

    // 6. Session task
    let session_handle = tokio::spawn(async move {
        if let Err(e) = session.run(events_rx, cmd_rx, ui_tx).await {
            error!("Session error: {e:#}");
        }
    });

    // 7. Stdin reader
    let input_handle = tokio::spawn(read_commands(cmd_tx));

    println!("crease: scoring {match_id} (type help for commands, log at {})", log_path.display());

    // 8. Print updates until the session drops its sender
    while let Some(update) = ui_rx.recv().await {
        if let Some(line) = render::render(&update, chrono::Local::now().time()) {
            println!("{line}");
        }
    }

    // 9. Cleanup
    input_handle.abort();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), session_handle).await;

    info!("Scorer console shut down cleanly");
    Ok(())
}

/// Forward parsed stdin lines to the session until quit or end of input.
async fn read_commands(cmd_tx: mpsc::Sender<ScorerCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed");
                let _ = cmd_tx.send(ScorerCommand::Quit).await;
                return;
            }
            Err(e) => {
                error!("Failed to read stdin: {e}");
                let _ = cmd_tx.send(ScorerCommand::Quit).await;
                return;
            }
        };
        match input::parse_line(&line) {
            Ok(Input::Command(cmd)) => {
                let quit = cmd == ScorerCommand::Quit;
                if cmd_tx.send(cmd).await.is_err() || quit {
                    return;
                }
            }
            Ok(Input::Help) => println!("{}", input::HELP),
            Ok(Input::Empty) => {}
            Err(message) => println!("{message}"),
        }
    }
}

/// Initialize tracing to a log file under the platform data directory
/// (falling back to `./logs`). Returns the log file path.
fn init_tracing() -> anyhow::Result<std::path::PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = match directories::ProjectDirs::from("", "", "crease") {
        Some(dirs) => dirs.data_dir().join("logs"),
        None => std::env::current_dir()?.join("logs"),
    };
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let log_path = log_dir.join("crease.log");
    let log_file = std::fs::File::create(&log_path)?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("crease=info,crease_app=info,crease_core=info,warn")
            }),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(log_path)
}
