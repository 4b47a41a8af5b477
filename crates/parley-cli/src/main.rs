//! Parley CLI - a command-line client for the parley chat service.
//!
//! Handles logging in, keeping the session alive, and simple conversation
//! queries. Every authenticated call goes through the session-aware client,
//! so an expired access token is refreshed without user involvement.

mod app;

use std::io;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

/// Directory for an additional daily-rolling log file
const LOG_DIR_ENV: &str = "PARLEY_LOG_DIR";

const USAGE: &str = "\
Usage: parley <command> [args]

Commands:
  login [username]                     Log in (password from PARLEY_PASSWORD or prompt)
  register <username> <email> [name]   Create an account
  whoami                               Show the logged-in user
  status                               Show session state
  refresh                              Exchange the refresh token for a new pair now
  conversations [search]               List conversations
  logout                               Forget the saved session";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "parley.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };

    info!(command, "Parley CLI starting");
    let mut app = App::new()?;

    match command {
        "login" => app.login(args.get(1).cloned()).await,
        "register" => {
            let (Some(username), Some(email)) = (args.get(1), args.get(2)) else {
                anyhow::bail!("register needs a username and an email\n\n{}", USAGE);
            };
            let full_name = (args.len() > 3).then(|| args[3..].join(" "));
            app.register(username, email, full_name).await
        }
        "whoami" => app.whoami().await,
        "status" => {
            app.status();
            Ok(())
        }
        "refresh" => app.refresh().await,
        "conversations" => {
            let search = (args.len() > 1).then(|| args[1..].join(" "));
            app.conversations(search).await
        }
        "logout" => {
            app.logout();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => anyhow::bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}
