//! rentchat CLI entry point.
//!
//! Binary name: `rentchat`
//!
//! Parses arguments, wires the session engine to the SQLite store and the
//! HTTP gateway, then dispatches to a command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,rentchat_core=debug,rentchat_infra=debug",
        _ => "trace",
    };
    let enable_otel = std::env::var("RENTCHAT_OTEL").is_ok_and(|v| v == "1" || v == "true");
    if let Err(e) = rentchat_observe::tracing_setup::init_tracing(filter, enable_otel) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "rentchat", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    let out = cli.output();

    let result = match cli.command {
        Commands::Sessions => cli::session::list_sessions(&state, out).await,
        Commands::Open {
            reservation,
            follow,
        } => cli::session::open_session(&state, &reservation, follow, out).await,
        Commands::Read { session } => cli::session::mark_read(&state, &session, out).await,
        Commands::Send { reservation, text } => {
            cli::message::send_message(&state, &reservation, &text.join(" "), out).await
        }
        Commands::Confirm { reservation } => {
            cli::reservation::confirm(&state, &reservation, out).await
        }
        Commands::Reject { reservation } => {
            cli::reservation::reject(&state, &reservation, out).await
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    state.engine.close_live_subscription();
    rentchat_observe::tracing_setup::shutdown_tracing();
    result
}
