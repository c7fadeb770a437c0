//! Sending chat messages.

use anyhow::{Context, Result, bail};
use console::style;

use super::Output;
use super::render::format_timestamp;
use crate::state::AppState;

/// Load a reservation's chat and send one message as the configured identity.
///
/// The message is stored locally even if publishing fails; the failure is
/// logged and the server copy is reconciled on the next load.
///
/// ```bash
/// rentchat send res-42 "Keys are in the lockbox"
/// ```
pub async fn send_message(state: &AppState, reservation: &str, text: &str, out: Output) -> Result<()> {
    if text.trim().is_empty() {
        bail!("Message text is empty");
    }

    let session = state
        .engine
        .load_chat_session(reservation)
        .await
        .with_context(|| format!("Failed to open chat for reservation '{reservation}'"))?;

    let Some(message) = state.engine.send_message(text).await else {
        bail!("No active chat session for reservation '{reservation}'");
    };

    if out.json {
        println!("{}", serde_json::to_string_pretty(&message)?);
    } else if !out.quiet {
        println!(
            "  {} Sent to {} {}",
            style("✓").green(),
            style(&session.participant.name).cyan(),
            style(format!("at {}", format_timestamp(message.timestamp))).dim()
        );
    }

    Ok(())
}
