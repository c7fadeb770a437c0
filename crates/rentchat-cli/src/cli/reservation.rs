//! Confirming and rejecting reservations from the chat.

use anyhow::{Context, Result};
use console::style;

use rentchat_types::chat::ChatMessage;
use rentchat_types::lease::ReservationStatus;

use super::Output;
use crate::state::AppState;

/// ```bash
/// rentchat confirm res-42
/// ```
pub async fn confirm(state: &AppState, reservation: &str, out: Output) -> Result<()> {
    load(state, reservation).await?;
    let message = state
        .engine
        .confirm_reservation()
        .await
        .context("Failed to confirm reservation")?;
    report(state, &message, out)
}

/// ```bash
/// rentchat reject res-42
/// ```
pub async fn reject(state: &AppState, reservation: &str, out: Output) -> Result<()> {
    load(state, reservation).await?;
    let message = state
        .engine
        .reject_reservation()
        .await
        .context("Failed to reject reservation")?;
    report(state, &message, out)
}

async fn load(state: &AppState, reservation: &str) -> Result<()> {
    state
        .engine
        .load_chat_session(reservation)
        .await
        .with_context(|| format!("Failed to open chat for reservation '{reservation}'"))?;
    Ok(())
}

fn report(state: &AppState, message: &ChatMessage, out: Output) -> Result<()> {
    let lease = state.engine.lease_context();
    let status = lease
        .as_ref()
        .map(|l| l.status.clone())
        .unwrap_or_default();

    if out.json {
        let result = serde_json::json!({
            "reservation_id": lease.as_ref().map(|l| l.id.clone()),
            "status": status,
            "message": message,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if out.quiet {
        return Ok(());
    }

    let badge = match status {
        ReservationStatus::Confirmed => style("confirmed").green().bold(),
        ReservationStatus::Rejected => style("rejected").red().bold(),
        _ => style(status.code()).bold(),
    };
    println!("  Reservation {badge}");
    println!("  {} {}", style("Sent:").dim(), message.text);
    Ok(())
}
