//! Session commands: list, open (optionally following live), mark read.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use tokio::sync::broadcast::error::RecvError;

use rentchat_types::event::EngineEvent;

use super::Output;
use super::render::{format_timestamp, print_message, print_transcript, truncate};
use crate::state::AppState;

/// List hydrated sessions, most recent activity first.
///
/// ```bash
/// rentchat sessions
/// rentchat sessions --json
/// ```
pub async fn list_sessions(state: &AppState, out: Output) -> Result<()> {
    let mut sessions = state.engine.sessions();
    sessions.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));

    if out.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if out.quiet {
        return Ok(());
    }

    if sessions.is_empty() {
        println!();
        println!(
            "  {} No chat sessions yet. Open one with: {}",
            style("i").blue().bold(),
            style("rentchat open <reservation>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Session").fg(Color::White),
        Cell::new("Renter").fg(Color::White),
        Cell::new("Last message").fg(Color::White),
        Cell::new("When").fg(Color::White),
        Cell::new("Unread").fg(Color::White),
    ]);

    for session in &sessions {
        let unread = if session.unread_count > 0 {
            Cell::new(session.unread_count).fg(Color::Yellow)
        } else {
            Cell::new("0").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&session.id).fg(Color::Cyan),
            Cell::new(&session.participant.name).fg(Color::White),
            Cell::new(truncate(&session.last_message, 40)).fg(Color::White),
            Cell::new(format_timestamp(session.last_message_time)).fg(Color::DarkGrey),
            unread,
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} session{}, {} unread",
        style(sessions.len()).bold(),
        if sessions.len() == 1 { "" } else { "s" },
        style(state.engine.total_unread()).yellow().bold()
    );
    println!();

    Ok(())
}

/// Load a reservation's chat, print it, and optionally follow live traffic.
///
/// Printing the transcript counts as reading it. While following, each new
/// message is printed and marked read.
///
/// ```bash
/// rentchat open res-42
/// rentchat open res-42 --follow
/// ```
pub async fn open_session(state: &AppState, reservation: &str, follow: bool, out: Output) -> Result<()> {
    // Subscribe before loading so no live event slips past.
    let mut events = state.engine.events().subscribe();

    let session = state
        .engine
        .load_chat_session(reservation)
        .await
        .with_context(|| format!("Failed to open chat for reservation '{reservation}'"))?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else if !out.quiet {
        if let Some(lease) = state.engine.lease_context() {
            println!();
            println!(
                "  Reservation {} {}",
                style(&lease.id).cyan(),
                style(format!("[{}]", lease.status)).dim()
            );
        }
        print_transcript(&session);
    }
    state.engine.mark_as_read(&session.id).await;

    if !follow {
        return Ok(());
    }

    if !out.json && !out.quiet {
        println!(
            "  {} as {}. {}",
            style("Following").green().bold(),
            style(&state.config.identity).cyan(),
            style("Press Ctrl+C to stop").dim()
        );
        println!();
    }

    let participant = session.participant.name.clone();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(EngineEvent::LiveMessage { session_id, message_id }) if session_id == session.id => {
                    let Some(message) = state
                        .engine
                        .session(&session_id)
                        .and_then(|s| s.message(&message_id).cloned())
                    else {
                        continue;
                    };
                    if out.json {
                        println!("{}", serde_json::to_string(&message)?);
                    } else if !out.quiet {
                        print_message(&message, &participant);
                    }
                    state.engine.mark_message_as_read(&session_id, &message_id).await;
                }
                Ok(EngineEvent::SubscriptionClosed { session_id }) if session_id == session.id => {
                    if !out.json && !out.quiet {
                        println!("  {}", style("Live connection closed.").red());
                    }
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged, some live messages were not printed");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    Ok(())
}

/// Mark every message in a session read.
///
/// ```bash
/// rentchat read res-42
/// ```
pub async fn mark_read(state: &AppState, session_id: &str, out: Output) -> Result<()> {
    let Some(session) = state.engine.session(session_id) else {
        bail!("No stored chat session '{session_id}'. Open it first with: rentchat open {session_id}");
    };

    let changed = state.engine.mark_as_read(&session.id).await;

    if out.json {
        let result = serde_json::json!({
            "session_id": session.id,
            "marked": session.unread_count,
            "changed": changed,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !out.quiet {
        if changed {
            println!(
                "  {} Marked {} message{} read in {}",
                style("✓").green(),
                session.unread_count,
                if session.unread_count == 1 { "" } else { "s" },
                style(&session.id).cyan()
            );
        } else {
            println!("  {} Nothing unread in {}", style("i").blue().bold(), style(&session.id).cyan());
        }
    }

    Ok(())
}
