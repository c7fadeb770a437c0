//! Shared terminal rendering for transcripts and messages.

use chrono::{DateTime, Local};
use console::style;

use rentchat_types::chat::{ChatMessage, ChatSession, Sender};

/// Local wall-clock time for an epoch-millisecond timestamp.
pub fn format_timestamp(millis: i64) -> String {
    if millis <= 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Shorten `text` to at most `max` characters, ending in "..." when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

pub fn sender_label(message: &ChatMessage, participant_name: &str) -> String {
    match message.sender_id {
        Sender::Me => "you".to_string(),
        Sender::System => "system".to_string(),
        Sender::Other if participant_name.is_empty() => "renter".to_string(),
        Sender::Other => participant_name.to_string(),
    }
}

pub fn print_message(message: &ChatMessage, participant_name: &str) {
    let label = sender_label(message, participant_name);
    let label = match message.sender_id {
        Sender::Me => style(label).green().bold(),
        Sender::System => style(label).dim(),
        Sender::Other => style(label).cyan().bold(),
    };
    let marker = if message.is_unread() {
        style("●").yellow().to_string()
    } else {
        " ".to_string()
    };
    let text = match message.sender_id {
        Sender::System => style(&message.text).dim().italic().to_string(),
        _ => message.text.clone(),
    };

    println!(
        "  {marker} {} {label}: {text}",
        style(format_timestamp(message.timestamp)).dim()
    );
}

pub fn print_transcript(session: &ChatSession) {
    let name = &session.participant.name;
    println!();
    println!(
        "  Chat with {} {}",
        style(if name.is_empty() { "renter" } else { name.as_str() }).cyan().bold(),
        style(format!("({})", session.id)).dim()
    );
    if let Some(contact) = &session.participant.contact {
        println!("  {}", style(contact).dim());
    }
    println!();

    if session.messages.is_empty() {
        println!("  {}", style("No messages yet.").dim());
    }
    for message in &session.messages {
        print_message(message, name);
    }

    println!();
    if session.unread_count > 0 {
        println!("  {} unread", style(session.unread_count).yellow().bold());
        println!();
    }
}
