//! CLI command definitions for the `rentchat` binary.

pub mod message;
pub mod render;
pub mod reservation;
pub mod session;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Chat with renters about their reservations.
#[derive(Parser)]
#[command(name = "rentchat", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output(&self) -> Output {
        Output {
            json: self.json,
            quiet: self.quiet,
        }
    }
}

/// How command results are printed.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List stored chat sessions.
    #[command(alias = "ls")]
    Sessions,

    /// Load a reservation's chat and print the transcript.
    Open {
        /// Reservation (or chat topic) id.
        reservation: String,

        /// Keep streaming live messages until Ctrl+C.
        #[arg(short, long)]
        follow: bool,
    },

    /// Send a message in a reservation's chat.
    Send {
        /// Reservation (or chat topic) id.
        reservation: String,

        /// Message text; multiple words are joined with spaces.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Mark every message in a session read.
    Read {
        /// Session (topic) or reservation id.
        session: String,
    },

    /// Confirm a reservation and tell the renter.
    Confirm {
        reservation: String,
    },

    /// Reject a reservation and tell the renter.
    Reject {
        reservation: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
