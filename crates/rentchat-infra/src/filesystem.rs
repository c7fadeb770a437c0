//! Data directory layout.

use std::path::{Path, PathBuf};

/// Name of the SQLite database file inside the data directory.
pub const DATABASE_FILE: &str = "rentchat.db";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `RENTCHAT_DATA_DIR` environment variable
/// 2. `~/.rentchat`
/// 3. `./.rentchat`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RENTCHAT_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".rentchat");
    }

    PathBuf::from(".rentchat")
}

/// SQLite URL for the session database under `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join(DATABASE_FILE).display())
}
