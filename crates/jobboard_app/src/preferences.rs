use std::path::Path;

use anyhow::{Context, Result};
use board_logging::{board_info, board_warn};
use jobboard_engine::StateDir;
use serde::{Deserialize, Serialize};

pub const PREFERENCES_FILENAME: &str = "preferences.ron";

/// User settings kept across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub server_base_url: Option<String>,
}

/// Missing or unreadable preferences fall back to defaults.
pub fn load(state_dir: &Path) -> Preferences {
    match StateDir::new(state_dir).read_ron::<Preferences>(PREFERENCES_FILENAME) {
        Ok(prefs) => prefs.unwrap_or_default(),
        Err(err) => {
            board_warn!("Ignoring unreadable preferences: {}", err);
            Preferences::default()
        }
    }
}

pub fn save(state_dir: &Path, prefs: &Preferences) -> Result<()> {
    let path = StateDir::new(state_dir)
        .write_ron(PREFERENCES_FILENAME, prefs)
        .context("failed to save preferences")?;
    board_info!("Saved preferences to {:?}", path);
    Ok(())
}
