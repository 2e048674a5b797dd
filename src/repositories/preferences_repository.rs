use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{ChatMode, User};

use super::error::{StorageError, StorageResult};

/// Startup state restored from the previous run: the last asserted
/// identity and the last selected mode. A fresh install simply has
/// neither.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiPreferences {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub mode: ChatMode,
}

/// One JSON file holding the UI preferences.
pub struct PreferencesRepository {
    file_path: PathBuf,
}

impl PreferencesRepository {
    /// Create repository with XDG-compliant path
    pub fn new() -> StorageResult<Self> {
        let config_dir = dirs::config_dir().ok_or_else(|| StorageError::Initialization {
            message: "Cannot determine config directory".into(),
        })?;
        Ok(Self {
            file_path: config_dir.join("ultrawan").join("preferences.json"),
        })
    }

    /// Create repository with custom path (for testing)
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    /// Load preferences; a missing or unreadable file yields defaults.
    pub async fn load(&self) -> UiPreferences {
        match tokio::fs::read_to_string(&self.file_path).await {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(prefs) => prefs,
                Err(e) => {
                    warn!(path = %self.file_path.display(), error = %e, "Ignoring malformed preferences file");
                    UiPreferences::default()
                }
            },
            Err(_) => UiPreferences::default(),
        }
    }

    pub async fn save(&self, prefs: &UiPreferences) -> StorageResult<()> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(prefs)?;
        let temp_path = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &self.file_path).await?;
        Ok(())
    }
}
