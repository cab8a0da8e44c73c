//! Application settings
//!
//! Defaults for the command-line tool, stored as TOML at
//! `~/.config/ftumix/settings.toml`. Every field is optional in the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, SettingsError>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Which default macros run at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupDefaults {
    pub disable_effects: bool,
    pub mute_unmanaged_digital_routes: bool,
}

impl Default for StartupDefaults {
    fn default() -> Self {
        Self {
            disable_effects: true,
            mute_unmanaged_digital_routes: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// ALSA card ids searched for when no card index is given
    pub card_names: Vec<String>,

    /// Snapshot loaded at startup when `--load-config` is absent
    pub default_snapshot: Option<PathBuf>,

    pub startup: StartupDefaults,

    /// How often the console applies queued device notifications
    pub refresh_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            card_names: vec!["Ultra".to_string(), "F8R".to_string()],
            default_snapshot: None,
            startup: StartupDefaults::default(),
            refresh_interval_ms: 700,
        }
    }
}

impl Settings {
    /// `~/.config/ftumix/settings.toml` (or the platform equivalent)
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("ftumix").join("settings.toml"))
            .ok_or(SettingsError::NoConfigDir)
    }

    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading settings");

        let contents = fs::read_to_string(path).await?;
        Ok(toml::from_str(&contents)?)
    }

    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, toml::to_string_pretty(self)?).await?;
        info!(path = %path.display(), "Settings saved");
        Ok(())
    }

    /// Load settings, falling back to defaults
    ///
    /// A missing file is normal; an unreadable or corrupt one is logged.
    pub async fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "No settings file, using defaults");
            return Self::default();
        }

        match Self::load_from_file(path).await {
            Ok(settings) => settings,
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load settings, using defaults"
                );
                Self::default()
            }
        }
    }
}
