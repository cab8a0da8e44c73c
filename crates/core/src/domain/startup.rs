//! Startup sequence
//!
//! Runs once before the console takes over, in a fixed order:
//! 1. load the snapshot file, if one was given
//! 2. the default macros (disable effects, mute unmanaged digital routes)
//!    unless suppressed
//! 3. mute hardware routes, if requested
//! 4. pass-through inputs, if requested
//! 5. save a snapshot, if requested
//!
//! The first failing step aborts the sequence.

use crate::domain::config::{ConfigError, ConfigStore};
use crate::domain::control::ControlError;
use crate::domain::macros::{Macro, MacroEngine};
use crate::domain::routing::{MixerError, RoutingModel};
use crate::domain::settings::Settings;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to discover mixer controls: {0}")]
    Discovery(#[from] ControlError),

    #[error("Failed to load {}: {source}", .path.display())]
    Load { path: PathBuf, source: ConfigError },

    #[error("Macro {name} failed: {source}")]
    Macro { name: Macro, source: MixerError },

    #[error("Failed to save {}: {source}", .path.display())]
    Save { path: PathBuf, source: ConfigError },
}

impl StartupError {
    /// Process exit code: 2 for a malformed snapshot, 3 for a device failure,
    /// 1 for anything else
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Load {
                source: ConfigError::Parse(_),
                ..
            } => 2,
            StartupError::Load {
                source: ConfigError::Apply(e),
                ..
            }
            | StartupError::Macro { source: e, .. } if e.is_device() => 3,
            StartupError::Discovery(e) if e.is_device() => 3,
            _ => 1,
        }
    }
}

/// What the startup sequence should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupOptions {
    pub load_config: Option<PathBuf>,
    pub disable_effects: bool,
    pub mute_unmanaged_digital_routes: bool,
    pub mute_hardware_routes: bool,
    pub pass_through_inputs: bool,
    pub save_config: Option<PathBuf>,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            load_config: None,
            disable_effects: true,
            mute_unmanaged_digital_routes: true,
            mute_hardware_routes: false,
            pass_through_inputs: false,
            save_config: None,
        }
    }
}

impl StartupOptions {
    /// Defaults taken from the settings file
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            load_config: settings.default_snapshot.clone(),
            disable_effects: settings.startup.disable_effects,
            mute_unmanaged_digital_routes: settings.startup.mute_unmanaged_digital_routes,
            ..Self::default()
        }
    }

    /// Macros to run, in order
    pub fn macros(&self) -> Vec<Macro> {
        [
            (self.disable_effects, Macro::DisableEffects),
            (self.mute_unmanaged_digital_routes, Macro::MuteUnmanagedDigitalRoutes),
            (self.mute_hardware_routes, Macro::MuteHardwareRoutes),
            (self.pass_through_inputs, Macro::PassThroughInputs),
        ]
        .into_iter()
        .filter_map(|(enabled, m)| enabled.then_some(m))
        .collect()
    }
}

/// Outcome of a successful startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Controls written by the snapshot load
    pub loaded: usize,
    pub macros: Vec<Macro>,
    pub saved: Option<PathBuf>,
}

pub async fn run_startup(
    model: &mut RoutingModel,
    options: &StartupOptions,
) -> Result<StartupReport, StartupError> {
    let mut report = StartupReport::default();

    if let Some(path) = &options.load_config {
        report.loaded = ConfigStore::load_from_file(model, path)
            .await
            .map_err(|source| StartupError::Load {
                path: path.clone(),
                source,
            })?
            .len();
    }

    for m in options.macros() {
        MacroEngine::run(model, m).map_err(|source| StartupError::Macro { name: m, source })?;
        report.macros.push(m);
    }

    if let Some(path) = &options.save_config {
        ConfigStore::save_to_file(model, path)
            .await
            .map_err(|source| StartupError::Save {
                path: path.clone(),
                source,
            })?;
        report.saved = Some(path.clone());
    }

    info!(
        loaded = report.loaded,
        macros = report.macros.len(),
        "Startup complete"
    );
    Ok(report)
}
