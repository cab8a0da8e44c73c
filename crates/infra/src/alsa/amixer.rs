//! ALSA simple-mixer backend driving the `amixer` utility
//!
//! Enumeration uses `amixer -c N scontrols` followed by one `sget` per
//! control; writes use `sset` with raw (native) values.

use ftumix_core::domain::{ControlDescriptor, ControlId, ControlValue, MixerBackend, TransportError};
use regex::Regex;
use std::process::Command;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, trace, warn};

static SCONTROL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Simple mixer control '(.*)',(\d+)$").expect("scontrol pattern is valid"));

static LIMITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Limits:(?: Playback| Capture)? (-?\d+) - (-?\d+)").expect("limits pattern is valid"));

static LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:Mono|Front Left|Front Right|Left|Right):(?: Playback| Capture)? (-?\d+)")
        .expect("level pattern is valid")
});

static SWITCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:Mono|Front Left|Front Right|Left|Right):.*\[(on|off)\]").expect("switch pattern is valid")
});

#[derive(Debug, Error)]
pub enum AmixerError {
    #[error("Failed to run amixer: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("amixer exited with {status}: {stderr}")]
    Command { status: String, stderr: String },

    #[error("Unexpected amixer output for '{control}': {reason}")]
    Output { control: String, reason: String },
}

impl From<AmixerError> for TransportError {
    fn from(e: AmixerError) -> Self {
        TransportError(e.to_string())
    }
}

/// Shape of a control as reported by `sget`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlShape {
    Volume { min: i64, max: i64, value: i64 },
    Switch(bool),
    /// Enumerated and other controls that route volumes cannot use
    Unsupported,
}

/// Names listed by `amixer scontrols`
pub fn parse_scontrols(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| SCONTROL.captures(line.trim_end()))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Interpret the output of `amixer sget <name>`
///
/// Controls with both a volume and a switch are treated as volumes.
pub fn parse_sget(name: &str, output: &str) -> Result<ControlShape, AmixerError> {
    let caps_line = output
        .lines()
        .find(|l| l.trim_start().starts_with("Capabilities:"))
        .ok_or_else(|| AmixerError::Output {
            control: name.to_string(),
            reason: "no capabilities line".to_string(),
        })?;

    if caps_line.contains("volume") {
        let limits = LIMITS.captures(output).ok_or_else(|| AmixerError::Output {
            control: name.to_string(),
            reason: "no limits".to_string(),
        })?;
        let level = output
            .lines()
            .find_map(|l| LEVEL.captures(l))
            .ok_or_else(|| AmixerError::Output {
                control: name.to_string(),
                reason: "no level".to_string(),
            })?;
        let number = |text: &str| {
            text.parse::<i64>().map_err(|e| AmixerError::Output {
                control: name.to_string(),
                reason: e.to_string(),
            })
        };
        return Ok(ControlShape::Volume {
            min: number(&limits[1])?,
            max: number(&limits[2])?,
            value: number(&level[1])?,
        });
    }

    if caps_line.contains("switch") {
        let state = output
            .lines()
            .find_map(|l| SWITCH.captures(l))
            .ok_or_else(|| AmixerError::Output {
                control: name.to_string(),
                reason: "no switch state".to_string(),
            })?;
        return Ok(ControlShape::Switch(&state[1] == "on"));
    }

    Ok(ControlShape::Unsupported)
}

/// `amixer` argument for a value
pub fn format_value(value: ControlValue) -> String {
    match value {
        ControlValue::Level(level) => level.to_string(),
        ControlValue::Switch(true) => "on".to_string(),
        ControlValue::Switch(false) => "off".to_string(),
    }
}

/// Mixer backend for one ALSA card
#[derive(Debug, Clone)]
pub struct AmixerBackend {
    card: u32,
}

impl AmixerBackend {
    pub fn new(card: u32) -> Self {
        Self { card }
    }

    pub fn card(&self) -> u32 {
        self.card
    }

    fn run(&self, args: &[&str]) -> Result<String, AmixerError> {
        trace!(card = self.card, ?args, "Running amixer");
        let output = Command::new("amixer")
            .arg("-c")
            .arg(self.card.to_string())
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(AmixerError::Command {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn sget(&self, name: &str) -> Result<ControlShape, AmixerError> {
        let output = self.run(&["sget", name])?;
        parse_sget(name, &output)
    }
}

impl MixerBackend for AmixerBackend {
    fn enumerate(&mut self) -> Result<Vec<ControlDescriptor>, TransportError> {
        let names = parse_scontrols(&self.run(&["scontrols"])?);
        let mut descriptors = Vec::with_capacity(names.len());
        for name in names {
            match self.sget(&name)? {
                ControlShape::Volume { min, max, .. } => descriptors.push(ControlDescriptor::volume(name, min, max)),
                ControlShape::Switch(_) => descriptors.push(ControlDescriptor::switch(name)),
                ControlShape::Unsupported => warn!(control = %name, "Skipping unsupported control"),
            }
        }
        debug!(card = self.card, controls = descriptors.len(), "Enumerated amixer controls");
        Ok(descriptors)
    }

    fn read(&mut self, id: &ControlId) -> Result<ControlValue, TransportError> {
        match self.sget(id.as_str())? {
            ControlShape::Volume { value, .. } => Ok(ControlValue::Level(value)),
            ControlShape::Switch(on) => Ok(ControlValue::Switch(on)),
            ControlShape::Unsupported => Err(TransportError(format!("'{}' is not a volume or switch", id))),
        }
    }

    fn write(&mut self, id: &ControlId, value: ControlValue) -> Result<(), TransportError> {
        self.run(&["-q", "sset", id.as_str(), &format_value(value)])?;
        Ok(())
    }
}
