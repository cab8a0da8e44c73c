//! Hardware control abstractions
//!
//! This module defines the named mixer controls exposed by the audio interface
//! and the [`ControlRegistry`] that owns their cached values. The registry is
//! the only component that talks to the transport; implementations of
//! [`MixerBackend`] (ALSA via `amixer`, the simulated card) live elsewhere.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Errors raised by single-control operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// No control with this identifier was discovered
    #[error("Unknown control: {0}")]
    Unknown(ControlId),

    /// Value lies outside the control's range
    #[error("Value {value} out of range for '{id}' ({min}..={max})")]
    Range {
        id: ControlId,
        value: i64,
        min: i64,
        max: i64,
    },

    /// A switch value was given to a volume control or vice versa
    #[error("'{id}' expects a {expected} value")]
    KindMismatch { id: ControlId, expected: &'static str },

    /// The transport failed while reading or writing the control
    #[error("Device error on '{id}': {reason}")]
    Device { id: ControlId, reason: String },

    /// The transport failed to list the card's controls
    #[error("Control enumeration failed: {0}")]
    Enumeration(String),
}

impl ControlError {
    /// Whether this is a transport failure rather than a validation failure
    pub fn is_device(&self) -> bool {
        matches!(self, ControlError::Device { .. } | ControlError::Enumeration(_))
    }
}

/// Failure reported by a [`MixerBackend`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Stable identifier of a hardware control (its ALSA simple-control name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControlId(String);

impl ControlId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of value a control holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlKind {
    /// Integer volume in the inclusive range `min..=max` (device-native units)
    Volume { min: i64, max: i64 },
    /// On/off switch
    Switch,
}

impl ControlKind {
    /// Check that `value` is acceptable for a control of this kind
    pub fn validate(&self, id: &ControlId, value: ControlValue) -> Result<(), ControlError> {
        match (self, value) {
            (ControlKind::Volume { min, max }, ControlValue::Level(level)) => {
                if level < *min || level > *max {
                    Err(ControlError::Range {
                        id: id.clone(),
                        value: level,
                        min: *min,
                        max: *max,
                    })
                } else {
                    Ok(())
                }
            }
            (ControlKind::Switch, ControlValue::Switch(_)) => Ok(()),
            (ControlKind::Volume { .. }, ControlValue::Switch(_)) => Err(ControlError::KindMismatch {
                id: id.clone(),
                expected: "volume",
            }),
            (ControlKind::Switch, ControlValue::Level(_)) => Err(ControlError::KindMismatch {
                id: id.clone(),
                expected: "switch",
            }),
        }
    }

    /// Parse the textual form of a value for this kind
    ///
    /// Volumes are plain integers, switches are `on` or `off`.
    pub fn parse_value(&self, text: &str) -> Option<ControlValue> {
        match self {
            ControlKind::Volume { .. } => text.parse().ok().map(ControlValue::Level),
            ControlKind::Switch => match text {
                "on" => Some(ControlValue::Switch(true)),
                "off" => Some(ControlValue::Switch(false)),
                _ => None,
            },
        }
    }

    /// The "silent" value: minimum volume or switched off
    pub fn floor(&self) -> ControlValue {
        match self {
            ControlKind::Volume { min, .. } => ControlValue::Level(*min),
            ControlKind::Switch => ControlValue::Switch(false),
        }
    }
}

/// Value of a single control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlValue {
    Level(i64),
    Switch(bool),
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Level(level) => write!(f, "{}", level),
            ControlValue::Switch(true) => write!(f, "on"),
            ControlValue::Switch(false) => write!(f, "off"),
        }
    }
}

/// A control as reported by the transport, before its value is read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDescriptor {
    pub id: ControlId,
    pub kind: ControlKind,
}

impl ControlDescriptor {
    pub fn volume(id: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            id: ControlId::new(id),
            kind: ControlKind::Volume { min, max },
        }
    }

    pub fn switch(id: impl Into<String>) -> Self {
        Self {
            id: ControlId::new(id),
            kind: ControlKind::Switch,
        }
    }
}

/// A discovered control with its last known value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub id: ControlId,
    pub kind: ControlKind,
    value: ControlValue,
}

impl Control {
    pub fn value(&self) -> ControlValue {
        self.value
    }
}

/// Transport to the physical mixer
///
/// Used sequentially by a single [`ControlRegistry`]; implementations need not
/// handle concurrent calls.
pub trait MixerBackend: Send {
    /// List all controls of the card, in the card's own order
    fn enumerate(&mut self) -> Result<Vec<ControlDescriptor>, TransportError>;

    /// Read the current value of a control
    fn read(&mut self, id: &ControlId) -> Result<ControlValue, TransportError>;

    /// Write a value to a control
    fn write(&mut self, id: &ControlId, value: ControlValue) -> Result<(), TransportError>;
}

/// The set of discovered controls, with write-through caching
pub struct ControlRegistry {
    backend: Box<dyn MixerBackend>,
    controls: Vec<Control>,
    index: HashMap<ControlId, usize>,
}

impl ControlRegistry {
    /// Enumerate the card's controls and read their initial values
    pub fn discover(mut backend: Box<dyn MixerBackend>) -> Result<Self, ControlError> {
        let descriptors = backend
            .enumerate()
            .map_err(|e| ControlError::Enumeration(e.0))?;

        let mut controls = Vec::with_capacity(descriptors.len());
        let mut index = HashMap::with_capacity(descriptors.len());

        for descriptor in descriptors {
            if index.contains_key(&descriptor.id) {
                warn!(control = %descriptor.id, "Duplicate control name reported, ignoring");
                continue;
            }
            let value = backend.read(&descriptor.id).map_err(|e| ControlError::Device {
                id: descriptor.id.clone(),
                reason: e.0,
            })?;
            index.insert(descriptor.id.clone(), controls.len());
            controls.push(Control {
                id: descriptor.id,
                kind: descriptor.kind,
                value,
            });
        }

        info!(count = controls.len(), "Discovered mixer controls");
        Ok(Self {
            backend,
            controls,
            index,
        })
    }

    /// All controls in enumeration order
    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn control(&self, id: &ControlId) -> Option<&Control> {
        self.index.get(id).map(|&i| &self.controls[i])
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Cached value of a control (no hardware read)
    pub fn get(&self, id: &ControlId) -> Result<ControlValue, ControlError> {
        self.control(id)
            .map(Control::value)
            .ok_or_else(|| ControlError::Unknown(id.clone()))
    }

    /// Validate, write through to the hardware, then update the cache
    pub fn set(&mut self, id: &ControlId, value: ControlValue) -> Result<(), ControlError> {
        let slot = *self
            .index
            .get(id)
            .ok_or_else(|| ControlError::Unknown(id.clone()))?;
        self.controls[slot].kind.validate(id, value)?;

        self.backend.write(id, value).map_err(|e| ControlError::Device {
            id: id.clone(),
            reason: e.0,
        })?;

        self.controls[slot].value = value;
        trace!(control = %id, %value, "Control written");
        Ok(())
    }

    /// Re-read a control after the device reported an external change
    ///
    /// Returns `true` when the cached value changed.
    pub fn refresh(&mut self, id: &ControlId) -> Result<bool, ControlError> {
        let slot = *self
            .index
            .get(id)
            .ok_or_else(|| ControlError::Unknown(id.clone()))?;
        let value = self.backend.read(id).map_err(|e| ControlError::Device {
            id: id.clone(),
            reason: e.0,
        })?;

        let changed = self.controls[slot].value != value;
        if changed {
            debug!(control = %id, %value, "Control changed externally");
            self.controls[slot].value = value;
        }
        Ok(changed)
    }
}

impl fmt::Debug for ControlRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlRegistry")
            .field("controls", &self.controls)
            .finish_non_exhaustive()
    }
}
