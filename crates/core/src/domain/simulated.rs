//! In-memory mixer backend shaped like a Fast Track Ultra
//!
//! Lets the whole control stack run without hardware, for tests and for
//! `--simulate`. A [`SimulatedHandle`] shares the card's state so callers can
//! inspect hardware-side values, inject write failures and fake external
//! changes.

use crate::domain::control::{
    ControlDescriptor, ControlId, ControlValue, MixerBackend, TransportError,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct CardState {
    controls: Vec<(ControlDescriptor, ControlValue)>,
    failing: HashSet<ControlId>,
    /// Only kept once a handle exists, so `--simulate` does not grow it
    recording: bool,
    writes: Vec<(ControlId, ControlValue)>,
}

impl CardState {
    fn slot(&mut self, id: &ControlId) -> Option<&mut ControlValue> {
        self.controls
            .iter_mut()
            .find(|(descriptor, _)| &descriptor.id == id)
            .map(|(_, value)| value)
    }
}

fn lock(state: &Mutex<CardState>) -> MutexGuard<'_, CardState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated sound card
#[derive(Debug, Clone)]
pub struct SimulatedCard {
    state: Arc<Mutex<CardState>>,
}

impl SimulatedCard {
    /// Card with an explicit control list, in enumeration order
    pub fn new(controls: Vec<(ControlDescriptor, ControlValue)>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CardState {
                controls,
                ..CardState::default()
            })),
        }
    }

    /// Card with `channels` analog and digital inputs/outputs plus effects controls
    ///
    /// Control names follow the device's ALSA naming, ordered the way the
    /// driver enumerates them. Route volumes start at 0 except the digital
    /// self-routes, which start at full volume.
    pub fn fast_track_ultra(channels: usize) -> Self {
        let mut controls = Vec::new();

        for output in 1..=channels {
            for input in 1..=channels {
                controls.push((
                    ControlDescriptor::volume(format!("AIn{} - Out{}", input, output), 0, 100),
                    ControlValue::Level(0),
                ));
            }
        }
        for output in 1..=channels {
            for input in 1..=channels {
                let level = if input == output { 100 } else { 0 };
                controls.push((
                    ControlDescriptor::volume(format!("DIn{} - Out{}", input, output), 0, 100),
                    ControlValue::Level(level),
                ));
            }
        }
        for input in 1..=channels {
            controls.push((
                ControlDescriptor::volume(format!("AIn{} - FX Send", input), 0, 127),
                ControlValue::Level(0),
            ));
        }
        for output in 1..=channels {
            controls.push((
                ControlDescriptor::volume(format!("Effect Return {}", output), 0, 127),
                ControlValue::Level(64),
            ));
        }
        controls.push((ControlDescriptor::volume("Effect Volume", 0, 127), ControlValue::Level(100)));
        controls.push((ControlDescriptor::volume("Effect Duration", 0, 127), ControlValue::Level(32)));
        controls.push((ControlDescriptor::volume("Effect Feedback", 0, 127), ControlValue::Level(16)));
        controls.push((ControlDescriptor::switch("Effect Switch"), ControlValue::Switch(true)));

        Self::new(controls)
    }

    /// Shared handle onto this card's state; starts the write log
    pub fn handle(&self) -> SimulatedHandle {
        lock(&self.state).recording = true;
        SimulatedHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MixerBackend for SimulatedCard {
    fn enumerate(&mut self) -> Result<Vec<ControlDescriptor>, TransportError> {
        Ok(lock(&self.state)
            .controls
            .iter()
            .map(|(descriptor, _)| descriptor.clone())
            .collect())
    }

    fn read(&mut self, id: &ControlId) -> Result<ControlValue, TransportError> {
        let mut state = lock(&self.state);
        state
            .slot(id)
            .map(|value| *value)
            .ok_or_else(|| TransportError(format!("no such control: {}", id)))
    }

    fn write(&mut self, id: &ControlId, value: ControlValue) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.failing.contains(id) {
            return Err(TransportError(format!("simulated write failure on {}", id)));
        }
        let slot = state
            .slot(id)
            .ok_or_else(|| TransportError(format!("no such control: {}", id)))?;
        *slot = value;
        if state.recording {
            state.writes.push((id.clone(), value));
        }
        Ok(())
    }
}

/// Inspection and fault-injection handle for a [`SimulatedCard`]
#[derive(Debug, Clone)]
pub struct SimulatedHandle {
    state: Arc<Mutex<CardState>>,
}

impl SimulatedHandle {
    /// Hardware-side value of a control
    pub fn value(&self, id: &ControlId) -> Option<ControlValue> {
        lock(&self.state).slot(id).map(|value| *value)
    }

    /// Make every write to `id` fail until [`heal`](Self::heal) is called
    pub fn fail_writes(&self, id: &ControlId) {
        lock(&self.state).failing.insert(id.clone());
    }

    pub fn heal(&self) {
        lock(&self.state).failing.clear();
    }

    /// Change a value behind the registry's back, like another program would
    pub fn poke(&self, id: &ControlId, value: ControlValue) {
        if let Some(slot) = lock(&self.state).slot(id) {
            *slot = value;
        }
    }

    /// Successful writes in order, since the first handle was taken
    pub fn writes(&self) -> Vec<(ControlId, ControlValue)> {
        lock(&self.state).writes.clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.state).writes.clear();
    }
}
