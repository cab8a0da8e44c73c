//! Routing matrix over the card's hardware controls
//!
//! This module derives the (input × output) route matrix from the control
//! names, keeps a cached volume per route and is the single point of mutation
//! for route volumes: every `set_route` writes the route's controls and then
//! follows the output links.

use crate::domain::control::{Control, ControlError, ControlId, ControlKind, ControlRegistry, ControlValue};
use crate::domain::link::{GraphError, LinkEdge, LinkGraph};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, trace, warn};

pub type Result<T> = std::result::Result<T, MixerError>;

/// Route volumes are expressed in percent
pub const MAX_VOLUME: u8 = 100;

static ROUTE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([AD])In(\d+) - Out(\d+)\b").expect("route name pattern is valid")
});

/// Errors raised by routing-model operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MixerError {
    /// Validation failure, nothing was written
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("No such route: {0}")]
    UnknownRoute(RouteKey),

    #[error("Volume {0} out of range (0..=100)")]
    VolumeRange(u16),

    /// A multi-control operation stopped at a device failure
    ///
    /// Controls in `applied` keep their new values; nothing is rolled back.
    #[error("{source} ({} control(s) applied before the failure)", .applied.len())]
    Partial {
        applied: Vec<ControlId>,
        failed: ControlId,
        source: ControlError,
    },
}

impl MixerError {
    /// Controls written before this error occurred
    pub fn applied(&self) -> &[ControlId] {
        match self {
            MixerError::Partial { applied, .. } => applied,
            _ => &[],
        }
    }

    /// Whether the hardware rejected a write (as opposed to a validation failure)
    pub fn is_device(&self) -> bool {
        match self {
            MixerError::Partial { .. } => true,
            MixerError::Control(e) => e.is_device(),
            _ => false,
        }
    }

    /// Prefix the controls applied by earlier steps of a larger operation
    pub(crate) fn after(self, mut prior: Vec<ControlId>) -> Self {
        match self {
            MixerError::Partial {
                applied,
                failed,
                source,
            } => {
                prior.extend(applied);
                MixerError::Partial {
                    applied: prior,
                    failed,
                    source,
                }
            }
            MixerError::Control(source) if source.is_device() => {
                let failed = match &source {
                    ControlError::Device { id, .. } => id.clone(),
                    _ => ControlId::new(""),
                };
                MixerError::Partial {
                    applied: prior,
                    failed,
                    source,
                }
            }
            other => other,
        }
    }
}

/// Which input connector family a route reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InputBank {
    /// Hardware inputs (`AIn`)
    Analog,
    /// Playback streams from the computer (`DIn`)
    Digital,
}

impl InputBank {
    pub fn prefix(self) -> &'static str {
        match self {
            InputBank::Analog => "AIn",
            InputBank::Digital => "DIn",
        }
    }
}

/// Category of a mixer control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    AnalogRoute,
    DigitalRoute,
    /// Digital route whose input number equals its output number
    MasterDigitalRoute,
    /// Everything that is not a route: the effects processor
    Effects,
}

/// Identifies a route; indices are 0-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub bank: InputBank,
    pub output: usize,
    pub input: usize,
}

impl RouteKey {
    pub fn analog(output: usize, input: usize) -> Self {
        Self {
            bank: InputBank::Analog,
            output,
            input,
        }
    }

    pub fn digital(output: usize, input: usize) -> Self {
        Self {
            bank: InputBank::Digital,
            output,
            input,
        }
    }

    /// Same input on another output
    pub fn on_output(self, output: usize) -> Self {
        Self { output, ..self }
    }

    pub fn category(&self) -> Category {
        match self.bank {
            InputBank::Analog => Category::AnalogRoute,
            InputBank::Digital if self.input == self.output => Category::MasterDigitalRoute,
            InputBank::Digital => Category::DigitalRoute,
        }
    }

    /// Classify a control by its name
    ///
    /// `AIn3 - Out1` is the analog route from input 3 to output 1. Anything
    /// after the output number is ignored, so several controls of one route
    /// (e.g. a stereo pair) map to the same key.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = ROUTE_NAME.captures(name)?;
        let bank = match &caps[1] {
            "A" => InputBank::Analog,
            _ => InputBank::Digital,
        };
        let input: usize = caps[2].parse().ok()?;
        let output: usize = caps[3].parse().ok()?;
        if input == 0 || output == 0 {
            return None;
        }
        Some(Self {
            bank,
            output: output - 1,
            input: input - 1,
        })
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} - Out{}", self.bank.prefix(), self.input + 1, self.output + 1)
    }
}

/// Maps route percentages to device-native control values
///
/// The driver applies its own (logarithmic) curve to native values; a scale
/// can be plugged in to compensate, the default maps linearly.
pub trait VolumeScale: Send + Sync {
    fn to_native(&self, percent: u8, min: i64, max: i64) -> i64;
    fn to_percent(&self, native: i64, min: i64, max: i64) -> u8;
}

/// Straight-line mapping of 0..=100 onto `min..=max`
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScale;

impl VolumeScale for LinearScale {
    fn to_native(&self, percent: u8, min: i64, max: i64) -> i64 {
        let span = (max - min) as f64;
        min + (span * f64::from(percent.min(MAX_VOLUME)) / 100.0).round() as i64
    }

    fn to_percent(&self, native: i64, min: i64, max: i64) -> u8 {
        if max <= min {
            return 0;
        }
        let ratio = (native.clamp(min, max) - min) as f64 / (max - min) as f64;
        (ratio * 100.0).round() as u8
    }
}

/// A logical input → output volume
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub key: RouteKey,
    pub controls: Vec<ControlId>,
    volume: u8,
}

impl Route {
    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn category(&self) -> Category {
        self.key.category()
    }
}

/// The card's routing matrix, output links and effects controls
pub struct RoutingModel {
    registry: ControlRegistry,
    links: LinkGraph,
    routes: Vec<Route>,
    index: HashMap<RouteKey, usize>,
    owners: HashMap<ControlId, usize>,
    effects: Vec<ControlId>,
    outputs: usize,
    scale: Box<dyn VolumeScale>,
    /// Controls written by this model, with the refresh generation of the write
    recent: HashMap<ControlId, u64>,
    generation: u64,
}

impl RoutingModel {
    pub fn new(registry: ControlRegistry) -> Self {
        Self::with_scale(registry, Box::new(LinearScale))
    }

    /// Derive routes from the discovered controls using a custom volume scale
    pub fn with_scale(registry: ControlRegistry, scale: Box<dyn VolumeScale>) -> Self {
        let mut routes: Vec<Route> = Vec::new();
        let mut index = HashMap::new();
        let mut owners = HashMap::new();
        let mut effects = Vec::new();

        for control in registry.controls() {
            let key = match (RouteKey::parse(control.id.as_str()), control.kind) {
                (Some(key), ControlKind::Volume { .. }) => key,
                (Some(_), ControlKind::Switch) => {
                    warn!(control = %control.id, "Route-named switch treated as effects control");
                    effects.push(control.id.clone());
                    continue;
                }
                (None, _) => {
                    effects.push(control.id.clone());
                    continue;
                }
            };

            let slot = *index.entry(key).or_insert_with(|| {
                routes.push(Route {
                    key,
                    controls: Vec::new(),
                    volume: percent_of(scale.as_ref(), control),
                });
                routes.len() - 1
            });
            routes[slot].controls.push(control.id.clone());
            owners.insert(control.id.clone(), slot);
        }

        let outputs = routes.iter().map(|r| r.key.output + 1).max().unwrap_or(0);
        debug!(
            routes = routes.len(),
            effects = effects.len(),
            outputs,
            "Routing matrix derived"
        );

        Self {
            registry,
            links: LinkGraph::new(),
            routes,
            index,
            owners,
            effects,
            outputs,
            scale,
            recent: HashMap::new(),
            generation: 0,
        }
    }

    pub fn registry(&self) -> &ControlRegistry {
        &self.registry
    }

    pub fn links(&self) -> &LinkGraph {
        &self.links
    }

    /// Number of outputs, i.e. the highest output number seen in a route name
    pub fn output_count(&self) -> usize {
        self.outputs
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn route(&self, key: RouteKey) -> Option<&Route> {
        self.index.get(&key).map(|&i| &self.routes[i])
    }

    /// Controls in the effects category, in enumeration order
    pub fn effects(&self) -> &[ControlId] {
        &self.effects
    }

    /// Category of any discovered control
    pub fn category_of(&self, id: &ControlId) -> Option<Category> {
        match self.owners.get(id) {
            Some(&slot) => Some(self.routes[slot].category()),
            None if self.registry.control(id).is_some() => Some(Category::Effects),
            None => None,
        }
    }

    /// Cached route volume; never reads the hardware
    pub fn get_route(&self, key: RouteKey) -> Result<u8> {
        self.route(key)
            .map(Route::volume)
            .ok_or(MixerError::UnknownRoute(key))
    }

    /// Set a route's volume and propagate it along the output links
    ///
    /// The value is applied to the same input's route on every output reachable
    /// from `key.output`; outputs without such a route are skipped. Returns the
    /// controls written. On a device failure the controls written so far stay
    /// applied and are listed in [`MixerError::Partial`].
    pub fn set_route(&mut self, key: RouteKey, value: u8) -> Result<Vec<ControlId>> {
        if value > MAX_VOLUME {
            return Err(MixerError::VolumeRange(u16::from(value)));
        }
        if !self.index.contains_key(&key) {
            return Err(MixerError::UnknownRoute(key));
        }

        let mut applied = Vec::new();
        self.write_route(key, value, &mut applied)?;

        for output in self.links.propagation(key.output) {
            let linked = key.on_output(output);
            if !self.index.contains_key(&linked) {
                trace!(route = %linked, "Linked output has no such route, skipping");
                continue;
            }
            self.write_route(linked, value, &mut applied)?;
        }

        debug!(route = %key, value, written = applied.len(), "Route set");
        Ok(applied)
    }

    fn write_route(&mut self, key: RouteKey, value: u8, applied: &mut Vec<ControlId>) -> Result<()> {
        let slot = self.index[&key];
        for i in 0..self.routes[slot].controls.len() {
            let id = self.routes[slot].controls[i].clone();
            let native = match self.registry.control(&id).map(|c| c.kind) {
                Some(ControlKind::Volume { min, max }) => self.scale.to_native(value, min, max),
                _ => continue,
            };
            if let Err(source) = self.registry.set(&id, ControlValue::Level(native)) {
                return Err(MixerError::Partial {
                    applied: std::mem::take(applied),
                    failed: id,
                    source,
                });
            }
            // the cache follows the first control that reached the hardware
            self.routes[slot].volume = value;
            self.note_write(&id);
            applied.push(id);
        }
        Ok(())
    }

    fn note_write(&mut self, id: &ControlId) {
        self.recent.insert(id.clone(), self.generation);
    }

    /// Mean self-volume of the digital outputs, rounded to the nearest percent
    pub fn master_average(&self) -> Option<u8> {
        let volumes: Vec<u32> = self
            .routes
            .iter()
            .filter(|r| r.category() == Category::MasterDigitalRoute)
            .map(|r| u32::from(r.volume))
            .collect();
        if volumes.is_empty() {
            return None;
        }
        let mean = f64::from(volumes.iter().sum::<u32>()) / volumes.len() as f64;
        Some(mean.round() as u8)
    }

    /// Set every digital self-route to `value`, following links
    pub fn set_master(&mut self, value: u8) -> Result<Vec<ControlId>> {
        if value > MAX_VOLUME {
            return Err(MixerError::VolumeRange(u16::from(value)));
        }
        let keys: Vec<RouteKey> = self
            .routes
            .iter()
            .filter(|r| r.category() == Category::MasterDigitalRoute)
            .map(|r| r.key)
            .collect();

        let mut applied = Vec::new();
        for key in keys {
            match self.set_route(key, value) {
                Ok(written) => applied.extend(written),
                Err(e) => return Err(e.after(applied)),
            }
        }
        debug!(value, written = applied.len(), "Master volume set");
        Ok(applied)
    }

    /// Write a single control directly, without link propagation
    ///
    /// Keeps the owning route's cached volume in step with the new value.
    pub fn write_control(&mut self, id: &ControlId, value: ControlValue) -> std::result::Result<(), ControlError> {
        self.registry.set(id, value)?;
        self.note_write(id);
        self.sync_route_of(id);
        Ok(())
    }

    /// Re-read controls reported as changed by the device
    ///
    /// Meant to be called once per notification batch, empty batches
    /// included. The device also reports this model's own writes, and a read
    /// issued right after a write may still return the old value: a
    /// notification for a control written since the previous two batches is
    /// taken as that echo and not re-read.
    ///
    /// Returns the routes whose cached volume changed. Read failures are logged
    /// and skipped; the cache keeps its previous value for those controls.
    pub fn refresh(&mut self, ids: &[ControlId]) -> Vec<RouteKey> {
        self.generation += 1;
        let mut changed = Vec::new();
        for id in ids {
            if self.recent.remove(id).is_some() {
                trace!(control = %id, "Skipping echo of own write");
                continue;
            }
            match self.registry.refresh(id) {
                Ok(true) => {
                    if let Some(key) = self.sync_route_of(id) {
                        if !changed.contains(&key) {
                            changed.push(key);
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(control = %id, error = %e, "Failed to refresh control"),
            }
        }
        let generation = self.generation;
        self.recent.retain(|_, written| *written + 1 >= generation);
        changed
    }

    fn sync_route_of(&mut self, id: &ControlId) -> Option<RouteKey> {
        let slot = *self.owners.get(id)?;
        let control = self.registry.control(id)?;
        let volume = percent_of(self.scale.as_ref(), control);
        let route = &mut self.routes[slot];
        if route.volume == volume {
            return None;
        }
        route.volume = volume;
        Some(route.key)
    }

    /// Link `source` to `target` so changes on `source` follow to `target`
    pub fn link(&mut self, source: usize, target: usize) -> std::result::Result<bool, GraphError> {
        self.check_output(source)?;
        self.check_output(target)?;
        self.links.add_link(source, target)
    }

    pub fn unlink(&mut self, source: usize, target: usize) -> bool {
        self.links.remove_link(source, target)
    }

    /// Replace every link at once; on error the current links are kept
    pub fn replace_links(&mut self, edges: &[LinkEdge]) -> std::result::Result<(), GraphError> {
        for edge in edges {
            self.check_output(edge.source)?;
            self.check_output(edge.target)?;
        }
        self.links.replace(edges)
    }

    fn check_output(&self, output: usize) -> std::result::Result<(), GraphError> {
        if output < self.outputs {
            Ok(())
        } else {
            Err(GraphError::UnknownOutput(output))
        }
    }
}

fn percent_of(scale: &dyn VolumeScale, control: &Control) -> u8 {
    match (control.kind, control.value()) {
        (ControlKind::Volume { min, max }, ControlValue::Level(level)) => scale.to_percent(level, min, max),
        _ => 0,
    }
}

impl fmt::Debug for RoutingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingModel")
            .field("routes", &self.routes.len())
            .field("effects", &self.effects.len())
            .field("outputs", &self.outputs)
            .field("links", &self.links)
            .finish_non_exhaustive()
    }
}
