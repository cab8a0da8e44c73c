//! Bulk mixer operations
//!
//! Each macro is a fixed rule: either a route filter with the volume every
//! matching route receives, or silencing the effects controls. Route writes
//! go through [`RoutingModel::set_route`], so output links still apply.

use crate::domain::control::ControlId;
use crate::domain::routing::{Category, MixerError, Result, Route, RouteKey, RoutingModel, MAX_VOLUME};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// The built-in macros
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Macro {
    /// Silence every analog input on every output
    MuteHardwareRoutes,
    /// Route each analog input to the output with the same number at full volume
    PassThroughInputs,
    /// Silence the effects processor
    DisableEffects,
    /// Silence digital routes between differently numbered channels, leaving
    /// `DIn1 - Out1`, `DIn2 - Out2`... so routing can happen in software
    MuteUnmanagedDigitalRoutes,
}

impl Macro {
    pub const ALL: [Macro; 4] = [
        Macro::MuteHardwareRoutes,
        Macro::PassThroughInputs,
        Macro::DisableEffects,
        Macro::MuteUnmanagedDigitalRoutes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Macro::MuteHardwareRoutes => "mute-hardware-routes",
            Macro::PassThroughInputs => "pass-through-inputs",
            Macro::DisableEffects => "disable-effects",
            Macro::MuteUnmanagedDigitalRoutes => "mute-unmanaged-digital-routes",
        }
    }

    pub fn rule(self) -> MacroRule {
        match self {
            Macro::MuteHardwareRoutes => MacroRule::Routes {
                filter: RouteFilter::all(Category::AnalogRoute),
                volume: 0,
            },
            Macro::PassThroughInputs => MacroRule::Routes {
                filter: RouteFilter::same_channel(Category::AnalogRoute),
                volume: MAX_VOLUME,
            },
            Macro::DisableEffects => MacroRule::SilenceEffects,
            Macro::MuteUnmanagedDigitalRoutes => MacroRule::Routes {
                filter: RouteFilter::cross_channel(Category::DigitalRoute),
                volume: 0,
            },
        }
    }
}

impl fmt::Display for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Macro {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Macro::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("unknown macro '{}'", s))
    }
}

/// Routes of one category, optionally restricted to input == output
/// (`same_channel: Some(true)`) or input != output (`Some(false)`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteFilter {
    pub category: Category,
    pub same_channel: Option<bool>,
}

impl RouteFilter {
    pub fn all(category: Category) -> Self {
        Self {
            category,
            same_channel: None,
        }
    }

    pub fn same_channel(category: Category) -> Self {
        Self {
            category,
            same_channel: Some(true),
        }
    }

    pub fn cross_channel(category: Category) -> Self {
        Self {
            category,
            same_channel: Some(false),
        }
    }

    pub fn matches(&self, route: &Route) -> bool {
        route.category() == self.category
            && self
                .same_channel
                .map_or(true, |same| (route.key.input == route.key.output) == same)
    }
}

/// What a macro does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroRule {
    /// Set every matching route to `volume` percent
    Routes { filter: RouteFilter, volume: u8 },
    /// Volumes of the effects controls to their minimum, switches off
    SilenceEffects,
}

/// Applies macros to a [`RoutingModel`]
pub struct MacroEngine;

impl MacroEngine {
    /// Run one macro; returns the controls written
    ///
    /// Re-running a macro yields the same state. A device failure stops the
    /// macro and reports the controls written before it.
    pub fn run(model: &mut RoutingModel, m: Macro) -> Result<Vec<ControlId>> {
        let applied = match m.rule() {
            MacroRule::Routes { filter, volume } => {
                let keys: Vec<RouteKey> = model
                    .routes()
                    .iter()
                    .filter(|r| filter.matches(r))
                    .map(|r| r.key)
                    .collect();
                Self::set_routes(model, &keys, volume)?
            }
            MacroRule::SilenceEffects => Self::floor_effects(model)?,
        };

        info!(name = %m, written = applied.len(), "Macro applied");
        Ok(applied)
    }

    fn set_routes(model: &mut RoutingModel, keys: &[RouteKey], value: u8) -> Result<Vec<ControlId>> {
        let mut applied = Vec::new();
        for &key in keys {
            match model.set_route(key, value) {
                Ok(written) => applied.extend(written),
                Err(e) => return Err(e.after(applied)),
            }
        }
        Ok(applied)
    }

    fn floor_effects(model: &mut RoutingModel) -> Result<Vec<ControlId>> {
        let targets: Vec<_> = model
            .effects()
            .iter()
            .filter_map(|id| model.registry().control(id))
            .map(|c| (c.id.clone(), c.kind.floor()))
            .collect();

        let mut applied = Vec::with_capacity(targets.len());
        for (id, value) in targets {
            if let Err(source) = model.write_control(&id, value) {
                return Err(MixerError::Control(source).after(applied));
            }
            applied.push(id);
        }
        Ok(applied)
    }
}
