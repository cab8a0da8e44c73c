//! Domain entities and business rules

pub mod changes;
pub mod config;
pub mod control;
pub mod link;
pub mod macros;
pub mod routing;
pub mod settings;
pub mod simulated;
pub mod startup;

pub use changes::{ChangeQueue, ChangeSender};
pub use config::{ConfigError, ConfigStore, ConfigWatcher, Difference, ParseError, ParseErrorKind, Snapshot};
pub use control::{
    Control, ControlDescriptor, ControlError, ControlId, ControlKind, ControlRegistry, ControlValue, MixerBackend,
    TransportError,
};
pub use link::{GraphError, LinkEdge, LinkGraph};
pub use macros::{Macro, MacroEngine, MacroRule, RouteFilter};
pub use routing::{
    Category, InputBank, LinearScale, MixerError, Route, RouteKey, RoutingModel, VolumeScale, MAX_VOLUME,
};
pub use settings::{Settings, SettingsError, StartupDefaults};
pub use simulated::{SimulatedCard, SimulatedHandle};
pub use startup::{run_startup, StartupError, StartupOptions, StartupReport};
