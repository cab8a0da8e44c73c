//! ALSA transport for the Fast Track Ultra mixer
//!
//! The card is driven through the `amixer` command-line utility, which ships
//! with alsa-utils on every system that has the driver:
//! - [`AmixerBackend`]: enumerate, read and write simple mixer controls
//! - [`cards`]: locate the card in `/proc/asound/cards`
//! - [`EventMonitor`]: forward external control changes

pub mod amixer;
pub mod cards;
pub mod monitor;

pub use amixer::{AmixerBackend, AmixerError};
pub use cards::{find_card, read_cards, CardInfo, CARDS_PATH};
pub use monitor::EventMonitor;
