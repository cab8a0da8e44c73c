//! Hardware access for ftumix

pub mod alsa;

pub use alsa::*;
