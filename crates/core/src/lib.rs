//! Routing model, output links, macros and snapshot files for the
//! M-Audio Fast Track Ultra hardware mixer

pub mod domain;

pub use domain::*;
