//! Configuration model for fleetlock.
//!
//! This module defines the Config struct that represents
//! `.fleetlock/config.yaml`. Parsing is forward compatible (unknown fields are
//! ignored), every field has a default, and values are validated on load.

mod model;
mod operations;


pub use model::Config;
pub(crate) use operations::seconds;
