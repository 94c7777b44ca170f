//! Error kinds and configuration shared across the simulator crates.

pub mod config;
pub mod error;

pub use config::{CliArgs, Config, LoraModuleSpec, Mode};
pub use error::{Result, SimError};
