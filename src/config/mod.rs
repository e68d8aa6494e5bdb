//! Configuration shared across the probing engine

pub mod timing;

pub use timing::{set_config, TimingConfig};
