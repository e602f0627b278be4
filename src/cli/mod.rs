//! CLI-specific utilities for valhalla-layers
//!
//! This module contains code specific to the command-line interface,
//! separate from the core library functionality.

pub mod output;
pub mod progress;

pub use output::{read_source, write_layers};
pub use progress::ProgressFeedback;
