//! Core library modules for valhalla-layers
//!
//! This module contains the internal implementation details of the valhalla-layers library.

pub mod client;
pub mod costing;
pub mod error;
pub mod features;
pub mod location;
pub mod orchestrate;
pub mod polyline;
pub mod request;

// Re-export main types for internal use
pub use client::Client;
pub use orchestrate::Valhalla;
