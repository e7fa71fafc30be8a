//! Infrastructure layer: file loading and writing
//!
//! Reads hierarchy definitions, frames, weights and bounds from TOML or JSON.

pub mod error;
pub mod io;

pub use error::{InfraError, InfraResult};
pub use io::{load_bounds, load_frame, load_hierarchy, load_weights, write_frame, Format};
