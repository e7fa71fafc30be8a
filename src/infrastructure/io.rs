//! File loaders for hierarchy definitions, frames, weights and bounds.
//!
//! Format is chosen by extension: `.toml` or `.json`.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::domain::{Frame, Hierarchy};
use crate::infrastructure::{InfraError, InfraResult};
use crate::solver::Bound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> InfraResult<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("toml") => Ok(Format::Toml),
            Some("json") => Ok(Format::Json),
            _ => Err(InfraError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> InfraResult<T> {
    let format = Format::from_path(path)?;
    let content = fs::read_to_string(path)
        .map_err(|e| InfraError::io(format!("read {}", path.display()), e))?;
    match format {
        Format::Toml => toml::from_str(&content).map_err(|e| InfraError::parse(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| InfraError::parse(path, e)),
    }
}

/// Mapping of node name to ordered children, e.g. `root = ["A", "B"]`.
#[instrument(level = "debug")]
pub fn load_hierarchy(path: &Path) -> InfraResult<Hierarchy> {
    let hierarchy: Hierarchy = load(path)?;
    debug!("loaded {} hierarchy entries", hierarchy.len());
    Ok(hierarchy)
}

/// Frame in split layout: `{"index": [...], "columns": [...], "data": [[...]]}`.
#[instrument(level = "debug")]
pub fn load_frame(path: &Path) -> InfraResult<Frame> {
    let frame: Frame = load(path)?;
    debug!("loaded frame {}x{}", frame.nrows(), frame.ncols());
    Ok(frame)
}

#[instrument(level = "debug")]
pub fn load_weights(path: &Path) -> InfraResult<BTreeMap<String, f64>> {
    load(path)
}

/// Mapping of bottom node to `{lower, upper}`; either end may be omitted.
#[instrument(level = "debug")]
pub fn load_bounds(path: &Path) -> InfraResult<BTreeMap<String, Bound>> {
    load(path)
}

/// Write `frame` as pretty JSON in split layout.
pub fn write_frame<W: Write>(frame: &Frame, mut writer: W) -> InfraResult<()> {
    serde_json::to_writer_pretty(&mut writer, frame)
        .map_err(|e| InfraError::io("serialize frame", e.into()))?;
    writeln!(writer).map_err(|e| InfraError::io("write frame", e))
}
