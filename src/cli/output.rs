//! GeoJSON file input and output for the CLI

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use valhalla_layers::{FeatureLayer, FeatureSource};

/// Read a GeoJSON FeatureCollection into a feature source
pub fn read_source(path: &Path) -> Result<FeatureSource> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    FeatureSource::from_geojson_str(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write each layer to `<dir>/<file_stem>.geojson`, returning the written paths
///
/// Layers sharing a stem get a numeric suffix so none overwrites another.
pub fn write_layers(dir: &Path, layers: &[FeatureLayer]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut written: Vec<PathBuf> = Vec::with_capacity(layers.len());
    for layer in layers {
        let stem = layer.file_stem();
        let mut path = dir.join(format!("{stem}.geojson"));
        let mut n = 1;
        while written.contains(&path) {
            n += 1;
            path = dir.join(format!("{stem}_{n}.geojson"));
        }

        let text = serde_json::to_string_pretty(&layer.to_geojson())?;
        fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
