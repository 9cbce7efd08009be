//! Per-layer result files
//!
//! Each layer is written to `<dir>/<layer>.json`:
//!
//! ```text
//! {
//!   "layer": "conv1",
//!   "result_kib": 1234.56,
//!   "solutions": [
//!     { "order": "BHWIO", "tiling_factor": { "N": 16, "C": 8, "H": 14, "W": 14 } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::loop_nest::TileSizes;
use crate::search::{LayerResult, NetworkResult};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionReport {
    pub order: String,
    pub tiling_factor: TileSizes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerReport {
    pub layer: String,
    pub result_kib: f64,
    pub solutions: Vec<SolutionReport>,
}

impl LayerReport {
    pub fn new(layer: &str, result: &LayerResult) -> Self {
        LayerReport {
            layer: layer.to_string(),
            result_kib: to_kib(result.min_value),
            solutions: result
                .solutions
                .iter()
                .map(|s| SolutionReport {
                    order: s.label(),
                    tiling_factor: s.tiles,
                })
                .collect(),
        }
    }
}

/// Bytes to KiB, rounded to two decimals
pub fn to_kib(bytes: f64) -> f64 {
    (bytes / 1024.0 * 100.0).round() / 100.0
}

pub fn to_mib(bytes: f64) -> f64 {
    bytes / (1024.0 * 1024.0)
}

/// Write one layer's report, creating `dir` if needed
pub fn write_layer_report(
    dir: &Path,
    layer: &str,
    result: &LayerResult,
) -> Result<PathBuf, ReportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", layer));
    let json = serde_json::to_string_pretty(&LayerReport::new(layer, result))?;
    fs::write(&path, json)?;
    log::debug!("Wrote {}", path.display());
    Ok(path)
}

/// One line per layer with its best volume and loop orders, then the total
pub fn network_summary(network: &NetworkResult) -> String {
    let mut out = String::new();
    for layer in &network.layers {
        let orders: Vec<String> = layer.result.solutions.iter().map(|s| s.label()).collect();
        out.push_str(&format!(
            "{:<16} {:>12.2} KiB  {}\n",
            layer.name,
            to_kib(layer.result.min_value),
            orders.join(" ")
        ));
    }
    out.push_str(&format!(
        "Total off-chip access of {}: {:.3} MiB",
        network.name,
        to_mib(network.total_bytes)
    ));
    out
}
