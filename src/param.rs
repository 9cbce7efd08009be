//! Layer parameter bundle and network description files
//!
//! A [`Param`] captures everything one layer search needs: the layer shape,
//! the operator shape, the on-chip capacity and the per-tensor compression
//! ratios. It is immutable for the duration of the search and passed by
//! reference to every stage.
//!
//! Networks are described in JSON:
//!
//! ```text
//! {
//!   "name": "resnet-block",
//!   "batch": 1,
//!   "layers": [
//!     { "name": "conv1", "height": 56, "width": 56, "in_chan": 64, "out_chan": 64,
//!       "kernel": 3, "stride": 1,
//!       "compression": { "input": 0.6, "output": 0.6, "weight": 1.0 } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::dimension::{Dimension, TensorRole};

/// Errors raised while decoding or validating layer parameters
#[derive(Error, Debug)]
pub enum ParamError {
    #[error("Layer '{layer}': {field} must be at least 1 (got {value})")]
    NonPositive {
        layer: String,
        field: &'static str,
        value: u64,
    },

    #[error("Layer '{layer}': {role} compression ratio must be finite and > 0 (got {value})")]
    InvalidCompression {
        layer: String,
        role: TensorRole,
        value: f64,
    },

    #[error("Network '{0}' has no layers")]
    EmptyNetwork(String),

    #[error("Failed to parse network description: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
}

// ============================================================================
// Parameter bundle
// ============================================================================

/// Hardware parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HwParam {
    /// On-chip memory capacity in bytes (one tensor element = one byte)
    pub onchip_mem_size: u64,
}

impl Default for HwParam {
    fn default() -> Self {
        HwParam {
            onchip_mem_size: 108 * 1024,
        }
    }
}

/// Operator shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpParam {
    pub out_chan: u64,
    pub in_chan: u64,
    pub stride: u64,
    pub kernel: u64,
}

impl Default for OpParam {
    fn default() -> Self {
        OpParam {
            out_chan: 128,
            in_chan: 64,
            stride: 1,
            kernel: 3,
        }
    }
}

/// Effective transfer ratio per tensor role (≤ 1 when compressed)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionRatios {
    #[serde(default = "unit_ratio")]
    pub input: f64,
    #[serde(default = "unit_ratio")]
    pub output: f64,
    #[serde(default = "unit_ratio")]
    pub weight: f64,
}

fn unit_ratio() -> f64 {
    1.0
}

impl Default for CompressionRatios {
    fn default() -> Self {
        CompressionRatios {
            input: 1.0,
            output: 1.0,
            weight: 1.0,
        }
    }
}

impl CompressionRatios {
    pub fn get(&self, role: TensorRole) -> f64 {
        match role {
            TensorRole::Input => self.input,
            TensorRole::Output => self.output,
            TensorRole::Weight => self.weight,
        }
    }
}

/// Complete parameter bundle for one layer search
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub batch: u64,
    pub height: u64,
    pub width: u64,
    pub compression: CompressionRatios,
    pub op: OpParam,
    pub hw: HwParam,
}

impl Default for Param {
    fn default() -> Self {
        Param {
            batch: 3,
            height: 112,
            width: 112,
            compression: CompressionRatios::default(),
            op: OpParam::default(),
            hw: HwParam::default(),
        }
    }
}

impl Param {
    /// Full iteration extent of the loop over `dim`
    pub fn extent(&self, dim: Dimension) -> u64 {
        match dim {
            Dimension::Batch => self.batch,
            Dimension::InChan => self.op.in_chan,
            Dimension::OutChan => self.op.out_chan,
            Dimension::Height => self.height,
            Dimension::Width => self.width,
        }
    }

    /// Element count of the whole (untiled) tensor
    pub fn untiled_size(&self, role: TensorRole) -> u64 {
        match role {
            TensorRole::Input => self.batch * self.op.in_chan * self.height * self.width,
            TensorRole::Output => self.batch * self.op.out_chan * self.height * self.width,
            TensorRole::Weight => self.op.in_chan * self.op.out_chan,
        }
    }

    /// Check that the bundle describes a well-formed layer
    pub fn validate(&self, layer: &str) -> Result<(), ParamError> {
        let fields: [(&'static str, u64); 7] = [
            ("batch", self.batch),
            ("height", self.height),
            ("width", self.width),
            ("in_chan", self.op.in_chan),
            ("out_chan", self.op.out_chan),
            ("kernel", self.op.kernel),
            ("stride", self.op.stride),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(ParamError::NonPositive {
                    layer: layer.to_string(),
                    field,
                    value,
                });
            }
        }

        for role in TensorRole::ALL {
            let value = self.compression.get(role);
            if !value.is_finite() || value <= 0.0 {
                return Err(ParamError::InvalidCompression {
                    layer: layer.to_string(),
                    role,
                    value,
                });
            }
            if value > 1.0 {
                log::warn!(
                    "Layer '{}': compression ratio {} for {} expands transfers",
                    layer,
                    value,
                    role
                );
            }
        }
        Ok(())
    }
}

// ============================================================================
// Network description
// ============================================================================

/// One convolution layer as written in a network file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescription {
    pub name: String,
    pub height: u64,
    pub width: u64,
    pub in_chan: u64,
    pub out_chan: u64,
    pub kernel: u64,
    pub stride: u64,
    #[serde(default)]
    pub compression: CompressionRatios,
}

/// A network: shared batch size and an ordered list of layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescription {
    pub name: String,
    pub batch: u64,
    pub layers: Vec<LayerDescription>,
}

impl NetworkDescription {
    pub fn from_json(content: &str) -> Result<Self, ParamError> {
        let network: NetworkDescription = serde_json::from_str(content)?;
        if network.layers.is_empty() {
            return Err(ParamError::EmptyNetwork(network.name));
        }
        Ok(network)
    }

    pub fn load(path: &Path) -> Result<Self, ParamError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Build the validated parameter bundle for `layer` with the given
    /// on-chip capacity (bytes)
    pub fn layer_param(
        &self,
        layer: &LayerDescription,
        onchip_mem_size: u64,
    ) -> Result<Param, ParamError> {
        let param = Param {
            batch: self.batch,
            height: layer.height,
            width: layer.width,
            compression: layer.compression,
            op: OpParam {
                out_chan: layer.out_chan,
                in_chan: layer.in_chan,
                stride: layer.stride,
                kernel: layer.kernel,
            },
            hw: HwParam { onchip_mem_size },
        };
        param.validate(&layer.name)?;
        Ok(param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK: &str = r#"{
        "name": "tiny",
        "batch": 2,
        "layers": [
            { "name": "conv1", "height": 8, "width": 8, "in_chan": 3, "out_chan": 16,
              "kernel": 3, "stride": 1, "compression": { "input": 0.5 } },
            { "name": "conv2", "height": 4, "width": 4, "in_chan": 16, "out_chan": 16,
              "kernel": 1, "stride": 2 }
        ]
    }"#;

    #[test]
    fn test_parse_network() {
        let network = NetworkDescription::from_json(NETWORK).unwrap();
        assert_eq!(network.layers.len(), 2);
        assert_eq!(network.layers[0].compression.input, 0.5);
        assert_eq!(network.layers[0].compression.weight, 1.0);
        assert_eq!(network.layers[1].compression, CompressionRatios::default());

        let param = network.layer_param(&network.layers[0], 4096).unwrap();
        assert_eq!(param.batch, 2);
        assert_eq!(param.extent(Dimension::OutChan), 16);
        assert_eq!(param.untiled_size(TensorRole::Input), 2 * 3 * 8 * 8);
        assert_eq!(param.untiled_size(TensorRole::Weight), 3 * 16);
        assert_eq!(param.hw.onchip_mem_size, 4096);
    }

    #[test]
    fn test_rejects_invalid_layers() {
        let mut param = Param::default();
        param.op.stride = 0;
        assert!(matches!(
            param.validate("bad"),
            Err(ParamError::NonPositive { field: "stride", .. })
        ));

        let mut param = Param::default();
        param.compression.output = 0.0;
        assert!(matches!(
            param.validate("bad"),
            Err(ParamError::InvalidCompression {
                role: TensorRole::Output,
                ..
            })
        ));

        let empty = r#"{ "name": "empty", "batch": 1, "layers": [] }"#;
        assert!(matches!(
            NetworkDescription::from_json(empty),
            Err(ParamError::EmptyNetwork(_))
        ));
    }
}
