//! ConvTile: loop-order and tile-size exploration for convolution layers
//!
//! For one convolution layer and an on-chip memory budget, this library
//! picks the loop order and the tile sizes that minimize off-chip traffic:
//! 1. Enumerate the candidate loop orders and hoist each tensor's memory
//!    operations to the outermost legal loop
//! 2. Build the access-volume objective and the capacity constraints over
//!    symbolic tile sizes
//! 3. Minimize each candidate in its own solver session
//! 4. Keep the minimum and every loop order attaining it
//!
//! # Core Flow
//! ```text
//! Param → DataflowGenerator → LoopOrder (placed) → OffChipAccess → SolverSession
//!                                                                        ↓
//!                       LayerResult ← SearchDriver (min / ties) ← SolveOutcome
//! ```
//!
//! # Module Organization
//!
//! ## Model
//! - [`dimension`]: Loop dimensions, tensor roles and their dependency sets
//! - [`param`]: Layer/hardware parameters and network description files
//! - [`tensor`]: Tensor descriptors and tiled-size formulas
//! - [`loop_nest`]: Loops, memory operations, loop orders, tile variables
//!
//! ## Core
//! - [`dataflow`]: Candidate catalog and memory-operation placement
//! - [`objective`]: Access-count recurrence and the off-chip volume objective
//! - [`search`]: Per-layer and per-network search drivers
//!
//! ## Infrastructure
//! - [`solver`]: Integer minimization (egg expressions, interval branch-and-bound)
//! - [`report`]: JSON result files

// ============================================================================
// Model
// ============================================================================

pub mod dimension;
pub mod loop_nest;
pub mod param;
pub mod tensor;

// ============================================================================
// Core
// ============================================================================

pub mod dataflow;
pub mod objective;
pub mod search;

// ============================================================================
// Infrastructure
// ============================================================================

pub mod report;
pub mod solver;

pub use dataflow::{DataflowError, DataflowGenerator, CANONICAL_ORDERS};
pub use dimension::{AccessPattern, DimSet, Dimension, TensorRole};
pub use loop_nest::{Loop, LoopOrder, MemOpKind, MemoryOperation, TileSizes, TileVars};
pub use objective::{AccessModel, ObjectiveError, OffChipAccess};
pub use param::{
    CompressionRatios, HwParam, LayerDescription, NetworkDescription, OpParam, Param, ParamError,
};
pub use report::{write_layer_report, LayerReport, ReportError};
pub use search::{
    search_network, search_network_with, CandidateReport, CandidateStatus, LayerOutcome,
    LayerResult, LayerStatus, NetworkResult, SearchConfig, SearchDriver, SearchError, Solution,
};
pub use solver::{SolveError, SolverConfig, SolverSession};
pub use tensor::TensorDescriptor;
