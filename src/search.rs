//! Search driver: best loop order and tile sizes for one layer
//!
//! Every candidate of the dataflow catalog gets its own solver session:
//!
//! ```text
//! for order in catalog:
//!     session <- fresh SolverSession, tile vars N, C, H, W >= 1
//!     register capacity / tile-bound constraints and the access volume
//!     solve                      failure => objective = +inf
//!     fold into (min, solutions) in catalog order
//! ```
//!
//! A candidate strictly below the running minimum replaces the solution set;
//! a candidate equal to it (within a relative tolerance) is appended. Solver
//! failures never touch the minimum, so a layer where nothing is feasible
//! ends with `min_value == f64::INFINITY` and no solutions.
//!
//! With [`SearchConfig::parallel`] the candidates are solved concurrently
//! with rayon. Sessions are still per candidate and the fold still runs in
//! catalog order, so both modes give the same result.

use rayon::prelude::*;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::dataflow::{DataflowError, DataflowGenerator};
use crate::dimension::TensorRole;
use crate::loop_nest::{LoopOrder, TileSizes, TileVars};
use crate::objective::{ObjectiveError, OffChipAccess};
use crate::param::{NetworkDescription, Param, ParamError};
use crate::solver::{SolveError, SolverConfig, SolverSession};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Layer '{layer}': no feasible dataflow (every loop order is infeasible)")]
    NoFeasibleDataflow { layer: String },

    #[error("Layer '{layer}': no loop order was solved within the solver limits")]
    AllCandidatesTimedOut { layer: String },

    #[error("Layer '{layer}': no loop order was solved, solver failed: {reason}")]
    CandidatesFailed { layer: String, reason: String },

    #[error("Invalid parameters: {0}")]
    Param(#[from] ParamError),

    #[error("Memory-operation placement is inconsistent: {0}")]
    Dataflow(#[from] DataflowError),

    #[error("Failed to build the access-volume model: {0}")]
    Objective(#[from] ObjectiveError),
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Settings for every per-candidate solver session
    pub solver: SolverConfig,

    /// Solve the loop-order candidates concurrently
    pub parallel: bool,

    /// Relative tolerance under which two objective values tie
    ///
    /// Equal volumes reached through different loop orders are built from
    /// different float expressions and may differ in the last bits.
    pub tie_tolerance: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            solver: SolverConfig::default(),
            parallel: false,
            tie_tolerance: 1e-9,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CandidateStatus {
    Solved,
    Infeasible,
    /// Hit the solver timeout or node limit
    TimedOut,
    Failed(String),
}

impl CandidateStatus {
    fn from_error(err: &SolveError) -> Self {
        match err {
            SolveError::Infeasible => CandidateStatus::Infeasible,
            e if e.is_limit() => CandidateStatus::TimedOut,
            e => CandidateStatus::Failed(e.to_string()),
        }
    }
}

/// Diagnostics of one loop-order candidate
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateReport {
    /// Loop-order label, e.g. `"BHWIO"`
    pub order: String,
    pub status: CandidateStatus,
    /// Minimal access volume in bytes; `f64::INFINITY` unless solved
    pub objective: f64,
    pub tiles: Option<TileSizes>,
    /// Branch-and-bound nodes expanded (0 on failure)
    pub nodes: usize,
    pub elapsed: Duration,
}

/// One loop order attaining the layer minimum
#[derive(Debug, Clone)]
pub struct Solution {
    pub order: LoopOrder,
    pub tiles: TileSizes,
}

impl Solution {
    pub fn label(&self) -> String {
        self.order.label()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerStatus {
    Solved,
    TimedOut,
    /// No candidate solved and at least one ended in a solver error
    Failed,
    NoFeasibleDataflow,
}

#[derive(Debug, Clone)]
pub struct LayerResult {
    /// Minimal access volume over all candidates, bytes
    pub min_value: f64,
    /// All (loop order, tile sizes) pairs attaining `min_value`, catalog order
    pub solutions: Vec<Solution>,
    /// Every candidate, catalog order
    pub candidates: Vec<CandidateReport>,
}

impl LayerResult {
    fn empty() -> Self {
        LayerResult {
            min_value: f64::INFINITY,
            solutions: Vec::new(),
            candidates: Vec::new(),
        }
    }

    pub fn status(&self) -> LayerStatus {
        if !self.solutions.is_empty() {
            LayerStatus::Solved
        } else if self
            .candidates
            .iter()
            .any(|c| c.status == CandidateStatus::TimedOut)
        {
            LayerStatus::TimedOut
        } else if self.failure_reason().is_some() {
            LayerStatus::Failed
        } else {
            LayerStatus::NoFeasibleDataflow
        }
    }

    /// Reason of the first candidate that ended in a solver error
    pub fn failure_reason(&self) -> Option<&str> {
        self.candidates.iter().find_map(|c| match &c.status {
            CandidateStatus::Failed(reason) => Some(reason.as_str()),
            _ => None,
        })
    }

    /// Turn a layer without solutions into the matching error
    pub fn into_feasible(self, layer: &str) -> Result<Self, SearchError> {
        match self.status() {
            LayerStatus::Solved => Ok(self),
            LayerStatus::TimedOut => Err(SearchError::AllCandidatesTimedOut {
                layer: layer.to_string(),
            }),
            LayerStatus::Failed => Err(SearchError::CandidatesFailed {
                layer: layer.to_string(),
                reason: self.failure_reason().unwrap_or_default().to_string(),
            }),
            LayerStatus::NoFeasibleDataflow => Err(SearchError::NoFeasibleDataflow {
                layer: layer.to_string(),
            }),
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

pub struct SearchDriver {
    config: SearchConfig,
}

impl SearchDriver {
    pub fn new(config: SearchConfig) -> Self {
        SearchDriver { config }
    }

    /// Solve every loop-order candidate for `param` and keep the best ones
    pub fn search(&self, param: &Param) -> Result<LayerResult, SearchError> {
        let orders = DataflowGenerator::new(param).candidates()?;
        let untiled: u64 = TensorRole::ALL.iter().map(|r| param.untiled_size(*r)).sum();
        log::debug!(
            "{} candidate(s), untiled footprint {} elements, capacity {}",
            orders.len(),
            untiled,
            param.hw.onchip_mem_size
        );

        let evaluated: Vec<(LoopOrder, CandidateReport)> = if self.config.parallel {
            orders
                .into_par_iter()
                .map(|order| self.evaluate(param, order))
                .collect::<Result<_, _>>()?
        } else {
            orders
                .into_iter()
                .map(|order| self.evaluate(param, order))
                .collect::<Result<_, _>>()?
        };

        Ok(self.reduce(evaluated))
    }

    /// Build and solve one candidate in its own session
    fn evaluate(
        &self,
        param: &Param,
        mut order: LoopOrder,
    ) -> Result<(LoopOrder, CandidateReport), SearchError> {
        let start = Instant::now();
        let label = order.label();

        let mut session = SolverSession::new(self.config.solver.clone());
        let tiles = TileVars::declare(&mut session).map_err(ObjectiveError::from)?;
        OffChipAccess::new(&mut session, param, &mut order, tiles).set_search_space()?;

        let report = match session.solve() {
            Ok(outcome) => match TileSizes::from_values(&outcome.values) {
                Some(sizes) => {
                    log::debug!(
                        "{}: objective = {:.2} at {} ({} nodes, {:?})",
                        label,
                        outcome.objective,
                        sizes,
                        outcome.stats.nodes,
                        outcome.stats.elapsed
                    );
                    CandidateReport {
                        order: label,
                        status: CandidateStatus::Solved,
                        objective: outcome.objective,
                        tiles: Some(sizes),
                        nodes: outcome.stats.nodes,
                        elapsed: outcome.stats.elapsed,
                    }
                }
                None => {
                    log::warn!("{}: solver returned no tile sizes", label);
                    let status = CandidateStatus::Failed("missing tile sizes".to_string());
                    Self::failed(label, status, start)
                }
            },
            Err(e) => {
                let status = CandidateStatus::from_error(&e);
                match status {
                    CandidateStatus::Infeasible => log::debug!("{}: infeasible", label),
                    _ => log::warn!("{}: {}", label, e),
                }
                Self::failed(label, status, start)
            }
        };
        Ok((order, report))
    }

    fn failed(order: String, status: CandidateStatus, start: Instant) -> CandidateReport {
        CandidateReport {
            order,
            status,
            objective: f64::INFINITY,
            tiles: None,
            nodes: 0,
            elapsed: start.elapsed(),
        }
    }

    /// Fold candidates into the running minimum, in catalog order
    fn reduce(&self, evaluated: Vec<(LoopOrder, CandidateReport)>) -> LayerResult {
        let mut result = LayerResult::empty();
        for (order, report) in evaluated {
            if let (CandidateStatus::Solved, Some(tiles)) = (&report.status, report.tiles) {
                let value = report.objective;
                if self.ties(value, result.min_value) {
                    result.min_value = result.min_value.min(value);
                    result.solutions.push(Solution { order, tiles });
                } else if value < result.min_value {
                    result.min_value = value;
                    result.solutions.clear();
                    result.solutions.push(Solution { order, tiles });
                }
            }
            result.candidates.push(report);
        }
        result
    }

    fn ties(&self, value: f64, min: f64) -> bool {
        if !value.is_finite() || !min.is_finite() {
            return false;
        }
        let scale = value.abs().max(min.abs()).max(1.0);
        (value - min).abs() <= self.config.tie_tolerance * scale
    }
}

// ============================================================================
// Network
// ============================================================================

#[derive(Debug, Clone)]
pub struct LayerOutcome {
    pub name: String,
    pub result: LayerResult,
}

#[derive(Debug, Clone)]
pub struct NetworkResult {
    pub name: String,
    pub layers: Vec<LayerOutcome>,
    /// Sum of the per-layer minima, bytes
    pub total_bytes: f64,
}

/// Search every layer of `network` in sequence
///
/// The first layer without a feasible dataflow aborts the run.
pub fn search_network(
    network: &NetworkDescription,
    onchip_mem_size: u64,
    config: &SearchConfig,
) -> Result<NetworkResult, SearchError> {
    search_network_with(network, onchip_mem_size, config, |_| Ok(()))
}

/// Like [`search_network`], calling `on_layer` as soon as each layer is solved
///
/// Layers handed to `on_layer` before a failing layer stay handed over, so a
/// callback writing report files keeps the finished layers on disk when the
/// run aborts.
pub fn search_network_with<F, E>(
    network: &NetworkDescription,
    onchip_mem_size: u64,
    config: &SearchConfig,
    mut on_layer: F,
) -> Result<NetworkResult, E>
where
    F: FnMut(&LayerOutcome) -> Result<(), E>,
    E: From<SearchError>,
{
    let driver = SearchDriver::new(config.clone());
    let mut layers = Vec::with_capacity(network.layers.len());
    let mut total_bytes = 0.0;

    for layer in &network.layers {
        let param = network
            .layer_param(layer, onchip_mem_size)
            .map_err(SearchError::from)?;
        log::info!("Searching layer '{}'", layer.name);
        let result = driver.search(&param)?.into_feasible(&layer.name)?;

        log::info!(
            "Layer '{}': {} solution(s), best size {:.3} MiB",
            layer.name,
            result.solutions.len(),
            result.min_value / (1024.0 * 1024.0)
        );
        for solution in &result.solutions {
            log::debug!("  {} {}", solution.label(), solution.tiles);
        }

        total_bytes += result.min_value;
        let outcome = LayerOutcome {
            name: layer.name.clone(),
            result,
        };
        on_layer(&outcome)?;
        layers.push(outcome);
    }

    Ok(NetworkResult {
        name: network.name.clone(),
        layers,
        total_bytes,
    })
}
