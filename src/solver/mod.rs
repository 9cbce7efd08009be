//! Integer minimization over symbolic tile-size models
//!
//! This is the solver collaborator used by the search driver. A
//! [`SolverSession`] owns a small mixed-integer model:
//!
//! - integer decision variables with a lower bound and an initial value
//! - auxiliary integer variables created by [`SolverSession::ceil`]
//! - constraints between [`Expr`]s (`<=`, `<`, `>=`, `==`)
//! - one objective to minimize
//!
//! [`SolverSession::solve`] runs an exact best-first branch-and-bound over the
//! decision variables (see [`branch_bound`]) and returns either the optimal
//! assignment with its objective value or a [`SolveError`].
//!
//! Sessions are never shared. Every loop-order candidate builds its own
//! session, solves it and drops it.

pub mod branch_bound;
pub mod expr;
pub mod interval;
pub mod session;

use std::time::Duration;
use thiserror::Error;

pub use expr::{Constant, Expr, TileExpr};
pub use interval::Interval;
pub use session::{Constraint, Relation, SolveOutcome, SolveStats, SolverSession, Var};

/// Solver failures; the search driver treats all of them as an infinite cost
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("No feasible point exists")]
    Infeasible,

    #[error("Solver timed out after {0:?}")]
    Timeout(Duration),

    #[error("Solver exceeded the node limit ({0})")]
    NodeLimit(usize),

    #[error("No objective registered")]
    NoObjective,

    #[error("Variable '{0}' has no finite upper bound")]
    Unbounded(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

impl SolveError {
    /// True for failures caused by search limits rather than by the model
    pub fn is_limit(&self) -> bool {
        matches!(self, SolveError::Timeout(_) | SolveError::NodeLimit(_))
    }
}

/// Configuration for one solver session
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Wall-clock budget per solve; `None` waits for the search to finish
    pub timeout: Option<Duration>,

    /// Maximum number of branch-and-bound boxes expanded
    ///
    /// Typical values:
    /// - Unit tests: 10,000
    /// - Small layers (≤ 64 channels, ≤ 56×56): 1,000,000
    /// - Large layers: 5,000,000 or more
    pub max_nodes: usize,

    /// Absolute slack allowed when checking constraints
    pub feasibility_tolerance: f64,

    /// Run the egg identity-elimination pass before compiling expressions
    pub simplify: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            timeout: Some(Duration::from_secs(60)),
            max_nodes: 5_000_000,
            feasibility_tolerance: 1e-9,
            simplify: true,
        }
    }
}
