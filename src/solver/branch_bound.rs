//! Best-first branch-and-bound over integer boxes
//!
//! # Algorithm
//!
//! The search space is the box `[lower_i, upper_i]` of every decision
//! variable. Auxiliary (`ceil`) variables are never branched on: at a point
//! they are the ceiling of their definition, over a box they are the ceiling
//! of the definition's interval.
//!
//! ```text
//! incumbent <- best of { initial point, midpoint of root box }
//! queue     <- { root box }                      ordered by objective lower bound
//! loop:
//!     pop box with the smallest lower bound
//!     stop if bound >= incumbent                 (nothing left can improve)
//!     split the widest variable at its midpoint
//!     for each child:
//!         try the child's midpoint as a new incumbent
//!         drop the child if a constraint is certainly violated on it
//!         drop the child if its bound cannot beat the incumbent
//! ```
//!
//! The result is a global optimum over the integer box (up to floating-point
//! rounding in the bound computation). Among equal objective values the first
//! point found is kept, which makes the search deterministic.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use super::interval::{Interval, Program};
use super::session::Relation;
use super::{SolveError, SolverConfig};

/// A compiled model ready for search
#[derive(Debug, Clone)]
pub struct Problem {
    pub(crate) slot_count: usize,
    /// Slots of the decision variables, in declaration order
    pub(crate) decision: Vec<usize>,
    pub(crate) lower: Vec<i64>,
    pub(crate) upper: Vec<i64>,
    pub(crate) initial: Vec<i64>,
    /// Auxiliary slots with their definitions, in creation order
    pub(crate) aux: Vec<(usize, Program)>,
    /// Residual `lhs - rhs` of every constraint
    pub(crate) constraints: Vec<(Program, Relation)>,
    pub(crate) objective: Program,
    pub(crate) tolerance: f64,
}

impl Problem {
    /// Values of every slot at a decision point
    pub fn assignment(&self, point: &[i64]) -> Vec<f64> {
        let mut values = vec![0.0; self.slot_count];
        let mut scratch = Vec::new();
        self.fill_point(point, &mut values, &mut scratch);
        values
    }

    fn fill_point(&self, point: &[i64], values: &mut [f64], scratch: &mut Vec<f64>) {
        for (slot, value) in self.decision.iter().zip(point) {
            values[*slot] = *value as f64;
        }
        for (slot, def) in &self.aux {
            values[*slot] = def.eval(values, scratch).ceil();
        }
    }
}

#[derive(Debug, Clone)]
pub struct Found {
    pub point: Vec<i64>,
    pub objective: f64,
    pub nodes: usize,
}

// ============================================================================
// Search state
// ============================================================================

#[derive(Debug, Clone)]
struct Region {
    lo: Vec<i64>,
    hi: Vec<i64>,
}

impl Region {
    fn is_point(&self) -> bool {
        self.lo.iter().zip(&self.hi).all(|(l, h)| l == h)
    }

    fn midpoint(&self) -> Vec<i64> {
        self.lo
            .iter()
            .zip(&self.hi)
            .map(|(l, h)| l + (h - l) / 2)
            .collect()
    }

    /// Halve the widest variable (first one on ties)
    fn split(&self) -> [Region; 2] {
        let mut widest = 0;
        for i in 1..self.lo.len() {
            if self.hi[i] - self.lo[i] > self.hi[widest] - self.lo[widest] {
                widest = i;
            }
        }
        let mid = self.lo[widest] + (self.hi[widest] - self.lo[widest]) / 2;
        let mut left = self.clone();
        let mut right = self.clone();
        left.hi[widest] = mid;
        right.lo[widest] = mid + 1;
        [left, right]
    }
}

struct Node {
    bound: f64,
    seq: usize,
    region: Region,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    // BinaryHeap is a max-heap: smaller bound, then older node, pops first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .bound
            .total_cmp(&self.bound)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Evaluator<'p> {
    problem: &'p Problem,
    values: Vec<f64>,
    bounds: Vec<Interval>,
    scratch: Vec<f64>,
    interval_scratch: Vec<Interval>,
}

impl<'p> Evaluator<'p> {
    fn new(problem: &'p Problem) -> Self {
        Evaluator {
            problem,
            values: vec![0.0; problem.slot_count],
            bounds: vec![Interval::ENTIRE; problem.slot_count],
            scratch: Vec::new(),
            interval_scratch: Vec::new(),
        }
    }

    /// Objective at a point, or `None` when the point is infeasible
    fn point(&mut self, point: &[i64]) -> Option<f64> {
        let problem = self.problem;
        problem.fill_point(point, &mut self.values, &mut self.scratch);
        for (residual, relation) in &problem.constraints {
            let value = residual.eval(&self.values, &mut self.scratch);
            if !relation.holds(value, problem.tolerance) {
                return None;
            }
        }
        let objective = problem.objective.eval(&self.values, &mut self.scratch);
        objective.is_finite().then_some(objective)
    }

    /// Objective lower bound over a region, or `None` when some constraint
    /// cannot hold anywhere in it
    fn bound(&mut self, region: &Region) -> Option<f64> {
        let problem = self.problem;
        for (i, slot) in problem.decision.iter().enumerate() {
            self.bounds[*slot] = Interval::new(region.lo[i] as f64, region.hi[i] as f64);
        }
        for (slot, def) in &problem.aux {
            self.bounds[*slot] = def
                .eval_interval(&self.bounds, &mut self.interval_scratch)
                .ceil();
        }
        for (residual, relation) in &problem.constraints {
            let range = residual.eval_interval(&self.bounds, &mut self.interval_scratch);
            if relation.certainly_violated(range, problem.tolerance) {
                return None;
            }
        }
        Some(
            problem
                .objective
                .eval_interval(&self.bounds, &mut self.interval_scratch)
                .lo,
        )
    }
}

// ============================================================================
// Search
// ============================================================================

/// Replace the incumbent when `point` is feasible and strictly better
fn consider(
    evaluator: &mut Evaluator<'_>,
    point: Vec<i64>,
    incumbent: &mut Option<(f64, Vec<i64>)>,
) {
    if let Some(value) = evaluator.point(&point) {
        if incumbent.as_ref().map_or(true, |(best, _)| value < *best) {
            *incumbent = Some((value, point));
        }
    }
}

/// Minimize the problem's objective; `start` is when the solve began
pub fn minimize(
    problem: &Problem,
    config: &SolverConfig,
    start: Instant,
) -> Result<Found, SolveError> {
    let mut evaluator = Evaluator::new(problem);
    let mut incumbent: Option<(f64, Vec<i64>)> = None;

    let root = Region {
        lo: problem.lower.clone(),
        hi: problem.upper.clone(),
    };
    consider(&mut evaluator, problem.initial.clone(), &mut incumbent);
    consider(&mut evaluator, root.midpoint(), &mut incumbent);

    let mut heap = BinaryHeap::new();
    let mut seq = 0;
    if !root.is_point() {
        if let Some(bound) = evaluator.bound(&root) {
            heap.push(Node {
                bound,
                seq,
                region: root,
            });
            seq += 1;
        }
    }

    let mut nodes = 0;
    while let Some(Node { bound, region, .. }) = heap.pop() {
        if let Some((best, _)) = &incumbent {
            if bound >= *best {
                break;
            }
        }

        nodes += 1;
        if nodes > config.max_nodes {
            return Err(SolveError::NodeLimit(config.max_nodes));
        }
        if let Some(limit) = config.timeout {
            if start.elapsed() > limit {
                return Err(SolveError::Timeout(limit));
            }
        }

        for child in region.split() {
            consider(&mut evaluator, child.midpoint(), &mut incumbent);
            if child.is_point() {
                continue;
            }
            let Some(child_bound) = evaluator.bound(&child) else {
                continue;
            };
            if incumbent
                .as_ref()
                .map_or(true, |(best, _)| child_bound < *best)
            {
                heap.push(Node {
                    bound: child_bound,
                    seq,
                    region: child,
                });
                seq += 1;
            }
        }
    }

    match incumbent {
        Some((objective, point)) => Ok(Found {
            point,
            objective,
            nodes,
        }),
        None => Err(SolveError::Infeasible),
    }
}
