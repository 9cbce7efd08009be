//! Off-chip access volume model
//!
//! # Access counts
//!
//! For each tensor the number of off-chip crossings is a product of per-loop
//! multipliers, scanned outer → inner and frozen at the loop the tensor is
//! placed at (the tensor is resident from that level inward):
//!
//! ```text
//! count = 1
//! for loop in order (outer -> inner):
//!     if tensor still off-chip:
//!         if loop.dim in deps(tensor):   count *= repeat            exact re-use
//!         elif tensor is accumulated:    count *= 2*ceil(repeat)-1  read-modify-write
//!         else:                          count *= ceil(repeat)
//!         if loop holds a memory op of the tensor: tensor is on-chip
//! ```
//!
//! The freeze happens after the multiplier of the placement loop itself is
//! applied. `ceil` is not expressible directly in the constraint language, so
//! each distinct ceiling is an auxiliary solver variable (one per loop).
//!
//! # Objective and constraints
//!
//! ```text
//! minimize  Σ_t ratio(t) * tiled_size(t) * count(t)
//! s.t.      Σ_t tiled_size(t) <= on-chip capacity
//!           N <= out_chan, C <= in_chan, H <= height, W <= width
//! ```

use std::collections::HashMap;
use thiserror::Error;

use crate::dimension::{AccessPattern, Dimension, TensorRole};
use crate::loop_nest::{Loop, LoopOrder, TileVars};
use crate::param::Param;
use crate::solver::{Expr, Relation, SolveError, SolverSession, Var};

/// Model-building failures; all of them are programming errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectiveError {
    #[error("Repeat count of the {0} loop read before tile sizes were bound")]
    UnboundLoop(Dimension),

    #[error("Tiled size of {0} read before tile sizes were bound")]
    UnboundTensor(TensorRole),

    #[error("Solver rejected the model: {0}")]
    Solver(#[from] SolveError),
}

// ============================================================================
// Access-count recurrence
// ============================================================================

/// Builds access-count expressions, sharing one `ceil` variable per loop
pub struct AccessModel<'s> {
    session: &'s mut SolverSession,
    ceilings: HashMap<Dimension, Var>,
}

impl<'s> AccessModel<'s> {
    pub fn new(session: &'s mut SolverSession) -> Self {
        AccessModel {
            session,
            ceilings: HashMap::new(),
        }
    }

    /// Access count of `pattern`; `resident(loop)` tells whether the tensor
    /// becomes resident at that loop
    pub fn count<P: AccessPattern>(
        &mut self,
        order: &LoopOrder,
        pattern: &P,
        resident: impl Fn(&Loop) -> bool,
    ) -> Result<Expr, ObjectiveError> {
        let mut count = Expr::constant(1.0);
        for lp in &order.loops {
            count = count * self.multiplier(lp, pattern)?;
            if resident(lp) {
                break;
            }
        }
        Ok(count)
    }

    /// Access count of a placed tensor role
    pub fn count_role(
        &mut self,
        order: &LoopOrder,
        role: TensorRole,
    ) -> Result<Expr, ObjectiveError> {
        self.count(order, &role, |lp| lp.references(role))
    }

    /// Factor contributed by one loop
    pub fn multiplier<P: AccessPattern>(
        &mut self,
        lp: &Loop,
        pattern: &P,
    ) -> Result<Expr, ObjectiveError> {
        let repeat = lp.repeat_count()?.clone();
        if pattern.dependencies().contains(lp.dim) {
            return Ok(repeat);
        }
        let ceiled = self.ceiling(lp, repeat)?.expr();
        if pattern.is_accumulated() {
            Ok(2.0 * ceiled - 1.0)
        } else {
            Ok(ceiled)
        }
    }

    fn ceiling(&mut self, lp: &Loop, repeat: Expr) -> Result<Var, ObjectiveError> {
        if let Some(var) = self.ceilings.get(&lp.dim) {
            return Ok(*var);
        }
        let var = self.session.ceil(repeat)?;
        self.ceilings.insert(lp.dim, var);
        Ok(var)
    }
}

// ============================================================================
// Objective
// ============================================================================

/// Off-chip access volume of one loop order, registered into a solver session
pub struct OffChipAccess<'a> {
    session: &'a mut SolverSession,
    param: &'a Param,
    order: &'a mut LoopOrder,
    tiles: TileVars,
}

impl<'a> OffChipAccess<'a> {
    /// Bind every loop and tensor of `order` to the session's tile variables
    pub fn new(
        session: &'a mut SolverSession,
        param: &'a Param,
        order: &'a mut LoopOrder,
        tiles: TileVars,
    ) -> Self {
        for lp in order.loops.iter_mut() {
            lp.bind(&tiles);
        }
        for tensor in order.tensors.iter_mut() {
            tensor.bind(&tiles, param);
        }
        OffChipAccess {
            session,
            param,
            order,
            tiles,
        }
    }

    /// Sum of tiled sizes over the distinct tensors moved by the order
    pub fn total_data_size(&self) -> Result<Expr, ObjectiveError> {
        let mut sizes = Vec::new();
        for tensor in self.order.referenced_tensors() {
            sizes.push(tensor.tiled_size()?.clone());
        }
        Ok(sizes.into_iter().sum())
    }

    /// Access count per role, indexed by [`TensorRole::index`]
    pub fn access_counts(&mut self) -> Result<[Expr; 3], ObjectiveError> {
        let mut model = AccessModel::new(self.session);
        let order: &LoopOrder = &*self.order;
        Ok([
            model.count_role(order, TensorRole::Input)?,
            model.count_role(order, TensorRole::Output)?,
            model.count_role(order, TensorRole::Weight)?,
        ])
    }

    /// Weighted off-chip volume: Σ ratio · tiled size · access count
    pub fn volume(&mut self) -> Result<Expr, ObjectiveError> {
        let counts = self.access_counts()?;
        let mut terms = Vec::new();
        for tensor in self.order.referenced_tensors() {
            let ratio = self.param.compression.get(tensor.role);
            let count = counts[tensor.role.index()].clone();
            terms.push(ratio * tensor.tiled_size()?.clone() * count);
        }
        Ok(terms.into_iter().sum())
    }

    /// Register capacity/tile-bound constraints and the objective
    pub fn set_search_space(&mut self) -> Result<(), ObjectiveError> {
        self.set_constraints()?;
        self.set_objective()
    }

    fn set_constraints(&mut self) -> Result<(), ObjectiveError> {
        let total = self.total_data_size()?;
        let param = self.param;
        let tiles = self.tiles;
        let session = &mut *self.session;

        session.add_constraint(total, Relation::LessEq, param.hw.onchip_mem_size as f64)?;
        session.add_constraint(tiles.n, Relation::LessEq, param.op.out_chan as f64)?;
        session.add_constraint(tiles.c, Relation::LessEq, param.op.in_chan as f64)?;
        session.add_constraint(tiles.h, Relation::LessEq, param.height as f64)?;
        session.add_constraint(tiles.w, Relation::LessEq, param.width as f64)?;
        Ok(())
    }

    fn set_objective(&mut self) -> Result<(), ObjectiveError> {
        let volume = self.volume()?;
        log::debug!("Objective for {}: {}", self.order.label(), volume);
        self.session.minimize(volume)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{DataflowGenerator, CANONICAL_ORDERS};
    use crate::loop_nest::TileSizes;
    use crate::solver::SolverConfig;

    fn small_param() -> Param {
        let mut param = Param::default();
        param.batch = 1;
        param.height = 4;
        param.width = 4;
        param.op.in_chan = 4;
        param.op.out_chan = 2;
        param.op.kernel = 1;
        param
    }

    #[test]
    fn test_ceil_variables_shared_per_loop() {
        let param = small_param();
        let mut order = DataflowGenerator::new(&param)
            .build(&CANONICAL_ORDERS[0])
            .unwrap();
        let mut session = SolverSession::new(SolverConfig::default());
        let tiles = TileVars::declare(&mut session).unwrap();
        let mut objective = OffChipAccess::new(&mut session, &param, &mut order, tiles);
        objective.set_search_space().unwrap();

        // BHWIO: weight needs ceilings for B, H, W; output for I. B/H/W are shared.
        assert_eq!(session.num_variables(), 4 + 4);
    }

    #[test]
    fn test_volume_at_point() {
        let param = small_param();
        let mut order = DataflowGenerator::new(&param)
            .build(&CANONICAL_ORDERS[0])
            .unwrap();
        let mut session = SolverSession::new(SolverConfig::default());
        let tiles = TileVars::declare(&mut session).unwrap();
        let volume = OffChipAccess::new(&mut session, &param, &mut order, tiles)
            .volume()
            .unwrap();

        let sizes = TileSizes {
            n: 2,
            c: 2,
            h: 4,
            w: 4,
        };
        let value = session.evaluate(&volume, &tiles.assignment(&sizes)).unwrap();
        // input:  2*4*4 tile, counts 1*1*1*(4/2)          -> 64
        // output: 2*4*4 tile, counts 1*1*1*(2*2-1)*(2/2)  -> 96
        // weight: 2*2 tile,   counts 1*1*1*(4/2)*(2/2)    -> 8
        assert_eq!(value, 64.0 + 96.0 + 8.0);
    }
}
