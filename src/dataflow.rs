//! Dataflow candidates and memory-operation placement
//!
//! # Candidate catalog
//!
//! Three loop orders (outer → inner) make up the search space:
//!
//! ```text
//! 1. Batch, Height, Width, InChan, OutChan     "BHWIO"
//! 2. Batch, Height, Width, OutChan, InChan     "BHWOI"
//! 3. OutChan, InChan, Batch, Height, Width     "OIBHW"
//! ```
//!
//! The first two keep output/input tiles resident while channels stream; the
//! third keeps a weight tile resident across the whole spatial sweep.
//!
//! # Placement
//!
//! Walking a loop order outer → inner, a tensor is loaded at the first loop
//! where every dimension of its dependency set has been visited. The output
//! is also stored back at that same loop. Each tensor is placed exactly once,
//! at or before the innermost loop, because every dependency set is a subset
//! of all five dimensions. Placement is purely structural and never looks at
//! tile sizes.

use thiserror::Error;

use crate::dimension::{DimSet, Dimension, TensorRole};
use crate::loop_nest::{Loop, LoopOrder, MemOpKind, MemoryOperation};
use crate::param::Param;
use crate::tensor::TensorDescriptor;

/// Canonical loop orders, outer → inner
pub const CANONICAL_ORDERS: [[Dimension; 5]; 3] = [
    [
        Dimension::Batch,
        Dimension::Height,
        Dimension::Width,
        Dimension::InChan,
        Dimension::OutChan,
    ],
    [
        Dimension::Batch,
        Dimension::Height,
        Dimension::Width,
        Dimension::OutChan,
        Dimension::InChan,
    ],
    [
        Dimension::OutChan,
        Dimension::InChan,
        Dimension::Batch,
        Dimension::Height,
        Dimension::Width,
    ],
];

/// Order in which roles are checked at each loop; decides the insertion order
/// when several tensors become placeable at the same loop
const PLACEMENT_ROLES: [TensorRole; 3] =
    [TensorRole::Weight, TensorRole::Input, TensorRole::Output];

/// Internal-consistency failures of placement; never recoverable
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataflowError {
    #[error("Loop order {0} is not a permutation of the five dimensions")]
    NotAPermutation(String),

    #[error("Loop order {order}: {role} is loaded {count} times (expected once)")]
    LoadCount {
        order: String,
        role: TensorRole,
        count: usize,
    },

    #[error("Loop order {order}: {role} is stored {count} times")]
    StoreCount {
        order: String,
        role: TensorRole,
        count: usize,
    },

    #[error("Loop order {order}: {role} placed at loop {found:?}, expected at loop {expected}")]
    Misplaced {
        order: String,
        role: TensorRole,
        found: Option<usize>,
        expected: usize,
    },
}

// ============================================================================
// Generator
// ============================================================================

/// Builds the candidate loop orders for one layer
///
/// The parameter bundle is passed in explicitly and only read.
#[derive(Debug, Clone, Copy)]
pub struct DataflowGenerator<'a> {
    param: &'a Param,
}

impl<'a> DataflowGenerator<'a> {
    pub fn new(param: &'a Param) -> Self {
        DataflowGenerator { param }
    }

    /// Every canonical candidate, placed and verified
    pub fn candidates(&self) -> Result<Vec<LoopOrder>, DataflowError> {
        CANONICAL_ORDERS
            .iter()
            .map(|dims| self.build(dims))
            .collect()
    }

    /// Build and place one loop order
    pub fn build(&self, dims: &[Dimension]) -> Result<LoopOrder, DataflowError> {
        let visited: DimSet = dims.iter().copied().collect();
        if dims.len() != Dimension::ALL.len() || visited != DimSet::full() {
            let label: String = dims.iter().map(|d| d.label()).collect();
            return Err(DataflowError::NotAPermutation(label));
        }
        let loops = dims.iter().map(|&dim| self.create_loop(dim)).collect();
        let mut order = LoopOrder::new(loops);
        insert_mem_ops(&mut order);
        verify_placement(&order)?;
        log::debug!("Placed memory operations for {}:\n{}", order.label(), order);
        Ok(order)
    }

    fn create_loop(&self, dim: Dimension) -> Loop {
        Loop::new(dim, self.param.extent(dim))
    }
}

// ============================================================================
// Placement
// ============================================================================

/// Hoist each tensor's load (and the output's store) to the first loop at
/// which its dependency set is fully visited
pub fn insert_mem_ops(order: &mut LoopOrder) {
    let mut visited = DimSet::EMPTY;
    let mut placed = [false; 3];
    let mut outers: Vec<Dimension> = Vec::with_capacity(order.loops.len());

    order.tensors.clear();
    for lp in order.loops.iter_mut() {
        lp.mem_ops.clear();
    }

    for lp in order.loops.iter_mut() {
        outers.push(lp.dim);
        visited.insert(lp.dim);

        for role in PLACEMENT_ROLES {
            if placed[role.index()] || !role.dependencies().is_subset(visited) {
                continue;
            }
            order.tensors.push(TensorDescriptor::new(role));
            lp.mem_ops
                .push(MemoryOperation::new(role, MemOpKind::Load, &outers));
            if role.is_accumulated() {
                lp.mem_ops
                    .push(MemoryOperation::new(role, MemOpKind::Store, &outers));
            }
            placed[role.index()] = true;
        }
    }
}

/// First loop index at which all of `deps` have been visited
pub fn first_satisfying_loop(dims: &[Dimension], deps: DimSet) -> Option<usize> {
    let mut visited = DimSet::EMPTY;
    for (i, dim) in dims.iter().enumerate() {
        visited.insert(*dim);
        if deps.is_subset(visited) {
            return Some(i);
        }
    }
    None
}

/// Check that every role is loaded exactly once (the output also stored
/// exactly once) at the loop where its dependencies are first satisfied
pub fn verify_placement(order: &LoopOrder) -> Result<(), DataflowError> {
    let dims = order.dims();
    let label = order.label();
    for role in TensorRole::ALL {
        let count = |kind: MemOpKind| {
            order
                .loops
                .iter()
                .flat_map(|l| &l.mem_ops)
                .filter(|op| op.tensor == role && op.kind == kind)
                .count()
        };

        let loads = count(MemOpKind::Load);
        if loads != 1 {
            return Err(DataflowError::LoadCount {
                order: label,
                role,
                count: loads,
            });
        }
        let stores = count(MemOpKind::Store);
        let expected_stores = usize::from(role.is_accumulated());
        if stores != expected_stores {
            return Err(DataflowError::StoreCount {
                order: label,
                role,
                count: stores,
            });
        }

        let expected = first_satisfying_loop(&dims, role.dependencies())
            .ok_or_else(|| DataflowError::NotAPermutation(label.clone()))?;
        let found = order.placement_of(role);
        if found != Some(expected) {
            return Err(DataflowError::Misplaced {
                order: label,
                role,
                found,
                expected,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_three_permutations() {
        let param = Param::default();
        let orders = DataflowGenerator::new(&param).candidates().unwrap();
        let labels: Vec<String> = orders.iter().map(|o| o.label()).collect();
        assert_eq!(labels, vec!["BHWIO", "BHWOI", "OIBHW"]);
        for order in &orders {
            assert_eq!(order.tensors.len(), 3);
            assert_eq!(order.loops[0].extent, param.extent(order.loops[0].dim));
        }
    }

    #[test]
    fn test_output_store_follows_load() {
        let param = Param::default();
        let order = DataflowGenerator::new(&param)
            .build(&CANONICAL_ORDERS[0])
            .unwrap();
        let innermost = &order.loops[4];
        let kinds: Vec<(TensorRole, MemOpKind)> =
            innermost.mem_ops.iter().map(|op| (op.tensor, op.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (TensorRole::Weight, MemOpKind::Load),
                (TensorRole::Output, MemOpKind::Load),
                (TensorRole::Output, MemOpKind::Store),
            ]
        );
    }

    #[test]
    fn test_rejects_non_permutation() {
        let param = Param::default();
        let dims = [
            Dimension::Batch,
            Dimension::Batch,
            Dimension::Width,
            Dimension::InChan,
            Dimension::OutChan,
        ];
        assert!(matches!(
            DataflowGenerator::new(&param).build(&dims),
            Err(DataflowError::NotAPermutation(_))
        ));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let param = Param::default();
        let mut order = DataflowGenerator::new(&param)
            .build(&CANONICAL_ORDERS[2])
            .unwrap();
        let op = order.loops[1].mem_ops.remove(0);
        order.loops[2].mem_ops.push(op);
        assert!(matches!(
            verify_placement(&order),
            Err(DataflowError::Misplaced {
                role: TensorRole::Weight,
                ..
            })
        ));
    }
}
