//! Loops, memory operations and loop orders
//!
//! A [`LoopOrder`] is one dataflow candidate: the five loops of the
//! convolution nest, outermost first, each carrying the memory operations
//! hoisted to it. Loops go through two mutations during a run:
//!
//! 1. placement ([`crate::dataflow`]) appends memory operations
//! 2. tile binding ([`Loop::bind`]) sets the symbolic repeat count
//!
//! Rendering a loop order gives a compact view of the nest:
//!
//! ```text
//! Batch    3      []
//! Height   112    []
//! Width    112    []
//! InChan   64     [(LOAD Input / Outer Loops: BHWI)]
//! OutChan  128    [(LOAD Weight / Outer Loops: BHWIO), (LOAD Output / ...), (STORE Output / ...)]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::dimension::{Dimension, TensorRole};
use crate::objective::ObjectiveError;
use crate::solver::{Expr, SolveError, SolverSession, Var};
use crate::tensor::TensorDescriptor;

// ============================================================================
// Tile sizes
// ============================================================================

/// Tile-size unknowns of one solver session
#[derive(Debug, Clone, Copy)]
pub struct TileVars {
    pub n: Var,
    pub c: Var,
    pub h: Var,
    pub w: Var,
}

impl TileVars {
    /// Solver variable names, in `n, c, h, w` field order
    pub const NAMES: [&'static str; 4] = ["N", "C", "H", "W"];

    /// Declare `N, C, H, W` as integers `>= 1`, starting at 1
    pub fn declare(session: &mut SolverSession) -> Result<Self, SolveError> {
        let [n, c, h, w] = Self::NAMES;
        Ok(TileVars {
            n: session.add_integer_var(n, 1, 1)?,
            c: session.add_integer_var(c, 1, 1)?,
            h: session.add_integer_var(h, 1, 1)?,
            w: session.add_integer_var(w, 1, 1)?,
        })
    }

    /// Tile variable of a dimension; batch is never tiled
    pub fn for_dim(&self, dim: Dimension) -> Option<Var> {
        match dim {
            Dimension::OutChan => Some(self.n),
            Dimension::InChan => Some(self.c),
            Dimension::Height => Some(self.h),
            Dimension::Width => Some(self.w),
            Dimension::Batch => None,
        }
    }

    /// Pair each variable with a concrete value, for [`SolverSession::evaluate`]
    pub fn assignment(&self, sizes: &TileSizes) -> [(Var, i64); 4] {
        [
            (self.n, sizes.n as i64),
            (self.c, sizes.c as i64),
            (self.h, sizes.h as i64),
            (self.w, sizes.w as i64),
        ]
    }
}

/// Solved tile sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileSizes {
    #[serde(rename = "N")]
    pub n: u64,
    #[serde(rename = "C")]
    pub c: u64,
    #[serde(rename = "H")]
    pub h: u64,
    #[serde(rename = "W")]
    pub w: u64,
}

impl TileSizes {
    /// Extract the four tile sizes from a solver value map
    pub fn from_values(values: &BTreeMap<String, i64>) -> Option<Self> {
        let get = |name: &str| values.get(name).and_then(|v| u64::try_from(*v).ok());
        let [n, c, h, w] = TileVars::NAMES;
        Some(TileSizes {
            n: get(n)?,
            c: get(c)?,
            h: get(h)?,
            w: get(w)?,
        })
    }
}

impl fmt::Display for TileSizes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N={} C={} H={} W={}", self.n, self.c, self.h, self.w)
    }
}

// ============================================================================
// Memory operations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemOpKind {
    Load,
    Store,
}

impl MemOpKind {
    pub fn name(self) -> &'static str {
        match self {
            MemOpKind::Load => "LOAD",
            MemOpKind::Store => "STORE",
        }
    }
}

/// A load or store of one tensor, hoisted to a loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryOperation {
    pub tensor: TensorRole,
    pub kind: MemOpKind,
    /// Loops from the outermost down to the one holding this operation
    pub outer_loops: Vec<Dimension>,
}

impl MemoryOperation {
    pub fn new(tensor: TensorRole, kind: MemOpKind, outer_loops: &[Dimension]) -> Self {
        MemoryOperation {
            tensor,
            kind,
            outer_loops: outer_loops.to_vec(),
        }
    }
}

impl fmt::Display for MemoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outers: String = self.outer_loops.iter().map(|d| d.label()).collect();
        write!(
            f,
            "({} {} / Outer Loops: {})",
            self.kind.name(),
            self.tensor,
            outers
        )
    }
}

// ============================================================================
// Loop
// ============================================================================

/// One level of the loop nest
#[derive(Debug, Clone)]
pub struct Loop {
    pub dim: Dimension,
    /// Full iteration extent from the layer shape
    pub extent: u64,
    pub mem_ops: Vec<MemoryOperation>,
    repeat_count: Option<Expr>,
}

impl Loop {
    pub fn new(dim: Dimension, extent: u64) -> Self {
        Loop {
            dim,
            extent,
            mem_ops: Vec::new(),
            repeat_count: None,
        }
    }

    /// Set the repeat count: the extent for batch, `extent / tile` otherwise.
    /// No rounding here; fractional counts are legal.
    pub fn bind(&mut self, tiles: &TileVars) {
        let extent = Expr::from(self.extent);
        self.repeat_count = Some(match tiles.for_dim(self.dim) {
            Some(tile) => extent / tile.expr(),
            None => extent,
        });
    }

    pub fn repeat_count(&self) -> Result<&Expr, ObjectiveError> {
        self.repeat_count
            .as_ref()
            .ok_or(ObjectiveError::UnboundLoop(self.dim))
    }

    /// Whether any operation at this loop touches `role`
    pub fn references(&self, role: TensorRole) -> bool {
        self.mem_ops.iter().any(|op| op.tensor == role)
    }
}

impl fmt::Display for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops: Vec<String> = self.mem_ops.iter().map(|op| op.to_string()).collect();
        write!(
            f,
            "{:8} {:<6} [{}]",
            self.dim.name(),
            self.extent,
            ops.join(", ")
        )
    }
}

// ============================================================================
// LoopOrder
// ============================================================================

/// A permutation of the five loops, outermost first, with the descriptors of
/// the tensors its memory operations move
#[derive(Debug, Clone)]
pub struct LoopOrder {
    pub loops: Vec<Loop>,
    pub tensors: Vec<TensorDescriptor>,
}

impl LoopOrder {
    pub fn new(loops: Vec<Loop>) -> Self {
        LoopOrder {
            loops,
            tensors: Vec::new(),
        }
    }

    pub fn dims(&self) -> Vec<Dimension> {
        self.loops.iter().map(|l| l.dim).collect()
    }

    /// Dimension labels outer to inner, e.g. `"BHWIO"`
    pub fn label(&self) -> String {
        self.loops.iter().map(|l| l.dim.label()).collect()
    }

    pub fn tensor(&self, role: TensorRole) -> Option<&TensorDescriptor> {
        self.tensors.iter().find(|t| t.role == role)
    }

    /// Distinct tensors referenced by any memory operation, in placement order
    pub fn referenced_tensors(&self) -> Vec<&TensorDescriptor> {
        let mut roles: Vec<TensorRole> = Vec::new();
        for op in self.loops.iter().flat_map(|l| &l.mem_ops) {
            if !roles.contains(&op.tensor) {
                roles.push(op.tensor);
            }
        }
        roles.into_iter().filter_map(|r| self.tensor(r)).collect()
    }

    /// Index of the loop holding the operations of `role`
    pub fn placement_of(&self, role: TensorRole) -> Option<usize> {
        self.loops.iter().position(|l| l.references(role))
    }
}

impl fmt::Display for LoopOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for lp in &self.loops {
            writeln!(f, "{}", lp)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::SolverConfig;

    #[test]
    fn test_repeat_count_binding() {
        let mut session = SolverSession::new(SolverConfig::default());
        let tiles = TileVars::declare(&mut session).unwrap();
        let sizes = TileSizes {
            n: 3,
            c: 4,
            h: 2,
            w: 5,
        };

        let mut batch = Loop::new(Dimension::Batch, 6);
        let mut height = Loop::new(Dimension::Height, 7);
        assert!(matches!(
            height.repeat_count(),
            Err(ObjectiveError::UnboundLoop(Dimension::Height))
        ));
        batch.bind(&tiles);
        height.bind(&tiles);

        let assignment = tiles.assignment(&sizes);
        let b = session.evaluate(batch.repeat_count().unwrap(), &assignment).unwrap();
        let h = session.evaluate(height.repeat_count().unwrap(), &assignment).unwrap();
        assert_eq!(b, 6.0);
        assert_eq!(h, 3.5);
    }

    #[test]
    fn test_mem_op_rendering() {
        let op = MemoryOperation::new(
            TensorRole::Weight,
            MemOpKind::Load,
            &[Dimension::OutChan, Dimension::InChan],
        );
        assert_eq!(op.to_string(), "(LOAD Weight / Outer Loops: OI)");
    }

    #[test]
    fn test_tile_sizes_from_values() {
        let values: BTreeMap<String, i64> =
            [("N", 2), ("C", 3), ("H", 4), ("W", 5), ("ceil_0", 7)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
        let sizes = TileSizes::from_values(&values).unwrap();
        assert_eq!(sizes.to_string(), "N=2 C=3 H=4 W=5");
        assert!(TileSizes::from_values(&BTreeMap::new()).is_none());
    }

    #[test]
    fn test_declared_names_read_back() {
        let mut session = SolverSession::new(SolverConfig::default());
        let tiles = TileVars::declare(&mut session).unwrap();
        let declared: Vec<&str> = [tiles.n, tiles.c, tiles.h, tiles.w]
            .iter()
            .map(|v| v.name())
            .collect();
        assert_eq!(declared, TileVars::NAMES);

        let values: BTreeMap<String, i64> = declared
            .iter()
            .zip([6, 7, 8, 9])
            .map(|(name, v)| (name.to_string(), v))
            .collect();
        let sizes = TileSizes::from_values(&values).unwrap();
        assert_eq!(
            sizes,
            TileSizes {
                n: 6,
                c: 7,
                h: 8,
                w: 9,
            }
        );
        assert!(TileVars::declare(&mut session).is_err());
    }
}
