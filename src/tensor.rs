//! Tensor descriptors and tiled-size formulas
//!
//! For a tile assignment `(N, C, H, W)` (output-channel, input-channel,
//! height, width tiles), stride `s` and kernel `k`:
//!
//! ```text
//! Input   C * (s*H + k - s) * (s*W + k - s)     halo included
//! Output  N * H * W
//! Weight  N * C * k^2
//! ```
//!
//! Batch is never tiled.

use crate::dimension::TensorRole;
use crate::loop_nest::{TileSizes, TileVars};
use crate::objective::ObjectiveError;
use crate::param::Param;
use crate::solver::Expr;

/// One tensor of one optimization run
#[derive(Debug, Clone)]
pub struct TensorDescriptor {
    pub role: TensorRole,
    tiled_size: Option<Expr>,
}

impl TensorDescriptor {
    pub fn new(role: TensorRole) -> Self {
        TensorDescriptor {
            role,
            tiled_size: None,
        }
    }

    /// Recompute the tiled size for a (new) tile assignment
    pub fn bind(&mut self, tiles: &TileVars, param: &Param) {
        self.tiled_size = Some(tiled_size_expr(self.role, tiles, param));
    }

    pub fn tiled_size(&self) -> Result<&Expr, ObjectiveError> {
        self.tiled_size
            .as_ref()
            .ok_or(ObjectiveError::UnboundTensor(self.role))
    }
}

/// Symbolic tiled size of `role`
pub fn tiled_size_expr(role: TensorRole, tiles: &TileVars, param: &Param) -> Expr {
    let s = param.op.stride as f64;
    let k = param.op.kernel as f64;
    match role {
        TensorRole::Input => {
            tiles.c.expr() * (s * tiles.h.expr() + (k - s)) * (s * tiles.w.expr() + (k - s))
        }
        TensorRole::Output => tiles.n.expr() * tiles.h.expr() * tiles.w.expr(),
        TensorRole::Weight => tiles.n.expr() * tiles.c.expr() * (k * k),
    }
}

/// Concrete tiled size of `role` for solved tile sizes
pub fn tiled_size(role: TensorRole, tiles: &TileSizes, param: &Param) -> u64 {
    let s = param.op.stride;
    let k = param.op.kernel;
    match role {
        TensorRole::Input => tiles.c * (s * tiles.h + k - s) * (s * tiles.w + k - s),
        TensorRole::Output => tiles.n * tiles.h * tiles.w,
        TensorRole::Weight => tiles.n * tiles.c * k * k,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{SolverConfig, SolverSession};

    #[test]
    fn test_symbolic_matches_concrete() {
        let param = Param::default(); // kernel 3, stride 1
        let mut session = SolverSession::new(SolverConfig::default());
        let tiles = TileVars::declare(&mut session).unwrap();
        let point = TileSizes {
            n: 4,
            c: 2,
            h: 5,
            w: 7,
        };
        let assignment = tiles.assignment(&point);

        for role in TensorRole::ALL {
            let mut descriptor = TensorDescriptor::new(role);
            assert!(descriptor.tiled_size().is_err());
            descriptor.bind(&tiles, &param);
            let symbolic = session
                .evaluate(descriptor.tiled_size().unwrap(), &assignment)
                .unwrap();
            assert_eq!(symbolic, tiled_size(role, &point, &param) as f64);
        }
        assert_eq!(tiled_size(TensorRole::Input, &point, &param), 2 * 7 * 9);
    }

    #[test]
    fn test_strided_input_halo() {
        let mut param = Param::default();
        param.op.stride = 2;
        param.op.kernel = 3;
        let point = TileSizes {
            n: 1,
            c: 1,
            h: 4,
            w: 4,
        };
        // 2*4 + 3 - 2 = 9 rows and columns
        assert_eq!(tiled_size(TensorRole::Input, &point, &param), 81);
    }
}
