//! Interval arithmetic and compiled expression programs
//!
//! The branch-and-bound search evaluates the same expressions millions of
//! times, both at integer points and over integer boxes. Expressions are
//! compiled once into a flat [`Program`] whose variables are slot indices,
//! then evaluated with `f64` (points) or [`Interval`] (boxes).
//!
//! Interval results are outer approximations: every point of the box maps
//! into the returned interval, so pruning on them never discards a feasible
//! optimum.

use egg::Symbol;
use std::collections::HashMap;

use super::expr::{Expr, TileExpr};
use super::SolveError;

// ============================================================================
// Interval
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub lo: f64,
    pub hi: f64,
}

impl Interval {
    pub const ENTIRE: Interval = Interval {
        lo: f64::NEG_INFINITY,
        hi: f64::INFINITY,
    };

    pub fn new(lo: f64, hi: f64) -> Self {
        Interval { lo, hi }
    }

    pub fn point(value: f64) -> Self {
        Interval {
            lo: value,
            hi: value,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lo <= value && value <= self.hi
    }

    pub fn add(self, rhs: Interval) -> Interval {
        Interval::new(self.lo + rhs.lo, self.hi + rhs.hi)
    }

    pub fn sub(self, rhs: Interval) -> Interval {
        Interval::new(self.lo - rhs.hi, self.hi - rhs.lo)
    }

    pub fn mul(self, rhs: Interval) -> Interval {
        let products = [
            mul_bound(self.lo, rhs.lo),
            mul_bound(self.lo, rhs.hi),
            mul_bound(self.hi, rhs.lo),
            mul_bound(self.hi, rhs.hi),
        ];
        let lo = products.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = products.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Interval::new(lo, hi)
    }

    pub fn div(self, rhs: Interval) -> Interval {
        if rhs.contains(0.0) {
            return Interval::ENTIRE;
        }
        self.mul(Interval::new(1.0 / rhs.hi, 1.0 / rhs.lo))
    }

    pub fn ceil(self) -> Interval {
        Interval::new(self.lo.ceil(), self.hi.ceil())
    }

    fn sanitize(self) -> Interval {
        if self.lo.is_nan() || self.hi.is_nan() {
            Interval::ENTIRE
        } else {
            self
        }
    }
}

/// Endpoint product with `0 * inf = 0`
fn mul_bound(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}

// ============================================================================
// Program
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Op {
    Const(f64),
    Slot(usize),
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
}

/// An expression compiled against a variable-slot table
#[derive(Debug, Clone)]
pub struct Program {
    ops: Vec<Op>,
}

impl Program {
    pub fn compile(expr: &Expr, slots: &HashMap<Symbol, usize>) -> Result<Program, SolveError> {
        let ops = expr
            .nodes()
            .iter()
            .map(|node| {
                Ok(match node {
                    TileExpr::Num(c) => Op::Const(c.0),
                    TileExpr::Var(name) => match slots.get(name) {
                        Some(slot) => Op::Slot(*slot),
                        None => {
                            return Err(SolveError::InvalidModel(format!(
                                "unknown variable '{}'",
                                name
                            )))
                        }
                    },
                    TileExpr::Add([a, b]) => Op::Add(usize::from(*a), usize::from(*b)),
                    TileExpr::Sub([a, b]) => Op::Sub(usize::from(*a), usize::from(*b)),
                    TileExpr::Mul([a, b]) => Op::Mul(usize::from(*a), usize::from(*b)),
                    TileExpr::Div([a, b]) => Op::Div(usize::from(*a), usize::from(*b)),
                })
            })
            .collect::<Result<Vec<_>, SolveError>>()?;
        Ok(Program { ops })
    }

    pub fn eval(&self, values: &[f64], scratch: &mut Vec<f64>) -> f64 {
        scratch.clear();
        for op in &self.ops {
            let v = match *op {
                Op::Const(c) => c,
                Op::Slot(s) => values[s],
                Op::Add(a, b) => scratch[a] + scratch[b],
                Op::Sub(a, b) => scratch[a] - scratch[b],
                Op::Mul(a, b) => scratch[a] * scratch[b],
                Op::Div(a, b) => scratch[a] / scratch[b],
            };
            scratch.push(v);
        }
        scratch.last().copied().unwrap_or(f64::NAN)
    }

    pub fn eval_interval(&self, bounds: &[Interval], scratch: &mut Vec<Interval>) -> Interval {
        scratch.clear();
        for op in &self.ops {
            let v = match *op {
                Op::Const(c) => Interval::point(c),
                Op::Slot(s) => bounds[s],
                Op::Add(a, b) => scratch[a].add(scratch[b]),
                Op::Sub(a, b) => scratch[a].sub(scratch[b]),
                Op::Mul(a, b) => scratch[a].mul(scratch[b]),
                Op::Div(a, b) => scratch[a].div(scratch[b]),
            };
            scratch.push(v.sanitize());
        }
        scratch.last().copied().unwrap_or(Interval::ENTIRE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_ops() {
        let a = Interval::new(1.0, 4.0);
        let b = Interval::new(2.0, 8.0);
        assert_eq!(a.add(b), Interval::new(3.0, 12.0));
        assert_eq!(a.sub(b), Interval::new(-7.0, 2.0));
        assert_eq!(a.mul(b), Interval::new(2.0, 32.0));
        assert_eq!(b.div(a), Interval::new(0.5, 8.0));
        assert_eq!(Interval::new(1.2, 3.5).ceil(), Interval::new(2.0, 4.0));
        assert_eq!(a.div(Interval::new(-1.0, 1.0)), Interval::ENTIRE);
        assert_eq!(
            Interval::point(0.0).mul(Interval::ENTIRE),
            Interval::point(0.0)
        );
    }

    #[test]
    fn test_program_point_and_interval() {
        let n = Symbol::from("N");
        let h = Symbol::from("H");
        let slots: HashMap<Symbol, usize> = [(n, 0), (h, 1)].into_iter().collect();
        let expr = Expr::symbol(n) * (Expr::symbol(h) + 2.0) / 4.0;
        let program = Program::compile(&expr, &slots).unwrap();

        let mut scratch = Vec::new();
        assert_eq!(program.eval(&[2.0, 6.0], &mut scratch), 4.0);

        let mut iscratch = Vec::new();
        let range = program.eval_interval(
            &[Interval::new(1.0, 2.0), Interval::new(2.0, 6.0)],
            &mut iscratch,
        );
        assert_eq!(range, Interval::new(1.0, 4.0));
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let expr = Expr::symbol(Symbol::from("Q")) + 1.0;
        let result = Program::compile(&expr, &HashMap::new());
        assert!(matches!(result, Err(SolveError::InvalidModel(_))));
    }
}
