//! Symbolic expressions over solver variables
//!
//! Tile sizes are unknown until the solver runs, so every formula that
//! involves them (tiled tensor sizes, repeat counts, access counts, the
//! objective) is built as an expression tree instead of being evaluated.
//! Expressions are egg [`RecExpr`]s over the small [`TileExpr`] language:
//!
//! ```text
//! (* C (* (+ (* 1 H) 2) (+ (* 1 W) 2)))     input tile with stride 1, kernel 3
//! ```
//!
//! Two things happen eagerly while building:
//! - constant sub-expressions fold (`2 * 3` becomes `6`)
//! - nothing else; algebraic clean-up (`* 1`, `+ 0`, ...) is left to
//!   [`Expr::simplify`], which runs an egg rewrite pass before an expression is
//!   compiled for the branch-and-bound search.

use egg::{
    define_language, rewrite as rw, AstSize, Extractor, Id, Language, RecExpr, Rewrite, Runner,
    Symbol,
};
use lazy_static::lazy_static;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

// ============================================================================
// Language
// ============================================================================

/// Floating-point literal usable as an e-graph leaf
///
/// Equality and hashing are bitwise so that `Eq`, `Ord` and `Hash` agree.
#[derive(Debug, Clone, Copy)]
pub struct Constant(pub f64);

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Constant {}

impl PartialOrd for Constant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Constant {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl FromStr for Constant {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<f64>().map(Constant)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

define_language! {
    pub enum TileExpr {
        "+" = Add([Id; 2]),
        "-" = Sub([Id; 2]),
        "*" = Mul([Id; 2]),
        "/" = Div([Id; 2]),
        Num(Constant),
        Var(Symbol),
    }
}

lazy_static! {
    static ref IDENTITY_RULES: Vec<Rewrite<TileExpr, ()>> = vec![
        rw!("mul-one-r"; "(* ?a 1)" => "?a"),
        rw!("mul-one-l"; "(* 1 ?a)" => "?a"),
        rw!("div-one"; "(/ ?a 1)" => "?a"),
        rw!("add-zero-r"; "(+ ?a 0)" => "?a"),
        rw!("add-zero-l"; "(+ 0 ?a)" => "?a"),
        rw!("sub-zero"; "(- ?a 0)" => "?a"),
    ];
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
        }
    }

    fn node(self, children: [Id; 2]) -> TileExpr {
        match self {
            BinOp::Add => TileExpr::Add(children),
            BinOp::Sub => TileExpr::Sub(children),
            BinOp::Mul => TileExpr::Mul(children),
            BinOp::Div => TileExpr::Div(children),
        }
    }
}

// ============================================================================
// Expr
// ============================================================================

/// An owned symbolic expression; the root is the last node
#[derive(Debug, Clone)]
pub struct Expr {
    rec: RecExpr<TileExpr>,
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        let mut rec = RecExpr::default();
        rec.add(TileExpr::Num(Constant(value)));
        Expr { rec }
    }

    pub(crate) fn symbol(name: Symbol) -> Self {
        let mut rec = RecExpr::default();
        rec.add(TileExpr::Var(name));
        Expr { rec }
    }

    pub fn nodes(&self) -> &[TileExpr] {
        self.rec.as_ref()
    }

    pub fn as_constant(&self) -> Option<f64> {
        match self.nodes() {
            [TileExpr::Num(c)] => Some(c.0),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self.nodes() {
            [TileExpr::Var(s)] => Some(*s),
            _ => None,
        }
    }

    /// Distinct variable names referenced by the expression
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut out: Vec<Symbol> = Vec::new();
        for node in self.nodes() {
            if let TileExpr::Var(s) = node {
                if !out.contains(s) {
                    out.push(*s);
                }
            }
        }
        out
    }

    /// Remove algebraic identities with a short equality-saturation run and
    /// extract the smallest equivalent expression
    pub fn simplify(&self) -> Expr {
        if self.nodes().len() <= 1 {
            return self.clone();
        }
        let runner = Runner::<TileExpr, ()>::default()
            .with_iter_limit(8)
            .with_node_limit(10_000)
            .with_expr(&self.rec)
            .run(IDENTITY_RULES.iter());
        let extractor = Extractor::new(&runner.egraph, AstSize);
        let (_, best) = extractor.find_best(runner.roots[0]);
        Expr { rec: best }
    }

    fn combine(self, rhs: Expr, op: BinOp) -> Expr {
        if let (Some(a), Some(b)) = (self.as_constant(), rhs.as_constant()) {
            return Expr::constant(op.apply(a, b));
        }
        let mut rec = self.rec;
        let offset = rec.as_ref().len();
        let lhs_root = Id::from(offset - 1);
        for node in rhs.rec.as_ref() {
            rec.add(
                node.clone()
                    .map_children(|id| Id::from(usize::from(id) + offset)),
            );
        }
        let rhs_root = Id::from(rec.as_ref().len() - 1);
        rec.add(op.node([lhs_root, rhs_root]));
        Expr { rec }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rec)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::constant(value)
    }
}

impl From<u64> for Expr {
    fn from(value: u64) -> Self {
        Expr::constant(value as f64)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                self.combine(rhs, $op)
            }
        }

        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                self.clone().combine(rhs.clone(), $op)
            }
        }

        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                self.combine(Expr::constant(rhs), $op)
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::constant(self).combine(rhs, $op)
            }
        }
    };
}

impl_binary_op!(Add, add, BinOp::Add);
impl_binary_op!(Sub, sub, BinOp::Sub);
impl_binary_op!(Mul, mul, BinOp::Mul);
impl_binary_op!(Div, div, BinOp::Div);

impl std::iter::Sum for Expr {
    fn sum<I: Iterator<Item = Expr>>(iter: I) -> Expr {
        iter.reduce(|acc, e| acc + e)
            .unwrap_or_else(|| Expr::constant(0.0))
    }
}

impl std::iter::Product for Expr {
    fn product<I: Iterator<Item = Expr>>(iter: I) -> Expr {
        iter.reduce(|acc, e| acc * e)
            .unwrap_or_else(|| Expr::constant(1.0))
    }
}
