//! Solver session: variables, constraints, objective and `solve()`

use egg::Symbol;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use super::branch_bound::{self, Problem};
use super::interval::{Interval, Program};
use super::{Expr, SolveError, SolverConfig};

// ============================================================================
// Variables and constraints
// ============================================================================

/// Handle to an integer variable of one session
///
/// Names are session-local: a handle must only be used with the session that
/// created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var {
    index: usize,
    name: Symbol,
}

impl Var {
    pub fn name(&self) -> &'static str {
        self.name.as_str()
    }

    pub fn expr(self) -> Expr {
        Expr::symbol(self.name)
    }
}

impl From<Var> for Expr {
    fn from(var: Var) -> Self {
        var.expr()
    }
}

#[derive(Debug, Clone)]
enum VarKind {
    Decision,
    /// Auxiliary variable equal to the ceiling of its definition
    Ceil(Expr),
}

#[derive(Debug, Clone)]
struct Variable {
    name: Symbol,
    lower: i64,
    initial: i64,
    kind: VarKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    LessEq,
    Less,
    GreaterEq,
    Equal,
}

impl Relation {
    pub fn symbol(self) -> &'static str {
        match self {
            Relation::LessEq => "<=",
            Relation::Less => "<",
            Relation::GreaterEq => ">=",
            Relation::Equal => "==",
        }
    }

    /// Check `value REL 0`
    pub(crate) fn holds(self, value: f64, tolerance: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self {
            Relation::LessEq => value <= tolerance,
            Relation::Less => value < 0.0,
            Relation::GreaterEq => value >= -tolerance,
            Relation::Equal => value.abs() <= tolerance,
        }
    }

    /// True when no value of `range` can satisfy `value REL 0`
    pub(crate) fn certainly_violated(self, range: Interval, tolerance: f64) -> bool {
        match self {
            Relation::LessEq => range.lo > tolerance,
            Relation::Less => range.lo >= tolerance,
            Relation::GreaterEq => range.hi < -tolerance,
            Relation::Equal => range.lo > tolerance || range.hi < -tolerance,
        }
    }
}

/// `lhs REL rhs`
#[derive(Debug, Clone)]
pub struct Constraint {
    pub lhs: Expr,
    pub relation: Relation,
    pub rhs: Expr,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.relation.symbol(), self.rhs)
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    /// Branch-and-bound boxes expanded
    pub nodes: usize,
    pub elapsed: Duration,
}

/// Optimal assignment found by [`SolverSession::solve`]
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub objective: f64,
    /// Every variable (decision and auxiliary) by name
    pub values: BTreeMap<String, i64>,
    pub stats: SolveStats,
}

impl SolveOutcome {
    pub fn value(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }
}

// ============================================================================
// Session
// ============================================================================

/// One independent optimization model
#[derive(Debug)]
pub struct SolverSession {
    config: SolverConfig,
    variables: Vec<Variable>,
    slots: HashMap<Symbol, usize>,
    constraints: Vec<Constraint>,
    objective: Option<Expr>,
    ceil_count: usize,
}

impl SolverSession {
    pub fn new(config: SolverConfig) -> Self {
        SolverSession {
            config,
            variables: Vec::new(),
            slots: HashMap::new(),
            constraints: Vec::new(),
            objective: None,
            ceil_count: 0,
        }
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> Option<&Expr> {
        self.objective.as_ref()
    }

    /// Number of variables, auxiliary ones included
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Declare an integer decision variable `>= lower` starting at `initial`
    pub fn add_integer_var(
        &mut self,
        name: &str,
        lower: i64,
        initial: i64,
    ) -> Result<Var, SolveError> {
        if initial < lower {
            return Err(SolveError::InvalidModel(format!(
                "initial value {} of '{}' is below its lower bound {}",
                initial, name, lower
            )));
        }
        self.push_variable(name, lower, initial, VarKind::Decision)
    }

    pub fn add_constraint(
        &mut self,
        lhs: impl Into<Expr>,
        relation: Relation,
        rhs: impl Into<Expr>,
    ) -> Result<(), SolveError> {
        let (lhs, rhs) = (lhs.into(), rhs.into());
        self.check_symbols(&lhs)?;
        self.check_symbols(&rhs)?;
        self.constraints.push(Constraint { lhs, relation, rhs });
        Ok(())
    }

    /// Register the single objective to minimize
    pub fn minimize(&mut self, expr: impl Into<Expr>) -> Result<(), SolveError> {
        if self.objective.is_some() {
            return Err(SolveError::InvalidModel(
                "an objective is already registered".to_string(),
            ));
        }
        let expr = expr.into();
        self.check_symbols(&expr)?;
        self.objective = Some(expr);
        Ok(())
    }

    /// New integer variable `v` with `v >= expr` and `v < expr + 1`
    pub fn ceil(&mut self, expr: impl Into<Expr>) -> Result<Var, SolveError> {
        let expr = expr.into();
        self.check_symbols(&expr)?;
        let name = format!("ceil_{}", self.ceil_count);
        self.ceil_count += 1;
        let var = self.push_variable(&name, i64::MIN, 0, VarKind::Ceil(expr.clone()))?;
        self.add_constraint(var, Relation::GreaterEq, expr.clone())?;
        self.add_constraint(var, Relation::Less, expr + 1.0)?;
        Ok(var)
    }

    /// Evaluate `expr` at a decision-variable assignment; auxiliary variables
    /// are derived from their definitions
    pub fn evaluate(&self, expr: &Expr, assignment: &[(Var, i64)]) -> Result<f64, SolveError> {
        let mut values = vec![f64::NAN; self.variables.len()];
        for (var, value) in assignment {
            values[self.slot_of(*var)?] = *value as f64;
        }
        let mut scratch = Vec::new();
        for (slot, variable) in self.variables.iter().enumerate() {
            match &variable.kind {
                VarKind::Decision if values[slot].is_nan() => {
                    return Err(SolveError::InvalidModel(format!(
                        "no value given for '{}'",
                        variable.name
                    )));
                }
                VarKind::Decision => {}
                VarKind::Ceil(def) => {
                    let program = Program::compile(def, &self.slots)?;
                    values[slot] = program.eval(&values, &mut scratch).ceil();
                }
            }
        }
        Ok(Program::compile(expr, &self.slots)?.eval(&values, &mut scratch))
    }

    /// Find the assignment minimizing the objective
    pub fn solve(&self) -> Result<SolveOutcome, SolveError> {
        let start = Instant::now();
        let problem = self.build_problem()?;
        log::debug!(
            "Solving model with {} decision / {} total variables, {} constraints",
            problem.decision.len(),
            problem.slot_count,
            problem.constraints.len()
        );

        let found = branch_bound::minimize(&problem, &self.config, start)?;
        let full = problem.assignment(&found.point);
        let values = self
            .variables
            .iter()
            .zip(full.iter())
            .map(|(v, value)| (v.name.to_string(), value.round() as i64))
            .collect();

        let stats = SolveStats {
            nodes: found.nodes,
            elapsed: start.elapsed(),
        };
        log::debug!(
            "Solved: objective = {:.2}, {} nodes in {:?}",
            found.objective,
            stats.nodes,
            stats.elapsed
        );
        Ok(SolveOutcome {
            objective: found.objective,
            values,
            stats,
        })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn push_variable(
        &mut self,
        name: &str,
        lower: i64,
        initial: i64,
        kind: VarKind,
    ) -> Result<Var, SolveError> {
        let symbol = Symbol::from(name);
        if self.slots.contains_key(&symbol) {
            return Err(SolveError::InvalidModel(format!(
                "variable '{}' declared twice",
                name
            )));
        }
        let index = self.variables.len();
        self.variables.push(Variable {
            name: symbol,
            lower,
            initial,
            kind,
        });
        self.slots.insert(symbol, index);
        Ok(Var {
            index,
            name: symbol,
        })
    }

    fn slot_of(&self, var: Var) -> Result<usize, SolveError> {
        match self.slots.get(&var.name) {
            Some(&slot) if slot == var.index => Ok(slot),
            _ => Err(SolveError::InvalidModel(format!(
                "variable '{}' does not belong to this session",
                var.name()
            ))),
        }
    }

    fn check_symbols(&self, expr: &Expr) -> Result<(), SolveError> {
        for symbol in expr.symbols() {
            if !self.slots.contains_key(&symbol) {
                return Err(SolveError::InvalidModel(format!(
                    "unknown variable '{}'",
                    symbol
                )));
            }
        }
        Ok(())
    }

    fn prepare(&self, expr: &Expr) -> Expr {
        if self.config.simplify {
            expr.simplify()
        } else {
            expr.clone()
        }
    }

    /// Compile the model and tighten decision bounds from `var <= c` style
    /// constraints
    fn build_problem(&self) -> Result<Problem, SolveError> {
        let objective = self.objective.as_ref().ok_or(SolveError::NoObjective)?;

        let mut lower: Vec<i64> = self.variables.iter().map(|v| v.lower).collect();
        let mut upper: Vec<Option<i64>> = vec![None; self.variables.len()];
        for constraint in &self.constraints {
            let Some(symbol) = constraint.lhs.as_symbol() else {
                continue;
            };
            let Some(bound) = constraint.rhs.as_constant() else {
                continue;
            };
            let slot = self.slots[&symbol];
            if !matches!(self.variables[slot].kind, VarKind::Decision) {
                continue;
            }
            let tighten_upper = |current: Option<i64>, value: i64| {
                Some(current.map_or(value, |u| u.min(value)))
            };
            match constraint.relation {
                Relation::LessEq => upper[slot] = tighten_upper(upper[slot], bound.floor() as i64),
                Relation::Less => upper[slot] = tighten_upper(upper[slot], bound.ceil() as i64 - 1),
                Relation::GreaterEq => lower[slot] = lower[slot].max(bound.ceil() as i64),
                Relation::Equal => {
                    upper[slot] = tighten_upper(upper[slot], bound.floor() as i64);
                    lower[slot] = lower[slot].max(bound.ceil() as i64);
                }
            }
        }

        let mut decision = Vec::new();
        let mut aux = Vec::new();
        let (mut lows, mut highs, mut initial) = (Vec::new(), Vec::new(), Vec::new());
        for (slot, variable) in self.variables.iter().enumerate() {
            match &variable.kind {
                VarKind::Decision => {
                    let hi = upper[slot]
                        .ok_or_else(|| SolveError::Unbounded(variable.name.to_string()))?;
                    let lo = lower[slot];
                    if lo > hi {
                        log::debug!(
                            "Variable '{}' has empty domain [{}, {}]",
                            variable.name,
                            lo,
                            hi
                        );
                        return Err(SolveError::Infeasible);
                    }
                    decision.push(slot);
                    lows.push(lo);
                    highs.push(hi);
                    initial.push(variable.initial.clamp(lo, hi));
                }
                VarKind::Ceil(def) => {
                    aux.push((slot, Program::compile(&self.prepare(def), &self.slots)?));
                }
            }
        }

        let constraints = self
            .constraints
            .iter()
            .map(|c| {
                let residual = self.prepare(&(&c.lhs - &c.rhs));
                Ok((Program::compile(&residual, &self.slots)?, c.relation))
            })
            .collect::<Result<Vec<_>, SolveError>>()?;

        Ok(Problem {
            slot_count: self.variables.len(),
            decision,
            lower: lows,
            upper: highs,
            initial,
            aux,
            constraints,
            objective: Program::compile(&self.prepare(objective), &self.slots)?,
            tolerance: self.config.feasibility_tolerance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SolverSession {
        SolverSession::new(SolverConfig::default())
    }

    #[test]
    fn test_duplicate_and_unknown_variables() {
        let mut s = session();
        s.add_integer_var("N", 1, 1).unwrap();
        assert!(matches!(
            s.add_integer_var("N", 1, 1),
            Err(SolveError::InvalidModel(_))
        ));

        let mut other = session();
        let foreign = other.add_integer_var("Q", 1, 1).unwrap();
        assert!(s.minimize(foreign).is_err());
    }

    #[test]
    fn test_ceil_registers_bracketing_constraints() {
        let mut s = session();
        let n = s.add_integer_var("N", 1, 1).unwrap();
        let c = s.ceil(10.0 / n.expr()).unwrap();
        assert_eq!(c.name(), "ceil_0");
        assert_eq!(s.constraints().len(), 2);
        assert_eq!(s.evaluate(&c.expr(), &[(n, 3)]).unwrap(), 4.0);
        assert_eq!(s.evaluate(&c.expr(), &[(n, 5)]).unwrap(), 2.0);
    }

    #[test]
    fn test_solve_simple_model() {
        // minimize ceil(10 / N) * 3 + N, N in [1, 10]
        let mut s = session();
        let n = s.add_integer_var("N", 1, 1).unwrap();
        s.add_constraint(n, Relation::LessEq, 10.0).unwrap();
        let c = s.ceil(10.0 / n.expr()).unwrap();
        s.minimize(c.expr() * 3.0 + n.expr()).unwrap();

        let outcome = s.solve().unwrap();
        // N=4 -> 3*3+4 = 13, N=5 -> 2*3+5 = 11, N=10 -> 3+10 = 13
        assert_eq!(outcome.objective, 11.0);
        assert_eq!(outcome.value("N"), Some(5));
        assert_eq!(outcome.value("ceil_0"), Some(2));
    }

    #[test]
    fn test_solve_reports_infeasible_and_unbounded() {
        let mut s = session();
        let n = s.add_integer_var("N", 1, 1).unwrap();
        s.add_constraint(n, Relation::LessEq, 8.0).unwrap();
        s.add_constraint(n.expr() * n.expr(), Relation::LessEq, 0.5).unwrap();
        s.minimize(n).unwrap();
        assert_eq!(s.solve(), Err(SolveError::Infeasible));

        let mut s = session();
        let n = s.add_integer_var("N", 1, 1).unwrap();
        s.minimize(n).unwrap();
        assert_eq!(s.solve(), Err(SolveError::Unbounded("N".to_string())));

        let s = session();
        assert_eq!(s.solve(), Err(SolveError::NoObjective));
    }
}
