//! Finite-domain CSP backend
//!
//! The solver contract is deliberately small: given variables, ordered
//! finite domains and opaque predicates, enumerate every satisfying
//! assignment in a deterministic order. The default implementation is
//! chronological backtracking with forward checking; swap it through
//! [`crate::RandCore::set_solver`] for anything stronger.

use crate::error::{CrvError, Result};
use indexmap::IndexMap;
use tracing::debug;
use vigil_coverage::SampleValue;

/// A (partial) assignment of values to variables.
pub type Assignment = IndexMap<String, SampleValue>;

/// A predicate with every non-solver parameter already bound.
pub struct BoundPredicate {
    vars: Vec<String>,
    label: String,
    pred: Box<dyn Fn(&Assignment) -> bool>,
}

impl BoundPredicate {
    pub fn new(
        vars: Vec<String>,
        label: impl Into<String>,
        pred: impl Fn(&Assignment) -> bool + 'static,
    ) -> Self {
        Self {
            vars,
            label: label.into(),
            pred: Box::new(pred),
        }
    }

    /// Solver variables this predicate reads.
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn eval(&self, assignment: &Assignment) -> bool {
        (self.pred)(assignment)
    }
}

pub trait CspSolver {
    /// Enumerate every assignment over `vars` satisfying all predicates.
    ///
    /// Enumeration follows the given variable order and each domain's value
    /// order, so results are reproducible. An empty result means the
    /// problem is unsatisfiable.
    fn solve(
        &self,
        vars: &[String],
        domains: &IndexMap<String, Vec<SampleValue>>,
        predicates: &[BoundPredicate],
    ) -> Result<Vec<Assignment>>;
}

/// Chronological backtracking with forward checking.
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktrackSolver;

impl CspSolver for BacktrackSolver {
    fn solve(
        &self,
        vars: &[String],
        domains: &IndexMap<String, Vec<SampleValue>>,
        predicates: &[BoundPredicate],
    ) -> Result<Vec<Assignment>> {
        let mut live: Vec<Vec<SampleValue>> = Vec::with_capacity(vars.len());
        for var in vars {
            let domain = domains
                .get(var)
                .ok_or_else(|| CrvError::UnknownVariable(var.clone()))?;
            live.push(domain.clone());
        }

        let mut search = Search {
            vars,
            predicates,
            out: Vec::new(),
        };
        let mut partial = Assignment::new();
        search.run(0, &mut live, &mut partial);

        debug!(
            vars = vars.len(),
            solutions = search.out.len(),
            "csp enumeration complete"
        );
        Ok(search.out)
    }
}

struct Search<'a> {
    vars: &'a [String],
    predicates: &'a [BoundPredicate],
    out: Vec<Assignment>,
}

impl Search<'_> {
    fn run(&mut self, depth: usize, live: &mut Vec<Vec<SampleValue>>, partial: &mut Assignment) {
        if depth == self.vars.len() {
            self.out.push(partial.clone());
            return;
        }
        let var = &self.vars[depth];
        let candidates = live[depth].clone();
        for value in candidates {
            partial.insert(var.clone(), value);
            if self.consistent(var, partial) {
                let saved = self.forward_check(depth, live, partial);
                let feasible = live[depth + 1..].iter().all(|d| !d.is_empty());
                if feasible {
                    self.run(depth + 1, live, partial);
                }
                for (idx, domain) in saved {
                    live[idx] = domain;
                }
            }
            partial.pop();
        }
    }

    /// Check every predicate that reads `var` and is fully assigned.
    fn consistent(&self, var: &String, partial: &Assignment) -> bool {
        self.predicates.iter().all(|p| {
            !p.vars().contains(var)
                || !p.vars().iter().all(|v| partial.contains_key(v))
                || p.eval(partial)
        })
    }

    /// Prune future domains through predicates with exactly one unassigned
    /// variable. Returns the domains replaced, for restoration.
    fn forward_check(
        &self,
        depth: usize,
        live: &mut Vec<Vec<SampleValue>>,
        partial: &Assignment,
    ) -> Vec<(usize, Vec<SampleValue>)> {
        let mut saved = Vec::new();
        for pred in self.predicates {
            let mut unassigned = pred
                .vars()
                .iter()
                .filter(|v| !partial.contains_key(*v));
            let target = match (unassigned.next(), unassigned.next()) {
                (Some(v), None) => v,
                _ => continue,
            };
            let Some(idx) = self.vars.iter().position(|v| v == target) else {
                continue;
            };
            if idx <= depth {
                continue;
            }

            let mut scratch = partial.clone();
            let pruned: Vec<SampleValue> = live[idx]
                .iter()
                .filter(|value| {
                    scratch.insert(target.clone(), (*value).clone());
                    let ok = pred.eval(&scratch);
                    scratch.pop();
                    ok
                })
                .cloned()
                .collect();
            if pruned.len() != live[idx].len() {
                saved.push((idx, std::mem::replace(&mut live[idx], pruned)));
            }
        }
        saved
    }
}
