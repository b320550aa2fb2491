//! Randomized objects
//!
//! [`RandCore`] hosts the random variables, constraints and solver state of
//! one randomizable object; the [`Randomized`] trait layers the public
//! `randomize`/`randomize_with` operations and the user hooks over it.
//!
//! Solving runs in stages. `solve_order` groups are resolved first, in
//! declared order; variables not reserved for a later group and not tied to
//! others by a multi-variable constraint are pulled into the earliest
//! stage; whatever remains forms a final stage. Within a stage,
//! single-variable hard constraints narrow domains, multi-variable hard
//! constraints go to the CSP backend, and distributions weight the choice
//! among the surviving assignments. Values are written back only after
//! every stage solved.

use crate::constraint::Constraint;
use crate::error::{CrvError, Result};
use crate::solver::{Assignment, BacktrackSolver, BoundPredicate, CspSolver};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use tracing::debug;
use vigil_coverage::SampleValue;

pub struct RandCore {
    /// Current value of every object variable, random or not
    values: IndexMap<String, SampleValue>,
    /// Random variable -> ordered finite domain
    domains: IndexMap<String, Vec<SampleValue>>,
    hard: Vec<Constraint>,
    dists: Vec<Constraint>,
    solve_order: Vec<Vec<String>>,
    rng: StdRng,
    solver: Box<dyn CspSolver>,
}

impl Default for RandCore {
    fn default() -> Self {
        Self::new()
    }
}

impl RandCore {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Core with a deterministic random source.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            values: IndexMap::new(),
            domains: IndexMap::new(),
            hard: Vec::new(),
            dists: Vec::new(),
            solve_order: Vec::new(),
            rng,
            solver: Box::new(BacktrackSolver),
        }
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Replace the CSP backend.
    pub fn set_solver(&mut self, solver: Box<dyn CspSolver>) {
        self.solver = solver;
    }

    /// Define or update an object variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<SampleValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&SampleValue> {
        self.values.get(name)
    }

    /// Integer value of a variable, panicking when absent or non-integer.
    pub fn int(&self, name: &str) -> i64 {
        self.get(name)
            .unwrap_or_else(|| panic!("no variable named {name:?}"))
            .int()
    }

    pub fn is_rand(&self, name: &str) -> bool {
        self.domains.contains_key(name)
    }

    pub fn rand_vars(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(|s| s.as_str())
    }

    pub fn domain(&self, name: &str) -> Option<&[SampleValue]> {
        self.domains.get(name).map(|d| d.as_slice())
    }

    /// Declare `name` random over an ordered finite domain. The variable
    /// must already exist on the object; re-declaration replaces the
    /// domain. All random variables must be declared before the first
    /// constraint.
    pub fn add_rand<I>(&mut self, name: &str, domain: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<SampleValue>,
    {
        if !self.values.contains_key(name) {
            return Err(CrvError::UnknownVariable(name.to_string()));
        }
        if !self.hard.is_empty() || !self.dists.is_empty() {
            return Err(CrvError::RandAfterConstraint(name.to_string()));
        }
        let domain: Vec<SampleValue> = domain.into_iter().map(Into::into).collect();
        if domain.is_empty() {
            return Err(CrvError::EmptyDomain(name.to_string()));
        }
        self.domains.insert(name.to_string(), domain);
        Ok(())
    }

    /// Register a constraint. At most one hard constraint and one
    /// distribution may exist per exact set of random parameters; a new
    /// one replaces the old, which is returned.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<Option<Constraint>> {
        for p in constraint.params() {
            if !self.values.contains_key(p) {
                return Err(CrvError::UnknownVariable(p.clone()));
            }
        }
        let key = rand_key(&constraint, &self.domains);
        if key.is_empty() {
            return Err(CrvError::NoRandomVariable(constraint.describe()));
        }

        let Self {
            domains,
            hard,
            dists,
            ..
        } = self;
        let table = if constraint.is_hard() { hard } else { dists };
        for existing in table.iter_mut() {
            if rand_key(existing, domains) == key {
                return Ok(Some(std::mem::replace(existing, constraint)));
            }
        }
        table.push(constraint);
        Ok(None)
    }

    /// Remove a previously added constraint, by closure identity.
    pub fn del_constraint(&mut self, constraint: &Constraint) {
        self.hard.retain(|c| !c.same_fn(constraint));
        self.dists.retain(|c| !c.same_fn(constraint));
    }

    /// Set the resolution order: each group is solved jointly, groups in
    /// declared order, unmentioned variables last. Replaces any previous
    /// order.
    pub fn solve_order<G>(&mut self, groups: G) -> Result<()>
    where
        G: IntoIterator,
        G::Item: IntoIterator,
        <G::Item as IntoIterator>::Item: Into<String>,
    {
        let groups: Vec<Vec<String>> = groups
            .into_iter()
            .map(|g| g.into_iter().map(Into::into).collect())
            .collect();
        let mut seen = HashSet::new();
        for group in &groups {
            if group.is_empty() {
                return Err(CrvError::SolveOrder("empty group".to_string()));
            }
            for var in group {
                if !self.domains.contains_key(var) {
                    return Err(CrvError::SolveOrder(format!(
                        "{var} is not a random variable"
                    )));
                }
                if !seen.insert(var.clone()) {
                    return Err(CrvError::SolveOrder(format!("{var} listed twice")));
                }
            }
        }
        self.solve_order = groups;
        Ok(())
    }

    /// Solve every stage and return the combined solution, without
    /// committing any value.
    pub(crate) fn solve_all(&mut self) -> Result<Assignment> {
        let stages = self.build_stages();
        debug!(stages = stages.len(), "randomizing");

        let mut scratch = self.values.clone();
        let mut resolved: HashSet<String> = HashSet::new();
        let mut solution = Assignment::new();
        for stage in &stages {
            let stage_solution = self.resolve_stage(stage, &resolved, &scratch)?;
            for (name, value) in stage_solution {
                scratch.insert(name.clone(), value.clone());
                solution.insert(name, value);
            }
            resolved.extend(stage.iter().cloned());
        }
        Ok(solution)
    }

    /// Write a solution back to the object variables.
    pub(crate) fn commit(&mut self, solution: Assignment) {
        for (name, value) in solution {
            self.values.insert(name, value);
        }
    }

    /// Partition the random variables into ordered solve stages.
    fn build_stages(&self) -> Vec<Vec<String>> {
        let rand_names: Vec<String> = self.domains.keys().cloned().collect();
        if rand_names.is_empty() {
            return Vec::new();
        }
        if self.solve_order.is_empty() {
            return vec![rand_names];
        }

        // variables tied to others by a multi-variable constraint cannot be
        // pulled forward
        let mut implicit_vars: HashSet<String> = HashSet::new();
        for c in self.hard.iter().chain(self.dists.iter()) {
            let key = rand_key(c, &self.domains);
            if key.len() >= 2 {
                implicit_vars.extend(key);
            }
        }

        let mut remaining = rand_names;
        let mut later: Vec<String> = self.solve_order.iter().flatten().cloned().collect();
        let mut stages = Vec::new();
        for group in &self.solve_order {
            let mut stage = group.clone();
            for var in group {
                remove_first(&mut later, var);
                remove_first(&mut remaining, var);
            }
            let pulled: Vec<String> = remaining
                .iter()
                .filter(|v| !implicit_vars.contains(*v) && !later.contains(*v))
                .cloned()
                .collect();
            for var in &pulled {
                remove_first(&mut remaining, var);
            }
            stage.extend(pulled);
            stages.push(stage);
        }
        if !remaining.is_empty() {
            stages.push(remaining);
        }
        stages
    }

    fn resolve_stage(
        &mut self,
        stage: &[String],
        resolved: &HashSet<String>,
        scratch: &IndexMap<String, SampleValue>,
    ) -> Result<Assignment> {
        let Self {
            domains: all_domains,
            hard,
            dists,
            rng,
            solver,
            ..
        } = self;

        let mut domains: IndexMap<String, Vec<SampleValue>> = IndexMap::new();
        for var in stage {
            let dom = all_domains
                .get(var)
                .ok_or_else(|| CrvError::UnknownVariable(var.clone()))?;
            if dom.is_empty() {
                return Err(CrvError::EmptyDomain(var.clone()));
            }
            domains.insert(var.clone(), dom.clone());
        }

        // classify the applicable constraints by their unresolved stage
        // variables; same-key entries replace earlier ones
        let mut resolved_hard: Vec<Constraint> = Vec::new();
        let mut simple_hard: Vec<(String, Constraint)> = Vec::new();
        let mut impl_hard: Vec<(Vec<String>, Constraint)> = Vec::new();
        let mut simple_dist: Vec<(String, Constraint)> = Vec::new();
        let mut impl_dist: Vec<(Vec<String>, Constraint)> = Vec::new();

        for c in hard.iter() {
            match classify(c, all_domains, resolved, stage) {
                Applicability::Skip => {}
                Applicability::AllResolved => resolved_hard.push(c.clone()),
                Applicability::Simple(var) => upsert_simple(&mut simple_hard, var, c.clone()),
                Applicability::Multi(key) => upsert_multi(&mut impl_hard, key, c.clone()),
            }
        }
        for c in dists.iter() {
            match classify(c, all_domains, resolved, stage) {
                // a distribution over already-fixed values scales every
                // weight equally; it cannot change the choice
                Applicability::Skip | Applicability::AllResolved => {}
                Applicability::Simple(var) => upsert_simple(&mut simple_dist, var, c.clone()),
                Applicability::Multi(key) => upsert_multi(&mut impl_dist, key, c.clone()),
            }
        }

        // hard constraints fully over resolved variables must still hold
        for c in &resolved_hard {
            let args = bind_args(c.params(), &Assignment::new(), scratch);
            if !c.eval_hard(&args) {
                return Err(CrvError::SolverFailed {
                    variables: stage.to_vec(),
                    constraints: vec![c.describe()],
                });
            }
        }

        // narrow domains through single-variable hard constraints
        for (var, c) in &simple_hard {
            let dom = domains.get_mut(var).expect("stage variable");
            dom.retain(|cand| {
                let mut candidate = Assignment::new();
                candidate.insert(var.clone(), cand.clone());
                c.eval_hard(&bind_args(c.params(), &candidate, scratch))
            });
        }

        // joint enumeration over multi-variable hard constraints
        let mut constrained: Vec<String> = Vec::new();
        for (key, _) in &impl_hard {
            for var in key {
                if !constrained.contains(var) {
                    constrained.push(var.clone());
                }
            }
        }
        let solutions: Vec<Assignment> = if impl_hard.is_empty() {
            vec![Assignment::new()]
        } else {
            let predicates: Vec<BoundPredicate> = impl_hard
                .iter()
                .map(|(key, c)| {
                    let params = c.params().to_vec();
                    let bound = scratch.clone();
                    let c = c.clone();
                    BoundPredicate::new(key.clone(), c.describe(), move |a: &Assignment| {
                        c.eval_hard(&bind_args(&params, a, &bound))
                    })
                })
                .collect();
            let sols = solver.solve(&constrained, &domains, &predicates)?;
            if sols.is_empty() {
                return Err(CrvError::SolverFailed {
                    variables: stage.to_vec(),
                    constraints: impl_hard.iter().map(|(_, c)| c.describe()).collect(),
                });
            }
            sols
        };

        // fold distributions over the enumerated solutions
        let weights_apply = !impl_dist.is_empty()
            || simple_dist.iter().any(|(v, _)| constrained.contains(v));
        let mut chosen: Assignment = if !weights_apply {
            let count = solutions.len();
            let idx = if count > 1 { rng.gen_range(0..count) } else { 0 };
            solutions.into_iter().nth(idx).expect("at least one solution")
        } else {
            // distribution variables not constrained extend each solution
            // across their full domains
            let mut dist_vars: Vec<String> = Vec::new();
            for (key, _) in &impl_dist {
                for var in key {
                    if !dist_vars.contains(var) {
                        dist_vars.push(var.clone());
                    }
                }
            }
            let duc: Vec<String> = dist_vars
                .into_iter()
                .filter(|v| !constrained.contains(v))
                .collect();
            let duc_lists: Vec<Vec<SampleValue>> = duc
                .iter()
                .map(|v| domains.get(v).expect("stage variable").clone())
                .collect();
            let duc_combos = cartesian(&duc_lists);

            let mut weighted: Vec<(Assignment, f64)> = Vec::new();
            for base in &solutions {
                for combo in &duc_combos {
                    let mut ext = base.clone();
                    for (var, value) in duc.iter().zip(combo) {
                        ext.insert(var.clone(), value.clone());
                    }
                    let mut weight = 1.0;
                    for (_, c) in &impl_dist {
                        weight *= eval_weight(c, &ext, scratch)?;
                    }
                    for (var, c) in &simple_dist {
                        if constrained.contains(var) {
                            weight *= eval_weight(c, &ext, scratch)?;
                        }
                    }
                    if weight > 0.0 {
                        weighted.push((ext, weight));
                    }
                }
            }

            if weighted.is_empty() {
                if !impl_hard.is_empty() {
                    // every satisfying assignment was forbidden by a zero
                    // weight; nothing can be committed
                    return Err(CrvError::SolverFailed {
                        variables: stage.to_vec(),
                        constraints: impl_hard
                            .iter()
                            .map(|(_, c)| c.describe())
                            .chain(impl_dist.iter().map(|(_, c)| c.describe()))
                            .collect(),
                    });
                }
                Assignment::new()
            } else {
                weighted_pick(rng, weighted)
            }
        };

        // complete remaining stage variables independently
        for var in stage {
            if chosen.contains_key(var) {
                continue;
            }
            let dom = domains.get(var).expect("stage variable");
            if dom.is_empty() {
                return Err(CrvError::SolverFailed {
                    variables: vec![var.clone()],
                    constraints: simple_hard
                        .iter()
                        .filter(|(v, _)| v == var)
                        .map(|(_, c)| c.describe())
                        .collect(),
                });
            }
            if let Some((_, c)) = simple_dist.iter().find(|(v, _)| v == var) {
                let mut weighted: Vec<(SampleValue, f64)> = Vec::new();
                for cand in dom {
                    let mut candidate = Assignment::new();
                    candidate.insert(var.clone(), cand.clone());
                    let weight = eval_weight(c, &candidate, scratch)?;
                    if weight > 0.0 {
                        weighted.push((cand.clone(), weight));
                    }
                }
                // all-zero weights leave the variable at its current value
                if !weighted.is_empty() {
                    let value = weighted_pick(rng, weighted);
                    chosen.insert(var.clone(), value);
                }
            } else {
                let idx = rng.gen_range(0..dom.len());
                chosen.insert(var.clone(), dom[idx].clone());
            }
        }
        Ok(chosen)
    }
}

/// Base operations of a randomizable object.
///
/// Implementors embed a [`RandCore`] and expose it through the two
/// accessors; `randomize` and friends come for free. `pre_randomize` and
/// `post_randomize` hook immediately before and after solving.
pub trait Randomized {
    fn rand_core(&self) -> &RandCore;
    fn rand_core_mut(&mut self) -> &mut RandCore;

    fn pre_randomize(&mut self) {}
    fn post_randomize(&mut self) {}

    /// Pick values for every random variable satisfying all constraints,
    /// and write them back. On failure no variable changes.
    fn randomize(&mut self) -> Result<()> {
        self.pre_randomize();
        let solution = self.rand_core_mut().solve_all()?;
        self.rand_core_mut().commit(solution);
        self.post_randomize();
        Ok(())
    }

    /// Like [`Randomized::randomize`], with extra constraints for this call
    /// only. An extra with the same variable-set key as a registered
    /// constraint replaces it for the duration of the call.
    fn randomize_with(&mut self, extras: Vec<Constraint>) -> Result<()> {
        self.pre_randomize();
        let result = {
            let core = self.rand_core_mut();
            let mut installed: Vec<Constraint> = Vec::new();
            let mut overwritten: Vec<Constraint> = Vec::new();
            let mut install_err = None;
            for extra in extras {
                match core.add_constraint(extra.clone()) {
                    Ok(Some(old)) => {
                        overwritten.push(old);
                        installed.push(extra);
                    }
                    Ok(None) => installed.push(extra),
                    Err(e) => {
                        install_err = Some(e);
                        break;
                    }
                }
            }
            let solve_result = match install_err {
                Some(e) => Err(e),
                None => core.solve_all(),
            };
            for extra in &installed {
                core.del_constraint(extra);
            }
            for old in overwritten {
                if !installed.iter().any(|c| c.same_fn(&old)) {
                    let _ = core.add_constraint(old);
                }
            }
            solve_result
        };
        let solution = result?;
        self.rand_core_mut().commit(solution);
        self.post_randomize();
        Ok(())
    }
}

/// Exact set of random parameters, the constraint replacement key.
fn rand_key(c: &Constraint, domains: &IndexMap<String, Vec<SampleValue>>) -> Vec<String> {
    let mut key: Vec<String> = c
        .params()
        .iter()
        .filter(|p| domains.contains_key(*p))
        .cloned()
        .collect();
    key.sort_unstable();
    key.dedup();
    key
}

enum Applicability {
    /// Reads a random variable solved in a later stage
    Skip,
    /// Every random parameter already has a concrete value
    AllResolved,
    /// Exactly one unresolved stage variable
    Simple(String),
    /// Several unresolved stage variables, jointly solved
    Multi(Vec<String>),
}

fn classify(
    c: &Constraint,
    domains: &IndexMap<String, Vec<SampleValue>>,
    resolved: &HashSet<String>,
    stage: &[String],
) -> Applicability {
    let mut stage_params: Vec<String> = Vec::new();
    for p in c.params() {
        if domains.contains_key(p) && !resolved.contains(p) {
            if stage.iter().any(|s| s == p) {
                if !stage_params.contains(p) {
                    stage_params.push(p.clone());
                }
            } else {
                return Applicability::Skip;
            }
        }
    }
    match stage_params.len() {
        0 => Applicability::AllResolved,
        1 => Applicability::Simple(stage_params.pop().expect("one element")),
        _ => Applicability::Multi(stage_params),
    }
}

fn upsert_simple(table: &mut Vec<(String, Constraint)>, var: String, c: Constraint) {
    if let Some(entry) = table.iter_mut().find(|(v, _)| *v == var) {
        entry.1 = c;
    } else {
        table.push((var, c));
    }
}

fn upsert_multi(table: &mut Vec<(Vec<String>, Constraint)>, key: Vec<String>, c: Constraint) {
    let mut sorted = key.clone();
    sorted.sort_unstable();
    if let Some(entry) = table.iter_mut().find(|(k, _)| {
        let mut existing = k.clone();
        existing.sort_unstable();
        existing == sorted
    }) {
        entry.1 = c;
    } else {
        table.push((key, c));
    }
}

/// Bind constraint parameters from the candidate assignment, falling back
/// to the object's current values.
fn bind_args(
    params: &[String],
    candidate: &Assignment,
    scratch: &IndexMap<String, SampleValue>,
) -> Vec<SampleValue> {
    params
        .iter()
        .map(|p| {
            candidate
                .get(p)
                .or_else(|| scratch.get(p))
                .cloned()
                .unwrap_or_else(|| panic!("constraint parameter {p:?} unbound"))
        })
        .collect()
}

fn eval_weight(
    c: &Constraint,
    candidate: &Assignment,
    scratch: &IndexMap<String, SampleValue>,
) -> Result<f64> {
    let weight = c.eval_dist(&bind_args(c.params(), candidate, scratch));
    if weight < 0.0 {
        return Err(CrvError::NegativeWeight {
            constraint: c.describe(),
            value: weight,
        });
    }
    Ok(weight)
}

fn weighted_pick<T>(rng: &mut StdRng, items: Vec<(T, f64)>) -> T {
    let total: f64 = items.iter().map(|(_, w)| w).sum();
    let mut pick = rng.gen_range(0.0..total);
    let last = items.len() - 1;
    for (idx, (item, weight)) in items.into_iter().enumerate() {
        if pick < weight || idx == last {
            return item;
        }
        pick -= weight;
    }
    unreachable!("weighted choice over a non-empty list")
}

/// All combinations of one element per list; a single empty combination
/// when no lists are given.
fn cartesian(lists: &[Vec<SampleValue>]) -> Vec<Vec<SampleValue>> {
    if lists.iter().any(|l| l.is_empty()) {
        return Vec::new();
    }
    let mut out = vec![Vec::new()];
    for list in lists {
        let mut next = Vec::with_capacity(out.len() * list.len());
        for prefix in &out {
            for value in list {
                let mut combo = prefix.clone();
                combo.push(value.clone());
                next.push(combo);
            }
        }
        out = next;
    }
    out
}

fn remove_first(list: &mut Vec<String>, var: &str) {
    if let Some(idx) = list.iter().position(|v| v == var) {
        list.remove(idx);
    }
}
