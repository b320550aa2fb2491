//! Cover checks: pass/fail assertion leaves
//!
//! A check carries a failure predicate and an optional pass predicate.
//! Passing `at_least` times scores the check's weight; a single failure
//! zeroes it permanently.

use crate::db::CoverageDb;
use crate::error::{CoverageError, Result};
use crate::item::{CoverItem, ItemKind, SampleOutcome};
use crate::value::{SampleArgs, SampleValue};

pub(crate) type PredicateFn = Box<dyn FnMut(&SampleArgs) -> bool>;

/// Check lifecycle: `Fail` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    New,
    Pass,
    Fail,
}

pub(crate) struct CheckState {
    pub f_fail: PredicateFn,
    pub f_pass: Option<PredicateFn>,
    pub outcome: CheckOutcome,
    pub pass_hits: u64,
    pub fail_hits: u64,
}

impl CheckState {
    pub(crate) fn sample(
        &mut self,
        args: &SampleArgs,
        weight: u64,
        at_least: u64,
        coverage: u64,
    ) -> SampleOutcome {
        let mut out = SampleOutcome::empty();

        if (self.f_fail)(args) {
            self.fail_hits += 1;
            if self.outcome != CheckOutcome::Fail {
                self.outcome = CheckOutcome::Fail;
                out.delta = -(coverage as i64);
                out.extra_labels.push("FAIL".to_string());
            }
            return out;
        }

        let passed = match self.f_pass.as_mut() {
            Some(f) => f(args),
            // no pass predicate: any non-failing sample passes
            None => true,
        };
        if passed {
            self.pass_hits += 1;
            if self.outcome == CheckOutcome::New && self.pass_hits >= at_least {
                self.outcome = CheckOutcome::Pass;
                out.delta = weight as i64;
                out.covered
                    .push((SampleValue::Str("PASS".into()), "PASS".to_string()));
            }
        }
        out
    }
}

/// Builder registering a cover check into the coverage database.
pub struct CoverCheckBuilder {
    name: String,
    f_fail: PredicateFn,
    f_pass: Option<PredicateFn>,
    weight: u64,
    at_least: u64,
}

impl CoverCheckBuilder {
    pub fn new(name: impl Into<String>, f_fail: impl FnMut(&SampleArgs) -> bool + 'static) -> Self {
        Self {
            name: name.into(),
            f_fail: Box::new(f_fail),
            f_pass: None,
            weight: 1,
            at_least: 1,
        }
    }

    /// Pass predicate; without one, any sample that does not fail passes.
    pub fn f_pass(mut self, f_pass: impl FnMut(&SampleArgs) -> bool + 'static) -> Self {
        self.f_pass = Some(Box::new(f_pass));
        self
    }

    pub fn weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    /// Number of passing samples required before the check scores.
    pub fn at_least(mut self, at_least: u64) -> Self {
        self.at_least = at_least;
        self
    }

    pub fn register(self) -> Result<()> {
        if self.weight < 1 {
            return Err(CoverageError::InvalidWeight(self.name));
        }
        if self.at_least < 1 {
            return Err(CoverageError::InvalidAtLeast(self.name));
        }

        let state = CheckState {
            f_fail: self.f_fail,
            f_pass: self.f_pass,
            outcome: CheckOutcome::New,
            pass_hits: 0,
            fail_hits: 0,
        };
        let mut item = CoverItem::new(
            self.name,
            None,
            self.weight,
            self.at_least,
            ItemKind::Check(state),
        );
        item.size = item.weight;
        CoverageDb::with(|db| db.add_leaf(item))
    }
}
