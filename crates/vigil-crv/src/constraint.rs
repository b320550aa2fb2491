//! Declarative constraints over object variables
//!
//! A [`Constraint`] names the object variables it reads, in order, and
//! carries a closure over their values. Hard constraints return a boolean;
//! distributions return a non-negative weight. Since closures carry no
//! parameter-name reflection, the variable list is given explicitly at
//! construction.

use std::rc::Rc;
use vigil_coverage::SampleValue;

pub(crate) type HardFn = Rc<dyn Fn(&[SampleValue]) -> bool>;
pub(crate) type DistFn = Rc<dyn Fn(&[SampleValue]) -> f64>;

#[derive(Clone)]
pub(crate) enum ConstraintBody {
    Hard(HardFn),
    Dist(DistFn),
}

/// A hard constraint or distribution over named object variables.
///
/// ```
/// use vigil_crv::Constraint;
///
/// // hard: every solution must satisfy x < y
/// let c = Constraint::hard(["x", "y"], |v| v[0].int() < v[1].int());
/// assert!(c.is_hard());
///
/// // distribution: weight solutions toward small values
/// let d = Constraint::dist(["data"], |v| (64 - v[0].int()).abs() as f64);
/// assert!(!d.is_hard());
/// ```
#[derive(Clone)]
pub struct Constraint {
    params: Vec<String>,
    body: ConstraintBody,
}

impl Constraint {
    /// Boolean predicate; arguments arrive in the order of `params`.
    pub fn hard<I, F>(params: I, f: F) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: Fn(&[SampleValue]) -> bool + 'static,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            body: ConstraintBody::Hard(Rc::new(f)),
        }
    }

    /// Weight function; arguments arrive in the order of `params`.
    pub fn dist<I, F>(params: I, f: F) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: Fn(&[SampleValue]) -> f64 + 'static,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            body: ConstraintBody::Dist(Rc::new(f)),
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn is_hard(&self) -> bool {
        matches!(self.body, ConstraintBody::Hard(_))
    }

    /// Human-readable key used in solver error messages.
    pub fn describe(&self) -> String {
        let kind = if self.is_hard() { "hard" } else { "dist" };
        format!("{kind}({})", self.params.join(", "))
    }

    pub(crate) fn eval_hard(&self, values: &[SampleValue]) -> bool {
        match &self.body {
            ConstraintBody::Hard(f) => f(values),
            ConstraintBody::Dist(_) => true,
        }
    }

    pub(crate) fn eval_dist(&self, values: &[SampleValue]) -> f64 {
        match &self.body {
            ConstraintBody::Dist(f) => f(values),
            ConstraintBody::Hard(_) => 1.0,
        }
    }

    /// Identity comparison of the underlying closure, for deletion.
    pub(crate) fn same_fn(&self, other: &Constraint) -> bool {
        match (&self.body, &other.body) {
            (ConstraintBody::Hard(a), ConstraintBody::Hard(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            (ConstraintBody::Dist(a), ConstraintBody::Dist(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}
