//! Cover crosses: Cartesian-product bins over sibling cover points
//!
//! A cross owns one bin per combination of its referenced cover points'
//! bins, minus the ignored tuples. It never matches samples itself: when a
//! sampler call updates every referenced point, the cross counts the
//! product of the bins those points matched in that same call.

use crate::db::CoverageDb;
use crate::error::{CoverageError, Result};
use crate::item::SampleOutcome;
use crate::value::SampleValue;
use indexmap::IndexMap;

/// One position of an ignore tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreSpec {
    /// Matches any bin of the corresponding cover point
    Any,
    /// Matches exactly this bin value
    Value(SampleValue),
}

impl IgnoreSpec {
    fn matches(&self, value: &SampleValue) -> bool {
        match self {
            IgnoreSpec::Any => true,
            IgnoreSpec::Value(v) => v == value,
        }
    }
}

impl<T: Into<SampleValue>> From<T> for IgnoreSpec {
    fn from(v: T) -> Self {
        IgnoreSpec::Value(v.into())
    }
}

pub(crate) struct CrossState {
    /// Referenced cover point names, in declared order
    pub items: Vec<String>,
    /// Cross bin (tuple) -> hit count
    pub bins: IndexMap<SampleValue, u64>,
}

impl CrossState {
    /// Count the product of the referenced points' per-call match sets.
    pub(crate) fn sample(
        &mut self,
        hit_lists: &[Vec<SampleValue>],
        weight: u64,
        at_least: u64,
    ) -> SampleOutcome {
        let mut outcome = SampleOutcome::empty();
        for combo in cartesian_product(hit_lists) {
            let key = SampleValue::Tuple(combo);
            if let Some(hits) = self.bins.get_mut(&key) {
                *hits += 1;
                if *hits == at_least {
                    let label = key.to_string();
                    outcome.covered.push((key, label));
                    outcome.delta += weight as i64;
                }
            }
        }
        outcome
    }
}

/// All combinations of one element per list, leftmost list outermost.
pub(crate) fn cartesian_product(lists: &[Vec<SampleValue>]) -> Vec<Vec<SampleValue>> {
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

/// Builder registering a cover cross into the coverage database.
pub struct CoverCrossBuilder {
    name: String,
    items: Vec<String>,
    ign_bins: Vec<Vec<IgnoreSpec>>,
    weight: u64,
    at_least: u64,
}

impl CoverCrossBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            ign_bins: Vec::new(),
            weight: 1,
            at_least: 1,
        }
    }

    /// Full paths of the referenced cover points, in product order.
    pub fn items<I>(mut self, items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.items = items.into_iter().map(Into::into).collect();
        self
    }

    /// Add one ignore tuple; its arity must equal the item count.
    pub fn ign<I>(mut self, tuple: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<IgnoreSpec>,
    {
        self.ign_bins.push(tuple.into_iter().map(Into::into).collect());
        self
    }

    pub fn weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    pub fn at_least(mut self, at_least: u64) -> Self {
        self.at_least = at_least;
        self
    }

    /// Validate, expand the product bins and insert into the database.
    pub fn register(self) -> Result<()> {
        if self.weight < 1 {
            return Err(CoverageError::InvalidWeight(self.name));
        }
        if self.at_least < 1 {
            return Err(CoverageError::InvalidAtLeast(self.name));
        }
        for tuple in &self.ign_bins {
            if tuple.len() != self.items.len() {
                return Err(CoverageError::IgnoreArity {
                    cross: self.name,
                    expected: self.items.len(),
                    got: tuple.len(),
                });
            }
        }
        CoverageDb::with(|db| db.register_cross(self.name, self.items, self.ign_bins, self.weight, self.at_least))
    }
}

pub(crate) fn expand_bins(
    bins_lists: &[Vec<SampleValue>],
    ign_bins: &[Vec<IgnoreSpec>],
) -> IndexMap<SampleValue, u64> {
    let mut out = IndexMap::new();
    for combo in cartesian_product(bins_lists) {
        let ignored = ign_bins
            .iter()
            .any(|tuple| tuple.iter().zip(&combo).all(|(spec, v)| spec.matches(v)));
        if !ignored {
            out.insert(SampleValue::Tuple(combo), 0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<SampleValue> {
        values.iter().map(|v| SampleValue::Int(*v)).collect()
    }

    #[test]
    fn test_cartesian_product_order() {
        let lists = vec![ints(&[0, 1]), ints(&[0, 1, 2])];
        let combos = cartesian_product(&lists);
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0], ints(&[0, 0]));
        assert_eq!(combos[1], ints(&[0, 1]));
        assert_eq!(combos[5], ints(&[1, 2]));
    }

    #[test]
    fn test_empty_axis_yields_no_combos() {
        let lists = vec![ints(&[0, 1]), Vec::new()];
        assert!(cartesian_product(&lists).is_empty());
    }

    #[test]
    fn test_expand_with_wildcard_ignore() {
        let lists = vec![ints(&[0, 1]), ints(&[0, 1, 2])];
        // drop every combination whose second position is 2
        let ign = vec![vec![IgnoreSpec::Any, IgnoreSpec::Value(SampleValue::Int(2))]];
        let bins = expand_bins(&lists, &ign);
        assert_eq!(bins.len(), 4);
        assert!(!bins.contains_key(&SampleValue::tuple([0, 2])));
        assert!(!bins.contains_key(&SampleValue::tuple([1, 2])));
    }

    #[test]
    fn test_expand_with_exact_ignore() {
        let lists = vec![ints(&[0, 1]), ints(&[0, 1])];
        let ign = vec![vec![
            IgnoreSpec::Value(SampleValue::Int(1)),
            IgnoreSpec::Value(SampleValue::Int(1)),
        ]];
        let bins = expand_bins(&lists, &ign);
        assert_eq!(bins.len(), 3);
        assert!(!bins.contains_key(&SampleValue::tuple([1, 1])));
    }
}
