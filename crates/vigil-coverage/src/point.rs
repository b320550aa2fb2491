//! Cover points: single-dimensional bins
//!
//! A cover point tests each sample against an ordered list of bins through
//! its [`BinMatcher`] and counts hits per bin. A bin is covered once its hit
//! count reaches `at_least`.

use crate::db::CoverageDb;
use crate::error::{CoverageError, Result};
use crate::item::{CoverItem, ItemKind, SampleOutcome};
use crate::matcher::BinMatcher;
use crate::value::{SampleArgs, SampleValue};
use indexmap::IndexMap;

pub(crate) struct BinState {
    pub hits: u64,
    pub label: Option<String>,
}

pub(crate) struct PointState {
    pub matcher: BinMatcher,
    /// Bin -> state, in declaration order
    pub bins: IndexMap<SampleValue, BinState>,
    /// Id of the sampler call that last updated this point
    pub last_call: u64,
    /// All bins matched by that call (feeds sibling crosses)
    pub call_hits: Vec<SampleValue>,
}

impl PointState {
    pub(crate) fn sample(
        &mut self,
        args: &SampleArgs,
        call_id: u64,
        weight: u64,
        at_least: u64,
    ) -> Result<SampleOutcome> {
        let matched = self.matcher.matches(args, self.bins.keys())?;

        let mut outcome = SampleOutcome::empty();
        for bin in &matched {
            let state = self
                .bins
                .get_mut(bin)
                .expect("matched bin comes from the bin map");
            state.hits += 1;
            if state.hits == at_least {
                let label = state
                    .label
                    .clone()
                    .unwrap_or_else(|| bin.to_string());
                outcome.covered.push((bin.clone(), label));
                outcome.delta += weight as i64;
            }
        }

        self.last_call = call_id;
        self.call_hits = matched;
        Ok(outcome)
    }
}

/// Builder registering a cover point into the coverage database.
///
/// ```no_run
/// use vigil_coverage::{CoverPointBuilder, rel};
///
/// CoverPointBuilder::new("memory.address")
///     .bins([(0, 50), (51, 150), (151, 255)])
///     .rel(rel::in_range)
///     .vname("addr")
///     .register()
///     .unwrap();
/// ```
pub struct CoverPointBuilder {
    name: String,
    bins: Vec<SampleValue>,
    labels: Option<Vec<String>>,
    vname: Option<String>,
    xf: Option<Box<dyn FnMut(&SampleArgs) -> SampleValue>>,
    rel: Option<Box<dyn FnMut(&SampleValue, &SampleValue) -> bool>>,
    weight: u64,
    at_least: u64,
    inj: bool,
}

impl CoverPointBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bins: Vec::new(),
            labels: None,
            vname: None,
            xf: None,
            rel: None,
            weight: 1,
            at_least: 1,
            inj: true,
        }
    }

    /// Bin values, in match-precedence order.
    pub fn bins<I>(mut self, bins: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<SampleValue>,
    {
        self.bins = bins.into_iter().map(Into::into).collect();
        self
    }

    /// Labels parallel to the bin list, used for bins callbacks and reports.
    pub fn bins_labels<I>(mut self, labels: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    /// Name of the sample argument to match (default transformation).
    pub fn vname(mut self, vname: impl Into<String>) -> Self {
        self.vname = Some(vname.into());
        self
    }

    /// Transformation from sample arguments to the matched value.
    pub fn xf(mut self, xf: impl FnMut(&SampleArgs) -> SampleValue + 'static) -> Self {
        self.xf = Some(Box::new(xf));
        self
    }

    /// Relation between the matched value and a bin (default: equality).
    pub fn rel(mut self, rel: impl FnMut(&SampleValue, &SampleValue) -> bool + 'static) -> Self {
        self.rel = Some(Box::new(rel));
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

    /// Injective matching: a sample hits at most the first matching bin.
    pub fn inj(mut self, inj: bool) -> Self {
        self.inj = inj;
        self
    }

    /// Validate and insert into the process coverage database.
    pub fn register(self) -> Result<()> {
        if self.weight < 1 {
            return Err(CoverageError::InvalidWeight(self.name));
        }
        if self.at_least < 1 {
            return Err(CoverageError::InvalidAtLeast(self.name));
        }

        let mut bins: IndexMap<SampleValue, BinState> = IndexMap::new();
        if let Some(labels) = &self.labels {
            if labels.len() != self.bins.len() {
                return Err(CoverageError::LabelLength {
                    name: self.name,
                    bins: self.bins.len(),
                    labels: labels.len(),
                });
            }
            for (bin, label) in self.bins.iter().zip(labels) {
                bins.insert(
                    bin.clone(),
                    BinState {
                        hits: 0,
                        label: Some(label.clone()),
                    },
                );
            }
        } else {
            for bin in &self.bins {
                bins.insert(bin.clone(), BinState { hits: 0, label: None });
            }
        }

        let bin_count = bins.len() as u64;
        let state = PointState {
            matcher: BinMatcher::new(self.name.clone(), self.vname, self.xf, self.rel, self.inj),
            bins,
            last_call: 0,
            call_hits: Vec::new(),
        };

        let mut item = CoverItem::new(
            self.name,
            None,
            self.weight,
            self.at_least,
            ItemKind::Point(state),
        );
        item.size = item.weight * bin_count;

        CoverageDb::with(|db| db.add_leaf(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CoverageDb;

    #[test]
    fn test_register_and_sample() {
        CoverageDb::reset();
        CoverPointBuilder::new("pt.basic")
            .bins(0..4)
            .register()
            .unwrap();

        CoverageDb::with(|db| {
            let item = db.get("pt.basic").unwrap();
            assert_eq!(item.size(), 4);
            assert_eq!(item.coverage(), 0);
        });
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        CoverageDb::reset();
        CoverPointBuilder::new("pt.dup").bins([1]).register().unwrap();
        let err = CoverPointBuilder::new("pt.dup").bins([1]).register();
        assert!(matches!(err, Err(CoverageError::DuplicateName(_))));
    }

    #[test]
    fn test_label_length_mismatch() {
        CoverageDb::reset();
        let err = CoverPointBuilder::new("pt.lab")
            .bins([1, 2, 3])
            .bins_labels(["one", "two"])
            .register();
        assert!(matches!(err, Err(CoverageError::LabelLength { .. })));
    }

    #[test]
    fn test_weight_scales_size() {
        CoverageDb::reset();
        CoverPointBuilder::new("pt.wt")
            .bins(0..10)
            .weight(100)
            .register()
            .unwrap();
        CoverageDb::with(|db| {
            assert_eq!(db.get("pt.wt").unwrap().size(), 1000);
        });
    }

    #[test]
    fn test_leaf_needs_parent_path() {
        CoverageDb::reset();
        let err = CoverPointBuilder::new("orphan").bins([1]).register();
        assert!(matches!(err, Err(CoverageError::MissingParent(_))));
    }
}
