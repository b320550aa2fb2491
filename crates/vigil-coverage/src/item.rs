//! Coverage tree nodes
//!
//! Every registered name maps to a [`CoverItem`]: either a group created
//! implicitly from a dotted-path prefix, or a leaf (point, cross, check)
//! registered explicitly. Groups cache the aggregates of their subtree;
//! leaves own the bin state. Items also carry the observer callbacks.

use crate::check::CheckState;
use crate::cross::CrossState;
use crate::error::{CoverageError, Result};
use crate::point::PointState;
use crate::value::SampleValue;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Outcome of a coverage callback.
pub type CallbackResult = std::result::Result<(), CoverageError>;

/// Shared handle to a registered callback closure.
pub(crate) type CallbackFn = Rc<RefCell<dyn FnMut() -> CallbackResult>>;

pub(crate) struct ThresholdCallback {
    pub percent: f64,
    pub fired: bool,
    pub cb: CallbackFn,
}

pub(crate) struct BinsCallback {
    pub label: String,
    pub cb: CallbackFn,
}

pub(crate) enum ItemKind {
    Group,
    Point(PointState),
    Cross(CrossState),
    Check(CheckState),
}

/// A node of the coverage tree.
pub struct CoverItem {
    pub(crate) name: String,
    pub(crate) parent: Option<String>,
    pub(crate) children: Vec<String>,
    pub(crate) weight: u64,
    pub(crate) at_least: u64,
    pub(crate) size: u64,
    pub(crate) coverage: u64,
    /// Bins newly covered since the last query; consumed on read
    pub(crate) new_hits: Vec<SampleValue>,
    pub(crate) threshold_callbacks: Vec<ThresholdCallback>,
    pub(crate) bins_callbacks: Vec<BinsCallback>,
    /// Re-entrancy guard: set for the duration of a sample on this leaf
    pub(crate) updating: bool,
    pub(crate) kind: ItemKind,
}

impl CoverItem {
    pub(crate) fn new_group(name: String, parent: Option<String>) -> Self {
        Self::new(name, parent, 1, 1, ItemKind::Group)
    }

    pub(crate) fn new(
        name: String,
        parent: Option<String>,
        weight: u64,
        at_least: u64,
        kind: ItemKind,
    ) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            weight,
            at_least,
            size: 0,
            coverage: 0,
            new_hits: Vec::new(),
            threshold_callbacks: Vec::new(),
            bins_callbacks: Vec::new(),
            updating: false,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Direct children, in registration order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self.kind, ItemKind::Group)
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn at_least(&self) -> u64 {
        self.at_least
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn coverage(&self) -> u64 {
        self.coverage
    }

    pub fn cover_percentage(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            100.0 * self.coverage as f64 / self.size as f64
        }
    }

    /// Bins newly covered since the previous call; resets on read.
    pub fn take_new_hits(&mut self) -> Vec<SampleValue> {
        std::mem::take(&mut self.new_hits)
    }

    /// Per-bin hit counts. Groups report nothing here; use
    /// [`crate::CoverageDb::detailed_coverage`] to fold a subtree.
    pub fn detailed_coverage(&self) -> IndexMap<SampleValue, u64> {
        match &self.kind {
            ItemKind::Group => IndexMap::new(),
            ItemKind::Point(state) => state
                .bins
                .iter()
                .map(|(bin, bs)| (bin.clone(), bs.hits))
                .collect(),
            ItemKind::Cross(state) => state.bins.clone(),
            ItemKind::Check(state) => {
                let mut out = IndexMap::new();
                out.insert(SampleValue::Str("PASS".into()), state.pass_hits);
                out.insert(SampleValue::Str("FAIL".into()), state.fail_hits);
                out
            }
        }
    }

    /// Register a callback fired once when `cover_percentage` first crosses
    /// `percent` upward. `percent` must lie in (0, 100].
    pub fn add_threshold_callback(
        &mut self,
        percent: f64,
        cb: impl FnMut() -> CallbackResult + 'static,
    ) -> Result<()> {
        if !(percent > 0.0 && percent <= 100.0) {
            return Err(CoverageError::InvalidThreshold(percent));
        }
        self.threshold_callbacks.push(ThresholdCallback {
            percent,
            fired: false,
            cb: Rc::new(RefCell::new(cb)),
        });
        Ok(())
    }

    /// Register a callback fired once when a bin with the given label is
    /// first covered on this item or, for groups, any descendant leaf.
    pub fn add_bins_callback(
        &mut self,
        label: impl Into<String>,
        cb: impl FnMut() -> CallbackResult + 'static,
    ) {
        self.bins_callbacks.push(BinsCallback {
            label: label.into(),
            cb: Rc::new(RefCell::new(cb)),
        });
    }
}

/// What a single leaf update produced; drives propagation and callbacks.
pub(crate) struct SampleOutcome {
    /// Signed coverage change (negative only for a check failing)
    pub delta: i64,
    /// Newly covered bins with their labels
    pub covered: Vec<(SampleValue, String)>,
    /// Labels that fire bins callbacks without contributing a covered bin
    pub extra_labels: Vec<String>,
}

impl SampleOutcome {
    pub(crate) fn empty() -> Self {
        Self {
            delta: 0,
            covered: Vec::new(),
            extra_labels: Vec::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.delta == 0 && self.covered.is_empty() && self.extra_labels.is_empty()
    }
}
