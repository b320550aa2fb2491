//! The process coverage database
//!
//! A flat registry keyed by full dotted path; the tree structure lives in
//! parent/child links between entries. Group nodes are materialized on
//! demand when a leaf registers below a path that does not exist yet.
//!
//! The database is process-scoped with lazy initialization and is driven
//! from a single thread (one registry per thread). [`CoverageDb::reset`]
//! drops all registered items, for test isolation.

use crate::cross::{expand_bins, CrossState, IgnoreSpec};
use crate::error::{CoverageError, Result};
use crate::item::{CallbackFn, CoverItem, ItemKind, SampleOutcome};
use crate::value::{SampleArgs, SampleValue};
use indexmap::IndexMap;
use std::cell::RefCell;
use tracing::trace;

thread_local! {
    static COVERAGE_DB: RefCell<CoverageDb> = RefCell::new(CoverageDb::empty());
}

pub struct CoverageDb {
    pub(crate) items: IndexMap<String, CoverItem>,
    next_call: u64,
}

impl CoverageDb {
    fn empty() -> Self {
        Self {
            items: IndexMap::new(),
            next_call: 0,
        }
    }

    /// Run `f` against the process coverage database.
    ///
    /// Samples must not be issued from inside the closure; use the
    /// [`crate::Sampler`] API from plain code instead.
    pub fn with<R>(f: impl FnOnce(&mut CoverageDb) -> R) -> R {
        COVERAGE_DB.with(|db| f(&mut db.borrow_mut()))
    }

    /// Drop every registered item. Intended for test isolation.
    pub fn reset() {
        COVERAGE_DB.with(|db| *db.borrow_mut() = CoverageDb::empty());
    }

    pub fn get(&self, name: &str) -> Result<&CoverItem> {
        self.items
            .get(name)
            .ok_or_else(|| CoverageError::UnknownName(name.to_string()))
    }

    pub fn item_mut(&mut self, name: &str) -> Result<&mut CoverItem> {
        self.items
            .get_mut(name)
            .ok_or_else(|| CoverageError::UnknownName(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All registered names, in name order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.items.keys().cloned().collect();
        names.sort();
        names
    }

    /// Per-bin hit counts of every leaf under `name` (the leaf itself if
    /// `name` is one), in registration order.
    pub fn detailed_coverage(
        &self,
        name: &str,
    ) -> Result<Vec<(String, IndexMap<SampleValue, u64>)>> {
        let item = self.get(name)?;
        let mut out = Vec::new();
        if item.is_leaf() {
            out.push((item.name.clone(), item.detailed_coverage()));
            return Ok(out);
        }
        let mut stack: Vec<String> = item.children.iter().rev().cloned().collect();
        while let Some(n) = stack.pop() {
            let child = self.get(&n)?;
            if child.is_leaf() {
                out.push((child.name.clone(), child.detailed_coverage()));
            } else {
                stack.extend(child.children.iter().rev().cloned());
            }
        }
        Ok(out)
    }

    /// Emit one line per item, sorted case-insensitively by name and
    /// indented by depth; optionally one line per bin for leaves.
    pub fn report(&self, mut sink: impl FnMut(&str), with_bins: bool) {
        let mut names: Vec<&String> = self.items.keys().collect();
        names.sort_by_key(|n| n.to_lowercase());
        for name in names {
            let item = &self.items[name.as_str()];
            let indent = "   ".repeat(name.matches('.').count());
            sink(&format!(
                "{}{} : coverage={}, size={}, cover_percentage={:.2}",
                indent,
                name,
                item.coverage,
                item.size,
                item.cover_percentage()
            ));
            if with_bins && item.is_leaf() {
                for (bin, hits) in item.detailed_coverage() {
                    sink(&format!("{}   bin {} : {}", indent, bin, hits));
                }
            }
        }
    }

    /// Insert a fully built leaf, materializing group nodes above it.
    pub(crate) fn add_leaf(&mut self, mut item: CoverItem) -> Result<()> {
        validate_name(&item.name)?;
        if self.items.contains_key(&item.name) {
            return Err(CoverageError::DuplicateName(item.name));
        }
        let parent = match item.name.rfind('.') {
            Some(idx) => item.name[..idx].to_string(),
            None => return Err(CoverageError::MissingParent(item.name)),
        };
        self.ensure_group(&parent)?;

        item.parent = Some(parent.clone());
        let size = item.size;
        let name = item.name.clone();
        self.items.insert(name.clone(), item);
        self.items
            .get_mut(&parent)
            .expect("parent group just ensured")
            .children
            .push(name);

        // leaf size contributes to every ancestor
        let mut cursor = Some(parent);
        while let Some(n) = cursor {
            let group = self.items.get_mut(&n).expect("ancestor exists");
            group.size += size;
            cursor = group.parent.clone();
        }
        Ok(())
    }

    fn ensure_group(&mut self, name: &str) -> Result<()> {
        if let Some(existing) = self.items.get(name) {
            if existing.is_leaf() {
                return Err(CoverageError::ParentIsLeaf(name.to_string()));
            }
            return Ok(());
        }
        let parent = name.rfind('.').map(|idx| name[..idx].to_string());
        if let Some(p) = &parent {
            self.ensure_group(p)?;
        }
        self.items
            .insert(name.to_string(), CoverItem::new_group(name.to_string(), parent.clone()));
        if let Some(p) = parent {
            self.items
                .get_mut(&p)
                .expect("parent group just ensured")
                .children
                .push(name.to_string());
        }
        Ok(())
    }

    /// Expand and insert a cross leaf (bins come from the referenced
    /// points, which must already be registered).
    pub(crate) fn register_cross(
        &mut self,
        name: String,
        items: Vec<String>,
        ign_bins: Vec<Vec<IgnoreSpec>>,
        weight: u64,
        at_least: u64,
    ) -> Result<()> {
        let mut bins_lists = Vec::with_capacity(items.len());
        for pname in &items {
            let point = self
                .items
                .get(pname)
                .ok_or_else(|| CoverageError::UnknownCrossItem {
                    cross: name.clone(),
                    item: pname.clone(),
                })?;
            match &point.kind {
                ItemKind::Point(state) => {
                    bins_lists.push(state.bins.keys().cloned().collect::<Vec<_>>())
                }
                _ => {
                    return Err(CoverageError::NotACoverPoint {
                        cross: name,
                        item: pname.clone(),
                    })
                }
            }
        }
        let bins = expand_bins(&bins_lists, &ign_bins);
        let size = weight * bins.len() as u64;
        let mut item = CoverItem::new(
            name,
            None,
            weight,
            at_least,
            ItemKind::Cross(CrossState { items, bins }),
        );
        item.size = size;
        self.add_leaf(item)
    }

    /// Fresh id for one sampler invocation; ties cross updates to the
    /// point updates of the same call.
    pub(crate) fn begin_call(&mut self) -> u64 {
        self.next_call += 1;
        self.next_call
    }

    /// Update one leaf for a sample and return the callbacks now due, in
    /// firing order. The leaf stays flagged as updating until
    /// [`CoverageDb::end_update`]; the caller invokes the callbacks in
    /// between, outside the database borrow.
    pub(crate) fn update_leaf(
        &mut self,
        name: &str,
        args: &SampleArgs,
        call_id: u64,
    ) -> Result<Vec<CallbackFn>> {
        {
            let item = self.item_mut(name)?;
            if !item.is_leaf() {
                return Err(CoverageError::NotALeaf(name.to_string()));
            }
            if item.updating {
                return Err(CoverageError::Reentrancy(name.to_string()));
            }
            item.updating = true;
        }
        match self.update_leaf_inner(name, args, call_id) {
            Ok(fired) => Ok(fired),
            Err(e) => {
                if let Some(item) = self.items.get_mut(name) {
                    item.updating = false;
                }
                Err(e)
            }
        }
    }

    pub(crate) fn end_update(&mut self, name: &str) {
        if let Some(item) = self.items.get_mut(name) {
            item.updating = false;
        }
    }

    fn update_leaf_inner(
        &mut self,
        name: &str,
        args: &SampleArgs,
        call_id: u64,
    ) -> Result<Vec<CallbackFn>> {
        let is_cross = matches!(
            self.items.get(name).map(|i| &i.kind),
            Some(ItemKind::Cross(_))
        );

        let outcome = if is_cross {
            self.sample_cross(name, call_id)
        } else {
            let item = self.items.get_mut(name).expect("checked by update_leaf");
            let (weight, at_least, coverage) = (item.weight, item.at_least, item.coverage);
            match &mut item.kind {
                ItemKind::Point(state) => state.sample(args, call_id, weight, at_least)?,
                ItemKind::Check(state) => state.sample(args, weight, at_least, coverage),
                _ => SampleOutcome::empty(),
            }
        };

        trace!(leaf = name, delta = outcome.delta, "coverage sample");
        if outcome.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.propagate(name, outcome))
    }

    fn sample_cross(&mut self, name: &str, call_id: u64) -> SampleOutcome {
        let point_names: Vec<String> = match self.items.get(name).map(|i| &i.kind) {
            Some(ItemKind::Cross(state)) => state.items.clone(),
            _ => return SampleOutcome::empty(),
        };

        // the cross fires only when every referenced point was updated by
        // this same sampler call
        let mut hit_lists = Vec::with_capacity(point_names.len());
        for pname in &point_names {
            match self.items.get(pname).map(|i| &i.kind) {
                Some(ItemKind::Point(state)) if state.last_call == call_id => {
                    hit_lists.push(state.call_hits.clone());
                }
                _ => return SampleOutcome::empty(),
            }
        }

        let item = self.items.get_mut(name).expect("cross exists");
        let (weight, at_least) = (item.weight, item.at_least);
        match &mut item.kind {
            ItemKind::Cross(state) => state.sample(&hit_lists, weight, at_least),
            _ => SampleOutcome::empty(),
        }
    }

    /// Apply a leaf outcome to the leaf and every ancestor, bottom-up,
    /// collecting the callbacks due in child-before-parent order.
    fn propagate(&mut self, leaf: &str, outcome: SampleOutcome) -> Vec<CallbackFn> {
        let chain = self.chain_of(leaf);
        let mut fired = Vec::new();

        for (bin, label) in &outcome.covered {
            for n in &chain {
                let item = self.items.get_mut(n).expect("chain item exists");
                item.new_hits.push(bin.clone());
                for bc in &item.bins_callbacks {
                    if bc.label == *label {
                        fired.push(bc.cb.clone());
                    }
                }
            }
        }
        for label in &outcome.extra_labels {
            for n in &chain {
                let item = self.items.get_mut(n).expect("chain item exists");
                for bc in &item.bins_callbacks {
                    if bc.label == *label {
                        fired.push(bc.cb.clone());
                    }
                }
            }
        }

        if outcome.delta != 0 {
            for n in &chain {
                let item = self.items.get_mut(n).expect("chain item exists");
                let old = item.cover_percentage();
                item.coverage = (item.coverage as i64 + outcome.delta).max(0) as u64;
                let new = item.cover_percentage();
                if new > old {
                    for tc in &mut item.threshold_callbacks {
                        if !tc.fired && tc.percent > old && tc.percent <= new {
                            tc.fired = true;
                            fired.push(tc.cb.clone());
                        }
                    }
                }
            }
        }
        fired
    }

    fn chain_of(&self, leaf: &str) -> Vec<String> {
        let mut chain = vec![leaf.to_string()];
        let mut cursor = self.items.get(leaf).and_then(|i| i.parent.clone());
        while let Some(n) = cursor {
            let next = self.items.get(&n).and_then(|i| i.parent.clone());
            chain.push(n);
            cursor = next;
        }
        chain
    }

    /// Recompute leaf coverage from hit counts and fold aggregates up the
    /// tree. Used after a merge changed hit counts wholesale.
    pub(crate) fn recompute_aggregates(&mut self) {
        let names: Vec<String> = self.items.keys().cloned().collect();
        for name in &names {
            let item = self.items.get_mut(name).expect("name enumerated");
            let (weight, at_least) = (item.weight, item.at_least);
            match &mut item.kind {
                ItemKind::Point(state) => {
                    let covered = state.bins.values().filter(|b| b.hits >= at_least).count();
                    item.coverage = weight * covered as u64;
                }
                ItemKind::Cross(state) => {
                    let covered = state.bins.values().filter(|&&h| h >= at_least).count();
                    item.coverage = weight * covered as u64;
                }
                ItemKind::Check(state) => {
                    use crate::check::CheckOutcome;
                    if state.fail_hits > 0 {
                        state.outcome = CheckOutcome::Fail;
                        item.coverage = 0;
                    } else if state.pass_hits >= at_least {
                        state.outcome = CheckOutcome::Pass;
                        item.coverage = weight;
                    } else {
                        item.coverage = 0;
                    }
                }
                ItemKind::Group => {}
            }
        }
        // deepest-first so parents fold already-updated children
        let mut by_depth: Vec<String> = names
            .iter()
            .filter(|n| !self.items[n.as_str()].is_leaf())
            .cloned()
            .collect();
        by_depth.sort_by_key(|n| std::cmp::Reverse(n.matches('.').count()));
        for name in by_depth {
            let children = self.items[name.as_str()].children.clone();
            let total: u64 = children
                .iter()
                .filter_map(|c| self.items.get(c.as_str()))
                .map(|c| c.coverage)
                .sum();
            self.items.get_mut(&name).expect("group exists").coverage = total;
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name
            .split('.')
            .any(|seg| seg.is_empty() || seg.chars().any(char::is_whitespace))
    {
        return Err(CoverageError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::CoverPointBuilder;

    #[test]
    fn test_groups_are_shared_between_siblings() {
        CoverageDb::reset();
        CoverPointBuilder::new("a.b.c").bins([1]).register().unwrap();
        CoverPointBuilder::new("a.b.d").bins([1, 2]).register().unwrap();

        CoverageDb::with(|db| {
            assert_eq!(db.get("a.b").unwrap().children(), &["a.b.c", "a.b.d"]);
            assert_eq!(db.get("a").unwrap().size(), 3);
            assert_eq!(db.get("a.b").unwrap().size(), 3);
        });
    }

    #[test]
    fn test_unknown_name_lookup() {
        CoverageDb::reset();
        CoverageDb::with(|db| {
            assert!(matches!(
                db.get("nope"),
                Err(CoverageError::UnknownName(_))
            ));
        });
    }

    #[test]
    fn test_invalid_names_rejected() {
        CoverageDb::reset();
        for bad in ["", "a..b", ".a", "a.", "a. b"] {
            let err = CoverPointBuilder::new(bad).bins([1]).register();
            assert!(err.is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_leaf_cannot_be_parent() {
        CoverageDb::reset();
        CoverPointBuilder::new("p.leaf").bins([1]).register().unwrap();
        let err = CoverPointBuilder::new("p.leaf.child").bins([1]).register();
        assert!(matches!(err, Err(CoverageError::ParentIsLeaf(_))));
    }

    #[test]
    fn test_names_are_sorted() {
        CoverageDb::reset();
        CoverPointBuilder::new("z.p").bins([1]).register().unwrap();
        CoverPointBuilder::new("a.p").bins([1]).register().unwrap();
        CoverageDb::with(|db| {
            assert_eq!(db.names(), vec!["a", "a.p", "z", "z.p"]);
        });
    }
}
