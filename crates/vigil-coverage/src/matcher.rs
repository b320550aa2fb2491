//! Bin matching
//!
//! A [`BinMatcher`] decides which bins a sample hits: the sample arguments
//! are reduced to a single value by a transformation, then tested against
//! each bin through a relation. The default transformation picks a named
//! argument (or the lone argument, or the tuple of all arguments); the
//! default relation is equality.

use crate::error::{CoverageError, Result};
use crate::value::{SampleArgs, SampleValue};

/// Transformation from sample arguments to the value tested against bins.
///
/// Stateful transformations are allowed (transition bins keep a history
/// window here); the matcher calls it exactly once per sample.
pub type TransformFn = Box<dyn FnMut(&SampleArgs) -> SampleValue>;

/// Relation between a transformed sample value and a bin.
pub type RelationFn = Box<dyn FnMut(&SampleValue, &SampleValue) -> bool>;

pub struct BinMatcher {
    /// Owning leaf name, for error messages
    item: String,
    vname: Option<String>,
    xf: Option<TransformFn>,
    /// `None` means equality
    rel: Option<RelationFn>,
    /// Injective: stop at the first matching bin
    inj: bool,
}

impl BinMatcher {
    pub(crate) fn new(
        item: String,
        vname: Option<String>,
        xf: Option<TransformFn>,
        rel: Option<RelationFn>,
        inj: bool,
    ) -> Self {
        Self {
            item,
            vname,
            xf,
            rel,
            inj,
        }
    }

    /// Reduce the sample arguments to the value tested against bins.
    pub(crate) fn transform(&mut self, args: &SampleArgs) -> Result<SampleValue> {
        if let Some(xf) = self.xf.as_mut() {
            return Ok(xf(args));
        }
        if let Some(vname) = &self.vname {
            return args
                .get(vname)
                .cloned()
                .ok_or_else(|| CoverageError::UnknownArgument {
                    item: self.item.clone(),
                    vname: vname.clone(),
                });
        }
        let mut values = args.values();
        match args.len() {
            0 => Err(CoverageError::EmptySample(self.item.clone())),
            1 => Ok(values.next().cloned().unwrap_or(SampleValue::Int(0))),
            _ => Ok(SampleValue::Tuple(values.cloned().collect())),
        }
    }

    /// Ordered list of bins hit by this sample.
    pub(crate) fn matches<'b>(
        &mut self,
        args: &SampleArgs,
        bins: impl Iterator<Item = &'b SampleValue>,
    ) -> Result<Vec<SampleValue>> {
        let value = self.transform(args)?;
        let mut matched = Vec::new();
        for bin in bins {
            let hit = match self.rel.as_mut() {
                Some(rel) => rel(&value, bin),
                None => value == *bin,
            };
            if hit {
                matched.push(bin.clone());
                if self.inj {
                    break;
                }
            }
        }
        Ok(matched)
    }
}

/// Ready-made relations for common bin shapes.
pub mod rel {
    use crate::value::SampleValue;

    /// Inclusive range containment: matches `Int(v)` against a
    /// `Tuple([Int(lo), Int(hi)])` bin.
    pub fn in_range(value: &SampleValue, bin: &SampleValue) -> bool {
        match (value.as_int(), bin.as_tuple()) {
            (Some(v), Some([lo, hi])) => match (lo.as_int(), hi.as_int()) {
                (Some(lo), Some(hi)) => lo <= v && v <= hi,
                _ => false,
            },
            _ => false,
        }
    }
}
