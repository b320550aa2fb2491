//! Sampler binding
//!
//! A [`Sampler`] is the wrapper-object rendition of binding coverage
//! primitives to a sampling function: it holds an ordered list of leaf
//! names, and every [`Sampler::sample`] call delivers the same arguments
//! to each of them. Crosses listed after their referenced points see the
//! points' matches from the same call.

use crate::db::CoverageDb;
use crate::error::{CoverageError, Result};
use crate::value::SampleArgs;
use tracing::trace;

pub struct Sampler {
    leaves: Vec<String>,
}

impl Sampler {
    /// Bind the named leaves, in sampling order. Every name must already
    /// be registered and refer to a leaf.
    pub fn new<I>(leaves: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let leaves: Vec<String> = leaves.into_iter().map(Into::into).collect();
        CoverageDb::with(|db| {
            for name in &leaves {
                let item = db.get(name)?;
                if !item.is_leaf() {
                    return Err(CoverageError::NotALeaf(name.clone()));
                }
            }
            Ok(())
        })?;
        Ok(Self { leaves })
    }

    /// Compose several samplers into one, equivalent to stacking them in
    /// the given order.
    pub fn section(samplers: impl IntoIterator<Item = Sampler>) -> Sampler {
        Sampler {
            leaves: samplers.into_iter().flat_map(|s| s.leaves).collect(),
        }
    }

    /// Bound leaf names, in sampling order.
    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    /// Deliver one sample to every bound leaf.
    ///
    /// Callbacks run synchronously on this stack, after the leaf that
    /// triggered them finished updating. A failing callback does not stop
    /// the update; the first error is returned once every due callback ran.
    pub fn sample(&self, args: &SampleArgs) -> Result<()> {
        let call_id = CoverageDb::with(|db| db.begin_call());
        trace!(call_id, leaves = self.leaves.len(), "sampling");

        let mut first_err: Option<CoverageError> = None;
        for leaf in &self.leaves {
            let fired = CoverageDb::with(|db| db.update_leaf(leaf, args, call_id))?;
            for cb in fired {
                match cb.try_borrow_mut() {
                    Ok(mut callback) => {
                        if let Err(e) = (*callback)() {
                            first_err.get_or_insert(e);
                        }
                    }
                    // the same callback is already running further up this
                    // stack; treat like a re-entrant sample
                    Err(_) => {
                        first_err.get_or_insert(CoverageError::Reentrancy(leaf.clone()));
                    }
                }
            }
            CoverageDb::with(|db| db.end_update(leaf));
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Wrap a sampling function: each invocation samples the bound leaves
    /// with the call's arguments, then runs the function.
    pub fn wrap<F>(self, mut f: F) -> impl FnMut(&SampleArgs) -> Result<()>
    where
        F: FnMut(&SampleArgs),
    {
        move |args| {
            self.sample(args)?;
            f(args);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::CoverPointBuilder;
    use crate::value::SampleValue;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_sample_updates_bound_leaves() {
        CoverageDb::reset();
        CoverPointBuilder::new("s1.a")
            .bins(0..10)
            .vname("i")
            .register()
            .unwrap();
        CoverPointBuilder::new("s1.b")
            .bins(0..10)
            .vname("x")
            .register()
            .unwrap();

        let sampler = Sampler::new(["s1.a", "s1.b"]).unwrap();
        for i in 0..10i64 {
            sampler
                .sample(&SampleArgs::new().arg("i", i).arg("x", i % 3))
                .unwrap();
        }

        CoverageDb::with(|db| {
            assert_eq!(db.get("s1.a").unwrap().coverage(), 10);
            assert_eq!(db.get("s1.b").unwrap().coverage(), 3);
            assert_eq!(db.get("s1").unwrap().coverage(), 13);
            assert_eq!(db.get("s1").unwrap().size(), 20);
        });
    }

    #[test]
    fn test_unknown_leaf_rejected_at_bind() {
        CoverageDb::reset();
        assert!(matches!(
            Sampler::new(["missing.leaf"]),
            Err(CoverageError::UnknownName(_))
        ));
    }

    #[test]
    fn test_binding_a_group_rejected() {
        CoverageDb::reset();
        CoverPointBuilder::new("s2.p").bins([1]).register().unwrap();
        assert!(matches!(
            Sampler::new(["s2"]),
            Err(CoverageError::NotALeaf(_))
        ));
    }

    #[test]
    fn test_section_stacks_in_order() {
        CoverageDb::reset();
        CoverPointBuilder::new("s3.a").bins([0]).register().unwrap();
        CoverPointBuilder::new("s3.b").bins([0]).register().unwrap();
        let a = Sampler::new(["s3.a"]).unwrap();
        let b = Sampler::new(["s3.b"]).unwrap();
        let section = Sampler::section([a, b]);
        assert_eq!(section.leaves(), &["s3.a", "s3.b"]);
    }

    #[test]
    fn test_wrap_runs_function_after_sampling() {
        CoverageDb::reset();
        CoverPointBuilder::new("s4.p").bins([7]).register().unwrap();
        let seen = Rc::new(Cell::new(false));
        let seen2 = seen.clone();

        let mut wrapped = Sampler::new(["s4.p"]).unwrap().wrap(move |_| {
            seen2.set(true);
        });
        wrapped(&SampleArgs::new().arg("v", 7)).unwrap();

        assert!(seen.get());
        CoverageDb::with(|db| assert_eq!(db.get("s4.p").unwrap().coverage(), 1));
    }

    #[test]
    fn test_new_hits_consumed_on_read() {
        CoverageDb::reset();
        CoverPointBuilder::new("s5.p").bins(0..4).register().unwrap();
        let sampler = Sampler::new(["s5.p"]).unwrap();

        sampler.sample(&SampleArgs::new().arg("v", 1)).unwrap();
        sampler.sample(&SampleArgs::new().arg("v", 2)).unwrap();
        CoverageDb::with(|db| {
            let hits = db.item_mut("s5.p").unwrap().take_new_hits();
            assert_eq!(hits, vec![SampleValue::Int(1), SampleValue::Int(2)]);
            assert!(db.item_mut("s5.p").unwrap().take_new_hits().is_empty());
        });

        // a second hit on an already covered bin is not a new hit
        sampler.sample(&SampleArgs::new().arg("v", 1)).unwrap();
        sampler.sample(&SampleArgs::new().arg("v", 3)).unwrap();
        CoverageDb::with(|db| {
            let hits = db.item_mut("s5.p").unwrap().take_new_hits();
            assert_eq!(hits, vec![SampleValue::Int(3)]);
        });
    }

    #[test]
    fn test_reentrant_sample_from_callback_is_an_error() {
        CoverageDb::reset();
        CoverPointBuilder::new("s7.p").bins([0, 1]).register().unwrap();
        CoverageDb::with(|db| {
            db.item_mut("s7.p")
                .unwrap()
                .add_threshold_callback(50.0, || {
                    // sampling the leaf that is still mid-update
                    let nested = Sampler::new(["s7.p"]).unwrap();
                    nested.sample(&SampleArgs::new().arg("v", 1))
                })
                .unwrap();
        });

        let sampler = Sampler::new(["s7.p"]).unwrap();
        let err = sampler.sample(&SampleArgs::new().arg("v", 0));
        assert!(matches!(err, Err(CoverageError::Reentrancy(_))));
        // the outer hit still counted; the nested one did not
        CoverageDb::with(|db| assert_eq!(db.get("s7.p").unwrap().coverage(), 1));
    }

    #[test]
    fn test_callback_may_sample_other_leaves() {
        CoverageDb::reset();
        CoverPointBuilder::new("s8.p").bins([0]).register().unwrap();
        CoverPointBuilder::new("s8.q").bins([0]).register().unwrap();
        CoverageDb::with(|db| {
            db.item_mut("s8.p")
                .unwrap()
                .add_threshold_callback(100.0, || {
                    let other = Sampler::new(["s8.q"]).unwrap();
                    other.sample(&SampleArgs::new().arg("v", 0))
                })
                .unwrap();
        });

        let sampler = Sampler::new(["s8.p"]).unwrap();
        sampler.sample(&SampleArgs::new().arg("v", 0)).unwrap();
        CoverageDb::with(|db| {
            assert_eq!(db.get("s8.p").unwrap().coverage(), 1);
            assert_eq!(db.get("s8.q").unwrap().coverage(), 1);
        });
    }

    #[test]
    fn test_callback_error_does_not_stop_update() {
        CoverageDb::reset();
        CoverPointBuilder::new("s6.p").bins([0, 1]).register().unwrap();
        let later_fired = Rc::new(Cell::new(false));
        let later = later_fired.clone();

        CoverageDb::with(|db| {
            let item = db.item_mut("s6.p").unwrap();
            item.add_threshold_callback(40.0, || {
                Err(CoverageError::Callback("boom".into()))
            })
            .unwrap();
            item.add_threshold_callback(50.0, move || {
                later.set(true);
                Ok(())
            })
            .unwrap();
        });

        let sampler = Sampler::new(["s6.p"]).unwrap();
        let err = sampler.sample(&SampleArgs::new().arg("v", 0));
        assert!(matches!(err, Err(CoverageError::Callback(_))));
        // the second callback still ran, and the hit still counted
        assert!(later_fired.get());
        CoverageDb::with(|db| assert_eq!(db.get("s6.p").unwrap().coverage(), 1));
    }
}
