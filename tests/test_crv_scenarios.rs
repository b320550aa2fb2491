//! End-to-end constrained randomization scenarios.

use std::collections::HashMap;
use std::collections::HashSet;
use vigil::{Constraint, RandCore, Randomized};

struct Point {
    core: RandCore,
}

impl Randomized for Point {
    fn rand_core(&self) -> &RandCore {
        &self.core
    }
    fn rand_core_mut(&mut self) -> &mut RandCore {
        &mut self.core
    }
}

fn point(seed: u64) -> Point {
    let mut core = RandCore::with_seed(seed);
    core.set("x", 0);
    core.set("y", 0);
    core.add_rand("x", -10..10i64).unwrap();
    core.add_rand("y", -10..10i64).unwrap();
    core.add_constraint(Constraint::hard(["x", "y"], |v| v[0].int() < v[1].int()))
        .unwrap();
    Point { core }
}

#[test]
fn test_point_constraint_over_many_draws() {
    let mut p = point(1);
    let mut x_counts: HashMap<i64, u32> = HashMap::new();
    for _ in 0..1000 {
        p.randomize().unwrap();
        let (x, y) = (p.core.int("x"), p.core.int("y"));
        assert!(x < y);
        assert!((-10..10).contains(&x));
        assert!((-10..10).contains(&y));
        *x_counts.entry(x).or_insert(0) += 1;
    }
    // x = 9 admits no y above it; the lower end dominates
    assert!(!x_counts.contains_key(&9));
    assert!(x_counts.contains_key(&-10));
    assert!(x_counts[&-10] > *x_counts.get(&8).unwrap_or(&0));
}

#[test]
fn test_unconstrained_variable_covers_its_domain() {
    let mut sizes_seen: HashSet<String> = HashSet::new();
    for seed in 0..30 {
        let mut core = RandCore::with_seed(seed);
        core.set("x", 0);
        core.set("y", 0);
        core.set("size", "small");
        core.add_rand("x", 0..10i64).unwrap();
        core.add_rand("y", 0..10i64).unwrap();
        core.add_rand("size", ["small", "medium", "large"]).unwrap();
        core.add_constraint(Constraint::hard(["x", "y"], |v| v[0].int() < v[1].int()))
            .unwrap();

        let mut obj = Point { core };
        obj.randomize().unwrap();
        assert!(obj.core.int("x") < obj.core.int("y"));
        sizes_seen.insert(
            obj.core
                .get("size")
                .unwrap()
                .as_str()
                .unwrap()
                .to_string(),
        );
    }
    for size in ["small", "medium", "large"] {
        assert!(sizes_seen.contains(size), "{size} never drawn");
    }
}

#[test]
fn test_transaction_with_mixed_constraints() {
    // delays with a joint ordering constraint and layered distributions
    let mut core = RandCore::with_seed(5);
    core.set("addr", 5);
    core.set("data", 0);
    core.set("delay1", 1);
    core.set("delay2", 0);
    core.add_rand("data", 0..20000i64).unwrap();
    core.add_rand("delay1", 0..10i64).unwrap();
    core.add_rand("delay2", 0..10i64).unwrap();
    core.add_constraint(Constraint::hard(["delay1", "delay2"], |v| {
        v[0].int() <= v[1].int()
    }))
    .unwrap();
    core.add_constraint(Constraint::hard(["addr", "data"], |v| {
        if v[0].int() == 0 {
            v[1].int() < 10000
        } else {
            v[1].int() < 5000
        }
    }))
    .unwrap();
    core.add_constraint(Constraint::dist(["delay1"], |v| {
        if v[0].int() < 5 {
            0.7
        } else {
            0.3
        }
    }))
    .unwrap();

    let mut t = Point { core };
    for _ in 0..25 {
        t.randomize().unwrap();
        assert!(t.core.int("delay1") <= t.core.int("delay2"));
        assert!(t.core.int("data") < 5000); // addr == 5
    }

    t.core.set("addr", 0);
    let mut seen_large_data = false;
    for _ in 0..50 {
        t.randomize().unwrap();
        let data = t.core.int("data");
        assert!(data < 10000);
        seen_large_data |= data >= 5000;
    }
    assert!(seen_large_data);
}

#[test]
fn test_overconstrained_transaction_fails_every_time() {
    let mut core = RandCore::with_seed(8);
    core.set("delay1", 0);
    core.set("delay2", 0);
    core.set("delay3", 0);
    core.add_rand("delay1", 0..10i64).unwrap();
    core.add_rand("delay2", 0..10i64).unwrap();
    core.add_rand("delay3", 0..10i64).unwrap();
    core.add_constraint(Constraint::hard(["delay1", "delay2"], |v| {
        v[0].int() <= v[1].int()
    }))
    .unwrap();
    core.add_constraint(Constraint::hard(["delay2", "delay3"], |v| {
        v[1].int() > v[0].int()
    }))
    .unwrap();
    // forces delay1 = 9, which leaves delay2 = 9 and no delay3 above it
    core.add_constraint(Constraint::hard(["delay1"], |v| v[0].int() == 9))
        .unwrap();

    let mut t = Point { core };
    for _ in 0..10 {
        assert!(t.randomize().is_err());
    }
}

#[test]
fn test_multidimensional_distribution() {
    // joint distribution pushing x and y apart
    let mut core = RandCore::with_seed(21);
    core.set("x", 0);
    core.set("y", 0);
    core.add_rand("x", 0..10i64).unwrap();
    core.add_rand("y", 0..10i64).unwrap();
    core.add_constraint(Constraint::dist(["x", "y"], |v| {
        (v[0].int() - v[1].int()).abs() as f64
    }))
    .unwrap();

    let mut p = Point { core };
    let mut spread = 0i64;
    for _ in 0..100 {
        p.randomize().unwrap();
        spread += (p.core.int("x") - p.core.int("y")).abs();
    }
    // uniform choice would average |x-y| ~ 3.3; the weighting pulls it up
    assert!(spread > 400, "spread = {spread}");
}

#[test]
fn test_post_randomize_accumulates() {
    struct Acc {
        core: RandCore,
        total: i64,
    }
    impl Randomized for Acc {
        fn rand_core(&self) -> &RandCore {
            &self.core
        }
        fn rand_core_mut(&mut self) -> &mut RandCore {
            &mut self.core
        }
        fn post_randomize(&mut self) {
            self.total += self.core.int("x");
        }
    }

    let mut core = RandCore::with_seed(3);
    core.set("x", 0);
    core.add_rand("x", 1..10i64).unwrap();
    let mut acc = Acc { core, total: 0 };
    for _ in 0..5 {
        acc.randomize().unwrap();
    }
    assert!(acc.total >= 5);
}

#[test]
fn test_consecutive_randomize_calls_stay_valid() {
    let mut p = point(13);
    p.randomize().unwrap();
    let first = (p.core.int("x"), p.core.int("y"));
    let mut changed = false;
    for _ in 0..20 {
        p.randomize().unwrap();
        assert!(p.core.int("x") < p.core.int("y"));
        changed |= (p.core.int("x"), p.core.int("y")) != first;
    }
    assert!(changed, "twenty draws never moved");
}
