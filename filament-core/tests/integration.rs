//! Integration Tests for the Reactive Engine
//!
//! These tests exercise cells, maps, computeds, effects, and watch bindings
//! together through whole trigger cascades.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use filament_core::{ComputedState, ReactiveMap, Runtime};

/// Reading a computed over a keyed slot: the derivation runs on first read,
/// not before, and exactly once more after the slot changes.
#[test]
fn computed_over_a_map_slot_evaluates_per_read() {
    let rt = Runtime::new();
    let x: ReactiveMap<&str, i32> = rt.map();
    let derivations = Arc::new(AtomicI32::new(0));

    let derivations_in_derive = derivations.clone();
    let x_in_derive = x.clone();
    let c = rt.computed(move || {
        derivations_in_derive.fetch_add(1, Ordering::SeqCst);
        x_in_derive.get(&"foo")
    });

    // First read: slot is absent, derivation runs once.
    assert_eq!(c.get(), None);
    assert_eq!(derivations.load(Ordering::SeqCst), 1);

    // The write dirties the computed but does not re-derive.
    x.insert("foo", 1);
    assert_eq!(derivations.load(Ordering::SeqCst), 1);

    assert_eq!(c.get(), Some(1));
    assert_eq!(derivations.load(Ordering::SeqCst), 2);
}

/// Two effects forming a relay: a change to the head observable cascades
/// through both in a single synchronous mutation, with no duplicated or
/// missed step.
#[test]
fn effect_relay_cascades_in_one_mutation() {
    let rt = Runtime::new();
    let a = rt.cell(0);
    let b = rt.cell(0);
    let c = rt.cell(0);

    // c <- b
    let b_in_effect = b.clone();
    let c_in_effect = c.clone();
    rt.effect(move || {
        c_in_effect.set(b_in_effect.get());
    });
    // b <- a
    let a_in_effect = a.clone();
    let b_in_effect = b.clone();
    rt.effect(move || {
        b_in_effect.set(a_in_effect.get());
    });

    a.set(10);
    assert_eq!(c.get_untracked(), 10);
}

/// Chain propagation through computeds: `c2 = c1 + 10`, `c1 = base * 2`.
/// Each change to the base re-derives `c1` exactly once, and the effect on
/// `c2` observes the final value.
#[test]
fn computed_chain_propagates_without_double_derivation() {
    let rt = Runtime::new();
    let base = rt.cell(1);
    let c1_derivations = Arc::new(AtomicI32::new(0));
    let observed = Arc::new(AtomicI32::new(0));

    let c1 = {
        let base = base.clone();
        let derivations = c1_derivations.clone();
        rt.computed(move || {
            derivations.fetch_add(1, Ordering::SeqCst);
            base.get() * 2
        })
    };
    let c2 = {
        let c1 = c1.clone();
        rt.computed(move || c1.get() + 10)
    };

    {
        let c2 = c2.clone();
        let observed = observed.clone();
        rt.effect(move || {
            observed.store(c2.get(), Ordering::SeqCst);
        });
    }
    assert_eq!(observed.load(Ordering::SeqCst), 12);
    assert_eq!(c1_derivations.load(Ordering::SeqCst), 1);

    base.set(2);
    assert_eq!(observed.load(Ordering::SeqCst), 14);
    assert_eq!(c1_derivations.load(Ordering::SeqCst), 2);

    base.set(5);
    assert_eq!(observed.load(Ordering::SeqCst), 20);
    assert_eq!(c1_derivations.load(Ordering::SeqCst), 3);
}

/// A diamond: two computeds over the same base feed a third. The cascade
/// terminates and the top of the diamond settles on the right value.
#[test]
fn diamond_dependency_terminates_and_settles() {
    let rt = Runtime::new();
    let base = rt.cell(1);

    let left = {
        let base = base.clone();
        rt.computed(move || base.get() * 2)
    };
    let right = {
        let base = base.clone();
        rt.computed(move || base.get() * 3)
    };
    let top = {
        let left = left.clone();
        let right = right.clone();
        rt.computed(move || left.get() + right.get())
    };

    let observed = Arc::new(AtomicI32::new(0));
    {
        let top = top.clone();
        let observed = observed.clone();
        rt.effect(move || {
            observed.store(top.get(), Ordering::SeqCst);
        });
    }
    assert_eq!(observed.load(Ordering::SeqCst), 5);

    base.set(10);
    assert_eq!(observed.load(Ordering::SeqCst), 50);
    assert_eq!(top.state(), ComputedState::Clean);
}

/// An unchanged intermediate derivation cuts the chain: dependents of the
/// computed are not re-run.
#[test]
fn unchanged_intermediate_value_stops_the_cascade() {
    let rt = Runtime::new();
    let base = rt.cell(1_i32);
    let downstream_runs = Arc::new(AtomicI32::new(0));

    let sign = {
        let base = base.clone();
        rt.computed(move || base.get().signum())
    };
    {
        let sign = sign.clone();
        let runs = downstream_runs.clone();
        rt.effect(move || {
            let _ = sign.get();
            runs.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(downstream_runs.load(Ordering::SeqCst), 1);

    // Still positive: the computed re-derives, the effect stays quiet.
    base.set(7);
    assert_eq!(downstream_runs.load(Ordering::SeqCst), 1);

    base.set(-7);
    assert_eq!(downstream_runs.load(Ordering::SeqCst), 2);
}

/// Watch over a keyed slot: no callback on registration, one callback per
/// distinct change.
#[test]
fn watch_counts_distinct_changes() {
    let rt = Runtime::new();
    let x: ReactiveMap<&str, i32> = rt.map();
    let calls = Arc::new(AtomicI32::new(0));

    let x_in_source = x.clone();
    let calls_in_callback = calls.clone();
    rt.watch(
        move || {
            let _ = x_in_source.get(&"foo");
        },
        move || {
            calls_in_callback.fetch_add(1, Ordering::SeqCst);
        },
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    x.insert("foo", 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Unchanged value: nothing fires.
    x.insert("foo", 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    x.insert("foo", 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Effects subscribe to collection aggregates independently of elements.
#[test]
fn map_aggregates_drive_derived_state() {
    let rt = Runtime::new();
    let inventory: ReactiveMap<String, i32> = rt.map();
    let total = Arc::new(AtomicI32::new(-1));

    {
        let inventory = inventory.clone();
        let total = total.clone();
        rt.effect(move || {
            let sum: i32 = inventory.values().iter().sum();
            total.store(sum, Ordering::SeqCst);
        });
    }
    assert_eq!(total.load(Ordering::SeqCst), 0);

    inventory.insert("apples".to_owned(), 3);
    assert_eq!(total.load(Ordering::SeqCst), 3);

    inventory.insert("pears".to_owned(), 4);
    assert_eq!(total.load(Ordering::SeqCst), 7);

    inventory.insert("apples".to_owned(), 5);
    assert_eq!(total.load(Ordering::SeqCst), 9);

    inventory.remove(&"pears".to_owned());
    assert_eq!(total.load(Ordering::SeqCst), 5);

    inventory.clear();
    assert_eq!(total.load(Ordering::SeqCst), 0);
}

/// Read-only values reject writes end to end: the underlying value never
/// changes and no subscriber runs.
#[test]
fn readonly_values_never_mutate_or_notify() {
    let rt = Runtime::new();
    let config = rt.readonly_cell("blue".to_owned());
    let runs = Arc::new(AtomicI32::new(0));

    {
        let config = config.clone();
        let runs = runs.clone();
        rt.effect(move || {
            let _ = config.get();
            runs.fetch_add(1, Ordering::SeqCst);
        });
    }

    config.set("red".to_owned());
    assert_eq!(config.get_untracked(), "blue");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Independent runtimes share nothing: a mutation in one never reaches an
/// effect registered in the other.
#[test]
fn runtimes_are_isolated() {
    let rt_a = Runtime::new();
    let rt_b = Runtime::new();
    let cell_a = rt_a.cell(0);
    let runs_b = Arc::new(AtomicI32::new(0));

    {
        let cell_a = cell_a.clone();
        let runs_b = runs_b.clone();
        rt_b.effect(move || {
            // Reads a cell owned by the other runtime: tracked there, where
            // no computation is active, so no subscription forms.
            let _ = cell_a.get();
            runs_b.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(runs_b.load(Ordering::SeqCst), 1);

    cell_a.set(1);
    assert_eq!(runs_b.load(Ordering::SeqCst), 1);
}

/// The debug registry snapshot reflects live subscriptions and is keyed by
/// entity id.
#[test]
fn registry_snapshot_is_inspectable_in_debug_builds() {
    let rt = Runtime::new();
    let cell = rt.cell(0);

    {
        let cell = cell.clone();
        rt.effect(move || {
            let _ = cell.get();
        });
    }

    match rt.registry_snapshot() {
        Ok(snapshot) => {
            let entities = snapshot["entities"].as_array().expect("entity list");
            assert!(entities
                .iter()
                .any(|e| e["entity"] == cell.entity().raw()));
        }
        Err(err) => {
            // Release builds refuse the dump.
            assert!(!cfg!(debug_assertions), "unexpected error: {err}");
        }
    }
}
