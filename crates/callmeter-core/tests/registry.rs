#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use callmeter_core::{MetricDesc, MetricKind, Registry, RegistryScope};

#[test]
fn global_is_shared_isolated_is_not() {
    let a = Registry::global();
    let b = Registry::create(false);
    assert!(a.same_as(&b));
    assert_eq!(a.id(), 0);
    assert_eq!(a.scope(), RegistryScope::Global);

    let x = Registry::isolated();
    let y = Registry::create(true);
    assert!(!x.same_as(&y));
    assert!(!x.same_as(&a));
    assert_ne!(x.id(), y.id());
    assert_ne!(x.id(), 0);
    assert_eq!(y.scope(), RegistryScope::Isolated);
}

#[test]
fn matching_schema_reuses_family() {
    let reg = Registry::isolated();
    let first = reg
        .register_or_get(MetricDesc::counter("jobs_total", "Jobs").labels(&["queue"]))
        .unwrap();
    let again = reg
        .register_or_get(MetricDesc::counter("jobs_total", "Different help").labels(&["queue"]))
        .unwrap();

    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(again.desc().help, "Jobs");
    assert_eq!(reg.family_count(), 1);
}

#[test]
fn schema_mismatch_is_a_conflict() {
    let reg = Registry::isolated();
    let c = reg.counter_vec("jobs_total", "Jobs", &["queue"]).unwrap();
    c.inc(&["default"]).unwrap();

    let kind = reg.gauge_vec("jobs_total", "Jobs", &["queue"]).unwrap_err();
    assert_eq!(kind.code().as_str(), "SCHEMA_CONFLICT");

    let labels = reg.counter_vec("jobs_total", "Jobs", &["queue", "host"]).unwrap_err();
    assert_eq!(labels.code().as_str(), "SCHEMA_CONFLICT");

    let order = reg.counter_vec("pair_total", "Pair", &["a", "b"]).unwrap();
    let swapped = reg.counter_vec("pair_total", "Pair", &["b", "a"]).unwrap_err();
    assert_eq!(swapped.code().as_str(), "SCHEMA_CONFLICT");
    drop(order);

    reg.histogram_vec("lat", "Latency", &[], &[0.1, 1.0]).unwrap();
    let buckets = reg.histogram_vec("lat", "Latency", &[], &[0.5]).unwrap_err();
    assert_eq!(buckets.code().as_str(), "SCHEMA_CONFLICT");

    // Existing family untouched.
    let fam = reg.family("jobs_total").unwrap();
    assert_eq!(fam.kind(), MetricKind::Counter);
    assert_eq!(c.get(&["default"]), Some(1.0));
}

#[test]
fn concurrent_first_access_creates_one_family() {
    let reg = Registry::isolated();
    let families: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let reg = &reg;
                s.spawn(move || reg.counter_vec("race_total", "Race", &["k"]).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(reg.family_count(), 1);
    for c in &families {
        assert!(Arc::ptr_eq(c.family(), families[0].family()));
        c.inc(&["x"]).unwrap();
    }
    assert_eq!(families[0].get(&["x"]), Some(16.0));
}

#[test]
fn concurrent_updates_are_not_lost() {
    let reg = Registry::isolated();
    let c = reg.counter_vec("hits_total", "Hits", &["k"]).unwrap();
    let g = reg.gauge_vec("level", "Level", &["k"]).unwrap();

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..1000 {
                    c.inc(&["a"]).unwrap();
                    g.inc(&["a"]).unwrap();
                    g.dec(&["a"]).unwrap();
                }
            });
        }
    });

    assert_eq!(c.get(&["a"]), Some(8000.0));
    assert_eq!(g.get(&["a"]), Some(0.0));
}

#[test]
fn label_value_count_checked() {
    let reg = Registry::isolated();
    let c = reg.counter_vec("c_total", "C", &["a", "b"]).unwrap();
    let err = c.inc(&["only-one"]).unwrap_err();
    assert_eq!(err.code().as_str(), "LABEL_CARDINALITY");
    assert_eq!(c.family().series_count(), 0);
}

#[test]
fn counters_only_go_up() {
    let reg = Registry::isolated();
    let c = reg.counter_vec("c_total", "C", &[]).unwrap();
    for bad in [-1.0, f64::NAN, f64::INFINITY] {
        let err = c.inc_by(&[], bad).unwrap_err();
        assert_eq!(err.code().as_str(), "INVALID_VALUE");
    }
    c.inc_by(&[], 2.5).unwrap();
    assert_eq!(c.get(&[]), Some(2.5));
}

#[test]
fn invalid_names_rejected_at_registration() {
    let reg = Registry::isolated();
    assert_eq!(
        reg.counter_vec("bad-name", "x", &[]).unwrap_err().code().as_str(),
        "INVALID_NAME"
    );
    assert_eq!(
        reg.counter_vec("ok_total", "x", &["bad label"]).unwrap_err().code().as_str(),
        "INVALID_NAME"
    );
    assert_eq!(reg.family_count(), 0);
}

#[test]
fn collect_follows_registration_order() {
    let reg = Registry::isolated();
    reg.gauge_vec("zeta", "z", &[]).unwrap();
    reg.counter_vec("alpha_total", "a", &[]).unwrap();
    reg.histogram_vec("mid_seconds", "m", &[], &[1.0]).unwrap();

    let names: Vec<String> = reg.collect().into_iter().map(|f| f.name).collect();
    assert_eq!(names, vec!["zeta", "alpha_total", "mid_seconds"]);
}

#[test]
fn isolated_registries_do_not_share_same_named_families() {
    let a = Registry::isolated();
    let b = Registry::isolated();
    let fa = a.counter_vec("f_total", "f", &["function"]).unwrap();
    let fb = b.counter_vec("f_total", "f", &["function"]).unwrap();
    fb.touch(&["f"]).unwrap();
    let before = b.collect();

    fa.inc(&["f"]).unwrap();
    fa.inc(&["f"]).unwrap();

    assert_eq!(fa.get(&["f"]), Some(2.0));
    assert_eq!(fb.get(&["f"]), Some(0.0));
    assert_eq!(b.collect(), before);
}

#[test]
fn histogram_snapshots_are_never_torn() {
    let reg = Registry::isolated();
    let h = reg.histogram_vec("obs", "Observations", &["k"], &[0.5, 2.0]).unwrap();

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..5000 {
                    h.observe(&["a"], 1.0).unwrap();
                }
            });
        }
        s.spawn(|| {
            for _ in 0..200 {
                for fam in reg.collect() {
                    for series in &fam.series {
                        let hs = series.value.as_histogram().unwrap();
                        assert_eq!(hs.buckets[0].1, 0);
                        assert_eq!(hs.buckets[1].1, hs.count);
                        assert_eq!(hs.buckets[2].1, hs.count);
                        assert_eq!(hs.sum, hs.count as f64);
                    }
                }
            }
        });
    });

    let hs = h.get(&["a"]).unwrap();
    assert_eq!(hs.count, 20_000);
    assert_eq!(hs.sum, 20_000.0);
}
