#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::io;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::FutureExt;

use callmeter_core::{instrument, ExecutionModel, MetricKind, Outcome, Registry};

mod support;
use support::{calls, duration, in_flight};

#[tokio::test]
async fn duration_spans_suspension() {
    let reg = Registry::isolated();
    let validate = instrument()
        .name("validate_data")
        .registry(&reg)
        .wrap_async(|id: u32| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, io::Error>(id)
        })
        .unwrap();

    for i in 0..3 {
        assert_eq!(validate.call(i).await.unwrap(), i);
    }

    assert_eq!(validate.probe().execution_model(), ExecutionModel::Async);
    assert_eq!(calls(&reg, "validate_data", Outcome::Success), 3.0);
    assert_eq!(in_flight(&reg, "validate_data"), 0.0);
    let h = duration(&reg, "validate_data");
    assert_eq!(h.count, 3);
    assert!(h.sum >= 0.15, "sum={}", h.sum);
}

#[tokio::test]
async fn failure_propagates_unchanged() {
    let reg = Registry::isolated();
    let flaky = instrument()
        .name("flaky")
        .registry(&reg)
        .wrap_async(|_: ()| async {
            tokio::task::yield_now().await;
            Err::<(), _>(io::Error::new(io::ErrorKind::TimedOut, "upstream timed out"))
        })
        .unwrap();

    let err = flaky.call(()).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    assert_eq!(err.to_string(), "upstream timed out");

    assert_eq!(calls(&reg, "flaky", Outcome::Failure), 1.0);
    assert_eq!(calls(&reg, "flaky", Outcome::Success), 0.0);
    assert_eq!(in_flight(&reg, "flaky"), 0.0);
}

#[tokio::test]
async fn cancelled_call_releases_gauge() {
    let reg = Registry::isolated();
    let slow = instrument()
        .name("slow")
        .registry(&reg)
        .wrap_async(|_: ()| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), String>(())
        })
        .unwrap();

    let res = tokio::time::timeout(Duration::from_millis(20), slow.call(())).await;
    assert!(res.is_err());

    assert_eq!(in_flight(&reg, "slow"), 0.0);
    assert_eq!(calls(&reg, "slow", Outcome::Success), 0.0);
    assert_eq!(calls(&reg, "slow", Outcome::Failure), 0.0);
    assert_eq!(duration(&reg, "slow").count, 0);
}

#[tokio::test]
async fn interleaved_calls_share_the_gauge() {
    let reg = Registry::isolated();
    let work = instrument()
        .name("work")
        .registry(&reg)
        .wrap_async(|_: ()| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<(), String>(())
        })
        .unwrap();

    let (results, seen) = tokio::join!(join_all((0..10).map(|_| work.call(()))), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        in_flight(&reg, "work")
    });

    assert_eq!(results.len(), 10);
    assert_eq!(seen, 10.0);
    assert_eq!(in_flight(&reg, "work"), 0.0);
    assert_eq!(calls(&reg, "work", Outcome::Success), 10.0);
    assert_eq!(duration(&reg, "work").count, 10);
}

#[tokio::test]
async fn sync_and_async_wrapping_have_the_same_shape() {
    let sync_reg = Registry::isolated();
    let async_reg = Registry::isolated();

    let s = instrument()
        .name("job")
        .registry(&sync_reg)
        .wrap(|fail: bool| if fail { Err("no") } else { Ok(()) })
        .unwrap();
    let a = instrument()
        .name("job")
        .registry(&async_reg)
        .wrap_async(|fail: bool| async move { if fail { Err("no") } else { Ok(()) } })
        .unwrap();

    for fail in [false, true, false] {
        let _ = s.call(fail);
        let _ = a.call(fail).await;
    }

    let shape = |reg: &Registry| -> Vec<(String, MetricKind, Vec<String>, Vec<Vec<String>>)> {
        reg.collect()
            .into_iter()
            .map(|f| {
                let series = f.series.iter().map(|s| s.label_values.clone()).collect();
                (f.name, f.kind, f.label_names, series)
            })
            .collect()
    };
    assert_eq!(shape(&sync_reg), shape(&async_reg));

    for reg in [&sync_reg, &async_reg] {
        assert_eq!(calls(reg, "job", Outcome::Success), 2.0);
        assert_eq!(calls(reg, "job", Outcome::Failure), 1.0);
        assert_eq!(duration(reg, "job").count, 2);
    }
}

#[tokio::test]
async fn panic_inside_async_body_is_a_failure() {
    let reg = Registry::isolated();
    let boom = instrument()
        .name("async_boom")
        .registry(&reg)
        .wrap_async(|fail: bool| async move {
            tokio::task::yield_now().await;
            if fail {
                panic!("async kaboom");
            }
            Ok::<(), String>(())
        })
        .unwrap();

    boom.call(false).await.unwrap();
    let res = AssertUnwindSafe(boom.call(true)).catch_unwind().await;
    let payload = res.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"async kaboom"));

    assert_eq!(calls(&reg, "async_boom", Outcome::Failure), 1.0);
    assert_eq!(calls(&reg, "async_boom", Outcome::Success), 1.0);
    assert_eq!(in_flight(&reg, "async_boom"), 0.0);
}

async fn tick() -> u64 {
    tokio::task::yield_now().await;
    7
}

#[tokio::test]
async fn async_plain_return_values_count_as_success() {
    let reg = Registry::isolated();
    let ticker = instrument()
        .registry(&reg)
        .wrap_async(|_: ()| tick())
        .unwrap();
    let unit = instrument()
        .name("heartbeat")
        .registry(&reg)
        .wrap_async(|_: ()| async {})
        .unwrap();

    assert_eq!(ticker.call_infallible(()).await, 7);
    unit.call_infallible(()).await;
    unit.call_infallible(()).await;

    let name = ticker.function().to_string();
    assert_eq!(calls(&reg, &name, Outcome::Success), 1.0);
    assert_eq!(calls(&reg, "heartbeat", Outcome::Success), 2.0);
    assert_eq!(calls(&reg, "heartbeat", Outcome::Failure), 0.0);
    assert_eq!(duration(&reg, "heartbeat").count, 2);
    assert_eq!(in_flight(&reg, "heartbeat"), 0.0);
}
