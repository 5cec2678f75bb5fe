//! End-to-end fleet behaviour: ingress, health gating, alarm-driven scaling.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use elastic_pool::monitor::MetricSource;
use elastic_pool::pool::MemberState;

mod common;

const CONVERGE: Duration = Duration::from_secs(10);

#[tokio::test]
async fn traffic_is_spread_across_healthy_members() {
    let a = common::start_mock_worker("worker-a").await;
    let b = common::start_mock_worker("worker-b").await;
    let fleet = common::start_fleet(common::test_config(2), vec![a, b], None).await;

    assert!(common::wait_for(CONVERGE, || fleet.pool.routing_table().len() == 2).await);

    let client = common::client();
    let mut seen = HashSet::new();
    for _ in 0..4 {
        let res = client.get(format!("http://{}/index.html", fleet.proxy)).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.headers().contains_key("x-request-id"));
        seen.insert(res.text().await.unwrap());
    }
    assert_eq!(seen.len(), 2, "round robin should reach both members");

    fleet.stop().await;
}

#[tokio::test]
async fn failing_member_is_evicted_from_rotation() {
    let failing = Arc::new(AtomicBool::new(false));
    let flag = failing.clone();
    let flaky = common::start_programmable_worker(move || {
        let flag = flag.clone();
        async move {
            if flag.load(Ordering::SeqCst) {
                (500, "broken".to_string())
            } else {
                (200, "flaky".to_string())
            }
        }
    })
    .await;
    let steady = common::start_mock_worker("steady").await;

    let fleet = common::start_fleet(common::test_config(2), vec![flaky, steady], None).await;
    assert!(common::wait_for(CONVERGE, || fleet.pool.routing_table().len() == 2).await);

    failing.store(true, Ordering::SeqCst);
    assert!(common::wait_for(CONVERGE, || fleet.pool.routing_table().len() == 1).await);

    let client = common::client();
    for _ in 0..4 {
        let res = client.get(format!("http://{}/", fleet.proxy)).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), "steady");
    }

    // Eviction does not remove the member from the pool.
    assert_eq!(fleet.pool.members().len(), 2);
    fleet.stop().await;
}

#[tokio::test]
async fn no_healthy_member_returns_503() {
    // Nothing listens here, so the member never passes a probe.
    let dead = "127.0.0.1:9".parse().unwrap();
    let fleet = common::start_fleet(common::test_config(1), vec![dead], None).await;

    assert!(common::wait_for(CONVERGE, || fleet.pool.members().len() == 1).await);

    let res = common::client()
        .get(format!("http://{}/", fleet.proxy))
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
    assert_eq!(res.headers()["x-request-id"], "req-123");
    assert_eq!(fleet.pool.members()[0].state, MemberState::Launching);

    fleet.stop().await;
}

#[tokio::test]
async fn sustained_high_load_adds_a_member() {
    let a = common::start_mock_worker("a").await;
    let b = common::start_mock_worker("b").await;
    let source: Arc<dyn MetricSource> = Arc::new(common::ScriptedSource::new(vec![Some(80.0), Some(90.0)]));

    let mut config = common::test_config(1);
    config.alarms.retain(|alarm| alarm.name == "cpu-high");
    let fleet = common::start_fleet(config, vec![a, b], Some(source)).await;
    let monitor = fleet.monitor.clone().unwrap();

    assert!(common::wait_for(CONVERGE, || monitor.in_service_count() == 1).await);

    assert!(monitor.evaluate().await.is_empty());
    assert_eq!(monitor.evaluate().await.len(), 1);

    assert!(common::wait_for(CONVERGE, || fleet.pool.desired() == 2).await);
    assert!(common::wait_for(CONVERGE, || fleet.pool.routing_table().len() == 2).await);

    fleet.stop().await;
}
