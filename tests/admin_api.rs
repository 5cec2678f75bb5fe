//! Admin API over a running fleet.

use std::time::Duration;

use serde_json::Value;

mod common;

const CONVERGE: Duration = Duration::from_secs(10);

#[tokio::test]
async fn rejects_missing_or_wrong_token() {
    let worker = common::start_mock_worker("ok").await;
    let fleet = common::start_fleet(common::test_config(1), vec![worker], None).await;
    let client = common::client();

    let res = client.get(format!("http://{}/admin/status", fleet.admin)).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(format!("http://{}/admin/status", fleet.admin))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    fleet.stop().await;
}

#[tokio::test]
async fn capacity_requests_are_clamped() {
    let workers = vec![
        common::start_mock_worker("1").await,
        common::start_mock_worker("2").await,
        common::start_mock_worker("3").await,
        common::start_mock_worker("4").await,
    ];
    let fleet = common::start_fleet(common::test_config(1), workers, None).await;
    let client = common::client();

    let res = client
        .put(format!("http://{}/admin/capacity", fleet.admin))
        .bearer_auth("test-key")
        .json(&serde_json::json!({ "desired": 50 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["requested"], 50);
    assert_eq!(body["desired"], 4);

    assert!(common::wait_for(CONVERGE, || fleet.pool.routing_table().len() == 4).await);

    let status: Value = client
        .get(format!("http://{}/admin/status", fleet.admin))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["desired"], 4);
    assert_eq!(status["max"], 4);
    assert_eq!(status["fleet_health"]["status"], "ok");

    fleet.stop().await;
}

#[tokio::test]
async fn cancel_drain_reports_conflict_for_in_service_member() {
    let worker = common::start_mock_worker("ok").await;
    let fleet = common::start_fleet(common::test_config(1), vec![worker], None).await;
    assert!(common::wait_for(CONVERGE, || fleet.pool.routing_table().len() == 1).await);
    let id = fleet.pool.members()[0].id.clone();
    let client = common::client();

    let res = client
        .post(format!("http://{}/admin/members/{}/cancel-drain", fleet.admin, id))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);

    let res = client
        .post(format!("http://{}/admin/members/missing/cancel-drain", fleet.admin))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let members: Value = client
        .get(format!("http://{}/admin/members", fleet.admin))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members[0]["state"], "in_service");
    assert_eq!(members[0]["healthy"], true);

    fleet.stop().await;
}
