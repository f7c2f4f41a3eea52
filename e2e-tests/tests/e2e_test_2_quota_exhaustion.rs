// E2E Test 2: Quota Exhaustion
// Free and silver receivers run out of daily quota; non-actionable
// signals keep flowing and exhaustion never becomes an error

mod e2e;

use e2e::helpers::{generate_test_id, TestEnv, TestResult};
use serde_json::json;
use std::time::Instant;

#[tokio::test]
async fn test_e2e_2_free_plan_exhaustion() {
    let start = Instant::now();
    let test_name = "E2E Test 2: Free Plan Exhaustion".to_string();
    println!("\n🚀 Starting: {}", test_name);

    let env = TestEnv::start().await.expect("start server");
    let receiver = env
        .receiver(&generate_test_id(), "free")
        .await
        .expect("issue receiver");

    let sender = env.sender();
    let buy = sender.publish("EURUSD", "buy").await.expect("publish");
    let adjust = sender.publish("EURUSD", "adjust_sl").await.expect("publish");
    let sell = sender.publish("EURUSD", "sell").await.expect("publish");

    let first = receiver.fetch("").await.expect("fetch");
    assert_eq!(first.status, 200);
    assert_eq!(first.signal_ids(), vec![buy, adjust]);
    assert_eq!(first.quota_limit.as_deref(), Some("1"));
    assert_eq!(first.quota_remaining.as_deref(), Some("0"));
    assert!(!first.signal_ids().contains(&sell));

    // A later non-actionable signal is still delivered
    let hold = sender.publish("EURUSD", "hold").await.expect("publish");
    let second = receiver.fetch("").await.expect("fetch");
    assert_eq!(second.signal_ids(), vec![buy, adjust, hold]);
    assert_eq!(second.body["charged"], 0);

    TestResult::success(test_name, start.elapsed()).print();
}

#[tokio::test]
async fn test_e2e_2_override_and_upgrade() {
    let start = Instant::now();
    let test_name = "E2E Test 2: Override and Upgrade".to_string();
    println!("\n🚀 Starting: {}", test_name);

    let env = TestEnv::start().await.expect("start server");
    let username = generate_test_id();
    let blocked = env
        .receiver_with(json!({ "username": username, "plan": "silver", "daily_quota": 0 }))
        .await
        .expect("issue blocked receiver");

    let sender = env.sender();
    for _ in 0..4 {
        sender.publish("GBPUSD", "buy").await.expect("publish");
    }

    let result = blocked.fetch("").await.expect("fetch");
    assert_eq!(result.status, 200);
    assert!(result.signal_ids().is_empty());
    assert_eq!(result.quota_limit.as_deref(), Some("0"));

    // Re-issuing rotates the token and drops the override
    let silver = env
        .receiver_with(json!({ "username": username, "plan": "silver" }))
        .await
        .expect("reissue");
    let (status, body) = blocked.get("/quota").await.expect("quota");
    assert_eq!(status, 401);
    assert_eq!(body["error"], "invalid_token");

    let result = silver.fetch("").await.expect("fetch");
    assert_eq!(result.signal_ids().len(), 3);
    assert_eq!(result.quota_remaining.as_deref(), Some("0"));

    TestResult::success(test_name, start.elapsed()).print();
}
