// E2E Test 3: Multiple Receivers
// Concurrent polling by several receivers, each with its own ledger

mod e2e;

use e2e::client::SignalClient;
use e2e::helpers::{generate_test_id, TestEnv, TestResult};
use std::collections::HashSet;
use std::time::Instant;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_e2e_3_concurrent_polling() {
    let start = Instant::now();
    let test_name = "E2E Test 3: Concurrent Polling".to_string();
    println!("\n🚀 Starting: {}", test_name);

    let env = TestEnv::start().await.expect("start server");
    let base = generate_test_id();

    let mut receivers: Vec<SignalClient> = Vec::new();
    for i in 0..3 {
        let client = env
            .receiver(&format!("{}_{}", base, i), "silver")
            .await
            .expect("issue receiver");
        receivers.push(client);
    }

    let sender = env.sender();
    for _ in 0..5 {
        sender.publish("USDJPY", "sell").await.expect("publish");
    }

    // Each receiver polls from several tasks at once
    let mut handles = Vec::new();
    for (idx, client) in receivers.iter().enumerate() {
        for _ in 0..4 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                (idx, client.fetch("?limit=50").await)
            }));
        }
    }

    let mut delivered: Vec<HashSet<i64>> = vec![HashSet::new(); receivers.len()];
    for handle in handles {
        let (idx, result) = handle.await.expect("join");
        let result = result.expect("fetch");
        assert_eq!(result.status, 200);
        delivered[idx].extend(result.signal_ids());
    }

    for (idx, client) in receivers.iter().enumerate() {
        assert_eq!(delivered[idx].len(), 3, "receiver {} saw {:?}", idx, delivered[idx]);

        let (status, body) = client.get("/quota").await.expect("quota");
        assert_eq!(status, 200);
        assert_eq!(body["used_today"], 3);
        assert_eq!(body["remaining"], 0);
    }

    TestResult::success(test_name, start.elapsed()).print();
}

#[tokio::test]
async fn test_e2e_3_validate_and_bookkeeping() {
    let start = Instant::now();
    let test_name = "E2E Test 3: Validate and Bookkeeping".to_string();
    println!("\n🚀 Starting: {}", test_name);

    let env = TestEnv::start().await.expect("start server");
    let username = generate_test_id();
    let email = format!("{}@example.com", username);
    let client = env
        .receiver_with(serde_json::json!({
            "username": username,
            "email": email,
            "plan": "gold",
            "months_valid": 3
        }))
        .await
        .expect("issue receiver");

    let anonymous = SignalClient::new(&env.base_url, "");
    let (status, body) = anonymous
        .post(
            "/validate",
            &serde_json::json!({ "email": email, "api_key": client.token() }),
        )
        .await
        .expect("validate");
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["plan"], "gold");

    let (status, body) = client
        .post(
            "/ea/sync_open_positions",
            &serde_json::json!({
                "account_id": "777",
                "broker_server": "Live-1",
                "positions": [
                    { "ticket": 9, "symbol": "XAUUSD", "side": "buy", "volume": 0.5, "entry_price": 2300.0 }
                ]
            }),
        )
        .await
        .expect("sync");
    assert_eq!(status, 200);
    assert_eq!(body["updated"], 1);

    let (status, body) = client
        .post(
            "/trades",
            &serde_json::json!({
                "symbol": "XAUUSD",
                "side": "buy",
                "entry_price": 2300.0,
                "exit_price": 2310.0,
                "volume": 0.5,
                "pnl": 500.0
            }),
        )
        .await
        .expect("trade");
    assert_eq!(status, 200);
    assert_eq!(body["pnl"], 500.0);

    TestResult::success(test_name, start.elapsed()).print();
}
