use std::time::Instant;

use axum::Router;
use sim_common::config::Mode;
use sim_common::Config;
use sim_core::Engine;

async fn spawn_server(config: Config) -> String {
    sim_core::rng::init(Some(42));
    let engine = Engine::start(config);
    let app: Router = sim_api::app(engine);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}:{}", addr.ip(), addr.port())
}

fn fast_config(overrides: impl FnOnce(Config) -> Config) -> Config {
    overrides(Config {
        served_model_names: vec!["synthetic-model".to_string()],
        mode: Mode::Echo,
        time_to_first_token_ms: 20,
        inter_token_latency_ms: 5,
        kv_cache_transfer_latency_ms: 10,
        max_model_len: 4096,
        ..Config::default()
    })
}

#[tokio::test]
async fn health_and_ready_return_empty_object() {
    let base = spawn_server(fast_config(|c| c)).await;
    let client = reqwest::Client::new();

    let r = client.get(format!("{base}/health")).send().await.unwrap();
    assert!(r.status().is_success());
    assert_eq!(r.json::<serde_json::Value>().await.unwrap(), serde_json::json!({}));

    let r = client.get(format!("{base}/ready")).send().await.unwrap();
    assert!(r.status().is_success());
}

/// §8 property 8: two sequential `GET /v1/models` return identical data sets.
#[tokio::test]
async fn models_listing_is_idempotent() {
    let base = spawn_server(fast_config(|c| c)).await;
    let client = reqwest::Client::new();

    let first: serde_json::Value = client
        .get(format!("{base}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second: serde_json::Value = client
        .get(format!("{base}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["data"], second["data"]);
}

/// §4.4 step 3: an unknown model is rejected with 404 and a `NotFoundError`.
#[tokio::test]
async fn unknown_model_is_rejected_with_404() {
    let base = spawn_server(fast_config(|c| c)).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "model": "not-a-real-model",
        "messages": [{"role": "user", "content": "hi"}],
    });
    let r = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(r.status(), 404);
    let payload: serde_json::Value = r.json().await.unwrap();
    assert_eq!(payload["type"], "NotFoundError");
    assert_eq!(
        payload["message"],
        "The model `not-a-real-model` does not exist."
    );
}

/// Scenario S3: context-window violation message names both the overall total and its parts.
#[tokio::test]
async fn context_window_violation_matches_scenario_s3() {
    let base = spawn_server(fast_config(|c| Config { max_model_len: 100, ..c })).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "model": "synthetic-model",
        "messages": [{"role": "user", "content": "x".repeat(360)}],
        "max_tokens": 20,
    });
    let r = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(r.status(), 400);
    let payload: serde_json::Value = r.json().await.unwrap();
    let msg = payload["message"].as_str().unwrap();
    assert!(msg.contains("110 tokens (90 in the messages, 20 in the completion)"), "{msg}");
}

/// §8 property 7: echo mode round-trips the last user message with ample budget.
#[tokio::test]
async fn echo_round_trip_returns_last_user_message() {
    let base = spawn_server(fast_config(|c| c)).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "model": "synthetic-model",
        "messages": [
            {"role": "user", "content": "first turn"},
            {"role": "assistant", "content": "reply"},
            {"role": "user", "content": "hello world"},
        ],
        "max_tokens": 50,
    });
    let r = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(r.status(), 200);
    let payload: serde_json::Value = r.json().await.unwrap();
    assert_eq!(payload["choices"][0]["message"]["content"], "hello world");
    assert_eq!(payload["choices"][0]["finish_reason"], "stop");
    assert_eq!(payload["usage"]["total_tokens"], payload["usage"]["prompt_tokens"].as_u64().unwrap() + payload["usage"]["completion_tokens"].as_u64().unwrap());
}

/// Scenario S6: remote-decode responses carry the fixed sentinel fields and finish reason.
#[tokio::test]
async fn remote_decode_carries_sentinel_fields() {
    let base = spawn_server(fast_config(|c| c)).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "model": "synthetic-model",
        "messages": [{"role": "user", "content": "hello"}],
        "max_tokens": 5,
        "do_remote_decode": true,
    });
    let r = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(r.status(), 200);
    let payload: serde_json::Value = r.json().await.unwrap();
    assert_eq!(payload["choices"][0]["finish_reason"], "remote_decode");
    assert_eq!(payload["remote_block_ids"][0], "DUMMY_ID");
    assert_eq!(payload["remote_host"], "DUMMY");
    assert_eq!(payload["remote_port"], 1234);
}

/// §4.4 step 4: streaming is rejected outright when combined with remote decode.
#[tokio::test]
async fn streaming_with_remote_decode_is_rejected() {
    let base = spawn_server(fast_config(|c| c)).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "model": "synthetic-model",
        "messages": [{"role": "user", "content": "hello"}],
        "stream": true,
        "do_remote_decode": true,
    });
    let r = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(r.status(), 400);
    let payload: serde_json::Value = r.json().await.unwrap();
    assert_eq!(payload["message"], "Prefill does not support streaming");
}

/// Scenario S4: concurrent requests against the same LoRA adapter share one running count, and
/// the adapter drops out of the registry once both complete.
#[tokio::test]
async fn lora_lifecycle_tracks_concurrent_requests() {
    let base = spawn_server(fast_config(|c| Config { max_num_seqs: 4, time_to_first_token_ms: 80, ..c })).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/v1/load_lora_adapter"))
        .json(&serde_json::json!({"lora_name": "adapter-a"}))
        .send()
        .await
        .unwrap();

    let body = serde_json::json!({
        "model": "adapter-a",
        "messages": [{"role": "user", "content": "hello"}],
        "max_tokens": 3,
    });
    let mut handles = Vec::new();
    for _ in 0..2 {
        let client = client.clone();
        let base = base.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            client
                .post(format!("{base}/v1/chat/completions"))
                .json(&body)
                .send()
                .await
                .unwrap()
        }));
    }
    for h in handles {
        let r = h.await.unwrap();
        assert_eq!(r.status(), 200);
        assert_eq!(r.json::<serde_json::Value>().await.unwrap()["model"], "adapter-a");
    }
}

/// Scenario S1 (scaled down): with `max_num_seqs = 2`, a third concurrent request waits for a
/// worker to free up, taking roughly twice as long as the first two.
#[tokio::test]
async fn admission_cap_serializes_excess_requests() {
    let base = spawn_server(fast_config(|c| Config {
        max_num_seqs: 2,
        time_to_first_token_ms: 150,
        inter_token_latency_ms: 0,
        ..c
    }))
    .await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "model": "synthetic-model",
        "messages": [{"role": "user", "content": "hello"}],
        "max_tokens": 1,
    });

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        let base = base.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            client
                .post(format!("{base}/v1/chat/completions"))
                .json(&body)
                .send()
                .await
                .unwrap()
        }));
    }
    let mut elapsed = Vec::new();
    for h in handles {
        let r = h.await.unwrap();
        assert_eq!(r.status(), 200);
        elapsed.push(start.elapsed());
    }
    elapsed.sort();
    assert!(elapsed[2] > elapsed[0] * 2 - std::time::Duration::from_millis(50));
}
