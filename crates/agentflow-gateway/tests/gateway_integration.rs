#![allow(clippy::unwrap_used, clippy::expect_used)]

use agentflow_core::{AgentRole, Job};
use agentflow_gateway::{GatewayServer, SecurityConfig};
use agentflow_orchestrator::{ExecutionConfig, JobSubmitter, Orchestrator, ProgressStore};
use axum::Router;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn submitter(step_delay_ms: u64) -> Arc<JobSubmitter> {
    let store = Arc::new(ProgressStore::new());
    let config = ExecutionConfig {
        stage_step_delay_ms: step_delay_ms,
        ..Default::default()
    };
    Arc::new(JobSubmitter::new(Arc::new(Orchestrator::new(store, config))))
}

/// Helper: serve `app` on a random port, returning the base URL.
async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    // Small yield to let the server task start
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://127.0.0.1:{}", addr.port())
}

async fn start_test_server(step_delay_ms: u64) -> String {
    serve(GatewayServer::build(submitter(step_delay_ms))).await
}

async fn submit(client: &reqwest::Client, base: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("{base}/api/orchestration/execute"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn poll(client: &reqwest::Client, base: &str, id: &str) -> Value {
    let resp = client
        .get(format!("{base}/api/progress/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

fn status_rank(status: &str) -> u8 {
    match status {
        "pending" => 0,
        "in_progress" => 1,
        "completed" | "error" => 2,
        other => panic!("unexpected status {other}"),
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let base = start_test_server(1).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "agentflow");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submit_and_poll_until_completed() {
    let base = start_test_server(20).await;
    let client = reqwest::Client::new();

    let resp = submit(&client, &base, json!({"task": "Research X", "max_iterations": 3})).await;
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let id = body["execution_id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(body["status"], "pending");

    let first = poll(&client, &base, &id).await;
    assert!(matches!(
        first["status"].as_str().unwrap(),
        "pending" | "in_progress"
    ));
    assert!(matches!(
        first["agents"]["research_analyst"]["status"].as_str().unwrap(),
        "pending" | "executing"
    ));

    let mut previous = first;
    let last = loop {
        tokio::time::sleep(Duration::from_millis(15)).await;
        let current = poll(&client, &base, &id).await;

        assert!(
            status_rank(previous["status"].as_str().unwrap())
                <= status_rank(current["status"].as_str().unwrap())
        );
        assert!(previous["progress"].as_u64() <= current["progress"].as_u64());
        let before = previous["logs"].as_array().unwrap();
        let after = current["logs"].as_array().unwrap();
        assert!(after.len() >= before.len());
        assert_eq!(&after[..before.len()], &before[..]);

        let status = current["status"].as_str().unwrap().to_string();
        if status == "completed" || status == "error" {
            break current;
        }
        assert!(current["progress"].as_u64().unwrap() < 100);
        previous = current;
    };

    assert_eq!(last["status"], "completed");
    assert_eq!(last["progress"], 100);
    assert!(last["result"]["summary"].is_string());
    assert!(last["start_time"].is_string());
    assert!(last["current_step"].is_string());

    // Agent order in the document is invocation order.
    let text = client
        .get(format!("{base}/api/progress/{id}"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let job: Job = serde_json::from_str(&text).unwrap();
    assert_eq!(
        job.agents.keys().copied().collect::<Vec<_>>(),
        vec![
            AgentRole::ResearchAnalyst,
            AgentRole::ContentCreator,
            AgentRole::ExecutionAgent,
            AgentRole::OversightManager
        ]
    );
}

#[tokio::test]
async fn test_unknown_execution_id_is_not_found() {
    let base = start_test_server(1).await;
    let resp = reqwest::get(format!(
        "{base}/api/progress/{}",
        uuid::Uuid::new_v4()
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_invalid_submissions_create_no_job() {
    let base = start_test_server(1).await;
    let client = reqwest::Client::new();

    for body in [
        json!({"task": "   ", "max_iterations": 3}),
        json!({"task": "Research X", "max_iterations": 0}),
        json!({"task": "Research X", "max_iterations": 11}),
        json!({"max_iterations": 3}),
    ] {
        let resp = submit(&client, &base, body).await;
        assert_eq!(resp.status(), 400);
        let err: Value = resp.json().await.unwrap();
        assert!(!err["error"].as_str().unwrap().is_empty());
    }

    let list: Value = client
        .get(format!("{base}/api/executions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["stats"]["total"], 0);
    assert!(list["executions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_submission_returns_result() {
    let base = start_test_server(1).await;
    let client = reqwest::Client::new();

    let resp = submit(
        &client,
        &base,
        json!({
            "task": "Create a presentation on market trends",
            "max_iterations": 2,
            "async": false
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    let deliverables = body["result"]["deliverables"].as_array().unwrap();
    assert_eq!(deliverables[0]["kind"], "presentation");
    assert!(body.get("error").is_none());

    let id = body["execution_id"].as_str().unwrap();
    let progress = poll(&client, &base, id).await;
    let alias: Value = client
        .get(format!("{base}/api/orchestration/status/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(progress, alias);

    let list: Value = client
        .get(format!("{base}/api/executions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["stats"]["total"], 1);
    assert_eq!(list["stats"]["completed"], 1);
    assert_eq!(list["stats"]["success_rate"], 100.0);
    assert_eq!(list["executions"][0]["id"], id);
}

#[tokio::test]
async fn test_auth_required_when_keys_configured() {
    let security = SecurityConfig {
        api_keys: vec!["secret".to_string()],
        ..Default::default()
    };
    let (app, _) = GatewayServer::build_with_middleware(submitter(1), &security);
    let base = serve(app).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/executions");

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "API key required");

    let resp = client.get(&url).bearer_auth("wrong").send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client.get(&url).bearer_auth("secret").send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{url}?api_key=secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Probes stay open.
    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let security = SecurityConfig {
        api_keys: Vec::new(),
        max_requests_per_second: 0,
        max_burst: 2,
    };
    let (app, _) = GatewayServer::build_with_middleware(submitter(1), &security);
    let base = serve(app).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/executions");

    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);
    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 429);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Rate limit exceeded");
}

#[tokio::test]
async fn test_rejected_keys_spend_the_peer_budget() {
    let security = SecurityConfig {
        api_keys: vec!["secret".to_string()],
        max_requests_per_second: 0,
        max_burst: 2,
    };
    let (app, _) = GatewayServer::build_with_middleware(submitter(1), &security);
    let base = serve(app).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/executions");

    for guess in ["guess-1", "guess-2"] {
        let resp = client.get(&url).bearer_auth(guess).send().await.unwrap();
        assert_eq!(resp.status(), 401);
    }
    let resp = client.get(&url).bearer_auth("guess-3").send().await.unwrap();
    assert_eq!(resp.status(), 429);
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 429);

    // A valid key is charged to its own bucket.
    let resp = client.get(&url).bearer_auth("secret").send().await.unwrap();
    assert_eq!(resp.status(), 200);
}
