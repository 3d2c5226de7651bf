//! Protocol-level tests for the check-in loop, driven against a mock
//! controller.

use outpost::beacon::Beacon;
use outpost::config::{Config, USER_AGENT};
use outpost::results::ResultSink;
use outpost::tasks::WorkItem;
use outpost::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TICK: Duration = Duration::from_millis(50);

fn test_config(server: &MockServer) -> Config {
    Config {
        agent_id: "test-agent".into(),
        controller_url: format!("{}/beacon", server.uri()),
        checkin_interval: TICK,
        // Matches the mock's host so embedded batches take the
        // root-mounted controller path.
        server_name: "127.0.0.1".into(),
        api_server_name: "api.outpost.lab".into(),
        whoami_token: None,
        tenant_key: None,
        cert_path: None,
        key_path: None,
        ca_path: None,
        rewrite_hosts: false,
    }
}

fn test_beacon(server: &MockServer) -> Beacon {
    beacon_with_config(test_config(server))
}

fn beacon_with_config(config: Config) -> Beacon {
    let transport = Arc::new(Transport::new(
        reqwest::Client::new(),
        reqwest::Client::new(),
        None,
    ));
    Beacon::new(Arc::new(config), transport)
}

fn test_sink(config: &Config) -> Arc<ResultSink> {
    let transport = Transport::new(reqwest::Client::new(), reqwest::Client::new(), None);
    Arc::new(ResultSink::new(config, &transport))
}

fn run_once_item(id: &str) -> WorkItem {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "type": "sys_info",
        "runOnce": true,
    }))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn seq_increases_by_one_across_mixed_outcomes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut beacon = test_beacon(&server);
    assert!(beacon.poll_once().await.is_ok());
    assert_eq!(beacon.seq(), 1);
    assert!(beacon.poll_once().await.is_ok());
    assert_eq!(beacon.seq(), 2);
    // Rejected attempt still consumes exactly one sequence number.
    assert!(beacon.poll_once().await.is_err());
    assert_eq!(beacon.seq(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn checkin_body_and_headers_identify_the_agent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .and(header("X-Agent-ID", "test-agent"))
        .and(header("User-Agent", USER_AGENT))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut beacon = test_beacon(&server);
    beacon.poll_once().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["agent_id"], "test-agent");
    assert_eq!(body["seq"], 1);
    assert!(body.get("output").is_some());
    assert!(body.get("error").is_some());
    assert!(body["ts"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test(flavor = "multi_thread")]
async fn tenant_key_header_sent_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .and(header("X-Tenant-Key", "tenant-abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.tenant_key = Some("tenant-abc".into());
    let mut beacon = beacon_with_config(config);
    beacon.poll_once().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_response_body_means_no_tasks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .respond_with(ResponseTemplate::new(200).set_body_string("surprise! not json"))
        .mount(&server)
        .await;

    let mut beacon = test_beacon(&server);
    let response = beacon.poll_once().await.unwrap();
    assert!(response.tasks.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn issued_tasks_are_decoded_from_the_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tasks": [
                {"id": "t-1", "cmd": "echo", "args": ["hi"]},
                {"id": "t-2", "type": "sys_info", "params": {}},
            ]
        })))
        .mount(&server)
        .await;

    let mut beacon = test_beacon(&server);
    let response = beacon.poll_once().await.unwrap();
    assert_eq!(response.tasks.len(), 2);
    assert_eq!(response.tasks[0].id, "t-1");
    assert_eq!(response.tasks[1].effective_kind(), "sys_info");
}

#[tokio::test(flavor = "multi_thread")]
async fn controller_interval_update_is_applied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "interval": 7
        })))
        .mount(&server)
        .await;

    let mut beacon = test_beacon(&server);
    assert_eq!(beacon.interval(), TICK);
    beacon.poll_once().await.unwrap();
    assert_eq!(beacon.interval(), Duration::from_secs(7));
}

#[tokio::test(flavor = "multi_thread")]
async fn deferred_items_wait_for_first_successful_checkin() {
    let server = MockServer::start().await;
    // First check-in fails; everything after succeeds.
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/test-agent/embedded-tasks"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let sink = test_sink(&config);
    let beacon = beacon_with_config(config);
    let deferred = vec![run_once_item("pre-1"), run_once_item("pre-2")];

    let driver = tokio::spawn(beacon.run(sink, deferred));
    tokio::time::sleep(Duration::from_millis(600)).await;
    driver.abort();

    let requests = server.received_requests().await.unwrap();
    // The failed first attempt must precede any embedded delivery, and the
    // batch goes out exactly once with every run-once item in it.
    assert_eq!(requests[0].url.path(), "/beacon");
    let embedded: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path() == "/test-agent/embedded-tasks")
        .collect();
    assert_eq!(embedded.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&embedded[0].body).unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["taskId"], "pre-1");
    assert_eq!(results[0]["status"], "completed");

    let beacons_before_embedded = requests
        .iter()
        .take_while(|r| r.url.path() == "/beacon")
        .count();
    assert!(
        beacons_before_embedded >= 2,
        "embedded batch left before the first successful check-in"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn deferred_items_never_run_while_checkins_keep_failing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let sink = test_sink(&config);
    let beacon = beacon_with_config(config);

    let driver = tokio::spawn(beacon.run(sink, vec![run_once_item("pre-1")]));
    tokio::time::sleep(Duration::from_millis(400)).await;
    driver.abort();

    let requests = server.received_requests().await.unwrap();
    assert!(requests.len() >= 2);
    assert!(requests.iter().all(|r| r.url.path() == "/beacon"));
}

#[tokio::test(flavor = "multi_thread")]
async fn issued_task_result_lands_on_the_per_task_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tasks": [{"id": "t-1", "cmd": "echo", "args": ["issued-output"]}]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/beacon"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/agents/test-agent/tasks/t-1/result"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    // Host differs from the check-in verification name, so the result URL
    // keeps the mock's authority instead of being rewritten to the API name.
    config.server_name = "beacon.outpost.lab".into();
    let sink = test_sink(&config);
    let beacon = beacon_with_config(config);

    let driver = tokio::spawn(beacon.run(sink, Vec::new()));
    tokio::time::sleep(Duration::from_millis(600)).await;
    driver.abort();

    let requests = server.received_requests().await.unwrap();
    let result_request = requests
        .iter()
        .find(|r| r.url.path() == "/api/agents/test-agent/tasks/t-1/result")
        .expect("per-task result was never delivered");
    let body: serde_json::Value = serde_json::from_slice(&result_request.body).unwrap();
    assert_eq!(body["status"], "completed");
    assert!(body["result"].as_str().unwrap().contains("issued-output"));
    assert_eq!(body["error"], "");
}
