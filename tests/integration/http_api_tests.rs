//! HTTP surface driven through a real listener on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use agent_tether::config::GlobalConfig;
use agent_tether::http::{self, AppState};
use agent_tether::models::session::{Message, Role, SessionRecord};
use agent_tether::persistence::{HistoryStore, ProjectStore};
use agent_tether::session::{SessionRegistry, SessionSettings};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{settings, sh_spec, ASSISTANT_ECHO, WAIT};

struct TestServer {
    base_url: String,
    ct: CancellationToken,
    history: Arc<HistoryStore>,
    registry: Arc<SessionRegistry>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(settings: SessionSettings) -> Self {
        let history = Arc::new(HistoryStore::in_memory());
        let projects = Arc::new(ProjectStore::in_memory());
        let registry = Arc::new(SessionRegistry::new(
            settings,
            Arc::clone(&history),
            Arc::clone(&projects),
        ));
        let state = AppState {
            registry: Arc::clone(&registry),
            projects,
            config: Arc::new(GlobalConfig::default()),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral");
        let addr = listener.local_addr().expect("local addr");
        let ct = CancellationToken::new();
        tokio::spawn(http::serve(listener, state, ct.clone()));

        Self {
            base_url: format!("http://{addr}"),
            ct,
            history,
            registry,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

/// Read SSE `data:` payloads until `stop` matches one or the wait elapses.
async fn read_events<F>(resp: &mut reqwest::Response, mut stop: F) -> Vec<Value>
where
    F: FnMut(&Value) -> bool,
{
    let mut buffer = String::new();
    let mut events = Vec::new();
    let read = async {
        while let Ok(Some(chunk)) = resp.chunk().await {
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(end) = buffer.find("\n\n") {
                let frame: String = buffer.drain(..end + 2).collect();
                for line in frame.lines() {
                    if let Some(data) = line.strip_prefix("data:") {
                        let value: Value = serde_json::from_str(data.trim()).expect("json frame");
                        let done = stop(&value);
                        events.push(value);
                        if done {
                            return;
                        }
                    }
                }
            }
        }
    };
    let _ = tokio::time::timeout(WAIT, read).await;
    events
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_reports_pool_sizes_and_config() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;
    let resp = server.client.get(server.url("/api/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
    assert_eq!(body["background_sessions"], 0);
    assert_eq!(body["agent_binary"], "./claude");
    assert_eq!(body["api_key_configured"], false);
    assert_eq!(body["base_url"], "https://api.anthropic.com");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn config_endpoint_exposes_permissions() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;
    let body: Value = server
        .client
        .get(server.url("/api/config"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["permissions"]["defaultMode"], "bypassPermissions");
    assert_eq!(body["timeout_ms"], 300_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cors_headers_and_preflight() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;
    let resp = server.client.get(server.url("/api/health")).send().await.unwrap();
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");

    let resp = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/api/message"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["access-control-allow-methods"],
        "GET, POST, PUT, DELETE, OPTIONS"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_connects_and_delivers_agent_replies() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;
    let mut stream = server.client.get(server.url("/api/stream")).send().await.unwrap();
    assert_eq!(stream.status(), 200);
    assert!(stream.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let connected = read_events(&mut stream, |_| true).await;
    assert_eq!(connected, vec![json!({"type": "connected", "sessionId": 1})]);

    let resp = server
        .client
        .post(server.url("/api/message"))
        .json(&json!({"sessionId": 1, "message": {"content": "ping"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({"success": true}));

    let events = read_events(&mut stream, |e| e["type"] == "claude_output").await;
    assert_eq!(
        events.last(),
        Some(&json!({
            "type": "claude_output",
            "data": {"type": "assistant", "message": {"role": "assistant", "content": "pong"}}
        }))
    );

    let record = server.history.get(1).unwrap();
    assert_eq!(record.messages[0].content, json!("ping"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_stream_replaces_the_first() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;
    let mut first = server.client.get(server.url("/api/stream")).send().await.unwrap();
    read_events(&mut first, |_| true).await;

    let mut second = server
        .client
        .get(server.url("/api/stream?session=1"))
        .send()
        .await
        .unwrap();
    let replay = read_events(&mut second, |e| e["type"] == "connected").await;
    assert_eq!(replay[0], json!({"type": "connected", "sessionId": 1}));

    let ended = tokio::time::timeout(WAIT, first.chunk()).await.expect("first stream ends");
    assert!(matches!(ended, Ok(None)));
    assert_eq!(server.registry.counts(), (1, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn message_errors() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;

    let resp = server
        .client
        .post(server.url("/api/message"))
        .json(&json!({"sessionId": 404, "message": {"content": "hi"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("not found"));

    let resp = server
        .client
        .post(server.url("/api/message"))
        .body("{broken")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_crud() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;

    let resp = server
        .client
        .post(server.url("/api/sessions"))
        .json(&json!({"projectId": 8}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["id"], 1);
    assert_eq!(created["projectId"], 8);
    assert_eq!(created["messages"], json!([]));

    let unbound = server.client.post(server.url("/api/sessions")).send().await.unwrap();
    assert_eq!(unbound.status(), 201);

    let listed: Value = server
        .client
        .get(server.url("/api/sessions?project=8"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["sessions"][0]["id"], 1);
    assert_eq!(listed["sessions"][0]["messageCount"], 0);

    let listed: Value = server
        .client
        .get(server.url("/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["sessions"][0]["id"], 2);

    let resp = server.client.delete(server.url("/api/sessions/1")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let resp = server.client.delete(server.url("/api/sessions/1")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let resp = server.client.get(server.url("/api/sessions/1")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_messages_are_paginated() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;
    let mut record = SessionRecord::new(None);
    for n in 0..3 {
        record.append(Message::new(Role::User, json!(n)));
    }
    server.history.upsert(5, record).unwrap();

    let page: Value = server
        .client
        .get(server.url("/api/sessions/5?limit=2&offset=0"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["id"], 5);
    assert_eq!(page["total"], 3);
    assert_eq!(page["limit"], 2);
    assert_eq!(page["hasMore"], true);
    assert_eq!(page["messages"].as_array().unwrap().len(), 2);

    let page: Value = server
        .client
        .get(server.url("/api/sessions/5?limit=2&offset=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["hasMore"], false);
    assert_eq!(page["messages"][0]["content"], 2);

    let page: Value = server
        .client
        .get(server.url("/api/sessions/5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["limit"], 50);
    assert_eq!(page["offset"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_always_succeeds() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;
    let mut stream = server.client.get(server.url("/api/stream")).send().await.unwrap();
    read_events(&mut stream, |_| true).await;
    assert!(
        super::test_helpers::wait_until(|| server
            .registry
            .resident(1)
            .is_some_and(|s| s.has_live_process()))
        .await
    );

    let body: Value = server
        .client
        .post(server.url("/api/sessions/1/stop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"success": true, "message": "Session stopped"}));

    let body: Value = server
        .client
        .post(server.url("/api/sessions/1/stop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"success": true, "message": "Session not running"}));

    let ended = tokio::time::timeout(WAIT, async {
        loop {
            match stream.chunk().await {
                Ok(Some(_)) => {}
                other => return other,
            }
        }
    })
    .await
    .expect("stream closes after stop");
    assert!(matches!(ended, Ok(None)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn project_crud() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap();

    let resp = server
        .client
        .post(server.url("/api/projects"))
        .json(&json!({"name": "demo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = server
        .client
        .post(server.url("/api/projects"))
        .json(&json!({"name": "demo", "path": "/definitely/not/here"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = server
        .client
        .post(server.url("/api/projects"))
        .json(&json!({"name": "demo", "path": path}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let project: Value = resp.json().await.unwrap();
    let id = project["id"].as_u64().unwrap();
    assert_eq!(project["name"], "demo");
    assert!(project["createdAt"].is_string());

    let updated: Value = server
        .client
        .put(server.url(&format!("/api/projects/{id}")))
        .json(&json!({"name": "renamed"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["name"], "renamed");
    assert_eq!(updated["path"], path);

    let listed: Value = server
        .client
        .get(server.url("/api/projects"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["projects"].as_array().unwrap().len(), 1);

    let resp = server
        .client
        .delete(server.url(&format!("/api/projects/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = server
        .client
        .put(server.url(&format!("/api/projects/{id}")))
        .json(&json!({"name": "ghost"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graceful_shutdown_closes_streams_and_kills_agents() {
    let server = TestServer::start(settings(sh_spec(ASSISTANT_ECHO), true)).await;
    let mut stream = server.client.get(server.url("/api/stream")).send().await.unwrap();
    read_events(&mut stream, |_| true).await;
    let supervisor = server.registry.resident(1).expect("resident");
    assert!(super::test_helpers::wait_until(|| supervisor.has_live_process()).await);

    server.ct.cancel();
    assert!(super::test_helpers::wait_until(|| !supervisor.has_live_process()).await);
    assert_eq!(server.registry.counts(), (0, 0));
    tokio::time::sleep(Duration::from_millis(50)).await;
}
