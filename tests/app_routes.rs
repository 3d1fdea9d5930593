use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use bytes::Bytes;
use searchuoft_chat::AppState;
use searchuoft_chat::config::UiConfig;
use searchuoft_chat::message::Role;
use searchuoft_chat::query::{QueryBackend, QueryError, ReplyStream};
use searchuoft_chat::server::router;
use tokio::sync::Notify;

/// Backend that holds the response until released, then streams two chunks.
#[derive(Debug, Default)]
struct HeldReply {
    release: Notify,
}

#[async_trait::async_trait]
impl QueryBackend for HeldReply {
    async fn query(&self, _query: &str) -> Result<ReplyStream, QueryError> {
        self.release.notified().await;
        let chunks: Vec<Result<Bytes, QueryError>> = vec![
            Ok(Bytes::from_static(b"Hel")),
            Ok(Bytes::from_static(b"lo")),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

fn setup() -> (TestServer, AppState, Arc<HeldReply>) {
    let backend = Arc::new(HeldReply::default());
    let state = AppState::new(
        UiConfig::default(),
        Arc::clone(&backend) as Arc<dyn QueryBackend>,
    )
    .unwrap();
    let server = TestServer::new(router(state.clone())).unwrap();
    (server, state, backend)
}

#[tokio::test]
async fn test_index_renders_chat_view() {
    let (server, state, _) = setup();

    let response = server.get("/").await;
    response.assert_status_ok();

    let html = response.text();
    assert!(html.contains("Welcome to SearchUofT!"));
    assert!(html.contains(r#"name="query""#));
    assert!(!html.contains("404 Not Found"));
    assert_eq!(state.conversations.len(), 1);
}

#[tokio::test]
async fn test_each_load_gets_fresh_conversation() {
    let (server, state, _) = setup();

    server.get("/").await.assert_status_ok();
    server.get("/").await.assert_status_ok();

    assert_eq!(state.conversations.len(), 2);
}

#[tokio::test]
async fn test_undefined_path_renders_not_found_only() {
    let (server, _, _) = setup();

    let response = server.get("/about").await;
    response.assert_status(StatusCode::NOT_FOUND);

    let html = response.text();
    assert!(html.contains("404 Not Found"));
    assert!(!html.contains("Welcome to SearchUofT!"));
    assert!(!html.contains("query-form"));
}

#[tokio::test]
async fn test_submit_appends_messages_and_clears_input() {
    let (server, state, backend) = setup();
    let conversation = state.conversations.create();

    let response = server
        .post(&format!("/conversations/{}/query", conversation.id()))
        .form(&[("query", "Where is Robarts?")])
        .await;
    response.assert_status_ok();

    // Reply is still held: only the user message and placeholder exist.
    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Where is Robarts?");
    assert_eq!(messages[1].role, Role::Agent);
    assert!(messages[1].content.is_empty());

    let html = response.text();
    assert!(html.contains(r#"name="query" value="""#));
    assert!(html.contains("Where is Robarts?"));

    backend.release.notify_one();
    tokio::time::timeout(Duration::from_secs(5), async {
        while conversation.has_active_exchanges() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("exchange should finish");

    assert_eq!(conversation.messages()[1].content, "Hello");
}

#[tokio::test]
async fn test_empty_query_is_submitted() {
    let (server, state, _) = setup();
    let conversation = state.conversations.create();

    server
        .post(&format!("/conversations/{}/query", conversation.id()))
        .form(&[("query", "")])
        .await
        .assert_status_ok();

    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "");
}

#[tokio::test]
async fn test_unknown_conversation_asks_for_refresh() {
    let (server, _, _) = setup();

    let response = server
        .post("/conversations/does-not-exist/query")
        .form(&[("query", "hi")])
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.header("HX-Refresh"), "true");
}

#[tokio::test]
async fn test_health() {
    let (server, _, _) = setup();

    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_json(&serde_json::json!({ "status": "ok" }));
}

/// Read from an SSE response until a complete `messages` event arrives.
async fn next_messages_event(resp: &mut reqwest::Response, buf: &mut String) -> String {
    loop {
        if let Some(end) = buf.find("\n\n") {
            let event: String = buf.drain(..end + 2).collect();
            if event.starts_with("event: messages") {
                return event;
            }
            continue;
        }
        let chunk = resp.chunk().await.unwrap().expect("stream ended early");
        buf.push_str(std::str::from_utf8(&chunk).unwrap());
    }
}

#[tokio::test]
async fn test_events_stream_pushes_updates() {
    let backend = Arc::new(HeldReply::default());
    let state = AppState::new(
        UiConfig::default(),
        Arc::clone(&backend) as Arc<dyn QueryBackend>,
    )
    .unwrap();
    let conversation = state.conversations.create();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut resp = reqwest::get(format!(
        "http://{addr}/conversations/{}/events",
        conversation.id()
    ))
    .await
    .unwrap();
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut buf = String::new();
    let initial = next_messages_event(&mut resp, &mut buf).await;
    assert!(!initial.contains("User: "));

    state
        .controller
        .submit(&conversation, "Where is Robarts?".to_string());
    let submitted = next_messages_event(&mut resp, &mut buf).await;
    assert!(submitted.contains("Where is Robarts?"));
    assert!(submitted.contains("thinking"));

    backend.release.notify_one();
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = next_messages_event(&mut resp, &mut buf).await;
            if event.contains("Hello") {
                return event;
            }
        }
    })
    .await
    .expect("reply should be pushed");
    assert!(finished.contains("Agent: "));
}
