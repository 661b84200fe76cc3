use super::*;
use crate::utils::test_utils::{
    spawn_mock_server, sse_delta, test_http_client, test_settings, MockResponse,
};
use std::time::Duration;

fn client() -> ChatClient {
    ChatClient::with_http_client(test_http_client())
}

async fn collect(
    stream: impl Stream<Item = Result<String, ChatError>>,
) -> Vec<Result<String, ChatError>> {
    tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
        .await
        .expect("stream should finish")
}

#[tokio::test]
async fn streams_increments_in_order_and_stops_at_done() {
    let server = spawn_mock_server(vec![MockResponse::sse([
        sse_delta("Hi"),
        sse_delta(" there"),
        "data: [DONE]\n\n".to_string(),
        sse_delta("ignored"),
    ])])
    .await;
    let settings = test_settings(&server.base_url());

    let items = collect(client().send(
        &[Message::user("Hello")],
        &settings,
        CancellationToken::new(),
    ))
    .await;
    assert_eq!(items, vec![Ok("Hi".to_string()), Ok(" there".to_string())]);

    let requests = server.finish().await;
    assert!(requests[0]
        .request_line
        .starts_with("POST /chat/completions"));
    assert_eq!(requests[0].header("accept"), Some("text/event-stream"));
}

#[tokio::test]
async fn garbled_fragments_are_skipped() {
    let server = spawn_mock_server(vec![MockResponse::sse([
        ": keep-alive\n\n".to_string(),
        "data: {not json}\n\n".to_string(),
        sse_delta("ok"),
        "data:[DONE]\n".to_string(),
    ])])
    .await;
    let settings = test_settings(&server.base_url());

    let items = collect(client().send(
        &[Message::user("Hello")],
        &settings,
        CancellationToken::new(),
    ))
    .await;
    assert_eq!(items, vec![Ok("ok".to_string())]);
    server.finish().await;
}

#[tokio::test]
async fn stream_without_sentinel_ends_when_body_closes() {
    let server = spawn_mock_server(vec![MockResponse::sse([
        sse_delta("one"),
        // Final line without a trailing newline
        format!(
            "data: {}",
            serde_json::json!({"choices":[{"delta":{"content":"two"}}]})
        ),
    ])])
    .await;
    let settings = test_settings(&server.base_url());

    let items = collect(client().send(&[], &settings, CancellationToken::new())).await;
    assert_eq!(items, vec![Ok("one".to_string()), Ok("two".to_string())]);
    server.finish().await;
}

#[tokio::test]
async fn http_error_status_yields_single_server_error() {
    let server = spawn_mock_server(vec![MockResponse::text(500, "overloaded")]).await;
    let settings = test_settings(&server.base_url());

    let items = collect(client().send(
        &[Message::user("Hello")],
        &settings,
        CancellationToken::new(),
    ))
    .await;
    assert_eq!(
        items,
        vec![Err(ChatError::Server {
            status: 500,
            body: "overloaded".to_string()
        })]
    );
    server.finish().await;
}

#[tokio::test]
async fn invalid_server_url_fails_without_network() {
    let settings = test_settings("ftp://example.com");
    let items = collect(client().send(&[], &settings, CancellationToken::new())).await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(ChatError::Configuration { .. })));
}

#[tokio::test]
async fn unreachable_server_reports_network_error() {
    // Bind then drop to get a port nobody is listening on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let settings = test_settings(&format!("http://{addr}"));
    let items = collect(client().send(&[], &settings, CancellationToken::new())).await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(ChatError::Network { .. })));
}

#[tokio::test]
async fn nothing_is_sent_until_first_poll() {
    let server = spawn_mock_server(vec![MockResponse::sse([sse_delta("late")])]).await;
    let settings = test_settings(&server.base_url());

    let stream = client().send(&[Message::user("Hi")], &settings, CancellationToken::new());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let items = collect(stream).await;
    assert_eq!(items, vec![Ok("late".to_string())]);
    assert_eq!(server.finish().await.len(), 1);
}

#[tokio::test]
async fn cancellation_stops_reading_mid_stream() {
    let release = CancellationToken::new();
    let server = spawn_mock_server(vec![MockResponse::held_sse(
        [sse_delta("a"), sse_delta("b")],
        release.clone(),
    )])
    .await;
    let settings = test_settings(&server.base_url());
    let cancel = CancellationToken::new();

    let mut stream = Box::pin(client().send(&[Message::user("Hi")], &settings, cancel.clone()));
    assert_eq!(stream.next().await, Some(Ok("a".to_string())));
    assert_eq!(stream.next().await, Some(Ok("b".to_string())));

    cancel.cancel();
    let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("cancelled stream should end promptly");
    assert_eq!(next, None);

    release.cancel();
    server.finish().await;
}

#[tokio::test]
async fn request_body_carries_system_prompt_model_and_stream_flag() {
    let server = spawn_mock_server(vec![MockResponse::sse(["data: [DONE]\n\n"])]).await;
    let mut settings = test_settings(&server.base_url());
    settings.system_prompt = "Be brief.".to_string();
    settings.max_tokens = Some(64);

    let history = [Message::user("Hello"), Message::assistant("Hi")];
    let items = collect(client().send(&history, &settings, CancellationToken::new())).await;
    assert!(items.is_empty());

    let body = server.finish().await[0].body_json();
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["stream"], true);
    assert_eq!(body["max_tokens"], 64);
    let roles: Vec<_> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(roles, ["system", "user", "assistant"]);
    assert_eq!(body["messages"][0]["content"], "Be brief.");
}

#[test]
fn blank_system_prompt_is_not_sent() {
    let mut settings = test_settings("http://localhost");
    settings.system_prompt = "   ".to_string();
    let request = build_request(&[Message::user("x")], &settings, false);
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].role, "user");
    assert!(!request.stream);
}

#[tokio::test]
async fn send_once_returns_full_content() {
    let server = spawn_mock_server(vec![MockResponse::json(
        200,
        r#"{"choices":[{"message":{"role":"assistant","content":"Paris"}}]}"#,
    )])
    .await;
    let settings = test_settings(&server.base_url());

    let answer = client()
        .send_once(&[Message::user("Capital of France?")], &settings)
        .await
        .expect("completion");
    assert_eq!(answer, "Paris");

    let body = server.finish().await[0].body_json();
    assert_eq!(body["stream"], false);
}

#[tokio::test]
async fn send_once_rejects_body_without_content() {
    let server = spawn_mock_server(vec![
        MockResponse::json(200, r#"{"choices":[]}"#),
        MockResponse::json(200, "not json"),
    ])
    .await;
    let settings = test_settings(&server.base_url());
    let chat = client();

    let empty = chat.send_once(&[], &settings).await.unwrap_err();
    assert!(matches!(empty, ChatError::Decode { .. }));
    let garbled = chat.send_once(&[], &settings).await.unwrap_err();
    assert!(matches!(garbled, ChatError::Decode { .. }));
    server.finish().await;
}

#[tokio::test]
async fn send_once_surfaces_status_and_body() {
    let server = spawn_mock_server(vec![MockResponse::json(
        429,
        r#"{"error":{"message":"slow down"}}"#,
    )])
    .await;
    let settings = test_settings(&server.base_url());

    let err = client().send_once(&[], &settings).await.unwrap_err();
    assert_eq!(err.status(), Some(429));
    assert!(err.user_message().contains("slow down"));
    server.finish().await;
}
