use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use kiro_bridge::bridge::{check_upstream, forward_message, forward_stream};
use kiro_bridge::config::StreamConfig;
use kiro_bridge::eventstream::encode_event_frame;
use kiro_bridge::protocol::anthropic::{ContentBlock, MessageResponse, StopReason};
use kiro_bridge::BridgeError;

fn backend_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(encode_event_frame(
        "assistantResponseEvent",
        br#"{"content":"<thinking>\ncheck the dir</thinking>\n\n"}"#,
    ));
    body.extend(encode_event_frame(
        "assistantResponseEvent",
        br#"{"content":"Listing."}"#,
    ));
    body.extend(encode_event_frame(
        "toolUseEvent",
        br#"{"toolUseId":"t1","name":"Bash","input":"{\"command\":","stop":false}"#,
    ));
    body.extend(encode_event_frame(
        "toolUseEvent",
        br#"{"toolUseId":"t1","name":"Bash","input":"\"ls\"}","stop":true}"#,
    ));
    body.extend(encode_event_frame("meteringEvent", br#"{"usage":0.1}"#));
    body
}

async fn spawn_upstream() -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route(
            "/generateAssistantResponse",
            post(|| async {
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/vnd.amazon.eventstream")
                    .body(Body::from(backend_body()))
                    .expect("build upstream response")
            }),
        )
        .route(
            "/denied",
            post(|| async {
                (
                    StatusCode::FORBIDDEN,
                    axum::Json(serde_json::json!({
                        "message": "The bearer token included in the request is invalid."
                    })),
                )
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

#[tokio::test]
async fn test_forward_stream_over_http() {
    let (base, server) = spawn_upstream().await;
    let config = StreamConfig::default();

    let upstream = reqwest::Client::new()
        .post(format!("{base}/generateAssistantResponse"))
        .send()
        .await
        .expect("upstream request");
    let ctx = config.new_context("claude-sonnet-4", 42, true);
    let response = forward_stream(upstream, ctx, &config)
        .await
        .expect("forward stream");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).expect("content type"),
        "text/event-stream"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read sse body");
    let body = String::from_utf8(body.to_vec()).expect("utf8 body");

    let names: Vec<&str> = body
        .split("\n\n")
        .filter_map(|frame| frame.strip_prefix("event: "))
        .filter_map(|rest| rest.lines().next())
        .collect();
    assert_eq!(names.first(), Some(&"message_start"));
    assert_eq!(names.last(), Some(&"message_stop"));
    assert_eq!(names.iter().filter(|n| **n == "content_block_start").count(), 3);
    assert!(body.contains(r#""type":"thinking_delta","thinking":"check the dir""#));
    assert!(body.contains(r#""stop_reason":"tool_use""#));
    assert!(!body.contains("</thinking>"));

    server.abort();
}

#[tokio::test]
async fn test_forward_message_over_http() {
    let (base, server) = spawn_upstream().await;
    let config = StreamConfig::default();

    let upstream = reqwest::Client::new()
        .post(format!("{base}/generateAssistantResponse"))
        .send()
        .await
        .expect("upstream request");
    let ctx = config.new_context("claude-sonnet-4", 42, true);
    let response = forward_message(upstream, ctx, &config)
        .await
        .expect("forward message");
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read json body");
    let message: MessageResponse = serde_json::from_slice(&body).expect("message json");
    assert_eq!(message.type_, "message");
    assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
    assert_eq!(
        message.content,
        vec![
            ContentBlock::Thinking {
                thinking: "check the dir".to_string()
            },
            ContentBlock::Text {
                text: "Listing.".to_string()
            },
            ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "Bash".to_string(),
                input: serde_json::json!({"command": "ls"}),
            },
        ]
    );
    assert_eq!(message.usage.input_tokens, 42);

    server.abort();
}

#[tokio::test]
async fn test_upstream_error_status_is_reported() {
    let (base, server) = spawn_upstream().await;

    let upstream = reqwest::Client::new()
        .post(format!("{base}/denied"))
        .send()
        .await
        .expect("upstream request");
    let err = check_upstream(upstream).await.expect_err("403 is an error");
    match &err {
        BridgeError::Upstream { status, message } => {
            assert_eq!(*status, 403);
            assert_eq!(message, "The bearer token included in the request is invalid.");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let response = axum::response::IntoResponse::into_response(err);
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read error body");
    let payload: serde_json::Value = serde_json::from_slice(&body).expect("error json");
    assert_eq!(payload["type"], "error");
    assert_eq!(payload["error"]["type"], "permission_error");

    server.abort();
}
