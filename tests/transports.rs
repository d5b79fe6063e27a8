use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde_json::json;
use sitegen::config::{Secret, Settings};
use sitegen::transport::event_source::EventSourceTransport;
use sitegen::transport::fetch_sse::FetchSseTransport;
use sitegen::transport::http::HttpTransport;
use sitegen::{FailureKind, GenerationError, GenerationRequest, Provider, StreamEvent, Transport};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM: &str = concat!(
    "event: chunk\n",
    "data: {\"type\":\"status\",\"payload\":\"Thinking\"}\n\n",
    "event: chunk\n",
    "data: {\"type\":\"code\",\"payload\":\"<h1>\"}\n\n",
    ": keepalive\n\n",
    "event: chunk\n",
    "data: not json\n\n",
    "event: chunk\r\n",
    "data: {\"type\":\"code\",\"payload\":\"Hi</h1>\"}\r\n\r\n",
    "event: done\n",
    "data: {\"html\":\"<h1>Hi</h1>\",\"content\":\"ok\"}\n\n",
);

fn openai_request(prompt: &str) -> Arc<GenerationRequest> {
    let settings = Settings {
        provider: Provider::Openai,
        model: "gpt-4o-mini".into(),
        api_key: Some(Secret::new("sk-test")),
        ..Settings::default()
    };
    Arc::new(GenerationRequest::new(prompt, &settings).unwrap())
}

fn base(server: &MockServer) -> Url {
    Url::parse(&server.uri()).unwrap()
}

async fn collect(transport: &dyn Transport, req: Arc<GenerationRequest>) -> Vec<StreamEvent> {
    let stream = transport.open(req, CancellationToken::new());
    tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .expect("stream should finish")
}

fn expected_stream_events() -> Vec<StreamEvent> {
    vec![
        StreamEvent::Status("Thinking".into()),
        StreamEvent::CodeChunk("<h1>".into()),
        StreamEvent::CodeChunk("Hi</h1>".into()),
        StreamEvent::Done {
            html: Some("<h1>Hi</h1>".into()),
            content: Some("ok".into()),
            messages: None,
        },
    ]
}

#[tokio::test]
async fn fetch_sse_posts_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(header("accept", "text/event-stream"))
        .and(header("x-openai-key", "sk-test"))
        .and(body_json(json!({
            "prompt": "dark landing",
            "provider": "openai",
            "model": "gpt-4o-mini"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let t = FetchSseTransport::new(reqwest::Client::new(), base(&server));
    let events = collect(&t, openai_request("  dark landing ")).await;
    assert_eq!(events, expected_stream_events());
}

#[tokio::test]
async fn fetch_sse_accepts_plain_json_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "<b>x</b>",
            "meta": {"title": "X"}
        })))
        .mount(&server)
        .await;

    let t = FetchSseTransport::new(reqwest::Client::new(), base(&server));
    let events = collect(&t, openai_request("x")).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::MetaChunk(json!({"title": "X"})),
            StreamEvent::CodeChunk("<b>x</b>".into()),
            StreamEvent::Done {
                html: None,
                content: None,
                messages: None
            },
        ]
    );
}

#[tokio::test]
async fn event_source_gets_stream_with_prompt_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/generate/stream"))
        .and(query_param("prompt", "dark landing & contact"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let t = EventSourceTransport::new(reqwest::Client::new(), base(&server));
    let events = collect(&t, openai_request("dark landing & contact")).await;
    assert_eq!(events, expected_stream_events());
}

#[tokio::test]
async fn event_source_rejects_non_stream_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/generate/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"html": "<p>x</p>"})))
        .mount(&server)
        .await;

    let t = EventSourceTransport::new(reqwest::Client::new(), base(&server));
    let events = collect(&t, openai_request("x")).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::Error(GenerationError::Transport(_))));
}

#[tokio::test]
async fn named_error_event_is_terminal_and_redacted() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: chunk\ndata: {\"type\":\"code\",\"payload\":\"<p>\"}\n\n",
        "event: error\ndata: {\"message\":\"bad key sk-test\"}\n\n",
        "event: done\ndata: {\"html\":\"<p>late</p>\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let t = FetchSseTransport::new(reqwest::Client::new(), base(&server));
    let events = collect(&t, openai_request("x")).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::CodeChunk("<p>".into()),
            StreamEvent::Error(GenerationError::Transport("bad key ***".into())),
        ]
    );
}

#[tokio::test]
async fn stream_without_done_ends_in_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "event: chunk\ndata: {\"type\":\"code\",\"payload\":\"<p>\"}\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let t = FetchSseTransport::new(reqwest::Client::new(), base(&server));
    let events = collect(&t, openai_request("x")).await;
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1], StreamEvent::Error(GenerationError::Transport(_))));
}

#[tokio::test]
async fn cancel_yields_exactly_one_abort() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(STREAM, "text/event-stream")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let t = FetchSseTransport::new(reqwest::Client::new(), base(&server));
    let cancel = CancellationToken::new();
    let stream = t.open(openai_request("x"), cancel.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
        .await
        .expect("abort should end the stream promptly");
    assert_eq!(events, vec![StreamEvent::Error(GenerationError::Aborted)]);
}

#[tokio::test]
async fn generate_once_returns_sanitized_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "html": "<main id=\"root\" onclick=\"go()\">Hi<script>x()</script></main>",
            "content": "Built a page",
            "messages": [{"role": "assistant", "content": "Built a page"}]
        })))
        .mount(&server)
        .await;

    let client = HttpTransport::new(reqwest::Client::new(), base(&server));
    let result = client
        .generate_once(&openai_request("x"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.html, r#"<main id="preview-root">Hi</main>"#);
    assert_eq!(result.content, "Built a page");
    assert_eq!(result.messages.map(|m| m.len()), Some(1));
}

#[tokio::test]
async fn generate_once_classifies_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(header("x-openai-key", "sk-test"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "quota for sk-test"})))
        .mount(&server)
        .await;

    let client = HttpTransport::new(reqwest::Client::new(), base(&server));
    let err = client
        .generate_once(&openai_request("x"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GenerationError::HttpStatus {
            status: 429,
            message: "quota for ***".into()
        }
    );
    assert_eq!(err.kind(), Some(FailureKind::RateLimited));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let client = HttpTransport::new(reqwest::Client::new(), base(&server));
    let err = client
        .generate_once(&openai_request("x"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GenerationError::HttpStatus {
            status: 500,
            message: "Internal Server Error".into()
        }
    );
    assert_eq!(err.kind(), Some(FailureKind::ServerError));
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let client = HttpTransport::new(
        reqwest::Client::new(),
        Url::parse("http://127.0.0.1:1").unwrap(),
    );
    let err = client
        .generate_once(&openai_request("x"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(FailureKind::NetworkError));
    assert!(!err.to_string().contains("sk-test"));
}

#[tokio::test]
async fn http_tier_emits_status_then_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"html": "<p>x</p>"})))
        .mount(&server)
        .await;

    let t = HttpTransport::new(reqwest::Client::new(), base(&server));
    let events = collect(&t, openai_request("x")).await;
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], StreamEvent::Status(_)));
    assert_eq!(
        events[1],
        StreamEvent::Done {
            html: Some("<p>x</p>".into()),
            content: None,
            messages: None
        }
    );
}
