// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire-level tests against a scripted HTTP server: SSE streaming, retry
//! behaviour on 5xx, and model listing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use pilot_model::{
    ChatClient, ChatTransport, ChunkKind, Message, RequestOptions, Sampler, StreamHandler,
};

/// Serve one scripted raw HTTP response per connection, in order.
async fn spawn_server(responses: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let queue = Arc::new(Mutex::new(responses));
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let next = {
                let mut q = queue.lock().await;
                if q.is_empty() { None } else { Some(q.remove(0)) }
            };
            let Some(response) = next else { return };
            tokio::spawn(async move {
                read_request(&mut stream).await;
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.flush().await;
            });
        }
    });
    format!("http://{addr}/v1")
}

/// Read one full request (headers + declared body).
async fn read_request(stream: &mut TcpStream) {
    let mut buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        let Ok(n) = stream.read(&mut tmp).await else { return };
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() - (pos + 4) >= content_length {
                return;
            }
        }
    }
}

fn sse_response(frames: &[&str]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&format!("data: {frame}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn error_response(status: u16) -> String {
    format!("HTTP/1.1 {status} Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
}

/// Records every stream callback for assertions.
#[derive(Default)]
struct Recorder {
    text: String,
    reasoning: String,
    retries: Vec<(u32, u16)>,
    done: bool,
}

#[async_trait]
impl StreamHandler for Recorder {
    async fn on_chunk(&mut self, kind: ChunkKind, text: &str) {
        match kind {
            ChunkKind::Output => self.text.push_str(text),
            ChunkKind::Reasoning => self.reasoning.push_str(text),
        }
    }
    async fn on_retry(&mut self, attempt: u32, status: u16) {
        self.retries.push((attempt, status));
    }
    async fn on_done(&mut self) {
        self.done = true;
    }
}

fn client(base: &str) -> ChatClient {
    ChatClient::from_parts(base, None, Duration::from_secs(10))
}

#[tokio::test(flavor = "multi_thread")]
async fn streams_text_and_usage_end_to_end() {
    let base = spawn_server(vec![sse_response(&[
        r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"{"choices":[{"delta":{"content":"lo."}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        r#"{"usage":{"prompt_tokens":12,"completion_tokens":4,"total_tokens":16}}"#,
    ])])
    .await;

    let mut handler = Recorder::default();
    let resp = client(&base)
        .stream(
            "m",
            &[Message::user("hi")],
            &Sampler::default(),
            &mut handler,
            &RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(resp.text, "Hello.");
    assert_eq!(handler.text, "Hello.");
    assert!(handler.done);
    assert_eq!(resp.tokens, 4);
    assert_eq!(resp.ctx, 16);
    assert_eq!(resp.usage.input_tokens, 12);
    assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    assert!(!resp.cancelled);
}

/// Scenario: HTTP 500, wait, reconnect, complete normally on attempt 2.
/// `on_retry(1, 500)` fires exactly once and the result matches a clean run.
#[tokio::test(flavor = "multi_thread")]
async fn retries_once_on_500_then_succeeds() {
    let base = spawn_server(vec![
        error_response(500),
        sse_response(&[
            r#"{"choices":[{"delta":{"content":"ok after retry"}}]}"#,
            r#"{"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        ]),
    ])
    .await;

    let mut handler = Recorder::default();
    let resp = client(&base)
        .stream(
            "m",
            &[Message::user("q")],
            &Sampler::default(),
            &mut handler,
            &RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(handler.retries, vec![(1, 500)], "exactly one retry");
    assert_eq!(resp.text, "ok after retry");
    assert_eq!(resp.usage.requests, 1, "only the successful request reported usage");
}

#[tokio::test(flavor = "multi_thread")]
async fn non_retryable_status_fails_immediately() {
    let base = spawn_server(vec![error_response(401)]).await;
    let mut handler = Recorder::default();
    let err = client(&base)
        .stream(
            "m",
            &[Message::user("q")],
            &Sampler::default(),
            &mut handler,
            &RequestOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(handler.retries.is_empty(), "401 must not retry");
    assert!(err.to_string().contains("401"), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_return_the_status_error() {
    let base = spawn_server(vec![
        error_response(503),
        error_response(503),
        error_response(503),
    ])
    .await;
    let mut handler = Recorder::default();
    let err = client(&base)
        .stream(
            "m",
            &[Message::user("q")],
            &Sampler::default(),
            &mut handler,
            &RequestOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(handler.retries.len(), 2, "backoff schedule caps retries at two");
    assert!(err.to_string().contains("503"));
}

#[tokio::test(flavor = "multi_thread")]
async fn reasoning_deltas_are_kept_apart_from_output() {
    let base = spawn_server(vec![sse_response(&[
        r#"{"choices":[{"delta":{"reasoning_content":"let me think"}}]}"#,
        r#"{"choices":[{"delta":{"content":"answer"}}]}"#,
    ])])
    .await;

    let mut handler = Recorder::default();
    let resp = client(&base)
        .stream(
            "m",
            &[Message::user("q")],
            &Sampler::default(),
            &mut handler,
            &RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(resp.text, "answer");
    assert_eq!(resp.reasoning_text, "let me think");
    assert_eq!(handler.reasoning, "let me think");
}

#[tokio::test(flavor = "multi_thread")]
async fn tool_call_deltas_reassemble_across_frames() {
    let base = spawn_server(vec![sse_response(&[
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"read","arguments":""}}]}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"filepath\":"}}]}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"a.txt\"}"}}]}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
    ])])
    .await;

    let mut handler = Recorder::default();
    let resp = client(&base)
        .stream(
            "m",
            &[Message::user("q")],
            &Sampler::default(),
            &mut handler,
            &RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(resp.tool_calls.len(), 1);
    assert_eq!(resp.tool_calls[0].id, "c1");
    assert_eq!(resp.tool_calls[0].name, "read");
    assert_eq!(resp.tool_calls[0].arguments, r#"{"filepath":"a.txt"}"#);
    assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
}

#[tokio::test(flavor = "multi_thread")]
async fn eos_markers_are_stripped_from_text() {
    let base = spawn_server(vec![sse_response(&[
        r#"{"choices":[{"delta":{"content":"\n\nclean body<|im_end|>"}}]}"#,
    ])])
    .await;

    let mut handler = Recorder::default();
    let resp = client(&base)
        .stream(
            "m",
            &[Message::user("q")],
            &Sampler::default(),
            &mut handler,
            &RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(resp.text, "clean body");
}

#[tokio::test(flavor = "multi_thread")]
async fn list_models_returns_sorted_ids() {
    let body = r#"{"data":[{"id":"zeta"},{"id":"alpha"}]}"#;
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let base = spawn_server(vec![response]).await;
    let models = client(&base).list_models().await.unwrap();
    assert_eq!(models, vec!["alpha", "zeta"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unary_complete_parses_message_and_usage() {
    let body = r#"{"model":"m1","choices":[{"finish_reason":"stop","message":{"content":"done"}}],"usage":{"prompt_tokens":7,"completion_tokens":2,"total_tokens":9}}"#;
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let base = spawn_server(vec![response]).await;
    let resp = client(&base)
        .complete("m", &[Message::user("q")], &Sampler::default(), &RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.text, "done");
    assert_eq!(resp.ctx, 9);
    assert_eq!(resp.model, "m1");
}
