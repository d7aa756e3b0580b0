#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::post, Json, Router};
use exam_assist::{app, build_state, AppConfig, InferenceConfig};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const TOKEN: &str = "test-token";

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// How the mock inference endpoint answers.
#[derive(Clone)]
pub enum Upstream {
    /// 200 with `choices[0].message.content` set to the text.
    Reply(String),
    /// Replies in order, repeating the last one.
    Sequence(Vec<String>),
    /// Given status with a plain error body.
    Status(u16),
    /// 200 with a body lacking the completion field.
    Malformed,
    /// Reply after sleeping.
    Slow(Duration, String),
}

#[derive(Clone)]
struct MockState {
    behaviour: Upstream,
    seen: Arc<Mutex<Vec<Value>>>,
}

pub struct MockInference {
    pub url: String,
    pub seen: Arc<Mutex<Vec<Value>>>,
    pub handle: JoinHandle<()>,
}

impl MockInference {
    pub fn requests(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }
}

fn completion(text: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}
        ]
    })
}

async fn chat_completions(State(mock): State<MockState>, Json(body): Json<Value>) -> Response {
    let call_index = {
        let mut seen = mock.seen.lock().unwrap();
        seen.push(body);
        seen.len() - 1
    };
    match mock.behaviour {
        Upstream::Reply(text) => Json(completion(&text)).into_response(),
        Upstream::Sequence(replies) => {
            let text = replies
                .get(call_index)
                .or_else(|| replies.last())
                .cloned()
                .unwrap_or_default();
            Json(completion(&text)).into_response()
        }
        Upstream::Status(code) => (
            StatusCode::from_u16(code).unwrap(),
            "model backend unavailable",
        )
            .into_response(),
        Upstream::Malformed => Json(json!({"object": "chat.completion", "choices": []})).into_response(),
        Upstream::Slow(delay, text) => {
            tokio::time::sleep(delay).await;
            Json(completion(&text)).into_response()
        }
    }
}

// Spin up a mock chat-completion service on an ephemeral port.
pub async fn start_mock_inference(behaviour: Upstream) -> MockInference {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        behaviour,
        seen: seen.clone(),
    };
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    MockInference {
        url: format!("http://{}/v1/chat/completions", addr),
        seen,
        handle,
    }
}

pub fn test_config(inference_url: &str, output_dir: &Path) -> AppConfig {
    AppConfig {
        inference: InferenceConfig {
            url: inference_url.to_string(),
            timeout: Duration::from_secs(5),
            ..InferenceConfig::default()
        },
        api_token: TOKEN.to_string(),
        output_dir: output_dir.to_path_buf(),
        max_request_bytes: None,
    }
}

/// Serve the relay on an ephemeral port and return its base URL.
pub async fn spawn_app(config: AppConfig) -> (String, JoinHandle<()>) {
    let state = build_state(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(state);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

pub fn bearer() -> String {
    format!("Bearer {}", TOKEN)
}
