//! Outbound chat-completion client.
//!
//! One POST per call, bounded by the configured timeout. The first choice's
//! message content is returned as-is; there is no retry and no fallback.

use serde::{Deserialize, Serialize};

use crate::config::InferenceConfig;

/// Longest upstream error body kept for diagnostics.
const ERROR_BODY_EXCERPT: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("inference request timed out")]
    Timeout,
    #[error("inference endpoint unreachable: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("inference endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("unexpected inference response: {0}")]
    MalformedResponse(String),
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl InferenceClient {
    pub fn new(cfg: &InferenceConfig) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(InferenceError::ClientBuild)?;
        Ok(Self {
            http,
            url: cfg.url.clone(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send the conversation and return the first completion's text.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, InferenceError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature,
        };
        let mut rb = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }

        let resp = rb.send().await.map_err(classify_transport)?;
        let status = resp.status();
        let text = resp.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(InferenceError::Status {
                status,
                body: excerpt(&text),
            });
        }
        extract_content(&text)
    }
}

fn classify_transport(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Transport(err)
    }
}

fn extract_content(text: &str) -> Result<String, InferenceError> {
    let parsed: CompletionResponse = serde_json::from_str(text)
        .map_err(|e| InferenceError::MalformedResponse(format!("invalid JSON body: {}", e)))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| {
            InferenceError::MalformedResponse("missing choices[0].message.content".to_string())
        })
}

fn excerpt(body: &str) -> String {
    if body.len() <= ERROR_BODY_EXCERPT {
        return body.to_string();
    }
    let mut end = ERROR_BODY_EXCERPT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_choice_content() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"first"}},{"index":1,"message":{"role":"assistant","content":"second"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "first");
    }

    #[test]
    fn empty_content_is_returned_verbatim() {
        let body = r#"{"choices":[{"message":{"content":""}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "");
    }

    #[test]
    fn missing_choices_is_malformed() {
        for body in [
            r#"{"choices":[]}"#,
            r#"{"object":"error"}"#,
            r#"{"choices":[{"message":{"role":"assistant"}}]}"#,
            "not json",
        ] {
            match extract_content(body) {
                Err(InferenceError::MalformedResponse(_)) => {}
                other => panic!("expected malformed response for {body}, got {other:?}"),
            }
        }
    }

    #[test]
    fn request_body_carries_model_messages_and_temperature() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("usr")];
        let body = CompletionRequest {
            model: "m",
            messages: &messages,
            temperature: 0.25,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "m");
        assert_eq!(value["temperature"], 0.25);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "usr");
    }

    #[test]
    fn long_error_bodies_are_truncated_on_char_boundary() {
        let body = "é".repeat(400);
        let cut = excerpt(&body);
        assert!(cut.ends_with('…'));
        assert!(cut.len() <= ERROR_BODY_EXCERPT + '…'.len_utf8());
    }
}
