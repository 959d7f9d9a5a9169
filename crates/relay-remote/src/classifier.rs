use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, instrument};

use relay_core::{Classifier, ClassifierError, ClassifyRequest};

use crate::error::{parse_endpoint, Result};

const SYSTEM_PROMPT: &str =
    "You are a classifier that determines which agent should handle a user request.";

/// Connection settings for [`ChatClassifier`].
#[derive(Debug)]
pub struct ChatClassifierConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub request_timeout: Duration,
}

impl Default for ChatClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4".into(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Classifier backed by a chat-completions model at temperature 0.
pub struct ChatClassifier {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    model: String,
    api_key: Option<SecretString>,
}

impl ChatClassifier {
    pub fn new(config: ChatClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Self::with_client(config, client)
    }

    /// Build with a shared HTTP client.
    pub fn with_client(config: ChatClassifierConfig, client: reqwest::Client) -> Result<Self> {
        let endpoint = parse_endpoint(&format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        ))?;
        Ok(Self {
            client,
            endpoint,
            model: config.model,
            api_key: config.api_key,
        })
    }

    fn user_message(request: &ClassifyRequest<'_>) -> String {
        let names: Vec<&str> = request.capabilities.iter().map(String::as_str).collect();
        format!(
            "User request: {}\n\nClassify this as one of: {}",
            request.input,
            names.join(", ")
        )
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Classifier for ChatClassifier {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn classify(&self, request: &ClassifyRequest<'_>) -> std::result::Result<String, ClassifierError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::user_message(request)},
            ],
        });

        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClassifierError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "classifier API error");
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassifierError::Malformed("response has no message content".into()))?;

        debug!(label = %content, "classifier answered");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, api_key: Option<&str>) -> ChatClassifierConfig {
        ChatClassifierConfig {
            base_url: format!("{}/v1/", server.uri()),
            api_key: api_key.map(SecretString::from),
            ..Default::default()
        }
    }

    fn names() -> BTreeSet<String> {
        ["github", "outreach"].iter().map(|s| s.to_string()).collect()
    }

    async fn classify(classifier: &ChatClassifier) -> std::result::Result<String, ClassifierError> {
        let caps = names();
        classifier
            .classify(&ClassifyRequest {
                input: "list open issues",
                capabilities: &caps,
                history: &[],
            })
            .await
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4", "temperature": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": " GitHub\n"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let classifier = ChatClassifier::new(config(&server, Some("sk-test"))).unwrap();
        // Raw text comes back untouched; the router normalizes it
        assert_eq!(classify(&classifier).await.unwrap(), " GitHub\n");
    }

    #[tokio::test]
    async fn prompt_lists_capabilities() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": "User request: list open issues\n\nClassify this as one of: github, outreach"},
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "github"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let classifier = ChatClassifier::new(config(&server, None)).unwrap();
        assert_eq!(classify(&classifier).await.unwrap(), "github");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let classifier = ChatClassifier::new(config(&server, None)).unwrap();
        match classify(&classifier).await {
            Err(ClassifierError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_are_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let classifier = ChatClassifier::new(config(&server, None)).unwrap();
        assert!(matches!(
            classify(&classifier).await,
            Err(ClassifierError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn connection_failure_is_a_request_error() {
        let classifier = ChatClassifier::new(ChatClassifierConfig {
            base_url: "http://127.0.0.1:1".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            classify(&classifier).await,
            Err(ClassifierError::Request(_))
        ));
    }

    #[test]
    fn invalid_base_url_rejected() {
        let result = ChatClassifier::new(ChatClassifierConfig {
            base_url: "nowhere".into(),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
