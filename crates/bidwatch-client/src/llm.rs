use std::time::Duration;

use bidwatch_core::error::AppError;
use bidwatch_core::models::Listing;
use bidwatch_core::traits::RelevanceOracle;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ANSWER_TOKENS: u32 = 3;

const DEFAULT_SYSTEM_PROMPT: &str = "You filter government procurement opportunities for a custom software development company.\n\
Return 'YES' if the work likely involves: software/app/web/mobile development, modernization, systems integration, APIs, data platforms/ETL/analytics/AI, cloud engineering, cybersecurity software, DevOps/SRE, or IT program management with software deliverables.\n\
Return 'NO' for: physical goods/hardware-only, construction/facilities, janitorial, printing, furniture, uniforms, fleet/vehicles, food, or purely non-software staffing. If uncertain but plausibly software-related, prefer YES.\n\
Respond with exactly YES or NO.";

/// Relevance oracle backed by an OpenAI-compatible chat-completions API.
///
/// Asks for a one-word YES/NO verdict on title and description. Transport
/// and API failures are returned as errors; the caller decides whether an
/// unanswered listing is forwarded.
#[derive(Clone)]
pub struct OpenAiClassifier {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    system_prompt: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, base_url, DEFAULT_LLM_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        let prompt = self.system_prompt.clone();
        Ok(Self::build(&self.api_key, &self.model, &self.base_url, timeout)?
            .with_system_prompt(prompt))
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        })
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// What the model sees about a listing.
fn user_prompt(listing: &Listing) -> String {
    format!(
        "Title: {}\nDescription: {}",
        listing.title.trim(),
        listing.description.as_deref().unwrap_or_default().trim()
    )
}

/// A verdict counts as relevant when it starts with `Y`, ignoring case and
/// surrounding whitespace.
fn is_affirmative(answer: &str) -> bool {
    answer
        .trim_start()
        .chars()
        .next()
        .is_some_and(|c| c.eq_ignore_ascii_case(&'y'))
}

impl RelevanceOracle for OpenAiClassifier {
    async fn classify(&self, listing: &Listing) -> Result<bool, AppError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: self.system_prompt.clone(),
                },
                Message {
                    role: "user",
                    content: user_prompt(listing),
                },
            ],
            temperature: 0.0,
            max_tokens: MAX_ANSWER_TOKENS,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));

            return Err(AppError::LlmError {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse LLM response: {e}")))?;

        let answer = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".into(),
                status_code: 200,
                retryable: false,
            })?;

        let relevant = is_affirmative(answer);
        tracing::debug!(listing_id = %listing.id, answer = %answer.trim(), relevant, "Classified listing");
        Ok(relevant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::serve_once;

    fn listing() -> Listing {
        Listing::new(
            "6100059871",
            "  Case Management Modernization ",
            "Department of Human Services",
            "IT",
            "Open",
            "https://portal.test/Procurement_Details.aspx?id=6100059871",
        )
    }

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("YES"));
        assert!(is_affirmative("  yes."));
        assert!(is_affirmative("Y"));
        assert!(!is_affirmative("NO"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("Maybe yes"));
    }

    #[test]
    fn prompt_includes_trimmed_title_and_description() {
        let with = listing().with_description(Some(" Replace the legacy system. ".into()));
        assert_eq!(
            user_prompt(&with),
            "Title: Case Management Modernization\nDescription: Replace the legacy system."
        );
        assert_eq!(
            user_prompt(&listing()),
            "Title: Case Management Modernization\nDescription: "
        );
    }

    #[tokio::test]
    async fn yes_answer_is_relevant() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"YES"}}]}"#;
        let (base, request) = serve_once(200, "application/json", body).await;
        let classifier = OpenAiClassifier::with_base_url("sk-test", DEFAULT_MODEL, &base).unwrap();

        assert!(classifier.classify(&listing()).await.unwrap());

        let request = request.await.unwrap();
        assert!(request.head.starts_with("POST /chat/completions"));
        assert!(request.head.contains("Bearer sk-test"));
        let sent: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(sent["model"], DEFAULT_MODEL);
        assert_eq!(sent["temperature"], 0.0);
        assert_eq!(sent["max_tokens"], MAX_ANSWER_TOKENS);
        assert_eq!(sent["messages"][0]["role"], "system");
    }

    #[tokio::test]
    async fn no_answer_is_not_relevant() {
        let body = r#"{"choices":[{"message":{"content":"NO"}}]}"#;
        let (base, _request) = serve_once(200, "application/json", body).await;
        let classifier = OpenAiClassifier::with_base_url("sk-test", DEFAULT_MODEL, &base).unwrap();

        assert!(!classifier.classify(&listing()).await.unwrap());
    }

    #[tokio::test]
    async fn server_error_is_retryable_llm_error() {
        let body = r#"{"error":{"message":"overloaded"}}"#;
        let (base, _request) = serve_once(503, "application/json", body).await;
        let classifier = OpenAiClassifier::with_base_url("sk-test", DEFAULT_MODEL, &base).unwrap();

        let err = classifier.classify(&listing()).await.unwrap_err();
        match err {
            AppError::LlmError {
                message,
                status_code,
                retryable,
            } => {
                assert_eq!(message, "overloaded");
                assert_eq!(status_code, 503);
                assert!(retryable);
            }
            other => panic!("expected LlmError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_maps_to_rate_limit_error() {
        let (base, _request) = serve_once(429, "application/json", "{}").await;
        let classifier = OpenAiClassifier::with_base_url("sk-test", DEFAULT_MODEL, &base).unwrap();

        let err = classifier.classify(&listing()).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded));
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let (base, _request) = serve_once(200, "application/json", r#"{"choices":[]}"#).await;
        let classifier = OpenAiClassifier::with_base_url("sk-test", DEFAULT_MODEL, &base).unwrap();

        let err = classifier.classify(&listing()).await.unwrap_err();
        assert!(matches!(err, AppError::LlmError { retryable: false, .. }));
    }
}
