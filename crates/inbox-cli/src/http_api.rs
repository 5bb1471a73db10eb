//! reqwest-backed conversation API used for snapshot hydration.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use inbox_core::json_field;
use inbox_follow::{ApiError, Contact, Conversation, ConversationApi, Message};
use serde_json::Value;

pub(crate) const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;
const API_TOKEN_HEADER: &str = "api_access_token";
const RETRY_ATTEMPT_HEADER: &str = "x-inbox-retry-attempt";

#[derive(Clone)]
pub(crate) struct HttpConversationApi {
    http: reqwest::Client,
    account_base: String,
    api_token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl HttpConversationApi {
    pub(crate) fn new(
        base_url: &str,
        account_id: u64,
        api_token: &str,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("inbox-follow"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create conversation api client")?;

        Ok(Self {
            http,
            account_base: format!(
                "{}/api/v1/accounts/{account_id}",
                base_url.trim().trim_end_matches('/')
            ),
            api_token: api_token.trim().to_string(),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    async fn get_json(
        &self,
        resource: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let url = format!("{}{path}", self.account_base);
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = self
                .http
                .get(&url)
                .header(API_TOKEN_HEADER, &self.api_token)
                .header(RETRY_ATTEMPT_HEADER, attempt.saturating_sub(1).to_string())
                .query(query)
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|error| {
                            ApiError::Decode(format!("failed to decode {resource}: {error}"))
                        });
                    }
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(ApiError::NotFound {
                            resource: resource.to_string(),
                        });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts && is_retryable_status(status.as_u16()) {
                        tracing::debug!(
                            resource,
                            status = status.as_u16(),
                            attempt,
                            "retrying conversation api request"
                        );
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }
                    return Err(ApiError::Status {
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(ApiError::Transport(format!(
                        "{resource} request failed: {error}"
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn get_conversation(&self, conversation_id: u64) -> Result<Conversation, ApiError> {
        let resource = format!("conversation {conversation_id}");
        let payload = self
            .get_json(&resource, &format!("/conversations/{conversation_id}"), &[])
            .await?;
        Conversation::from_value(&payload)
            .ok_or_else(|| ApiError::Decode(format!("{resource} response carried no id")))
    }

    async fn get_contact(&self, contact_id: u64) -> Result<Contact, ApiError> {
        let resource = format!("contact {contact_id}");
        let payload = self
            .get_json(&resource, &format!("/contacts/{contact_id}"), &[])
            .await?;
        Contact::from_value(&payload)
            .ok_or_else(|| ApiError::Decode(format!("{resource} response carried no id")))
    }

    async fn list_messages(
        &self,
        conversation_id: u64,
        before_id: Option<u64>,
        _page_size: usize,
    ) -> Result<Vec<Message>, ApiError> {
        let query: Vec<(&str, String)> = before_id
            .map(|before_id| ("before", before_id.to_string()))
            .into_iter()
            .collect();
        let payload = self
            .get_json(
                &format!("messages of conversation {conversation_id}"),
                &format!("/conversations/{conversation_id}/messages"),
                &query,
            )
            .await?;
        Ok(payload_items(&payload)
            .iter()
            .filter_map(Message::from_value)
            .collect())
    }

    async fn list_labels(&self, conversation_id: u64) -> Result<Vec<String>, ApiError> {
        let payload = self
            .get_json(
                &format!("labels of conversation {conversation_id}"),
                &format!("/conversations/{conversation_id}/labels"),
                &[],
            )
            .await?;
        Ok(payload_items(&payload)
            .iter()
            .filter_map(Value::as_str)
            .map(ToOwned::to_owned)
            .collect())
    }
}

/// List endpoints answer either a bare array or `{"payload": [...]}`.
fn payload_items(payload: &Value) -> &[Value] {
    json_field(payload, "payload")
        .unwrap_or(payload)
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after_seconds: Option<u64>) -> Duration {
    if let Some(retry_after_seconds) = retry_after_seconds {
        return Duration::from_secs(retry_after_seconds);
    }
    let exponent = attempt.saturating_sub(1).min(6) as u32;
    let scale = 2_u64.pow(exponent);
    Duration::from_millis(base_delay_ms.max(1).saturating_mul(scale))
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

fn truncate_for_error(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
