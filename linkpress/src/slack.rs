use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

/// One message from a channel's history, flattened to what the pipeline
/// needs: the raw text and when it was posted.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Contract for fetching a channel's recent message window. The pagination
/// machinery is the implementation's concern; callers see a flat sequence up
/// to `limit` messages.
#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(&self, channel_id: &str, limit: usize) -> Result<Vec<ChannelMessage>>;

    /// Cheap credential probe, advisory only. Implementations without a
    /// meaningful probe return a placeholder identity.
    async fn auth_probe(&self) -> Result<String> {
        Ok("anonymous".to_string())
    }
}

/// Slack Web API client authenticated with a session token + cookie pair.
pub struct SlackClient {
    token: String,
    cookie: String,
    base_url: String,
    client: reqwest::Client,
}

impl SlackClient {
    pub fn new(token: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            cookie: cookie.into(),
            base_url: "https://slack.com/api".to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base URL (used by tests against a local mock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Cookie", format!("d={}", self.cookie))
            .form(params)
            .send()
            .await
            .with_context(|| format!("Slack API request failed: {}", method))?;

        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to parse Slack API response: {}", method))
    }
}

#[async_trait::async_trait]
impl HistorySource for SlackClient {
    async fn fetch_history(&self, channel_id: &str, limit: usize) -> Result<Vec<ChannelMessage>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        while messages.len() < limit {
            let page_size = (limit - messages.len()).min(200);
            let mut params = vec![
                ("channel", channel_id.to_string()),
                ("limit", page_size.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }

            let page: HistoryResponse = self.call("conversations.history", &params).await?;
            if !page.ok {
                anyhow::bail!(
                    "Slack API error: {}",
                    page.error.as_deref().unwrap_or("unknown error")
                );
            }

            for raw in page.messages {
                let timestamp = parse_slack_ts(&raw.ts).unwrap_or_else(|| {
                    debug!(ts = %raw.ts, "unparseable message ts, using current time");
                    Utc::now()
                });
                messages.push(ChannelMessage {
                    text: raw.text.unwrap_or_default(),
                    timestamp,
                });
            }

            cursor = page.response_metadata.and_then(|m| m.next_cursor).filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        messages.truncate(limit);
        Ok(messages)
    }

    async fn auth_probe(&self) -> Result<String> {
        let resp: AuthTestResponse = self.call("auth.test", &[]).await?;
        if !resp.ok {
            anyhow::bail!(
                "Slack auth test failed: {}",
                resp.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(resp.user.or(resp.user_id).unwrap_or_else(|| "unknown".to_string()))
    }
}

/// Slack timestamps are "seconds.fraction" strings, e.g. "1714000000.000100".
fn parse_slack_ts(ts: &str) -> Option<DateTime<Utc>> {
    let mut parts = ts.splitn(2, '.');
    let secs: i64 = parts.next()?.parse().ok()?;
    let nanos: u32 = match parts.next() {
        // The fractional part is microseconds
        Some(frac) => frac.parse::<u32>().ok()?.checked_mul(1_000)?,
        None => 0,
    };
    DateTime::from_timestamp(secs, nanos)
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    text: Option<String>,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}
