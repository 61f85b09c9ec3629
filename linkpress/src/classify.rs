use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

use common::ClassifierConfig;

/// Coarse content taxonomy returned by classification. Only
/// `should_collect` and `reasoning` drive the pipeline; the taxonomy fields
/// are part of the collaborator's output contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Article,
    Video,
    Repository,
    Discussion,
    Product,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechnicalDepth {
    Introductory,
    Intermediate,
    Deep,
    None,
}

/// The accept/reject judgment for one candidate link.
#[derive(Debug, Clone)]
pub struct ClassificationVerdict {
    pub content_type: ContentType,
    pub technical_depth: TechnicalDepth,
    pub should_collect: bool,
    pub reasoning: String,
}

/// Contract for the external classification call. `title` and `description`
/// may be empty; implementations must be safely callable concurrently.
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        message_text: &str,
        url: &str,
        title: &str,
        description: &str,
    ) -> Result<ClassificationVerdict>;
}

/// Build a classifier from config. Missing config or an unresolvable API key
/// is not an error; it degrades to the rule-based fallback at lower precision.
pub fn build_classifier(config: Option<&ClassifierConfig>) -> Arc<dyn Classifier> {
    if let Some(cfg) = config {
        let adapter = cfg.adapter.as_deref().unwrap_or("remote");
        if adapter == "remote" {
            let key = cfg
                .api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok());
            if let Some(api_key) = key {
                let api_url = cfg
                    .api_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string());
                let model = cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
                let timeout = cfg.timeout_seconds.unwrap_or(20);
                info!(model = %model, "using remote LLM classifier");
                return Arc::new(LlmClassifier::new(api_url, api_key, model).with_timeout(timeout));
            }
            info!("classifier API key not configured, falling back to rule-based classifier");
        }
    } else {
        info!("no classifier configured, using rule-based classifier");
    }
    Arc::new(RuleBasedClassifier)
}

/// Remote classifier using an OpenAI-compatible chat-completions API.
pub struct LlmClassifier {
    api_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl LlmClassifier {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(20),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self
    }

    fn build_prompt(message_text: &str, url: &str, title: &str, description: &str) -> String {
        format!(
            r#"You curate links for a developer newsletter. Decide whether this link is worth collecting.

A link is worth collecting when it points to substantive content: articles, talks, repositories, papers, discussions. It is not worth collecting when it is transactional, internal tooling, a meeting link, media without context, or marketing noise.

LINK: {url}
TITLE: {title}
DESCRIPTION: {description}
SHARED WITH THIS MESSAGE: {message_text}

Answer in strict JSON, nothing else:
{{
  "content_type": "article|video|repository|discussion|product|other",
  "technical_depth": "introductory|intermediate|deep|none",
  "should_collect": true,
  "reasoning": "one short sentence"
}}
"#
        )
    }
}

#[async_trait::async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        message_text: &str,
        url: &str,
        title: &str,
        description: &str,
    ) -> Result<ClassificationVerdict> {
        let req_body = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Self::build_prompt(message_text, url, title, description),
            }],
            max_tokens: Some(200),
            temperature: Some(0.2),
        };

        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&self.api_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send(),
        )
        .await
        .context("classification request timed out")?
        .context("classification HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("classification API error {}: {}", status, body);
        }

        let resp_body: ChatResponse = response
            .json()
            .await
            .context("failed to parse classification response")?;

        let content = &resp_body
            .choices
            .first()
            .context("classification response has no choices")?
            .message
            .content;

        let cleaned = extract_json_from_text(content)
            .context("no JSON object found in classification response")?;
        let verdict: VerdictJson = serde_json::from_str(&cleaned)
            .with_context(|| format!("failed to parse verdict JSON: {}", cleaned))?;

        Ok(ClassificationVerdict {
            content_type: parse_content_type(verdict.content_type.as_deref().unwrap_or("")),
            technical_depth: parse_technical_depth(verdict.technical_depth.as_deref().unwrap_or("")),
            should_collect: verdict.should_collect,
            reasoning: verdict.reasoning.unwrap_or_else(|| "no reasoning given".to_string()),
        })
    }
}

/// Hosts that are workspace/internal tooling rather than shareable content.
const TOOL_DOMAINS: &[&str] = &[
    "zoom.us",
    "meet.google.com",
    "calendly.com",
    "atlassian.net",
    "trello.com",
    "asana.com",
    "monday.com",
    "docs.google.com",
    "drive.google.com",
    "dropbox.com",
];

/// Media/CDN hosts that carry an asset, not an article.
const MEDIA_DOMAINS: &[&str] = &["imgur.com", "gyazo.com", "cloudfront.net", "imgix.net"];

/// Auth/transactional path fragments.
const TRANSACTIONAL_PATHS: &[&str] = &[
    "/login", "/signin", "/sign-in", "/signup", "/sign-up", "/oauth", "/verify", "/password",
    "/unsubscribe", "/invite",
];

/// Zero-dependency fallback used when no LLM credentials are configured.
/// Keyed purely on URL shape; the default for unknown hosts and paths is
/// permissive (collect), leaving precision to the LLM when it is available.
pub struct RuleBasedClassifier;

#[async_trait::async_trait]
impl Classifier for RuleBasedClassifier {
    async fn classify(
        &self,
        _message_text: &str,
        url: &str,
        _title: &str,
        _description: &str,
    ) -> Result<ClassificationVerdict> {
        let parsed = Url::parse(url).context("unparseable URL")?;
        let host = parsed.host_str().unwrap_or("").to_lowercase();
        let path = parsed.path().to_lowercase();

        let reject = |reasoning: &str| ClassificationVerdict {
            content_type: ContentType::Other,
            technical_depth: TechnicalDepth::None,
            should_collect: false,
            reasoning: reasoning.to_string(),
        };

        if TOOL_DOMAINS.iter().any(|d| host.ends_with(d)) {
            return Ok(reject("internal tool or workspace app"));
        }
        if MEDIA_DOMAINS.iter().any(|d| host.ends_with(d)) {
            return Ok(reject("media host without article content"));
        }
        if TRANSACTIONAL_PATHS.iter().any(|p| path.contains(p)) {
            return Ok(reject("auth or transactional URL"));
        }

        let content_type = if host.ends_with("github.com") || host.ends_with("gitlab.com") {
            ContentType::Repository
        } else if host.ends_with("youtube.com") || host.ends_with("youtu.be") || host.ends_with("vimeo.com") {
            ContentType::Video
        } else if host.ends_with("news.ycombinator.com") || host.ends_with("reddit.com") {
            ContentType::Discussion
        } else {
            ContentType::Article
        };

        Ok(ClassificationVerdict {
            content_type,
            technical_depth: TechnicalDepth::None,
            should_collect: true,
            reasoning: "no exclusion rule matched, collected by default".to_string(),
        })
    }
}

fn parse_content_type(s: &str) -> ContentType {
    match s.trim().to_lowercase().as_str() {
        "article" => ContentType::Article,
        "video" => ContentType::Video,
        "repository" | "repo" => ContentType::Repository,
        "discussion" => ContentType::Discussion,
        "product" => ContentType::Product,
        _ => ContentType::Other,
    }
}

fn parse_technical_depth(s: &str) -> TechnicalDepth {
    match s.trim().to_lowercase().as_str() {
        "introductory" | "beginner" => TechnicalDepth::Introductory,
        "intermediate" => TechnicalDepth::Intermediate,
        "deep" | "advanced" => TechnicalDepth::Deep,
        _ => TechnicalDepth::None,
    }
}

/// Pull a JSON object out of model output that may be wrapped in markdown
/// fences or preceded by prose.
pub fn extract_json_from_text(text: &str) -> Option<String> {
    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let rest = &text[start + fence.len()..];
            if let Some(end) = rest.find("```") {
                return Some(rest[..end].trim().to_string());
            }
        }
    }
    let (start, end) = (text.find('{')?, text.rfind('}')?);
    if start < end {
        Some(text[start..=end].to_string())
    } else {
        None
    }
}

// OpenAI-compatible wire structures
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct VerdictJson {
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    technical_depth: Option<String>,
    should_collect: bool,
    #[serde(default)]
    reasoning: Option<String>,
}
