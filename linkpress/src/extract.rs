use chrono::{DateTime, Utc};
use regex::Regex;
use url::Url;

use crate::slack::ChannelMessage;

/// Domains that are structurally incapable of being article content:
/// the chat platform's own hosts plus emoji/gif CDNs.
const IGNORED_DOMAINS: &[&str] = &[
    "slack.com",
    "slack-edge.com",
    "slack-imgs.com",
    "emoji.slack-edge.com",
    "giphy.com",
    "tenor.com",
];

/// A candidate URL pulled out of one chat message. The surrounding message
/// text is kept as classification context; the value is ephemeral and never
/// persisted.
#[derive(Debug, Clone)]
pub struct ExtractedLink {
    pub url: String,
    pub message_text: String,
    pub timestamp: DateTime<Utc>,
}

/// Extracts candidate URLs from raw message text.
///
/// Recognizes both Slack's `<url|label>` markup and bare URLs in prose,
/// strips trailing prose punctuation from bare matches, drops denylisted
/// platform domains and obviously non-content paths, and deduplicates across
/// the whole message batch (first occurrence wins). Pure; no I/O.
pub struct LinkExtractor {
    markup_url: Regex,
    bare_url: Regex,
    non_content_ext: Regex,
    non_content_path: Regex,
}

impl LinkExtractor {
    pub fn new() -> Self {
        Self {
            // <https://...|optional label>
            markup_url: Regex::new(r"<(https?://[^|>]+)(?:\|[^>]*)?>").expect("markup url regex"),
            bare_url: Regex::new(r"https?://[^\s<>|]+").expect("bare url regex"),
            non_content_ext: Regex::new(r"\.(png|jpg|jpeg|gif|webp|svg|ico|pdf|zip|tar|gz)$")
                .expect("extension regex"),
            non_content_path: Regex::new(r"^/?(favicon|robots\.txt|sitemap)")
                .expect("path regex"),
        }
    }

    /// Scan a batch of messages in order and return the deduplicated links.
    /// When the same URL appears in several messages, the first occurrence's
    /// message text and timestamp are kept as its context.
    pub fn extract_from_messages(&self, messages: &[ChannelMessage]) -> Vec<ExtractedLink> {
        let mut seen = std::collections::HashSet::new();
        let mut links = Vec::new();

        for message in messages {
            if message.text.is_empty() {
                continue;
            }
            for url in self.extract_urls(&message.text) {
                if seen.insert(url.clone()) {
                    links.push(ExtractedLink {
                        url,
                        message_text: message.text.clone(),
                        timestamp: message.timestamp,
                    });
                }
            }
        }

        links
    }

    /// Extract candidate URLs from a single message's text, in match order.
    /// Markup-form matches are collected first so a URL that appears both
    /// bracketed and bare is only counted once.
    pub fn extract_urls(&self, text: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut urls = Vec::new();

        for caps in self.markup_url.captures_iter(text) {
            let url = caps[1].to_string();
            if seen.insert(url.clone()) {
                urls.push(url);
            }
        }

        for m in self.bare_url.find_iter(text) {
            // Trailing punctuation is almost always prose, not part of the URL.
            let url = m
                .as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', ')'])
                .to_string();
            if seen.insert(url.clone()) {
                urls.push(url);
            }
        }

        urls.retain(|u| self.is_candidate(u));
        urls
    }

    /// Denylist plus a conservative non-content heuristic. The default is
    /// permissive: unknown hosts and paths pass through to classification.
    fn is_candidate(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };

        if IGNORED_DOMAINS.iter().any(|d| host.contains(d)) {
            return false;
        }

        let path = parsed.path().to_lowercase();
        if self.non_content_ext.is_match(&path) || self.non_content_path.is_match(&path) {
            return false;
        }

        true
    }
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new()
    }
}
