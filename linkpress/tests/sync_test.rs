use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{ChannelConfig, SlackSourceConfig};
use linkpress::classify::{ClassificationVerdict, Classifier, ContentType, TechnicalDepth};
use linkpress::extract::LinkExtractor;
use linkpress::slack::{ChannelMessage, HistorySource};
use linkpress::store::{ArticleStore, ArticleStub};
use linkpress::sync::{sync_channel, sync_sources};

// ---- test doubles ----

/// Serves canned messages per channel id; errors for unknown channels.
struct CannedHistory {
    channels: HashMap<String, Vec<ChannelMessage>>,
}

#[async_trait::async_trait]
impl HistorySource for CannedHistory {
    async fn fetch_history(&self, channel_id: &str, limit: usize) -> Result<Vec<ChannelMessage>> {
        match self.channels.get(channel_id) {
            Some(messages) => Ok(messages.iter().take(limit).cloned().collect()),
            None => bail!("channel_not_found"),
        }
    }
}

/// In-memory store with the same uniqueness semantics as the SQLite one.
#[derive(Default)]
struct MemStore {
    articles: Mutex<HashMap<String, ArticleStub>>,
}

impl MemStore {
    fn len(&self) -> usize {
        self.articles.lock().unwrap().len()
    }

    fn get(&self, url: &str) -> Option<ArticleStub> {
        self.articles.lock().unwrap().get(url).cloned()
    }
}

#[async_trait::async_trait]
impl ArticleStore for MemStore {
    async fn find_existing(&self, urls: &[String]) -> Result<HashSet<String>> {
        let articles = self.articles.lock().unwrap();
        Ok(urls.iter().filter(|u| articles.contains_key(*u)).cloned().collect())
    }

    async fn insert_if_absent(&self, stub: &ArticleStub) -> Result<()> {
        let mut articles = self.articles.lock().unwrap();
        articles.entry(stub.url.clone()).or_insert_with(|| stub.clone());
        Ok(())
    }
}

fn accept_verdict() -> ClassificationVerdict {
    ClassificationVerdict {
        content_type: ContentType::Article,
        technical_depth: TechnicalDepth::Intermediate,
        should_collect: true,
        reasoning: "looks useful".to_string(),
    }
}

struct AcceptAll;

#[async_trait::async_trait]
impl Classifier for AcceptAll {
    async fn classify(&self, _m: &str, _u: &str, _t: &str, _d: &str) -> Result<ClassificationVerdict> {
        Ok(accept_verdict())
    }
}

struct AlwaysFails;

#[async_trait::async_trait]
impl Classifier for AlwaysFails {
    async fn classify(&self, _m: &str, _u: &str, _t: &str, _d: &str) -> Result<ClassificationVerdict> {
        bail!("service unavailable")
    }
}

/// Counts invocations and tracks the concurrent high-water mark.
struct Gauge {
    calls: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Classifier for Gauge {
    async fn classify(&self, _m: &str, _u: &str, _t: &str, _d: &str) -> Result<ClassificationVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(15)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(accept_verdict())
    }
}

fn msg_at(text: &str, secs: i64) -> ChannelMessage {
    ChannelMessage {
        text: text.to_string(),
        timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
    }
}

fn channel(id: &str, name: &str) -> ChannelConfig {
    ChannelConfig {
        id: id.to_string(),
        name: name.to_string(),
    }
}

fn history(entries: &[(&str, Vec<ChannelMessage>)]) -> CannedHistory {
    CannedHistory {
        channels: entries
            .iter()
            .map(|(id, msgs)| (id.to_string(), msgs.clone()))
            .collect(),
    }
}

// ---- tests ----

#[tokio::test]
async fn channel_counters_satisfy_the_identity() {
    let store = MemStore::default();
    store
        .insert_if_absent(&ArticleStub::from_link(
            &linkpress::extract::ExtractedLink {
                url: "https://known.example/post".to_string(),
                message_text: String::new(),
                timestamp: Utc::now(),
            },
            "C1",
        ))
        .await
        .unwrap();

    let history = history(&[(
        "C1",
        vec![
            msg_at("old favorite https://known.example/post", 100),
            msg_at("fresh https://fresh.example/a", 200),
            msg_at("meeting at https://acme.zoom.us/j/99", 300),
        ],
    )]);

    // Rule-based fallback: accepts fresh.example, rejects the zoom link
    let classifier = linkpress::classify::RuleBasedClassifier;
    let summary = sync_channel(
        &history,
        &store,
        &classifier,
        &LinkExtractor::new(),
        &channel("C1", "reading"),
        200,
        5,
    )
    .await
    .unwrap();

    assert_eq!(summary.seen, 3);
    assert_eq!(summary.new, 1);
    assert_eq!(summary.known, 1);
    assert_eq!(summary.filtered, 1);
    assert_eq!(summary.seen, summary.new + summary.known + summary.filtered);

    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].0, "https://acme.zoom.us/j/99");
}

#[tokio::test]
async fn accepted_stub_carries_message_timestamp_and_channel() {
    let store = MemStore::default();
    let history = history(&[("C7", vec![msg_at("https://fresh.example/a", 1_714_000_000)])]);

    sync_channel(
        &history,
        &store,
        &AcceptAll,
        &LinkExtractor::new(),
        &channel("C7", "links"),
        200,
        5,
    )
    .await
    .unwrap();

    let stub = store.get("https://fresh.example/a").expect("stored");
    assert_eq!(stub.created_at.timestamp(), 1_714_000_000);
    assert_eq!(stub.source_channel_id.as_deref(), Some("C7"));
    assert_eq!(stub.title, "https://fresh.example/a");
    assert!(stub.processed_at.is_none());
    assert!(stub.tags.is_empty());
}

#[tokio::test]
async fn second_run_with_no_new_messages_adds_nothing() {
    let store = MemStore::default();
    let messages = vec![
        msg_at("https://a.example/1", 1),
        msg_at("https://a.example/2 and https://a.example/3", 2),
    ];
    let history = history(&[("C1", messages)]);
    let extractor = LinkExtractor::new();
    let ch = channel("C1", "reading");

    let first = sync_channel(&history, &store, &AcceptAll, &extractor, &ch, 200, 5)
        .await
        .unwrap();
    assert_eq!(first.new, 3);
    assert_eq!(store.len(), 3);

    let second = sync_channel(&history, &store, &AcceptAll, &extractor, &ch, 200, 5)
        .await
        .unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(second.known, 3);
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn repeated_url_across_messages_is_seen_once() {
    let store = MemStore::default();
    let messages = (0..5)
        .map(|i| msg_at("again https://a.example/same", i))
        .collect::<Vec<_>>();
    let history = history(&[("C1", messages)]);

    let summary = sync_channel(
        &history,
        &store,
        &AcceptAll,
        &LinkExtractor::new(),
        &channel("C1", "reading"),
        200,
        5,
    )
    .await
    .unwrap();

    assert_eq!(summary.seen, 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn classifier_outage_fails_closed_into_filtered() {
    let store = MemStore::default();
    let history = history(&[(
        "C1",
        vec![msg_at("https://a.example/1 https://a.example/2", 1)],
    )]);

    let summary = sync_channel(
        &history,
        &store,
        &AlwaysFails,
        &LinkExtractor::new(),
        &channel("C1", "reading"),
        200,
        5,
    )
    .await
    .unwrap();

    assert_eq!(summary.seen, 2);
    assert_eq!(summary.filtered, 2);
    assert_eq!(summary.new, 0);
    assert_eq!(store.len(), 0);
    for (_, reasoning) in &summary.rejected {
        assert!(reasoning.starts_with("classification failed"));
    }
}

#[tokio::test]
async fn dispatcher_concurrency_is_bounded_through_the_channel_path() {
    let store = MemStore::default();
    let text = (0..12)
        .map(|i| format!("https://a.example/{}", i))
        .collect::<Vec<_>>()
        .join(" ");
    let history = history(&[("C1", vec![msg_at(&text, 1)])]);

    let gauge = Gauge::new();
    let summary = sync_channel(
        &history,
        &store,
        &gauge,
        &LinkExtractor::new(),
        &channel("C1", "reading"),
        200,
        5,
    )
    .await
    .unwrap();

    assert_eq!(summary.new, 12);
    assert_eq!(gauge.calls.load(Ordering::SeqCst), 12);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 5);
}

#[tokio::test]
async fn zero_sources_returns_all_zero_without_io() {
    let store = MemStore::default();
    let result = sync_sources(
        &[],
        |_| -> Arc<dyn HistorySource> { panic!("no source should be connected") },
        &store,
        &AcceptAll,
        200,
        5,
    )
    .await;

    assert_eq!(result, linkpress::sync::SyncResult::default());
}

#[tokio::test]
async fn failed_channel_contributes_zero_and_sync_continues() {
    let store = Arc::new(MemStore::default());
    let history: Arc<dyn HistorySource> = Arc::new(history(&[(
        "GOOD",
        vec![msg_at("https://a.example/1", 1)],
    )]));

    let sources = vec![SlackSourceConfig {
        workspace: "acme".to_string(),
        token: "t".to_string(),
        cookie: "c".to_string(),
        channels: vec![channel("MISSING", "broken"), channel("GOOD", "reading")],
    }];

    let result = sync_sources(
        &sources,
        |_| Arc::clone(&history),
        store.as_ref(),
        &AcceptAll,
        200,
        5,
    )
    .await;

    // Only the good channel counts; the failed one is all-or-nothing zero.
    assert_eq!(result.total_links_seen, 1);
    assert_eq!(result.new_articles, 1);
    assert_eq!(result.already_known, 0);
    assert_eq!(result.filtered_out, 0);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn totals_fold_across_workspaces() {
    let store = MemStore::default();
    let history: Arc<dyn HistorySource> = Arc::new(history(&[
        ("C1", vec![msg_at("https://a.example/1", 1)]),
        ("C2", vec![msg_at("https://b.example/2 https://a.example/1", 2)]),
    ]));

    let mk = |ws: &str, chans: Vec<ChannelConfig>| SlackSourceConfig {
        workspace: ws.to_string(),
        token: "t".to_string(),
        cookie: "c".to_string(),
        channels: chans,
    };
    let sources = vec![
        mk("one", vec![channel("C1", "a")]),
        mk("two", vec![channel("C2", "b")]),
    ];

    let result = sync_sources(&sources, |_| Arc::clone(&history), &store, &AcceptAll, 200, 5).await;

    // C1 stores a.example/1; C2 sees it as already known plus one new link.
    assert_eq!(result.total_links_seen, 3);
    assert_eq!(result.new_articles, 2);
    assert_eq!(result.already_known, 1);
    assert_eq!(
        result.total_links_seen,
        result.new_articles + result.already_known + result.filtered_out
    );
}
