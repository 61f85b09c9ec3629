use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use common::{ChannelConfig, Config, SlackSourceConfig};

use crate::classify::{build_classifier, Classifier};
use crate::dispatch::classify_links;
use crate::extract::LinkExtractor;
use crate::slack::{HistorySource, SlackClient};
use crate::store::{ArticleStub, ArticleStore, SqliteStore};

/// Aggregate counters for one sync run. Never persisted; returned to the
/// caller and logged. For every channel processed without a hard failure,
/// `total_links_seen = new_articles + already_known + filtered_out`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub total_links_seen: u64,
    pub new_articles: u64,
    pub already_known: u64,
    pub filtered_out: u64,
}

impl SyncResult {
    fn absorb(&mut self, summary: &ChannelSummary) {
        self.total_links_seen += summary.seen;
        self.new_articles += summary.new;
        self.already_known += summary.known;
        self.filtered_out += summary.filtered;
    }
}

/// One channel's tallies plus the rejected links with their reasoning, for
/// human-readable reporting. Rejections are surfaced, never persisted.
#[derive(Debug, Default)]
pub struct ChannelSummary {
    pub seen: u64,
    pub new: u64,
    pub known: u64,
    pub filtered: u64,
    pub rejected: Vec<(String, String)>,
}

/// Drive one channel's full extract -> filter -> classify -> persist cycle.
///
/// A history fetch failure is terminal for the channel and surfaces as `Err`;
/// the caller skips the channel and keeps going. Individual classification
/// failures inside the run are tolerated and land in `filtered`.
pub async fn sync_channel(
    history: &dyn HistorySource,
    store: &dyn ArticleStore,
    classifier: &dyn Classifier,
    extractor: &LinkExtractor,
    channel: &ChannelConfig,
    history_limit: usize,
    batch_size: usize,
) -> Result<ChannelSummary> {
    let messages = history
        .fetch_history(&channel.id, history_limit)
        .await
        .with_context(|| format!("failed to fetch history for channel {}", channel.name))?;

    let links = extractor.extract_from_messages(&messages);
    let mut summary = ChannelSummary {
        seen: links.len() as u64,
        ..Default::default()
    };
    if links.is_empty() {
        return Ok(summary);
    }

    // One batched round-trip against the store, not one per URL.
    let urls: Vec<String> = links.iter().map(|l| l.url.clone()).collect();
    let existing = store.find_existing(&urls).await?;

    let (known, new_links): (Vec<_>, Vec<_>) =
        links.into_iter().partition(|l| existing.contains(&l.url));
    summary.known = known.len() as u64;

    for (link, verdict) in classify_links(classifier, new_links, batch_size).await {
        if verdict.should_collect {
            let stub = ArticleStub::from_link(&link, &channel.id);
            store.insert_if_absent(&stub).await?;
            summary.new += 1;
        } else {
            summary.filtered += 1;
            summary.rejected.push((link.url, verdict.reasoning));
        }
    }

    Ok(summary)
}

/// Walk all configured workspaces and channels sequentially, invoking the
/// per-channel sync and summing results. Zero configured sources is a
/// legitimate nothing-to-do state, not an error. A failed channel logs a
/// notice, contributes zero to every counter, and never stops the iteration.
pub async fn sync_sources<F>(
    sources: &[SlackSourceConfig],
    make_history: F,
    store: &dyn ArticleStore,
    classifier: &dyn Classifier,
    history_limit: usize,
    batch_size: usize,
) -> SyncResult
where
    F: Fn(&SlackSourceConfig) -> Arc<dyn HistorySource>,
{
    let mut totals = SyncResult::default();

    if sources.is_empty() {
        info!("no Slack sources configured, nothing to sync");
        return totals;
    }

    let extractor = LinkExtractor::new();

    for source in sources {
        info!(workspace = %source.workspace, "syncing workspace");
        let history = make_history(source);

        match history.auth_probe().await {
            Ok(user) => info!(workspace = %source.workspace, %user, "authenticated"),
            Err(e) => warn!(workspace = %source.workspace, error = %e, "auth probe failed"),
        }

        for channel in &source.channels {
            match sync_channel(
                history.as_ref(),
                store,
                classifier,
                &extractor,
                channel,
                history_limit,
                batch_size,
            )
            .await
            {
                Ok(summary) => {
                    info!(
                        channel = %channel.name,
                        seen = summary.seen,
                        new = summary.new,
                        known = summary.known,
                        filtered = summary.filtered,
                        "channel synced"
                    );
                    for (url, reasoning) in &summary.rejected {
                        info!(channel = %channel.name, %url, %reasoning, "link filtered out");
                    }
                    totals.absorb(&summary);
                }
                Err(e) => {
                    // All-or-nothing per channel: a failed channel adds zero
                    // to every counter and the sync moves on.
                    warn!(channel = %channel.name, error = %e, "channel sync failed, skipping");
                }
            }
        }
    }

    totals
}

/// Concrete top-level entry point: wire the real Slack client, store, and
/// configured classifier together and run the sync.
pub async fn run_sync(config: &Config, pool: &SqlitePool) -> Result<SyncResult> {
    let store = SqliteStore::new(pool.clone());
    let classifier = build_classifier(config.classifier.as_ref());

    let result = sync_sources(
        &config.slack.sources,
        |source| Arc::new(SlackClient::new(&source.token, &source.cookie)) as Arc<dyn HistorySource>,
        &store,
        classifier.as_ref(),
        config.history_limit(),
        config.batch_size(),
    )
    .await;

    info!(
        seen = result.total_links_seen,
        new = result.new_articles,
        known = result.already_known,
        filtered = result.filtered_out,
        "sync complete"
    );

    Ok(result)
}
