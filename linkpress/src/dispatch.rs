use futures::future::join_all;
use tracing::warn;

use crate::classify::{ClassificationVerdict, Classifier, ContentType, TechnicalDepth};
use crate::extract::ExtractedLink;

/// How many classification calls are in flight at once. Bounds load on the
/// rate-limited external call while still overlapping latency within a batch.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Outcome of one classification call before the fail-closed collapse.
/// Kept as a tagged value so "classifier said no" and "classifier errored"
/// stay distinguishable up to the collapse point.
#[derive(Debug)]
pub enum ClassifyOutcome {
    Classified(ClassificationVerdict),
    Failed(String),
}

/// Classify links in fixed-size batches. Within a batch all calls are
/// dispatched concurrently and the batch completes only once every call has
/// settled; the next batch does not start before that. A failed call
/// collapses to a reject verdict for that link alone and never aborts the
/// batch.
///
/// Returns one `(link, verdict)` pair per input link, in input order; each
/// verdict is matched to its own link regardless of completion order.
pub async fn classify_links(
    classifier: &dyn Classifier,
    links: Vec<ExtractedLink>,
    batch_size: usize,
) -> Vec<(ExtractedLink, ClassificationVerdict)> {
    let batch_size = batch_size.max(1);
    let mut results = Vec::with_capacity(links.len());

    for batch in links.chunks(batch_size) {
        let outcomes = join_all(batch.iter().map(|link| async {
            match classifier
                .classify(&link.message_text, &link.url, "", "")
                .await
            {
                Ok(verdict) => ClassifyOutcome::Classified(verdict),
                Err(e) => ClassifyOutcome::Failed(e.to_string()),
            }
        }))
        .await;

        for (link, outcome) in batch.iter().zip(outcomes) {
            let verdict = match outcome {
                ClassifyOutcome::Classified(verdict) => verdict,
                ClassifyOutcome::Failed(reason) => {
                    // Fail closed: an unclassifiable link is dropped rather
                    // than collected unvetted.
                    warn!(url = %link.url, %reason, "classification call failed, rejecting link");
                    ClassificationVerdict {
                        content_type: ContentType::Other,
                        technical_depth: TechnicalDepth::None,
                        should_collect: false,
                        reasoning: format!("classification failed: {}", reason),
                    }
                }
            };
            results.push((link.clone(), verdict));
        }
    }

    results
}
