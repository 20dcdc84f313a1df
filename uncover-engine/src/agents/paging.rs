//! Page-by-page driver shared by the paginated agents.
//!
//! An agent supplies a [`PageSource`] that knows how to fetch and decode one
//! page; [`paginate`] owns the loop, the stop conditions and the channel that
//! backs the returned [`ResultStream`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::agent::ResultStream;
use crate::error::UncoverError;
use crate::session::Session;
use crate::types::{Query, SearchResult};

/// One decoded upstream page.
#[derive(Debug, Default)]
pub struct Page {
    /// Results on this page, in upstream order.
    pub results: Vec<SearchResult>,
    /// Upstream's total-results hint, when it reports one.
    pub total: Option<usize>,
}

/// Fetches and decodes a single page for one source.
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    /// Agent name stamped on error results.
    fn name(&self) -> &'static str;

    /// Fetch page number `page` (1-based).
    async fn fetch_page(
        &self,
        session: &Session,
        query: &Query,
        page: usize,
    ) -> Result<Page, UncoverError>;
}

/// Drive `source` page by page on a background task.
///
/// The loop stops when:
///
/// - a page comes back empty
/// - `query.limit` results have been emitted (the final page is truncated)
/// - the total-results hint from the first page that carried one is reached
/// - a fetch fails, after pushing one result with `error` set
/// - the consumer drops the stream
pub fn paginate<P: PageSource>(
    source: Arc<P>,
    session: Session,
    query: Query,
    buffer: usize,
) -> ResultStream {
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::spawn(async move {
        let name = source.name();
        let mut emitted = 0usize;
        let mut total: Option<usize> = None;
        let mut page_number = 1usize;

        loop {
            let fetched = tokio::select! {
                _ = tx.closed() => return,
                fetched = source.fetch_page(&session, &query, page_number) => fetched,
            };

            let page = match fetched {
                Ok(page) => page,
                Err(e) => {
                    tracing::debug!(
                        source = name,
                        page = page_number,
                        error = %e,
                        "page fetch failed"
                    );
                    let _ = tx.send(SearchResult::error(name, e)).await;
                    return;
                }
            };

            if page.results.is_empty() {
                break;
            }
            if total.is_none() {
                total = page.total;
            }

            for result in page.results {
                if query.limit_reached(emitted) {
                    break;
                }
                if tx.send(result).await.is_err() {
                    return;
                }
                emitted += 1;
            }

            if query.limit_reached(emitted) || total.is_some_and(|t| emitted >= t) {
                break;
            }
            page_number += 1;
        }

        tracing::debug!(source = name, emitted, pages = page_number, "pagination finished");
    });

    Box::pin(ReceiverStream::new(rx))
}
