// The per-source adapter contract plus the generic pagination and
// fan-out machinery layered on top of any conforming adapter.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use tokio::sync::Semaphore;

use crate::error::ScrapeError;
use crate::models::{NormalizedListing, SearchResult};
use crate::query::CanonicalQuery;
use crate::translate::SourceId;

pub mod coches_net;
pub mod mobile_de;

pub use coches_net::CochesNetScraper;
pub use mobile_de::{DetailExtractor, IndexExtractor, IndexPage, MobileDeScraper};

/// One capability set for every adapter; callers never have to probe
/// what kind of scraper they are holding.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn source(&self) -> SourceId;

    /// Fetch a single results page for the query. `limit` is advisory
    /// and lets adapters skip work past the cap.
    async fn search(
        &self,
        query: &CanonicalQuery,
        limit: Option<usize>,
    ) -> Result<SearchResult, ScrapeError>;
}

struct IterState {
    page: u32,
    yielded: usize,
    done: bool,
}

/// Lazy page-by-page iteration starting at page 1.
///
/// Stops on `has_next == false`, an empty page, or after `limit`
/// listings, whichever comes first. Listings come out in strict page
/// order; a fatal error ends the stream after being yielded. Every call
/// starts over from page 1 regardless of earlier progress.
pub fn iterate<'a, S>(
    scraper: &'a S,
    query: &'a CanonicalQuery,
    limit: Option<usize>,
) -> impl Stream<Item = Result<NormalizedListing, ScrapeError>> + 'a
where
    S: Scraper + ?Sized,
{
    let state = IterState {
        page: 1,
        yielded: 0,
        done: limit == Some(0),
    };

    stream::try_unfold(state, move |mut state| async move {
        if state.done {
            return Ok::<_, ScrapeError>(None);
        }

        let page_query = query.with_page(state.page);
        let result = scraper.search(&page_query, limit).await?;
        let mut listings = result.listings;

        if let Some(limit) = limit {
            let remaining = limit - state.yielded;
            if listings.len() >= remaining {
                // Cooperative early stop: finish the current page's
                // surplus locally, request nothing further.
                listings.truncate(remaining);
                state.done = true;
            }
        }

        if listings.is_empty() {
            return Ok(None);
        }

        state.yielded += listings.len();
        if !result.has_next {
            state.done = true;
        }
        state.page += 1;

        tracing::debug!(
            source = %scraper.source(),
            page = page_query.page,
            emitted = listings.len(),
            total = state.yielded,
            "page fetched"
        );
        Ok(Some((
            stream::iter(listings.into_iter().map(Ok::<_, ScrapeError>)),
            state,
        )))
    })
    .try_flatten()
}

/// Eager convenience over [`iterate`].
pub async fn gather<S>(
    scraper: &S,
    query: &CanonicalQuery,
    limit: Option<usize>,
) -> Result<Vec<NormalizedListing>, ScrapeError>
where
    S: Scraper + ?Sized,
{
    iterate(scraper, query, limit).try_collect().await
}

/// One query that went wrong during a bounded gather, kept alongside the
/// siblings' successes instead of aborting them.
#[derive(Debug)]
pub struct QueryFailure {
    pub index: usize,
    pub query: CanonicalQuery,
    pub error: ScrapeError,
}

#[derive(Debug, Default)]
pub struct GatherReport {
    pub listings: Vec<NormalizedListing>,
    pub failures: Vec<QueryFailure>,
}

impl GatherReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs [`iterate`] over independent queries with at most
/// `max_concurrency` in flight. A failed query contributes zero listings
/// plus a recorded failure; it never silently shrinks the total.
pub async fn bounded_gather<S>(
    scraper: &S,
    queries: &[CanonicalQuery],
    limit_per_query: Option<usize>,
    max_concurrency: usize,
) -> GatherReport
where
    S: Scraper + ?Sized,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let tasks = queries.iter().enumerate().map(|(index, query)| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            // The semaphore is never closed while tasks hold the Arc.
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let outcome = gather(scraper, query, limit_per_query).await;
            (index, query, outcome)
        }
    });

    let outcomes = futures::future::join_all(tasks).await;

    let mut report = GatherReport::default();
    for (index, query, outcome) in outcomes {
        match outcome {
            Ok(mut listings) => report.listings.append(&mut listings),
            Err(error) => {
                tracing::error!(
                    index,
                    source = %scraper.source(),
                    error = %error,
                    "query failed during bounded gather"
                );
                report.failures.push(QueryFailure {
                    index,
                    query: query.clone(),
                    error,
                });
            }
        }
    }
    report
}
