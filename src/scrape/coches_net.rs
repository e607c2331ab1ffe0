// coches.net adapter: replays a captured search request against the
// JSON API, overlaying pagination and translated filters onto the
// captured query parameters.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::bootstrap::{BootstrapStore, RequestTemplate, TemplateMethod};
use crate::capture::{Bootstrapper, ChromiumCapturer, RequestCapturer};
use crate::config::Settings;
use crate::error::{BootstrapError, ScrapeError, TransportError};
use crate::models::SearchResult;
use crate::normalize::to_listing;
use crate::query::{CanonicalQuery, SortBy};
use crate::transport::{HttpClient, RequestOptions};
use crate::translate::{self, SourceId};

pub const BOOTSTRAP_KEY: &str = "coches_net_search";
const SEARCH_ENTRY_PATH: &str = "/segunda-mano/";

pub struct CochesNetScraper<C: RequestCapturer = ChromiumCapturer> {
    transport: HttpClient,
    bootstrapper: Bootstrapper<C>,
}

impl CochesNetScraper<ChromiumCapturer> {
    pub fn new(settings: Settings, store: BootstrapStore) -> Result<Self, TransportError> {
        let entry_url = format!("{}{SEARCH_ENTRY_PATH}", settings.coches_net_base_url);
        let capturer = ChromiumCapturer::new(settings.clone(), BOOTSTRAP_KEY, entry_url);
        Self::with_capturer(settings, store, capturer)
    }
}

impl<C: RequestCapturer> CochesNetScraper<C> {
    /// Capturer injection point; tests and embedders with their own
    /// capture mechanism come through here.
    pub fn with_capturer(
        settings: Settings,
        store: BootstrapStore,
        capturer: C,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            transport: HttpClient::new(&settings)?,
            bootstrapper: Bootstrapper::new(BOOTSTRAP_KEY, store, capturer),
        })
    }

    /// Operator-facing forced recapture; the stored template is replaced.
    pub async fn refresh_template(&self) -> Result<RequestTemplate, BootstrapError> {
        self.bootstrapper.ensure(true).await
    }
}

#[async_trait]
impl<C: RequestCapturer> super::Scraper for CochesNetScraper<C> {
    fn source(&self) -> SourceId {
        SourceId::CochesNet
    }

    async fn search(
        &self,
        query: &CanonicalQuery,
        _limit: Option<usize>,
    ) -> Result<SearchResult, ScrapeError> {
        query.validate().map_err(ScrapeError::InvalidQuery)?;

        let template = self.bootstrapper.ensure(false).await?;
        let params = overlay_query(&template, query);
        let headers = template.sanitized_headers();

        let options = RequestOptions {
            query: Some(&params),
            json: match template.method {
                TemplateMethod::Post => template.payload.as_ref(),
                TemplateMethod::Get => None,
            },
            headers: Some(&headers),
            cookies: &template.cookies,
        };

        let response = match template.method {
            TemplateMethod::Post => self.transport.post(&template.url, options).await?,
            TemplateMethod::Get => self.transport.get(&template.url, options).await?,
        };

        let body: Value = response.json().await.map_err(|err| ScrapeError::Payload {
            source_id: SourceId::CochesNet,
            detail: err.to_string(),
        })?;

        Ok(parse_search_response(&body, query.page, query.page_size))
    }
}

/// Captured query params + pagination + translated canonical filters.
/// Fields the source has no notion of are simply left out.
fn overlay_query(template: &RequestTemplate, query: &CanonicalQuery) -> BTreeMap<String, String> {
    let mut params = template.query_params();
    params.insert("page".to_string(), query.page.to_string());
    params.insert("pageSize".to_string(), query.page_size.to_string());

    if let Some(make) = &query.make {
        params.insert("make".to_string(), make.clone());
    }
    if let Some(model) = &query.model {
        params.insert("model".to_string(), model.clone());
    }
    if let Some(min) = query.price_range.min {
        params.insert("minPrice".to_string(), (min as u64).to_string());
    }
    if let Some(max) = query.price_range.max {
        params.insert("maxPrice".to_string(), (max as u64).to_string());
    }
    if let Some(min) = query.year_range.min {
        params.insert("minYear".to_string(), min.to_string());
    }
    if let Some(max) = query.year_range.max {
        params.insert("maxYear".to_string(), max.to_string());
    }
    if let Some(min) = query.mileage_range.min {
        params.insert("minKm".to_string(), min.to_string());
    }
    if let Some(max) = query.mileage_range.max {
        params.insert("maxKm".to_string(), max.to_string());
    }

    let fuel_ids = translated_tokens(
        query
            .fuel_types
            .iter()
            .map(|fuel| translate::fuel_token(*fuel, SourceId::CochesNet)),
    );
    if !fuel_ids.is_empty() {
        params.insert("fuelTypes".to_string(), fuel_ids.join(","));
    }

    let transmission_ids = translated_tokens(
        query
            .transmissions
            .iter()
            .map(|transmission| translate::transmission_token(*transmission, SourceId::CochesNet)),
    );
    if !transmission_ids.is_empty() {
        params.insert("transmissionTypes".to_string(), transmission_ids.join(","));
    }

    let sort = translate::sort_token(query.sort_by, SourceId::CochesNet);
    if !sort.is_fallback() {
        params.insert("sort".to_string(), sort.token().to_string());
        params.insert("order".to_string(), sort_order(query.sort_by).to_string());
    }

    // Dealer wins when both advisory flags are set.
    if query.dealer_only {
        params.insert("sellerType".to_string(), "professional".to_string());
    } else if query.private_only {
        params.insert("sellerType".to_string(), "private".to_string());
    }

    params
}

/// Keeps native tokens, drops fallbacks: an untranslated value would be
/// garbage in this query grammar, so the filter is dropped instead.
fn translated_tokens(tokens: impl Iterator<Item = translate::Translated>) -> Vec<String> {
    tokens
        .filter(|token| !token.is_fallback())
        .map(|token| token.token().to_string())
        .collect()
}

fn sort_order(sort_by: SortBy) -> &'static str {
    match sort_by {
        SortBy::PriceAsc | SortBy::YearAsc | SortBy::MileageAsc => "asc",
        SortBy::Relevance | SortBy::PriceDesc | SortBy::YearDesc | SortBy::MileageDesc => "desc",
    }
}

/// Digs listings and pagination signals out of the response envelope.
/// The ads array moves around between API revisions; all observed
/// spellings are tried in order.
pub(crate) fn parse_search_response(body: &Value, page: u32, page_size: u32) -> SearchResult {
    let ads = ["ads", "items", "results"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find_map(Value::as_array);

    let mut listings = Vec::new();
    let mut dropped = 0usize;
    for ad in ads.into_iter().flatten() {
        let Some(record) = ad.as_object() else {
            dropped += 1;
            continue;
        };
        match to_listing(record, SourceId::CochesNet) {
            Some(listing) => listings.push(listing),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(page, dropped, "records without usable identity dropped");
    }

    let pagination = body
        .get("pagination")
        .or_else(|| body.get("metadata").and_then(|meta| meta.get("pagination")));

    let total = pagination
        .and_then(|block| {
            block
                .get("total")
                .or_else(|| block.get("totalResults"))
                .and_then(Value::as_u64)
        })
        .or_else(|| body.get("total").and_then(Value::as_u64));

    let has_next = pagination
        .and_then(|block| block.get("hasNext"))
        .and_then(Value::as_bool)
        .or_else(|| total.map(|total| u64::from(page) * u64::from(page_size) < total))
        .unwrap_or(false);

    SearchResult {
        listings,
        total_listings: total,
        page,
        page_size,
        has_next,
    }
}
