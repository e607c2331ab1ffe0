// mobile.de adapter: builds search URLs from the canonical query,
// fetches index pages, then fans out over per-listing detail pages with
// a bounded worker pool.
//
// The markup-to-record mapping is deliberately not part of this crate;
// it tracks a third party's UI and is injected behind the two extractor
// traits below.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use url::Url;

use crate::config::Settings;
use crate::data::mobile_de_make_code;
use crate::error::{ScrapeError, TransportError};
use crate::models::{NormalizedListing, RawRecord, SearchResult};
use crate::normalize::{to_listing, KW_TO_HP};
use crate::query::CanonicalQuery;
use crate::transport::{HttpClient, RequestOptions};
use crate::translate::{self, SourceId};

const SEARCH_PATH: &str = "/es/veh%C3%ADculos/buscar.html";
const DETAIL_PATH: &str = "/es/veh%C3%ADculos/detalles.html";

/// Parsed shape of one index page.
#[derive(Debug, Clone, Default)]
pub struct IndexPage {
    pub ids: Vec<String>,
    pub has_next: bool,
}

/// Pulls listing ids and the next-page signal out of an index page body.
pub trait IndexExtractor: Send + Sync {
    fn parse(&self, body: &str) -> IndexPage;
}

/// Best-effort keyed record from a detail page body; `None` when the
/// page does not describe a vehicle.
pub trait DetailExtractor: Send + Sync {
    fn parse(&self, body: &str) -> Option<RawRecord>;
}

pub struct MobileDeScraper {
    settings: Settings,
    transport: HttpClient,
    index_extractor: Arc<dyn IndexExtractor>,
    detail_extractor: Arc<dyn DetailExtractor>,
}

impl MobileDeScraper {
    pub fn new(
        settings: Settings,
        index_extractor: Arc<dyn IndexExtractor>,
        detail_extractor: Arc<dyn DetailExtractor>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            transport: HttpClient::new(&settings)?,
            settings,
            index_extractor,
            detail_extractor,
        })
    }

    fn detail_url(&self, vehicle_id: &str) -> String {
        format!(
            "{}{DETAIL_PATH}?id={vehicle_id}",
            self.settings.mobile_de_base_url
        )
    }

    /// Fetches and normalizes one detail page; `None` swallows the
    /// failure after logging so siblings in the fan-out keep going.
    async fn fetch_detail(&self, vehicle_id: &str) -> Option<NormalizedListing> {
        let url = self.detail_url(vehicle_id);
        let response = match self.transport.get(&url, RequestOptions::default()).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(vehicle_id, error = %err, "detail fetch failed, skipping listing");
                return None;
            }
        };
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(vehicle_id, error = %err, "detail body unreadable, skipping listing");
                return None;
            }
        };

        let mut record = self.detail_extractor.parse(&body)?;
        // The adapter owns identity; extractors only fill attributes.
        record
            .entry("id".to_string())
            .or_insert_with(|| Value::String(vehicle_id.to_string()));
        record
            .entry("url".to_string())
            .or_insert_with(|| Value::String(url.clone()));

        to_listing(&record, SourceId::MobileDe)
    }
}

#[async_trait]
impl super::Scraper for MobileDeScraper {
    fn source(&self) -> SourceId {
        SourceId::MobileDe
    }

    async fn search(
        &self,
        query: &CanonicalQuery,
        limit: Option<usize>,
    ) -> Result<SearchResult, ScrapeError> {
        query.validate().map_err(ScrapeError::InvalidQuery)?;

        let url = build_search_url(&self.settings.mobile_de_base_url, query).map_err(|err| {
            ScrapeError::InvalidQuery(format!("cannot build search URL: {err}"))
        })?;

        let response = self.transport.get(&url, RequestOptions::default()).await?;
        let body = response.text().await.map_err(|err| ScrapeError::Payload {
            source_id: SourceId::MobileDe,
            detail: err.to_string(),
        })?;

        let index = self.index_extractor.parse(&body);
        let mut ids = index.ids;
        if let Some(limit) = limit {
            // Details are the expensive part; skip work past the cap.
            ids.truncate(limit);
        }
        tracing::debug!(page = query.page, ids = ids.len(), "index page parsed");

        // Bounded fan-out across the page's detail fetches; results stay
        // in id order because join_all preserves input order.
        let limiter = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let fetches = ids.iter().map(|id| {
            let limiter = Arc::clone(&limiter);
            async move {
                let _permit = limiter.acquire().await.expect("semaphore closed");
                self.fetch_detail(id).await
            }
        });
        let listings: Vec<_> = futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect();

        Ok(SearchResult {
            listings,
            total_listings: None,
            page: query.page,
            page_size: query.page_size,
            has_next: index.has_next,
        })
    }
}

/// Search URL grammar: `ms=MAKE;;`, `p=MIN:MAX`, `fr=`, `ml=`, `pw=` (kW),
/// repeated `ft=`/`tr=`, `st=DEALER|FSBO`, `pageNumber=`.
pub(crate) fn build_search_url(
    base_url: &str,
    query: &CanonicalQuery,
) -> Result<String, url::ParseError> {
    let mut url = Url::parse(&format!("{base_url}{SEARCH_PATH}"))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("isSearchRequest", "true")
            .append_pair("ref", "quickSearch")
            .append_pair("s", "Car")
            .append_pair("vc", "Car");

        if let Some(make) = &query.make {
            match mobile_de_make_code(make) {
                Some(code) => {
                    pairs.append_pair("ms", &format!("{code};;"));
                }
                None => {
                    tracing::warn!(make = %make, "no make code, dropping make filter");
                }
            }
        }

        if let Some(range) = range_param(
            query.price_range.min.map(|v| v as u64),
            query.price_range.max.map(|v| v as u64),
        ) {
            pairs.append_pair("p", &range);
        }
        if let Some(range) = range_param(query.year_range.min, query.year_range.max) {
            pairs.append_pair("fr", &range);
        }
        if let Some(range) = range_param(query.mileage_range.min, query.mileage_range.max) {
            pairs.append_pair("ml", &range);
        }
        // Canonical power bounds are HP; this grammar wants kW.
        if let Some(range) = range_param(
            query.power_range.min.map(hp_to_kw),
            query.power_range.max.map(hp_to_kw),
        ) {
            pairs.append_pair("pw", &range);
        }

        for fuel in &query.fuel_types {
            let token = translate::fuel_token(*fuel, SourceId::MobileDe);
            if !token.is_fallback() {
                pairs.append_pair("ft", token.token());
            }
        }
        for transmission in &query.transmissions {
            let token = translate::transmission_token(*transmission, SourceId::MobileDe);
            if !token.is_fallback() {
                pairs.append_pair("tr", token.token());
            }
        }

        // One seller-type slot; dealer wins when both flags are set.
        if query.dealer_only {
            pairs.append_pair("st", "DEALER");
        } else if query.private_only {
            pairs.append_pair("st", "FSBO");
        }

        if let Some(country) = &query.country_code {
            pairs.append_pair("cn", &country.to_ascii_uppercase());
        }

        if query.page > 1 {
            pairs.append_pair("pageNumber", &query.page.to_string());
        }
    }
    Ok(url.to_string())
}

fn hp_to_kw(hp: u32) -> u32 {
    (f64::from(hp) / KW_TO_HP).round() as u32
}

/// `MIN:MAX` with either side optional; `None` when the range is unset.
fn range_param<T: std::fmt::Display>(min: Option<T>, max: Option<T>) -> Option<String> {
    match (min, max) {
        (None, None) => None,
        (Some(lo), Some(hi)) => Some(format!("{lo}:{hi}")),
        (Some(lo), None) => Some(format!("{lo}:")),
        (None, Some(hi)) => Some(format!(":{hi}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FuelType, Range, Transmission};
    use std::collections::HashMap;

    fn decoded_pairs(url: &str) -> HashMap<String, Vec<String>> {
        let parsed = Url::parse(url).unwrap();
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in parsed.query_pairs() {
            map.entry(key.into_owned()).or_default().push(value.into_owned());
        }
        map
    }

    #[test]
    fn search_url_carries_translated_filters() {
        let mut query = CanonicalQuery::default();
        query.make = Some("BMW".to_string());
        query.price_range = Range::new(Some(10_000.0), Some(30_000.0));
        query.year_range = Range::new(Some(2015), None);
        query.power_range = Range::new(Some(136), Some(272));
        query.fuel_types = vec![FuelType::Diesel];
        query.transmissions = vec![Transmission::Automatic];
        query.dealer_only = true;
        query.country_code = Some("de".to_string());

        let url = build_search_url("https://www.mobile.de", &query).unwrap();
        let pairs = decoded_pairs(&url);

        assert_eq!(pairs["ms"], vec!["3500;;"]);
        assert_eq!(pairs["p"], vec!["10000:30000"]);
        assert_eq!(pairs["fr"], vec!["2015:"]);
        assert_eq!(pairs["pw"], vec!["100:200"]); // HP -> kW
        assert_eq!(pairs["ft"], vec!["DIESEL"]);
        assert_eq!(pairs["tr"], vec!["AUTOMATIC_GEAR"]);
        assert_eq!(pairs["st"], vec!["DEALER"]);
        assert_eq!(pairs["cn"], vec!["DE"]);
        assert!(!pairs.contains_key("pageNumber")); // page 1 is implicit
    }

    #[test]
    fn page_number_appears_from_page_two() {
        let query = CanonicalQuery::default().with_page(4);
        let url = build_search_url("https://www.mobile.de", &query).unwrap();
        assert_eq!(decoded_pairs(&url)["pageNumber"], vec!["4"]);
    }

    #[test]
    fn unknown_make_drops_the_filter_not_the_query() {
        let mut query = CanonicalQuery::default();
        query.make = Some("NotARealMake".to_string());
        let url = build_search_url("https://www.mobile.de", &query).unwrap();
        assert!(!decoded_pairs(&url).contains_key("ms"));
    }

    #[test]
    fn untranslatable_fuel_is_dropped_from_the_url() {
        let mut query = CanonicalQuery::default();
        query.fuel_types = vec![FuelType::HybridPlugIn, FuelType::Diesel];
        let url = build_search_url("https://www.mobile.de", &query).unwrap();
        assert_eq!(decoded_pairs(&url)["ft"], vec!["DIESEL"]);
    }

    #[test]
    fn range_param_shapes() {
        assert_eq!(range_param::<u32>(None, None), None);
        assert_eq!(range_param(Some(1), Some(2)).unwrap(), "1:2");
        assert_eq!(range_param(Some(1), None).unwrap(), "1:");
        assert_eq!(range_param(None, Some(2)).unwrap(), ":2");
    }

    #[test]
    fn both_seller_flags_resolve_to_dealer() {
        let mut query = CanonicalQuery::default();
        query.dealer_only = true;
        query.private_only = true;
        let url = build_search_url("https://www.mobile.de", &query).unwrap();
        assert_eq!(decoded_pairs(&url)["st"], vec!["DEALER"]);
    }
}
