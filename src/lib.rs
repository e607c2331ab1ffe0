//! carfeed collects vehicle listings from heterogeneous marketplace
//! sources and folds them into one canonical result stream.
//!
//! The pipeline per source: translate a [`query::CanonicalQuery`] into
//! the source's own request shape, replay a captured
//! [`bootstrap::RequestTemplate`] (refreshed through an interactive
//! [`capture`] session only on cache miss or forced refresh), execute it
//! over the retrying [`transport`], and normalize the raw per-listing
//! records into [`models::NormalizedListing`]s. Pagination and bounded
//! multi-query fan-out live in [`scrape`].

pub mod bootstrap;
pub mod capture;
pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod normalize;
pub mod query;
pub mod scrape;
pub mod translate;
pub mod transport;

pub use bootstrap::{BootstrapStore, RequestTemplate};
pub use capture::{Bootstrapper, ChromiumCapturer, RequestCapturer};
pub use config::Settings;
pub use error::{BootstrapError, ScrapeError, StorageError, TransportError};
pub use models::{NormalizedListing, SearchResult};
pub use query::CanonicalQuery;
pub use scrape::{bounded_gather, gather, iterate, GatherReport, QueryFailure, Scraper};
pub use translate::SourceId;
