// Canonical output schema. Heterogeneous per-source records are folded
// into these types once by the normalizer and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::translate::SourceId;

/// Opaque per-source record handed over by the extraction layer. Only
/// best-effort field presence is assumed, never a fixed schema.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub amount: f64,
    /// ISO 4217 code as published by the source.
    pub currency_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub year: u32,
    pub month: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumption {
    pub combined: Option<f64>,
    pub urban: Option<f64>,
    pub highway: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seller {
    /// "dealer" | "private" | whatever the source reports.
    #[serde(rename = "type")]
    pub seller_type: Option<String>,
    pub name: Option<String>,
    pub rating: Option<f64>,
    pub rating_count: Option<u32>,
    pub phone: Option<String>,
    pub dealer_id: Option<String>,
}

/// Free-form bag for source extras that do not warrant first-class fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingMetadata {
    pub advert_type: Option<String>,
    pub vehicle_id: Option<String>,
    pub environment_badge: Option<String>,
    pub certified: Option<bool>,
    pub publish_date: Option<DateTime<Utc>>,
    pub update_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedListing {
    // Identity; (listing_id, source) is the stable composite key.
    pub listing_id: String,
    pub source: SourceId,
    pub url: String,
    pub scraped_at: DateTime<Utc>,

    // Vehicle attributes.
    pub title: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,
    pub mileage_km: Option<u64>,
    pub first_registration: Option<Registration>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub power_hp: Option<u32>,
    pub power_kw: Option<u32>,
    pub engine_displacement_cc: Option<u32>,
    pub body_type: Option<String>,
    pub doors: Option<u8>,
    pub seats: Option<u8>,
    pub color_exterior: Option<String>,
    pub color_interior: Option<String>,

    // Commercial attributes. Gross/net stay unset together when neither
    // is derivable; no defaulting.
    pub price_eur: Option<f64>,
    pub price_net_eur: Option<f64>,
    pub price_original: Option<Price>,
    pub vat_deductible: Option<bool>,

    // Environmental attributes.
    pub emission_class: Option<String>,
    pub co2_emissions_g_km: Option<u32>,
    pub consumption_l_100km: Option<Consumption>,

    pub features: Vec<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub location: Option<Location>,
    pub seller: Option<Seller>,
    pub previous_owners: Option<u32>,

    pub metadata: ListingMetadata,
}

impl NormalizedListing {
    /// Minimal listing with just the mandatory identity; everything else
    /// starts empty and is filled in by the normalizer.
    pub fn new(listing_id: String, source: SourceId, url: String) -> Self {
        Self {
            listing_id,
            source,
            url,
            scraped_at: Utc::now(),
            title: None,
            make: None,
            model: None,
            version: None,
            mileage_km: None,
            first_registration: None,
            fuel_type: None,
            transmission: None,
            power_hp: None,
            power_kw: None,
            engine_displacement_cc: None,
            body_type: None,
            doors: None,
            seats: None,
            color_exterior: None,
            color_interior: None,
            price_eur: None,
            price_net_eur: None,
            price_original: None,
            vat_deductible: None,
            emission_class: None,
            co2_emissions_g_km: None,
            consumption_l_100km: None,
            features: Vec::new(),
            description: None,
            images: Vec::new(),
            location: None,
            seller: None,
            previous_owners: None,
            metadata: ListingMetadata::default(),
        }
    }

    /// Stable composite key, e.g. `coches_net:12345678`.
    pub fn composite_key(&self) -> String {
        format!("{}:{}", self.source, self.listing_id)
    }
}

/// One page of results from one source adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub listings: Vec<NormalizedListing>,
    pub total_listings: Option<u64>,
    pub page: u32,
    pub page_size: u32,
    /// The sole pagination-termination signal; an absent total count must
    /// not stop iteration on its own.
    pub has_next: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_combines_source_and_id() {
        let listing = NormalizedListing::new(
            "987".to_string(),
            SourceId::MobileDe,
            "https://example.test/987".to_string(),
        );
        assert_eq!(listing.composite_key(), "mobile_de:987");
    }

    #[test]
    fn search_result_serializes_camel_case() {
        let result = SearchResult {
            listings: Vec::new(),
            total_listings: Some(42),
            page: 1,
            page_size: 30,
            has_next: true,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["hasNext"], serde_json::Value::Bool(true));
        assert_eq!(value["totalListings"], serde_json::json!(42));
    }
}
