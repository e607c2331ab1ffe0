// Source-agnostic search filters. Every adapter translates this one
// representation into its own query grammar; fields a source cannot
// express are ignored there, never rejected here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Relevance,
    PriceAsc,
    PriceDesc,
    YearAsc,
    YearDesc,
    MileageAsc,
    MileageDesc,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::PriceAsc => "price_asc",
            SortBy::PriceDesc => "price_desc",
            SortBy::YearAsc => "year_asc",
            SortBy::YearDesc => "year_desc",
            SortBy::MileageAsc => "mileage_asc",
            SortBy::MileageDesc => "mileage_desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelType {
    Gasoline,
    Diesel,
    Electric,
    Hybrid,
    HybridPlugIn,
    Lpg,
    Cng,
    Hydrogen,
}

impl FuelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::Gasoline => "gasoline",
            FuelType::Diesel => "diesel",
            FuelType::Electric => "electric",
            FuelType::Hybrid => "hybrid",
            FuelType::HybridPlugIn => "hybrid_plug_in",
            FuelType::Lpg => "lpg",
            FuelType::Cng => "cng",
            FuelType::Hydrogen => "hydrogen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transmission {
    Manual,
    Automatic,
    SemiAutomatic,
}

impl Transmission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transmission::Manual => "manual",
            Transmission::Automatic => "automatic",
            Transmission::SemiAutomatic => "semi_automatic",
        }
    }
}

/// Closed numeric interval; an unset bound means no limit on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: Copy + PartialOrd> Range<T> {
    pub fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    fn is_ordered(&self) -> bool {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => lo <= hi,
            _ => true,
        }
    }
}

pub const MAX_PAGE_SIZE: u32 = 200;
pub const DEFAULT_PAGE_SIZE: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalQuery {
    pub page: u32,
    pub page_size: u32,
    pub sort_by: SortBy,

    pub make: Option<String>,
    pub model: Option<String>,

    pub price_range: Range<f64>,
    pub year_range: Range<u32>,
    pub mileage_range: Range<u64>,
    /// Power bounds in HP; adapters convert where a source expects kW.
    pub power_range: Range<u32>,

    pub fuel_types: Vec<FuelType>,
    pub transmissions: Vec<Transmission>,

    // Advisory seller flags; a source that can only express one of them
    // picks dealer when both are set.
    pub dealer_only: bool,
    pub private_only: bool,

    pub country_code: Option<String>,
    pub with_images: Option<bool>,
    pub certified_only: Option<bool>,
}

impl Default for CanonicalQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: SortBy::Relevance,
            make: None,
            model: None,
            price_range: Range::default(),
            year_range: Range::default(),
            mileage_range: Range::default(),
            power_range: Range::default(),
            fuel_types: Vec::new(),
            transmissions: Vec::new(),
            dealer_only: false,
            private_only: false,
            country_code: None,
            with_images: None,
            certified_only: None,
        }
    }
}

impl CanonicalQuery {
    /// Checks the structural invariants before any network traffic happens.
    pub fn validate(&self) -> Result<(), String> {
        if self.page == 0 {
            return Err("page numbers start at 1".into());
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(format!("page_size must be in 1..={MAX_PAGE_SIZE}"));
        }
        if !self.price_range.is_ordered() {
            return Err("price_range min exceeds max".into());
        }
        if !self.year_range.is_ordered() {
            return Err("year_range min exceeds max".into());
        }
        if !self.mileage_range.is_ordered() {
            return Err("mileage_range min exceeds max".into());
        }
        if !self.power_range.is_ordered() {
            return Err("power_range min exceeds max".into());
        }
        if let Some(min) = self.price_range.min {
            if min < 0.0 {
                return Err("price_range bounds must be non-negative".into());
            }
        }
        Ok(())
    }

    /// Copy of this query pointing at a different page.
    pub fn with_page(&self, page: u32) -> Self {
        let mut query = self.clone();
        query.page = page;
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_query_is_valid() {
        assert!(CanonicalQuery::default().validate().is_ok());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut query = CanonicalQuery::default();
        query.price_range = Range::new(Some(30_000.0), Some(10_000.0));
        assert!(query.validate().is_err());
    }

    #[test]
    fn half_open_range_is_fine() {
        let mut query = CanonicalQuery::default();
        query.year_range = Range::new(Some(2015), None);
        query.mileage_range = Range::new(None, Some(120_000));
        assert!(query.validate().is_ok());
    }

    #[test]
    fn page_and_page_size_bounds() {
        let mut query = CanonicalQuery::default();
        query.page = 0;
        assert!(query.validate().is_err());

        let mut query = CanonicalQuery::default();
        query.page_size = MAX_PAGE_SIZE + 1;
        assert!(query.validate().is_err());

        let mut query = CanonicalQuery::default();
        query.page_size = MAX_PAGE_SIZE;
        assert!(query.validate().is_ok());
    }

    #[test]
    fn json_round_trip_keeps_unknown_free_shape() {
        let mut query = CanonicalQuery::default();
        query.make = Some("BMW".into());
        query.fuel_types = vec![FuelType::Diesel, FuelType::HybridPlugIn];
        let encoded = serde_json::to_string(&query).unwrap();
        let decoded: CanonicalQuery = serde_json::from_str(&encoded).unwrap();
        assert_eq!(query, decoded);
    }
}
