// Per-source translation of canonical filter values into native tokens.
//
// Tables are static and total per known pair; an unknown pair degrades to
// the canonical string form so a filter is weakened rather than silently
// mis-translated. Fallbacks are logged and carried in the return type so
// callers and tests can tell them from genuine hits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::{FuelType, SortBy, Transmission};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    CochesNet,
    MobileDe,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::CochesNet => "coches_net",
            SourceId::MobileDe => "mobile_de",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one table lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translated {
    /// The source's own token for the value.
    Native(String),
    /// No native mapping; carries the canonical string form.
    Fallback(String),
}

impl Translated {
    pub fn token(&self) -> &str {
        match self {
            Translated::Native(token) | Translated::Fallback(token) => token,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Translated::Fallback(_))
    }
}

fn resolve(mapped: Option<&str>, canonical: &str, source: SourceId, category: &str) -> Translated {
    match mapped {
        Some(token) => Translated::Native(token.to_string()),
        None => {
            tracing::warn!(source = %source, category, value = canonical, "no native mapping, using canonical token");
            Translated::Fallback(canonical.to_string())
        }
    }
}

pub fn fuel_token(fuel: FuelType, source: SourceId) -> Translated {
    let mapped = match source {
        // coches.net encodes fuel as numeric filter ids.
        SourceId::CochesNet => Some(match fuel {
            FuelType::Diesel => "1",
            FuelType::Gasoline => "2",
            FuelType::Electric => "3",
            FuelType::Hybrid => "4",
            FuelType::HybridPlugIn => "5",
            FuelType::Lpg => "6",
            FuelType::Cng => "7",
            FuelType::Hydrogen => "8",
        }),
        // mobile.de uses the codes from its search URL grammar.
        SourceId::MobileDe => match fuel {
            FuelType::Gasoline => Some("PETROL"),
            FuelType::Diesel => Some("DIESEL"),
            FuelType::Electric => Some("ELECTRIC"),
            FuelType::Hybrid => Some("HYBRID"),
            FuelType::Lpg => Some("LPG"),
            FuelType::Cng => Some("CNG"),
            FuelType::Hydrogen => Some("HYDROGEN"),
            // No dedicated plug-in code in the URL grammar.
            FuelType::HybridPlugIn => None,
        },
    };
    resolve(mapped, fuel.as_str(), source, "fuel_type")
}

pub fn transmission_token(transmission: Transmission, source: SourceId) -> Translated {
    let mapped = match source {
        SourceId::CochesNet => Some(match transmission {
            Transmission::Manual => "1",
            Transmission::Automatic => "2",
            Transmission::SemiAutomatic => "3",
        }),
        SourceId::MobileDe => Some(match transmission {
            Transmission::Manual => "MANUAL_GEAR",
            Transmission::Automatic => "AUTOMATIC_GEAR",
            Transmission::SemiAutomatic => "SEMIAUTOMATIC_GEAR",
        }),
    };
    resolve(mapped, transmission.as_str(), source, "transmission")
}

pub fn sort_token(sort_by: SortBy, source: SourceId) -> Translated {
    let mapped = match source {
        // coches.net sorts on a field name; direction travels separately.
        SourceId::CochesNet => Some(match sort_by {
            SortBy::Relevance => "relevance",
            SortBy::PriceAsc | SortBy::PriceDesc => "price",
            SortBy::YearAsc | SortBy::YearDesc => "year",
            SortBy::MileageAsc | SortBy::MileageDesc => "mileage",
        }),
        SourceId::MobileDe => Some(match sort_by {
            SortBy::Relevance => "relevance",
            SortBy::PriceAsc => "price.asc",
            SortBy::PriceDesc => "price.desc",
            SortBy::YearAsc => "year.asc",
            SortBy::YearDesc => "year.desc",
            SortBy::MileageAsc => "mileage.asc",
            SortBy::MileageDesc => "mileage.desc",
        }),
    };
    resolve(mapped, sort_by.as_str(), source, "sort_by")
}
