// Folds heterogeneous raw records into the canonical listing schema.
//
// Raw records are keyed maps with best-effort field presence, so every
// access here is tolerant: several candidate keys per field, structured
// sub-objects preferred over string parses, and absent stays absent.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::models::{
    Consumption, ListingMetadata, Location, NormalizedListing, Price, RawRecord, Registration,
    Seller,
};
use crate::translate::SourceId;

/// Metric horsepower per kilowatt.
pub const KW_TO_HP: f64 = 1.35962;

/// Gross/net ratio assumed when a source publishes only one of the two.
/// coches.net listings are Spanish (21 % VAT), mobile.de German (19 %).
fn vat_ratio(source: SourceId) -> f64 {
    match source {
        SourceId::CochesNet => 1.21,
        SourceId::MobileDe => 1.19,
    }
}

/// Builds a canonical listing from one raw record, or `None` when the
/// record lacks a usable identity. Such records are dropped by the
/// pipeline; dropping is counted by callers, never an error.
pub fn to_listing(raw: &RawRecord, source: SourceId) -> Option<NormalizedListing> {
    let listing_id = id_field(raw, &["id", "advertId", "code"])?;
    let url = str_field(raw, &["url", "canonicalUrl", "detailUrl"])?;

    let mut listing = NormalizedListing::new(listing_id, source, url);

    listing.title = str_field(raw, &["title", "headline"]);
    listing.make = str_field(raw, &["make", "brand"]);
    listing.model = str_field(raw, &["model"]);
    listing.version = str_field(raw, &["version", "trim"]);

    apply_prices(&mut listing, raw, source);

    listing.vat_deductible = bool_field(raw, &["vatDeductible", "vat"]);
    listing.mileage_km = u64_field(raw, &["kms", "kilometers", "mileage", "mileageKm"]);
    listing.first_registration = registration(raw);

    listing.fuel_type = str_field(raw, &["fuelType", "fuel"]);
    listing.transmission = str_field(raw, &["transmission", "gearbox"]);
    apply_power(&mut listing, raw);

    listing.engine_displacement_cc =
        u32_field(raw, &["engineDisplacementCc", "cubicCapacity", "displacement"]);
    listing.body_type = str_field(raw, &["bodyType", "category"]);
    listing.doors = u32_field(raw, &["doors"]).and_then(|n| u8::try_from(n).ok());
    listing.seats = u32_field(raw, &["seats"]).and_then(|n| u8::try_from(n).ok());
    listing.color_exterior = str_field(raw, &["colour", "color", "exteriorColor"]);
    listing.color_interior = str_field(raw, &["interiorColour", "interior"]);

    listing.emission_class = str_field(raw, &["emissionClass"]);
    listing.co2_emissions_g_km = u32_field(raw, &["co2", "co2Emission", "co2Emissions"]);
    listing.consumption_l_100km = consumption(raw);

    listing.features = string_list(raw, &["equipments", "features"]);
    listing.description = str_field(raw, &["description"]);
    listing.images = image_urls(raw);
    listing.location = location(raw);
    listing.seller = seller(raw);
    listing.previous_owners = u32_field(raw, &["previousOwners"]);

    listing.metadata = ListingMetadata {
        advert_type: str_field(raw, &["advertType", "category"]),
        vehicle_id: str_field(raw, &["vehicleId", "vehicleCode"]),
        environment_badge: str_field(raw, &["environmentBadge", "emissionsSticker"]),
        certified: bool_field(raw, &["certified", "isCertified"]),
        publish_date: date_field(raw, &["publishDate"]),
        update_date: date_field(raw, &["updateDate"]),
    };

    Some(listing)
}

fn apply_prices(listing: &mut NormalizedListing, raw: &RawRecord, source: SourceId) {
    let price_value = first(raw, &["price", "prices"]);
    let (amount, currency) = match price_value {
        Some(Value::Number(n)) => (n.as_f64(), "EUR".to_string()),
        Some(Value::Object(block)) => {
            let amount = first(block, &["price", "amount", "value"]).and_then(Value::as_f64);
            let currency = first(block, &["currency", "currencyCode"])
                .and_then(Value::as_str)
                .unwrap_or("EUR")
                .to_string();
            (amount, currency)
        }
        _ => (None, "EUR".to_string()),
    };

    if let Some(amount) = amount {
        listing.price_original = Some(Price {
            amount,
            currency_code: currency.clone(),
        });
        if currency.eq_ignore_ascii_case("EUR") {
            listing.price_eur = Some(amount);
        }
    }

    listing.price_net_eur = f64_field(raw, &["netPrice", "priceNet", "priceNetEur"]);

    // Derive the missing side from the other; leave both unset when the
    // source published neither.
    let ratio = vat_ratio(source);
    match (listing.price_eur, listing.price_net_eur) {
        (Some(gross), None) => listing.price_net_eur = Some(round2(gross / ratio)),
        (None, Some(net)) => listing.price_eur = Some(round2(net * ratio)),
        _ => {}
    }
}

fn apply_power(listing: &mut NormalizedListing, raw: &RawRecord) {
    listing.power_kw = u32_field(raw, &["powerKw", "powerKW"]);
    listing.power_hp = u32_field(raw, &["powerHp", "powerHP", "power"]);

    // Unit conversion only fills gaps, it never overrides a stated value.
    match (listing.power_kw, listing.power_hp) {
        (Some(kw), None) => listing.power_hp = Some((f64::from(kw) * KW_TO_HP).round() as u32),
        (None, Some(hp)) => listing.power_kw = Some((f64::from(hp) / KW_TO_HP).round() as u32),
        _ => {}
    }
}

fn registration(raw: &RawRecord) -> Option<Registration> {
    let value = first(raw, &["firstRegistration", "firstRegistrationDate"])?;
    match value {
        // A structured object beats any string parse.
        Value::Object(block) => {
            let year = first(block, &["year"]).and_then(Value::as_u64)? as u32;
            let month = first(block, &["month"])
                .and_then(Value::as_u64)
                .map(|m| m as u32)
                .filter(|m| (1..=12).contains(m));
            Some(Registration { year, month })
        }
        Value::String(text) => {
            let mut parts = text.split('-');
            let year: u32 = parts.next()?.trim().parse().ok()?;
            let month = parts
                .next()
                .and_then(|m| m.trim().parse::<u32>().ok())
                .filter(|m| (1..=12).contains(m));
            Some(Registration { year, month })
        }
        _ => None,
    }
}

fn consumption(raw: &RawRecord) -> Option<Consumption> {
    let value = first(raw, &["consumption", "consumptionL100Km", "fuelConsumption"])?;
    match value {
        Value::Number(n) => n.as_f64().map(|combined| Consumption {
            combined: Some(combined),
            ..Consumption::default()
        }),
        Value::Object(block) => Some(Consumption {
            combined: first(block, &["combined"]).and_then(Value::as_f64),
            urban: first(block, &["urban"]).and_then(Value::as_f64),
            highway: first(block, &["highway", "extraUrban"]).and_then(Value::as_f64),
        }),
        _ => None,
    }
}

fn location(raw: &RawRecord) -> Option<Location> {
    let block = first(raw, &["location"])?.as_object()?;
    Some(Location {
        country_code: first(block, &["country", "countryCode"]).and_then(as_string),
        region: first(block, &["region", "province"]).and_then(as_string),
        city: first(block, &["city"]).and_then(as_string),
        postal_code: first(block, &["postalCode", "zip"]).and_then(as_string),
        latitude: first(block, &["latitude"]).and_then(Value::as_f64),
        longitude: first(block, &["longitude"]).and_then(Value::as_f64),
    })
}

fn seller(raw: &RawRecord) -> Option<Seller> {
    let block = first(raw, &["dealer", "seller"])?.as_object()?;
    Some(Seller {
        seller_type: first(block, &["type", "sellerType"]).and_then(as_string),
        name: first(block, &["name", "dealerName"]).and_then(as_string),
        rating: first(block, &["rating"]).and_then(Value::as_f64),
        rating_count: first(block, &["ratingCount", "reviews"])
            .and_then(Value::as_u64)
            .map(|n| n as u32),
        phone: first(block, &["phone", "phoneNumber"]).and_then(as_string),
        dealer_id: first(block, &["id"]).and_then(as_id),
    })
}

fn image_urls(raw: &RawRecord) -> Vec<String> {
    let Some(Value::Array(items)) = first(raw, &["images", "photos"]) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(url.clone()),
            Value::Object(img) => first(img, &["url", "uri", "href"]).and_then(as_string),
            _ => None,
        })
        .collect()
}

fn string_list(raw: &RawRecord, keys: &[&str]) -> Vec<String> {
    let Some(Value::Array(items)) = first(raw, keys) else {
        return Vec::new();
    };
    items.iter().filter_map(as_string).collect()
}

fn first<'a>(map: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| !value.is_null())
}

/// Identities show up as strings or bare numbers depending on the source.
fn id_field(raw: &RawRecord, keys: &[&str]) -> Option<String> {
    first(raw, keys).and_then(as_id)
}

fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field(raw: &RawRecord, keys: &[&str]) -> Option<String> {
    first(raw, keys).and_then(as_string)
}

fn f64_field(raw: &RawRecord, keys: &[&str]) -> Option<f64> {
    first(raw, keys).and_then(Value::as_f64)
}

fn u64_field(raw: &RawRecord, keys: &[&str]) -> Option<u64> {
    first(raw, keys).and_then(Value::as_u64)
}

fn u32_field(raw: &RawRecord, keys: &[&str]) -> Option<u32> {
    first(raw, keys)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn bool_field(raw: &RawRecord, keys: &[&str]) -> Option<bool> {
    first(raw, keys).and_then(Value::as_bool)
}

fn as_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn date_field(raw: &RawRecord, keys: &[&str]) -> Option<DateTime<Utc>> {
    let text = str_field(raw, keys)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
