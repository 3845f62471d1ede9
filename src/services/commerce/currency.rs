//! Settlement currency and platform fee arithmetic.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::errors::ServiceError;

const EURO_COUNTRIES: &[&str] = &[
    "AT", "BE", "CY", "DE", "EE", "ES", "FI", "FR", "GR", "HR", "IE", "IT", "LT", "LU", "LV",
    "MT", "NL", "PT", "SI", "SK",
];

/// Settlement currency (lowercase ISO 4217) for a store's ISO 3166-1
/// alpha-2 country, or `None` when the country is not served.
pub fn currency_for_country(country: &str) -> Option<&'static str> {
    let code = country.trim().to_ascii_uppercase();
    let currency = match code.as_str() {
        "US" => "usd",
        "GB" => "gbp",
        "CA" => "cad",
        "AU" => "aud",
        "NZ" => "nzd",
        "SE" => "sek",
        "DK" => "dkk",
        "NO" => "nok",
        "CH" => "chf",
        "JP" => "jpy",
        c if EURO_COUNTRIES.contains(&c) => "eur",
        _ => return None,
    };
    Some(currency)
}

/// Platform fee in minor units: `ceil(total * percentage)`.
pub fn application_fee_amount(total: i64, percentage: Decimal) -> Result<i64, ServiceError> {
    (Decimal::from(total) * percentage)
        .ceil()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError("Application fee overflow".to_string()))
}
