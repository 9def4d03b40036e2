// Adapters layer: clients for the upstream data providers and the report cache.

pub mod airnow;
pub mod census;
pub mod flood;
pub mod geocode;
pub mod greenspace;
pub mod houston_zips;
pub mod http;
pub mod kv;
pub mod landcover;
pub mod openaq;
pub mod overpass;
pub mod sea_level;
pub mod toxics;
pub mod traffic;
pub mod transit;
pub mod water;

use serde_json::Value;

/// Numbers arrive either as JSON numbers or as numeric strings depending on
/// the provider.
pub(crate) fn json_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn json_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_and_numeric_strings() {
        assert_eq!(json_f64(Some(&json!(29.5))), Some(29.5));
        assert_eq!(json_f64(Some(&json!(" -95.25 "))), Some(-95.25));
        assert_eq!(json_f64(Some(&json!("n/a"))), None);
        assert_eq!(json_f64(Some(&json!(null))), None);
        assert_eq!(json_f64(None), None);
        assert_eq!(json_string(Some(&json!(12))), Some("12".to_string()));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(812.349, 1), 812.3);
    }
}
