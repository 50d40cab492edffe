//! Location record projection
//!
//! A decoded record is a nested map; the diagnostic surface only cares
//! about a handful of named paths. Absent paths project to `None`, never
//! to an error.

use crate::data::Value;
use serde::Serialize;

/// The location fields a diagnostic run reports for one IP
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationRecord {
    /// ISO country code, from `country.iso_code`
    pub country_iso: Option<String>,
    /// English country name, from `country.names.en`
    pub country_name: Option<String>,
    /// ISO code of the first subdivision, from `subdivisions[0].iso_code`
    pub subdivision_iso: Option<String>,
    /// English name of the first subdivision, from `subdivisions[0].names.en`
    pub subdivision_name: Option<String>,
    /// English city name, from `city.names.en`
    pub city_name: Option<String>,
    /// Latitude, from `location.latitude`
    pub latitude: Option<f64>,
    /// Longitude, from `location.longitude`
    pub longitude: Option<f64>,
}

impl LocationRecord {
    /// Project the diagnostic fields out of a decoded record
    pub fn from_value(value: &Value) -> Self {
        let country = value.get("country");
        let subdivision = match value.get("subdivisions") {
            Some(Value::Array(items)) => items.first(),
            _ => None,
        };
        let location = value.get("location");

        LocationRecord {
            country_iso: country.and_then(|c| name_at(c, "iso_code")),
            country_name: country.and_then(english_name),
            subdivision_iso: subdivision.and_then(|s| name_at(s, "iso_code")),
            subdivision_name: subdivision.and_then(english_name),
            city_name: value.get("city").and_then(english_name),
            latitude: location
                .and_then(|l| l.get("latitude"))
                .and_then(Value::as_f64),
            longitude: location
                .and_then(|l| l.get("longitude"))
                .and_then(Value::as_f64),
        }
    }
}

fn name_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn english_name(value: &Value) -> Option<String> {
    value
        .get("names")
        .and_then(|names| names.get("en"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn named_entity(iso: Option<&str>, name: Option<&str>) -> Value {
        let mut map = HashMap::new();
        if let Some(iso) = iso {
            map.insert("iso_code".to_string(), Value::String(iso.to_string()));
        }
        if let Some(name) = name {
            let mut names = HashMap::new();
            names.insert("en".to_string(), Value::String(name.to_string()));
            map.insert("names".to_string(), Value::Map(names));
        }
        Value::Map(map)
    }

    #[test]
    fn test_full_record_projection() {
        let mut location = HashMap::new();
        location.insert("latitude".to_string(), Value::Double(37.386));
        location.insert("longitude".to_string(), Value::Double(-122.0838));

        let mut record = HashMap::new();
        record.insert(
            "country".to_string(),
            named_entity(Some("US"), Some("United States")),
        );
        record.insert(
            "subdivisions".to_string(),
            Value::Array(vec![
                named_entity(Some("CA"), Some("California")),
                named_entity(Some("NV"), Some("Nevada")),
            ]),
        );
        record.insert("city".to_string(), named_entity(None, Some("Mountain View")));
        record.insert("location".to_string(), Value::Map(location));

        let projected = LocationRecord::from_value(&Value::Map(record));
        assert_eq!(projected.country_iso.as_deref(), Some("US"));
        assert_eq!(projected.country_name.as_deref(), Some("United States"));
        assert_eq!(projected.subdivision_iso.as_deref(), Some("CA"));
        assert_eq!(projected.subdivision_name.as_deref(), Some("California"));
        assert_eq!(projected.city_name.as_deref(), Some("Mountain View"));
        assert_eq!(projected.latitude, Some(37.386));
        assert_eq!(projected.longitude, Some(-122.0838));
    }

    #[test]
    fn test_empty_record_projects_to_none() {
        let projected = LocationRecord::from_value(&Value::Map(HashMap::new()));
        assert_eq!(projected.country_iso, None);
        assert_eq!(projected.country_name, None);
        assert_eq!(projected.subdivision_iso, None);
        assert_eq!(projected.city_name, None);
        assert_eq!(projected.latitude, None);
    }

    #[test]
    fn test_non_map_record_projects_to_none() {
        let projected = LocationRecord::from_value(&Value::String("odd".to_string()));
        assert_eq!(projected.country_iso, None);
        assert_eq!(projected.latitude, None);
    }

    #[test]
    fn test_float_coordinates_accepted() {
        let mut location = HashMap::new();
        location.insert("latitude".to_string(), Value::Float(51.5));
        let mut record = HashMap::new();
        record.insert("location".to_string(), Value::Map(location));

        let projected = LocationRecord::from_value(&Value::Map(record));
        assert_eq!(projected.latitude, Some(51.5));
    }
}
