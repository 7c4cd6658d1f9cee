//! Listing data structures.
//!
//! [`RawItem`] mirrors one catalog record as the marketplace embeds it in the
//! page. [`Listing`] is the validated form handed to filters and callers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Badge title marking a paid promotion.
pub const PROMOTION_BADGE: &str = "Продвинуто";

/// Key of the `iva` step group carrying promotion badges.
const DATE_INFO_STEP: &str = "DateInfoStep";

/// Identifier as it appears in the wild: number, numeric string or `{"value": n}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(u64),
    Text(String),
    Wrapped { value: u64 },
}

impl RawId {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RawId::Number(n) => Some(*n),
            RawId::Text(s) => s.trim().parse().ok(),
            RawId::Wrapped { value } => Some(*value),
        }
    }
}

/// Price block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub value: u64,
    #[serde(default)]
    pub string: Option<String>,
    #[serde(default)]
    pub full_string: Option<String>,
    #[serde(default)]
    pub postfix: Option<String>,
    #[serde(default)]
    pub was_lowered: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geo {
    #[serde(default)]
    pub formatted_address: Option<String>,
}

/// One step of the `iva` badge structure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IvaStep {
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
}

/// A catalog record before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    #[serde(default)]
    pub id: Option<RawId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url_path: Option<String>,
    #[serde(default)]
    pub price_detailed: Option<Price>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub geo: Option<Geo>,
    #[serde(default)]
    pub sort_time_stamp: Option<i64>,
    #[serde(default)]
    pub is_reserved: Option<bool>,
    #[serde(default)]
    pub iva: Option<HashMap<String, Vec<IvaStep>>>,
}

/// A validated listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub id: u64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url_path: Option<String>,
    pub price: Option<Price>,
    pub category: Option<Category>,
    pub location: Option<Location>,
    pub address: Option<String>,
    pub seller_id: Option<String>,
    pub is_reserved: Option<bool>,
    pub is_promotion: bool,
    /// Server-assigned sort time, milliseconds since the epoch
    pub sort_timestamp: Option<i64>,
    pub total_views: Option<u64>,
    pub today_views: Option<u64>,
    #[serde(skip)]
    pub iva: HashMap<String, Vec<IvaStep>>,
}

impl Listing {
    /// Build a listing from a raw record. Returns `None` without an identifier.
    pub fn from_raw(raw: RawItem) -> Option<Self> {
        let id = raw.id.as_ref().and_then(RawId::as_u64)?;
        Some(Self {
            id,
            title: raw.title,
            description: raw.description,
            url_path: raw.url_path,
            price: raw.price_detailed,
            category: raw.category,
            location: raw.location,
            address: raw.geo.and_then(|g| g.formatted_address),
            seller_id: None,
            is_reserved: raw.is_reserved,
            is_promotion: false,
            sort_timestamp: raw.sort_time_stamp,
            total_views: None,
            today_views: None,
            iva: raw.iva.unwrap_or_default(),
        })
    }

    pub fn price_value(&self) -> Option<u64> {
        self.price.as_ref().map(|p| p.value)
    }

    /// Lowercased title followed by description; absent parts count as empty.
    pub fn search_text(&self) -> String {
        format!(
            "{}{}",
            self.title.as_deref().unwrap_or(""),
            self.description.as_deref().unwrap_or("")
        )
        .to_lowercase()
    }

    /// Whether any date-info step carries the promotion badge.
    pub fn has_promotion_badge(&self) -> bool {
        self.iva
            .get(DATE_INFO_STEP)
            .into_iter()
            .flatten()
            .filter_map(|step| step.payload.as_ref())
            .filter_map(|payload| payload.get("vas").and_then(Value::as_array))
            .flatten()
            .any(|vas| vas.get("title").and_then(Value::as_str) == Some(PROMOTION_BADGE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_all_identifier_shapes() {
        for id in [json!(42), json!("42"), json!({"value": 42})] {
            let listing = Listing::from_raw(raw(json!({ "id": id }))).unwrap();
            assert_eq!(listing.id, 42);
        }
    }

    #[test]
    fn rejects_missing_or_garbage_identifier() {
        assert!(Listing::from_raw(raw(json!({ "title": "x" }))).is_none());
        assert!(Listing::from_raw(raw(json!({ "id": "abc" }))).is_none());
    }

    #[test]
    fn detects_promotion_badge() {
        let listing = Listing::from_raw(raw(json!({
            "id": 1,
            "iva": {
                "DateInfoStep": [
                    { "payload": { "vas": [{ "title": "Другое" }] } },
                    { "payload": { "vas": [{ "title": "Продвинуто" }] } }
                ]
            }
        })))
        .unwrap();
        assert!(listing.has_promotion_badge());
    }

    #[test]
    fn no_badge_without_date_info_step() {
        let listing = Listing::from_raw(raw(json!({
            "id": 1,
            "iva": { "OtherStep": [{ "payload": { "vas": [{ "title": "Продвинуто" }] } }] }
        })))
        .unwrap();
        assert!(!listing.has_promotion_badge());
    }

    #[test]
    fn search_text_is_lowercased_concatenation() {
        let listing = Listing::from_raw(raw(json!({
            "id": 1,
            "title": "iPhone ",
            "description": "SOLD"
        })))
        .unwrap();
        assert_eq!(listing.search_text(), "iphone sold");
    }
}
