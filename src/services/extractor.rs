// src/services/extractor.rs

//! Embedded page state extraction.
//!
//! Search pages ship their catalog as HTML-escaped JSON inside a
//! `<script type="mime/invalid">` element.

use scraper::{Html, Selector};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

const STATE_SCRIPT: &str = r#"script[type="mime/invalid"]"#;

/// Pulls the state object out of a search results page.
pub struct PageExtractor {
    script: Selector,
}

impl PageExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            script: parse_selector(STATE_SCRIPT)?,
        })
    }

    /// Decode the embedded state. Any failure yields an empty map.
    ///
    /// Returns the `state` key when present, else `data`, else the payload.
    pub fn extract_state(&self, html: &str) -> Map<String, Value> {
        let document = Html::parse_document(html);
        let Some(script) = document.select(&self.script).next() else {
            log::debug!("No embedded state script on page");
            return Map::new();
        };

        let raw: String = script.text().collect();
        let decoded = html_escape::decode_html_entities(raw.trim());

        let payload: Value = match serde_json::from_str(&decoded) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Embedded state is not valid JSON: {}", e);
                return Map::new();
            }
        };

        let Value::Object(mut root) = payload else {
            log::warn!("Embedded state is not a JSON object");
            return Map::new();
        };

        for key in ["state", "data"] {
            if let Some(inner) = root.remove(key) {
                return match inner {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
            }
        }
        root
    }
}

/// Raw catalog records: `data.catalog.items`, else `catalog.items`, else `items`.
pub fn catalog_items(state: &Map<String, Value>) -> Vec<Value> {
    let candidates = [
        state
            .get("data")
            .and_then(|d| d.get("catalog"))
            .and_then(|c| c.get("items")),
        state.get("catalog").and_then(|c| c.get("items")),
        state.get("items"),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::catalog_page;
    use serde_json::json;

    #[test]
    fn test_page_without_script_is_empty() {
        let extractor = PageExtractor::new().unwrap();
        let state = extractor.extract_state("<html><body><p>captcha</p></body></html>");
        assert!(state.is_empty());
        assert!(catalog_items(&state).is_empty());
    }

    #[test]
    fn test_escaped_state_is_decoded() {
        let extractor = PageExtractor::new().unwrap();
        let html = catalog_page(json!([{ "id": 1, "title": "Tom & Jerry \"DVD\"" }]));

        let state = extractor.extract_state(&html);
        let items = catalog_items(&state);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], "Tom & Jerry \"DVD\"");
    }

    #[test]
    fn test_data_key_used_without_state() {
        let extractor = PageExtractor::new().unwrap();
        let html = r#"<script type="mime/invalid">{&quot;data&quot;: {&quot;catalog&quot;: {&quot;items&quot;: [{&quot;id&quot;: 7}]}}}</script>"#;

        let state = extractor.extract_state(html);
        assert_eq!(catalog_items(&state), vec![json!({"id": 7})]);
    }

    #[test]
    fn test_broken_json_is_empty() {
        let extractor = PageExtractor::new().unwrap();
        let state = extractor.extract_state(r#"<script type="mime/invalid">{not json</script>"#);
        assert!(state.is_empty());
    }

    #[test]
    fn test_non_object_state_is_empty() {
        let extractor = PageExtractor::new().unwrap();
        let html = r#"<script type="mime/invalid">{&quot;state&quot;: [1, 2]}</script>"#;
        assert!(extractor.extract_state(html).is_empty());
    }

    #[test]
    fn test_catalog_lookup_order() {
        let nested = json!({"data": {"catalog": {"items": [1]}}, "items": [3]});
        let flat = json!({"catalog": {"items": [2]}, "items": [3]});
        let bare = json!({"items": [3]});

        for (state, expected) in [(nested, 1), (flat, 2), (bare, 3)] {
            let map = state.as_object().unwrap().clone();
            assert_eq!(catalog_items(&map), vec![json!(expected)]);
        }
    }
}
