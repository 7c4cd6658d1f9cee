// src/services/normalizer.rs

//! Raw catalog records to [`Listing`]s.

use regex::Regex;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Listing, RawItem};

/// Seller profile links look like `/brands/<slug>`, wherever they appear.
const SELLER_PATTERN: &str = r#"/brands/([^/?#"\\]+)"#;

/// Decodes raw records one by one, dropping the ones that do not fit.
pub struct ItemNormalizer {
    seller: Regex,
}

impl ItemNormalizer {
    pub fn new() -> Result<Self> {
        let seller = Regex::new(SELLER_PATTERN)
            .map_err(|e| AppError::config(format!("seller pattern: {e}")))?;
        Ok(Self { seller })
    }

    /// Decode every record independently. Broken or id-less records are skipped.
    pub fn normalize(&self, raw_items: &[Value]) -> Vec<Listing> {
        let mut listings = Vec::with_capacity(raw_items.len());
        let mut dropped = 0usize;

        for raw in raw_items {
            match self.normalize_one(raw) {
                Some(listing) => listings.push(listing),
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            log::debug!("Dropped {} of {} catalog records", dropped, raw_items.len());
        }
        listings
    }

    fn normalize_one(&self, raw: &Value) -> Option<Listing> {
        let item: RawItem = match serde_json::from_value(raw.clone()) {
            Ok(item) => item,
            Err(e) => {
                log::debug!("Skipping malformed catalog record: {}", e);
                return None;
            }
        };

        let Some(mut listing) = Listing::from_raw(item) else {
            log::debug!("Skipping catalog record without an id");
            return None;
        };
        listing.seller_id = self.seller_slug(raw);
        Some(listing)
    }

    /// First `/brands/<slug>` occurrence anywhere in the record.
    fn seller_slug(&self, raw: &Value) -> Option<String> {
        let text = raw.to_string();
        self.seller
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}
