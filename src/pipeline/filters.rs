// src/pipeline/filters.rs

//! Listing filters.
//!
//! Stages run in a fixed order and each one only ever removes listings, so
//! the pipeline result equals the intersection of the active predicates.

use chrono::{DateTime, Utc};

use crate::models::{FilterConfig, Listing};

/// One stage of the [`FilterPipeline`].
pub trait ListingFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inactive stages keep every listing.
    fn is_active(&self) -> bool {
        true
    }

    fn matches(&self, listing: &Listing) -> bool;

    /// Runs on every listing reaching the stage, active or not.
    fn annotate(&self, _listing: &mut Listing) {}
}

/// Price within `[min, max]`. Listings without a price never match.
pub struct PriceRange {
    pub min: u64,
    pub max: Option<u64>,
}

impl ListingFilter for PriceRange {
    fn name(&self) -> &'static str {
        "price"
    }

    fn is_active(&self) -> bool {
        self.min > 0 || self.max.is_some()
    }

    fn matches(&self, listing: &Listing) -> bool {
        listing
            .price_value()
            .is_some_and(|price| price >= self.min && self.max.is_none_or(|max| price <= max))
    }
}

/// Drops listings whose text contains any blacklisted word.
pub struct BlackKeywords {
    words: Vec<String>,
}

impl BlackKeywords {
    pub fn new(words: &[String]) -> Self {
        Self {
            words: lowercase_all(words),
        }
    }
}

impl ListingFilter for BlackKeywords {
    fn name(&self) -> &'static str {
        "black keywords"
    }

    fn is_active(&self) -> bool {
        !self.words.is_empty()
    }

    fn matches(&self, listing: &Listing) -> bool {
        let text = listing.search_text();
        !self.words.iter().any(|w| text.contains(w.as_str()))
    }
}

/// Keeps listings whose text contains at least one whitelisted word.
pub struct WhiteKeywords {
    words: Vec<String>,
}

impl WhiteKeywords {
    pub fn new(words: &[String]) -> Self {
        Self {
            words: lowercase_all(words),
        }
    }
}

impl ListingFilter for WhiteKeywords {
    fn name(&self) -> &'static str {
        "white keywords"
    }

    fn is_active(&self) -> bool {
        !self.words.is_empty()
    }

    fn matches(&self, listing: &Listing) -> bool {
        let text = listing.search_text();
        self.words.iter().any(|w| text.contains(w.as_str()))
    }
}

/// Address must contain the configured fragment.
pub struct GeoSubstring {
    fragment: String,
}

impl GeoSubstring {
    pub fn new(fragment: &str) -> Self {
        Self {
            fragment: fragment.trim().to_string(),
        }
    }
}

impl ListingFilter for GeoSubstring {
    fn name(&self) -> &'static str {
        "geo"
    }

    fn is_active(&self) -> bool {
        !self.fragment.is_empty()
    }

    fn matches(&self, listing: &Listing) -> bool {
        listing
            .address
            .as_deref()
            .is_some_and(|address| address.contains(&self.fragment))
    }
}

/// Drops listings from blacklisted sellers. Unknown sellers are kept.
pub struct SellerBlacklist {
    sellers: Vec<String>,
}

impl SellerBlacklist {
    pub fn new(sellers: &[String]) -> Self {
        Self {
            sellers: sellers.to_vec(),
        }
    }
}

impl ListingFilter for SellerBlacklist {
    fn name(&self) -> &'static str {
        "seller blacklist"
    }

    fn is_active(&self) -> bool {
        !self.sellers.is_empty()
    }

    fn matches(&self, listing: &Listing) -> bool {
        match listing.seller_id.as_deref() {
            Some(seller) => !self.sellers.iter().any(|s| s == seller),
            None => true,
        }
    }
}

/// Keeps listings sorted in no longer than `max_age` seconds ago.
pub struct RecencyWindow {
    max_age: u64,
    now: Option<DateTime<Utc>>,
}

impl RecencyWindow {
    pub fn new(max_age: u64) -> Self {
        Self { max_age, now: None }
    }

    /// Evaluate against a fixed clock instead of the wall clock.
    pub fn at(max_age: u64, now: DateTime<Utc>) -> Self {
        Self {
            max_age,
            now: Some(now),
        }
    }
}

impl ListingFilter for RecencyWindow {
    fn name(&self) -> &'static str {
        "recency"
    }

    fn is_active(&self) -> bool {
        self.max_age > 0
    }

    fn matches(&self, listing: &Listing) -> bool {
        let Some(sorted_at) = listing
            .sort_timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis)
        else {
            return false;
        };
        let now = self.now.unwrap_or_else(Utc::now);
        let age = now.signed_duration_since(sorted_at).num_seconds();
        age <= i64::try_from(self.max_age).unwrap_or(i64::MAX)
    }
}

/// Drops reserved listings when enabled. A missing flag means not reserved.
pub struct ReservationExclusion {
    enabled: bool,
}

impl ListingFilter for ReservationExclusion {
    fn name(&self) -> &'static str {
        "reservation"
    }

    fn is_active(&self) -> bool {
        self.enabled
    }

    fn matches(&self, listing: &Listing) -> bool {
        listing.is_reserved != Some(true)
    }
}

/// Marks promoted listings and, when enabled, drops them.
pub struct PromotionExclusion {
    enabled: bool,
}

impl ListingFilter for PromotionExclusion {
    fn name(&self) -> &'static str {
        "promotion"
    }

    fn is_active(&self) -> bool {
        self.enabled
    }

    fn matches(&self, listing: &Listing) -> bool {
        !listing.is_promotion
    }

    fn annotate(&self, listing: &mut Listing) {
        listing.is_promotion = listing.has_promotion_badge();
    }
}

/// Ordered filter stages.
pub struct FilterPipeline {
    stages: Vec<Box<dyn ListingFilter>>,
}

impl FilterPipeline {
    pub fn from_config(config: &FilterConfig) -> Self {
        Self::with_stages(vec![
            Box::new(PriceRange {
                min: config.min_price,
                max: config.max_price,
            }),
            Box::new(BlackKeywords::new(&config.keys_word_black_list)),
            Box::new(WhiteKeywords::new(&config.keys_word_white_list)),
            Box::new(GeoSubstring::new(&config.geo)),
            Box::new(SellerBlacklist::new(&config.seller_black_list)),
            Box::new(RecencyWindow::new(config.max_age)),
            Box::new(ReservationExclusion {
                enabled: config.ignore_reserv,
            }),
            Box::new(PromotionExclusion {
                enabled: config.ignore_promotion,
            }),
        ])
    }

    pub fn with_stages(stages: Vec<Box<dyn ListingFilter>>) -> Self {
        Self { stages }
    }

    /// Run every stage in order, stopping as soon as nothing is left.
    pub fn apply(&self, mut listings: Vec<Listing>) -> Vec<Listing> {
        for stage in &self.stages {
            if listings.is_empty() {
                break;
            }
            listings.iter_mut().for_each(|l| stage.annotate(l));
            if !stage.is_active() {
                continue;
            }

            let before = listings.len();
            listings.retain(|l| stage.matches(l));
            log::debug!(
                "Filter '{}' kept {} of {} listings",
                stage.name(),
                listings.len(),
                before
            );
        }
        listings
    }

    /// Whether a single listing passes every active stage.
    pub fn matches_all(&self, listing: &Listing) -> bool {
        let mut listing = listing.clone();
        self.stages.iter().all(|stage| {
            stage.annotate(&mut listing);
            !stage.is_active() || stage.matches(&listing)
        })
    }
}

/// Keywords match as given, surrounding spaces included.
fn lowercase_all(words: &[String]) -> Vec<String> {
    words
        .iter()
        .map(|w| w.to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
