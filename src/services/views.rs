// src/services/views.rs

//! View counters from listing detail pages.

use std::time::Duration;

use rand::Rng;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{Listing, ViewsConfig};
use crate::services::fetcher::Fetcher;
use crate::utils::absolute_url;

const TOTAL_VIEWS: &str = r#"[data-marker="item-view/total-views"]"#;
const TODAY_VIEWS: &str = r#"[data-marker="item-view/today-views"]"#;

/// Fills `total_views` and `today_views` by visiting each listing's page.
pub struct ViewsEnricher {
    config: ViewsConfig,
    origin: String,
    total: Selector,
    today: Selector,
}

impl ViewsEnricher {
    pub fn new(config: ViewsConfig, origin: impl Into<String>) -> Result<Self> {
        Ok(Self {
            config,
            origin: origin.into(),
            total: parse_selector(TOTAL_VIEWS)?,
            today: parse_selector(TODAY_VIEWS)?,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.parse_views
    }

    /// Enrich listings in order. Failures leave the counters empty.
    pub async fn enrich(&self, fetcher: &mut Fetcher, mut listings: Vec<Listing>) -> Vec<Listing> {
        if !self.config.parse_views {
            return listings;
        }

        let count = listings.len();
        for (i, listing) in listings.iter_mut().enumerate() {
            if fetcher.is_cancelled() {
                break;
            }
            let Some(path) = listing.url_path.as_deref() else {
                log::debug!("Listing {} has no detail path, skipping views", listing.id);
                continue;
            };

            let url = absolute_url(&self.origin, path);
            match fetcher.fetch(&url, self.config.max_retries).await {
                Some(html) => {
                    let (total, today) = self.extract_views(&html);
                    listing.total_views = total;
                    listing.today_views = today;
                    if total.is_none() && today.is_none() {
                        log::debug!("No view counters on {}", url);
                    }
                }
                None => log::warn!("Could not load views for listing {}", listing.id),
            }

            if i + 1 < count {
                tokio::time::sleep(self.jitter()).await;
            }
        }
        listings
    }

    /// `(total, today)` view counters from a detail page.
    pub fn extract_views(&self, html: &str) -> (Option<u64>, Option<u64>) {
        let document = Html::parse_document(html);
        let read = |selector: &Selector| {
            document
                .select(selector)
                .next()
                .and_then(|el| digits(&el.text().collect::<String>()))
        };
        (read(&self.total), read(&self.today))
    }

    fn jitter(&self) -> Duration {
        let low = self.config.min_pause_ms.min(self.config.max_pause_ms);
        let high = self.config.max_pause_ms.max(low);
        Duration::from_millis(rand::rng().random_range(low..=high))
    }
}

/// Parse the digits of `text`, ignoring separators and labels.
fn digits(text: &str) -> Option<u64> {
    let only: String = text.chars().filter(char::is_ascii_digit).collect();
    only.parse().ok()
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
