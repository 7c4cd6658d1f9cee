// src/api.rs

//! Request/response boundary for embedding the crawler behind a service.
//!
//! A request runs one single-shot job and returns a compact projection of
//! the listings that survived the filters.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Config, Listing};
use crate::pipeline::CrawlJob;

pub const PROXY_STRING_VAR: &str = "PROXY_STRING";
pub const PROXY_CHANGE_URL_VAR: &str = "PROXY_CHANGE_URL";
pub const PROXY_CHANGE_URLS_VAR: &str = "PROXY_CHANGE_URLS";

#[derive(Debug, Clone, Deserialize)]
pub struct ParseRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub min_price: Option<u64>,
    #[serde(default)]
    pub max_price: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdResult {
    pub id: u64,
    pub price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseResponse {
    pub success: bool,
    pub message: String,
    pub ads: Vec<AdResult>,
    pub total_found: usize,
}

impl ParseResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ads: Vec::new(),
            total_found: 0,
        }
    }
}

/// Compare a presented bearer token with the expected one.
///
/// Fails closed: with no expected token (or an empty one) every request is rejected.
pub fn verify_token(expected: Option<&str>, presented: &str) -> Result<()> {
    match expected {
        Some(token) if !token.is_empty() && constant_time_eq(token, presented.trim()) => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

/// Equality whose running time does not depend on where the inputs differ.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Overlay proxy settings read through `lookup` onto `config`.
pub fn apply_proxy_vars<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(proxy) = non_empty(PROXY_STRING_VAR) {
        config.proxy.proxy_string = Some(proxy);
    }
    if let Some(url) = non_empty(PROXY_CHANGE_URL_VAR) {
        config.proxy.proxy_change_url = Some(url);
    }
    if let Some(urls) = non_empty(PROXY_CHANGE_URLS_VAR) {
        config.proxy.proxy_change_urls = urls
            .split('|')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
            .collect();
    }
}

/// [`apply_proxy_vars`] over the process environment.
pub fn apply_proxy_env(config: &mut Config) {
    apply_proxy_vars(config, |name| std::env::var(name).ok());
}

/// Effective configuration for one request: single-shot, request URLs and price bounds.
pub fn config_for_request(request: &ParseRequest, base: &Config) -> Config {
    let mut config = base.clone();
    config.urls = request.urls.clone();
    config.crawler.one_time_start = true;
    if let Some(min) = request.min_price {
        config.filter.min_price = min;
    }
    if request.max_price.is_some() {
        config.filter.max_price = request.max_price;
    }
    config
}

/// Project listings to `(id, price)` pairs. Listings without a price are left out.
pub fn project(listings: &[Listing]) -> ParseResponse {
    let ads: Vec<AdResult> = listings
        .iter()
        .filter_map(|l| l.price_value().map(|price| AdResult { id: l.id, price }))
        .collect();
    ParseResponse {
        success: true,
        message: format!("Found {} ads", ads.len()),
        total_found: ads.len(),
        ads,
    }
}

/// Handle one request end to end.
pub async fn parse(request: &ParseRequest, base: &Config) -> Result<ParseResponse> {
    if request.urls.is_empty() {
        return Ok(ParseResponse::failure("No urls given"));
    }

    let config = config_for_request(request, base);
    config.validate()?;
    log::info!("Parsing {} url(s)", config.urls.len());

    let mut job = CrawlJob::from_config(&config, CancellationToken::new())?;
    let listings = job.collect_all().await;
    Ok(project(&listings))
}
