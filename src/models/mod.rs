// src/models/mod.rs

//! Domain models for the crawler.
//!
//! Configuration, listings and session state shared by every service.

mod config;
mod listing;
mod session;

pub use config::{
    Config, CrawlerConfig, FilterConfig, HttpVersionHint, ProxyConfig, SessionConfig,
    ViewsConfig, mask_proxy,
};
pub use listing::{Category, IvaStep, Listing, Location, PROMOTION_BADGE, Price, RawId, RawItem};
pub use session::{CrawlStats, ProxyIdentity, SessionState};
