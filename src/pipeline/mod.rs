//! Crawl orchestration.
//!
//! - `CrawlJob`: one run over the configured URLs
//! - `PageWalker`: pagination state
//! - `FilterPipeline`: listing filters

pub mod filters;
pub mod job;
pub mod walker;

pub use filters::{FilterPipeline, ListingFilter};
pub use job::{CrawlJob, JobComponents, Page};
pub use walker::{PageOutcome, PageTarget, PageWalker, UrlReport, UrlStatus};
