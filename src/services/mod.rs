//! Service layer for the crawler.
//!
//! - Session acquisition (`SessionManager`)
//! - Exit-IP rotation (`ProxyController`)
//! - Resilient page fetching (`Fetcher`)
//! - Embedded state extraction (`PageExtractor`)
//! - Record validation (`ItemNormalizer`)
//! - View counter enrichment (`ViewsEnricher`)

pub mod extractor;
pub mod fetcher;
pub mod normalizer;
pub mod proxy;
pub mod session;
pub mod views;

pub use extractor::{PageExtractor, catalog_items};
pub use fetcher::{FetchFailure, Fetcher};
pub use normalizer::ItemNormalizer;
pub use proxy::{ProxyController, RotationOutcome};
pub use session::{ChallengeSolver, SessionManager, WarmupSolver};
pub use views::ViewsEnricher;
