// src/pipeline/walker.rs

//! Pagination state over the configured search URLs.
//!
//! The walker performs no I/O. It hands out [`PageTarget`]s and is told how
//! each page went, which decides whether the URL continues.

use serde::Serialize;

use crate::utils::next_page_url;

/// The page to fetch next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    pub url_index: usize,
    /// 1-based page number within the URL
    pub page: u32,
    pub url: String,
}

/// What fetching a page produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// At least one listing was normalized
    Listings,
    /// The page decoded to zero listings
    Exhausted,
    /// The fetcher gave up
    Failed,
}

/// How a URL ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    PageLimit,
    ResultsExhausted,
    RetryBudgetExhausted,
    Cancelled,
}

/// Per-URL summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlReport {
    pub url: String,
    pub pages_fetched: u32,
    pub status: UrlStatus,
}

pub struct PageWalker {
    urls: Vec<String>,
    pages_per_url: u32,
    url_index: usize,
    page: u32,
    current_url: Option<String>,
    pages_fetched: u32,
    reports: Vec<UrlReport>,
    cancelled: bool,
}

impl PageWalker {
    /// `single_shot` limits every URL to its first page.
    pub fn new(urls: Vec<String>, pages_per_url: u32, single_shot: bool) -> Self {
        let pages_per_url = if single_shot { 1 } else { pages_per_url.max(1) };
        let current_url = urls.first().cloned();
        Self {
            urls,
            pages_per_url,
            url_index: 0,
            page: 1,
            current_url,
            pages_fetched: 0,
            reports: Vec::new(),
            cancelled: false,
        }
    }

    pub fn current(&self) -> Option<PageTarget> {
        if self.cancelled {
            return None;
        }
        self.current_url.as_ref().map(|url| PageTarget {
            url_index: self.url_index,
            page: self.page,
            url: url.clone(),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.current().is_none()
    }

    /// Record the outcome of the current page and move on.
    pub fn advance(&mut self, outcome: PageOutcome) {
        let Some(url) = self.current_url.clone() else {
            return;
        };

        match outcome {
            PageOutcome::Failed => self.finish_url(UrlStatus::RetryBudgetExhausted),
            PageOutcome::Exhausted => {
                self.pages_fetched += 1;
                self.finish_url(UrlStatus::ResultsExhausted);
            }
            PageOutcome::Listings => {
                self.pages_fetched += 1;
                if self.page >= self.pages_per_url {
                    self.finish_url(UrlStatus::PageLimit);
                    return;
                }
                match next_page_url(&url) {
                    Ok(next) => {
                        self.page += 1;
                        self.current_url = Some(next);
                    }
                    Err(e) => {
                        log::warn!("Cannot paginate {}: {}", url, e);
                        self.finish_url(UrlStatus::PageLimit);
                    }
                }
            }
        }
    }

    /// Stop the walk, recording the URL in progress as cancelled.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        if self.current_url.is_some() {
            self.finish_url(UrlStatus::Cancelled);
        }
        self.cancelled = true;
    }

    pub fn reports(&self) -> &[UrlReport] {
        &self.reports
    }

    fn finish_url(&mut self, status: UrlStatus) {
        if let Some(url) = self.urls.get(self.url_index) {
            log::info!(
                "Finished {} after {} page(s): {:?}",
                url,
                self.pages_fetched,
                status
            );
            self.reports.push(UrlReport {
                url: url.clone(),
                pages_fetched: self.pages_fetched,
                status,
            });
        }

        self.url_index += 1;
        self.page = 1;
        self.pages_fetched = 0;
        self.current_url = self.urls.get(self.url_index).cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> Vec<String> {
        vec![
            "https://www.avito.ru/moskva/telefony?q=iphone".to_string(),
            "https://www.avito.ru/kazan/velosipedy".to_string(),
        ]
    }

    #[test]
    fn test_walks_pages_then_next_url() {
        let mut walker = PageWalker::new(urls(), 3, false);
        let mut seen = Vec::new();
        while let Some(target) = walker.current() {
            seen.push((target.url_index, target.page, target.url));
            walker.advance(PageOutcome::Listings);
        }

        assert_eq!(seen.len(), 6);
        assert_eq!(seen[1].2, "https://www.avito.ru/moskva/telefony?q=iphone&p=2");
        assert_eq!(seen[2].2, "https://www.avito.ru/moskva/telefony?q=iphone&p=3");
        assert_eq!(seen[3], (1, 1, "https://www.avito.ru/kazan/velosipedy".to_string()));
        assert!(walker.reports().iter().all(|r| r.status == UrlStatus::PageLimit));
    }

    #[test]
    fn test_empty_page_stops_url() {
        let mut walker = PageWalker::new(urls(), 5, false);
        walker.advance(PageOutcome::Listings);
        walker.advance(PageOutcome::Exhausted);

        let target = walker.current().unwrap();
        assert_eq!(target.url_index, 1);
        assert_eq!(target.page, 1);
        assert_eq!(
            walker.reports()[0],
            UrlReport {
                url: urls()[0].clone(),
                pages_fetched: 2,
                status: UrlStatus::ResultsExhausted
            }
        );
    }

    #[test]
    fn test_failed_fetch_records_budget_exhaustion() {
        let mut walker = PageWalker::new(urls(), 5, false);
        walker.advance(PageOutcome::Failed);
        assert_eq!(walker.reports()[0].status, UrlStatus::RetryBudgetExhausted);
        assert_eq!(walker.reports()[0].pages_fetched, 0);
    }

    #[test]
    fn test_single_shot_visits_first_pages_only() {
        let mut walker = PageWalker::new(urls(), 5, true);
        let mut pages = Vec::new();
        while let Some(target) = walker.current() {
            pages.push(target.page);
            walker.advance(PageOutcome::Listings);
        }
        assert_eq!(pages, vec![1, 1]);
    }

    #[test]
    fn test_cancel_stops_walk() {
        let mut walker = PageWalker::new(urls(), 5, false);
        walker.advance(PageOutcome::Listings);
        walker.cancel();

        assert!(walker.is_finished());
        assert_eq!(walker.reports().len(), 1);
        assert_eq!(walker.reports()[0].status, UrlStatus::Cancelled);
        assert_eq!(walker.reports()[0].pages_fetched, 1);
    }

    #[test]
    fn test_no_urls() {
        let walker = PageWalker::new(Vec::new(), 5, false);
        assert!(walker.is_finished());
    }
}
