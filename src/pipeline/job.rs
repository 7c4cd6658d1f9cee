// src/pipeline/job.rs

//! A crawl run over the configured search URLs.
//!
//! Pages are produced lazily: each [`CrawlJob::next_page`] call fetches,
//! extracts, normalizes, filters and optionally enriches exactly one page.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{Config, CrawlStats, Listing};
use crate::pipeline::filters::FilterPipeline;
use crate::pipeline::walker::{PageOutcome, PageWalker, UrlReport};
use crate::services::{
    ChallengeSolver, Fetcher, ItemNormalizer, PageExtractor, ProxyController, SessionManager,
    ViewsEnricher, WarmupSolver, catalog_items,
};
use crate::storage::{FileSessionStore, SessionStore};
use crate::utils::http::{ReqwestTransport, Transport, TransportOptions};

/// Listings that survived the filters on one search page.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub url_index: usize,
    pub page: u32,
    pub listings: Vec<Listing>,
}

/// External collaborators of a job.
pub struct JobComponents {
    /// Site traffic, through the proxy when one is configured
    pub transport: Arc<dyn Transport>,
    /// Rotation endpoint traffic, never proxied
    pub direct: Arc<dyn Transport>,
    pub solver: Arc<dyn ChallengeSolver>,
    pub store: Arc<dyn SessionStore>,
}

impl JobComponents {
    /// Production wiring: reqwest transports, warm-up solver, JSON file store.
    pub fn from_config(config: &Config) -> Result<Self> {
        let proxy_url = config.proxy.proxy_url();
        let proxied = proxy_url.is_some();
        let options = TransportOptions {
            proxy_url,
            accept_invalid_certs: config.crawler.accept_invalid_certs,
            http_version: config.crawler.http_version,
        };

        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(options.clone())?);
        let direct: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(TransportOptions {
            proxy_url: None,
            ..options
        })?);
        let solver = Arc::new(WarmupSolver::new(
            transport.clone(),
            config.crawler.site_origin.clone(),
            config.crawler.user_agent.clone(),
            config.crawler.headers.clone(),
            config.crawler.timeout(proxied),
        ));
        let store = Arc::new(FileSessionStore::new(config.session.store_path.clone()));

        Ok(Self {
            transport,
            direct,
            solver,
            store,
        })
    }
}

pub struct CrawlJob {
    fetcher: Fetcher,
    extractor: PageExtractor,
    normalizer: ItemNormalizer,
    filters: FilterPipeline,
    views: ViewsEnricher,
    walker: PageWalker,
    max_retries: u32,
    pause_between_links: Duration,
    single_shot: bool,
    started: bool,
    fetched_any: bool,
    finished: bool,
    cancel: CancellationToken,
}

impl CrawlJob {
    pub fn from_config(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let components = JobComponents::from_config(config)?;
        Self::with_components(config, components, cancel)
    }

    pub fn with_components(
        config: &Config,
        components: JobComponents,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let proxy = ProxyController::new(
            config.proxy.clone(),
            components.transport.clone(),
            components.direct,
        );
        let fetcher = Fetcher::new(
            config,
            components.transport,
            SessionManager::new(components.solver),
            proxy,
            components.store,
            cancel.clone(),
        );
        let single_shot = config.crawler.one_time_start;

        Ok(Self {
            fetcher,
            extractor: PageExtractor::new()?,
            normalizer: ItemNormalizer::new()?,
            filters: FilterPipeline::from_config(&config.filter),
            views: ViewsEnricher::new(config.views.clone(), config.crawler.site_origin.clone())?,
            walker: PageWalker::new(config.urls.clone(), config.crawler.count, single_shot),
            max_retries: config.crawler.max_count_of_retry,
            pause_between_links: config.crawler.pause_between_links(),
            single_shot,
            started: false,
            fetched_any: false,
            finished: false,
            cancel,
        })
    }

    /// Fetch and process the next page, or `None` once the job is over.
    pub async fn next_page(&mut self) -> Option<Page> {
        if !self.started {
            self.started = true;
            self.fetcher.load_session().await;
        }

        loop {
            if self.cancel.is_cancelled() {
                self.walker.cancel();
            }
            let Some(target) = self.walker.current() else {
                self.finish();
                return None;
            };

            if self.fetched_any && !self.single_shot && !self.pause().await {
                continue;
            }
            self.fetched_any = true;

            log::info!("Fetching page {} of {}", target.page, target.url);
            let Some(html) = self.fetcher.fetch(&target.url, self.max_retries).await else {
                if !self.cancel.is_cancelled() {
                    self.walker.advance(PageOutcome::Failed);
                }
                continue;
            };

            let state = self.extractor.extract_state(&html);
            let listings = self.normalizer.normalize(&catalog_items(&state));
            if listings.is_empty() {
                log::info!("No listings on page {}, moving on", target.page);
                self.walker.advance(PageOutcome::Exhausted);
                continue;
            }
            self.walker.advance(PageOutcome::Listings);

            let found = listings.len();
            let listings = self.filters.apply(listings);
            log::info!("Page {}: {} of {} listings kept", target.page, listings.len(), found);
            let listings = self.views.enrich(&mut self.fetcher, listings).await;

            return Some(Page {
                url: target.url,
                url_index: target.url_index,
                page: target.page,
                listings,
            });
        }
    }

    /// Run the job to the end and concatenate every page.
    pub async fn collect_all(&mut self) -> Vec<Listing> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await {
            all.extend(page.listings);
        }
        all
    }

    /// Pages as a lazy stream.
    pub fn into_stream(self) -> impl Stream<Item = Page> {
        futures::stream::unfold(self, |mut job| async move {
            job.next_page().await.map(|page| (page, job))
        })
    }

    pub fn stats(&self) -> CrawlStats {
        self.fetcher.stats()
    }

    pub fn reports(&self) -> &[UrlReport] {
        self.walker.reports()
    }

    /// Where the next IP rotation starts in the endpoint list.
    pub fn rotation_index(&self) -> usize {
        self.fetcher.proxy().rotation_index()
    }

    /// Sleep between pages. Returns `false` when cancelled meanwhile.
    async fn pause(&self) -> bool {
        if self.pause_between_links.is_zero() {
            return true;
        }
        log::debug!("Pausing {:?} before the next page", self.pause_between_links);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.pause_between_links) => true,
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let stats = self.fetcher.stats();
        log::info!(
            "Crawl finished: {} good requests, {} bad requests, {} failed rotations",
            stats.good_requests,
            stats.bad_requests,
            stats.failed_rotations
        );
        for report in self.walker.reports() {
            log::debug!(
                "{}: {} page(s), {:?}",
                report.url,
                report.pages_fetched,
                report.status
            );
        }
    }
}
