// src/services/fetcher.rs

//! Page fetching with block recovery.
//!
//! [`Fetcher::fetch`] never fails loudly: it either returns a body or `None`
//! after the retry budget is spent. What happens between attempts depends on
//! how the previous one failed, see [`FetchFailure`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::{Config, CrawlStats, CrawlerConfig, SessionConfig, SessionState, mask_proxy};
use crate::services::proxy::{ProxyController, RotationOutcome};
use crate::services::session::SessionManager;
use crate::storage::SessionStore;
use crate::utils::http::{HttpRequest, HttpResponse, Transport, TransportError, TransportErrorKind};

/// Message fragments that point at the proxy rather than the site.
const PROXY_FAILURE_MARKERS: &[&str] = &[
    "502",
    "503",
    "CONNECT tunnel failed",
    "(56)",
    "Connection timed out",
    "(28)",
    "timed out",
];

/// Why an attempt did not produce a usable page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// 5xx
    Server(u16),
    /// 429
    TooManyRequests,
    /// 403 or 302
    Blocked(u16),
    /// Any other status that is not a page, 404 or an unfollowed redirect
    Unexpected(u16),
    /// No response at all
    Network(TransportError),
}

impl FetchFailure {
    /// Classify a status code; `None` means the body is delivered to the caller.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200 => None,
            s if s >= 500 => Some(FetchFailure::Server(s)),
            429 => Some(FetchFailure::TooManyRequests),
            403 | 302 => Some(FetchFailure::Blocked(status)),
            s => Some(FetchFailure::Unexpected(s)),
        }
    }

    /// Whether the failure looks like the proxy or its tunnel is broken.
    pub fn is_proxy_failure(&self) -> bool {
        match self {
            FetchFailure::Server(status) => matches!(status, 502 | 503),
            FetchFailure::Network(error) => {
                matches!(
                    error.kind,
                    TransportErrorKind::Timeout | TransportErrorKind::Connect
                ) || PROXY_FAILURE_MARKERS
                    .iter()
                    .any(|marker| error.message.contains(marker))
            }
            _ => false,
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Server(status) => write!(f, "server error {status}"),
            FetchFailure::TooManyRequests => write!(f, "too many requests (429)"),
            FetchFailure::Blocked(status) => write!(f, "blocked ({status})"),
            FetchFailure::Unexpected(status) => write!(f, "unexpected status {status}"),
            FetchFailure::Network(error) => write!(f, "network error: {error}"),
        }
    }
}

/// Single-page GET with retries, IP rotation and cookie refresh.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    sessions: SessionManager,
    proxy: ProxyController,
    store: Arc<dyn SessionStore>,
    session: SessionState,
    crawler: CrawlerConfig,
    session_config: SessionConfig,
    proxy_label: Option<String>,
    rotation_pause: Duration,
    stats: CrawlStats,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        sessions: SessionManager,
        proxy: ProxyController,
        store: Arc<dyn SessionStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            sessions,
            proxy,
            store,
            session: SessionState::default(),
            crawler: config.crawler.clone(),
            session_config: config.session.clone(),
            proxy_label: config.proxy.proxy_url().map(|_| {
                mask_proxy(config.proxy.proxy_string.as_deref().unwrap_or_default())
            }),
            rotation_pause: Duration::from_millis(config.proxy.rotation_pause_ms),
            stats: CrawlStats::default(),
            cancel,
        }
    }

    /// Pull the persisted jar into memory. A broken store starts a clean session.
    pub async fn load_session(&mut self) {
        match self.store.load().await {
            Ok(Some(state)) => {
                log::debug!("Loaded {} persisted cookies", state.cookies.len());
                self.session = state;
            }
            Ok(None) => log::debug!("No persisted session, starting clean"),
            Err(e) => log::warn!("Could not load persisted session: {}", e),
        }
    }

    pub fn stats(&self) -> CrawlStats {
        self.stats
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn proxy(&self) -> &ProxyController {
        &self.proxy
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fetch `url`, making at most `max_retries` attempts.
    pub async fn fetch(&mut self, url: &str, max_retries: u32) -> Option<String> {
        let max_retries = max_retries.max(1);
        if let Some(label) = &self.proxy_label {
            log::info!("Using proxy {}", label);
        }

        for attempt in 1..=max_retries {
            if self.cancel.is_cancelled() {
                log::debug!("Fetch of {} cancelled", url);
                return None;
            }

            let request = self.build_request(url);
            let failure = match self.transport.get(&request).await {
                Ok(response) => match FetchFailure::from_status(response.status) {
                    None => return Some(self.deliver(response).await),
                    Some(failure) => failure,
                },
                Err(error) => FetchFailure::Network(error),
            };

            log::debug!("Attempt {} for {} failed: {}", attempt, url, failure);
            self.recover(&failure, attempt).await;

            if attempt < max_retries {
                let pause = self.crawler.backoff() * attempt;
                log::debug!("Retrying in {:?}", pause);
                tokio::time::sleep(pause).await;
            }
        }

        log::info!("All {} attempts for {} failed", max_retries, url);
        None
    }

    fn build_request(&self, url: &str) -> HttpRequest {
        let user_agent = self
            .session
            .user_agent
            .clone()
            .unwrap_or_else(|| self.crawler.user_agent.clone());

        let mut request = HttpRequest::get(url)
            .timeout(self.crawler.timeout(self.proxy_label.is_some()))
            .header("user-agent", user_agent);
        for (name, value) in &self.crawler.headers {
            request = request.header(name, value);
        }
        if let Some(cookie) = self.session.cookie_header() {
            request = request.header("cookie", cookie);
        }
        request
    }

    /// Successful attempt: keep the cookies, count it, hand over the body.
    async fn deliver(&mut self, response: HttpResponse) -> String {
        self.session.merge_cookies(response.cookies);
        if let Err(e) = self.store.save(&self.session).await {
            log::warn!("Could not persist session: {}", e);
        }
        self.stats.good_requests += 1;
        response.body
    }

    async fn recover(&mut self, failure: &FetchFailure, attempt: u32) {
        match failure {
            FetchFailure::TooManyRequests => {
                self.stats.bad_requests += 1;
                // The throttled jar goes with the dropped connections.
                self.session.cookies.clear();
                self.transport.reset();
                self.rotate().await;
                if attempt >= 3 {
                    self.refresh_session().await;
                }
            }
            FetchFailure::Blocked(_) => self.refresh_session().await,
            _ if failure.is_proxy_failure() => {
                if self.proxy_label.is_some() {
                    log::warn!("Proxy or network failure, rotating IP");
                    self.rotate().await;
                    tokio::time::sleep(self.rotation_pause).await;
                }
            }
            _ => {}
        }
    }

    async fn rotate(&mut self) {
        match self.proxy.change_ip().await {
            RotationOutcome::Rotated { to, .. } => log::debug!("Now exiting through {}", to),
            RotationOutcome::NoEndpoints => {}
            outcome => {
                log::warn!("IP rotation failed: {:?}", outcome);
                self.stats.failed_rotations += 1;
            }
        }
    }

    /// Replace the jar with a freshly solved one; keep the stale jar on failure.
    async fn refresh_session(&mut self) {
        let delay = Duration::from_millis(self.session_config.refresh_delay_ms);
        match self
            .sessions
            .get_cookies(self.session_config.refresh_retries, delay)
            .await
        {
            Some(fresh) => self.session = fresh,
            None => log::warn!("Cookie refresh failed, continuing with the stale session"),
        }
    }
}
