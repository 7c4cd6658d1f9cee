// src/services/proxy.rs

//! Exit-IP rotation.
//!
//! A rotation only counts once the IP-echo service reports a different
//! address. Attempts are bounded by `max_rotation_attempts`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::models::{ProxyConfig, ProxyIdentity};
use crate::utils::http::{HttpRequest, Transport};

/// Result of a rotation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Exit IP changed
    Rotated { from: Option<String>, to: String },
    /// Nothing to rotate with
    NoEndpoints,
    /// Endpoint accepted the request but the new IP could not be read
    EchoUnavailable,
    /// Every attempt left the IP unchanged or failed
    Exhausted { attempts: u32 },
}

impl RotationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RotationOutcome::Rotated { .. })
    }
}

/// Tracks rotation endpoints and the last observed exit identity.
pub struct ProxyController {
    config: ProxyConfig,
    endpoints: Vec<String>,
    index: usize,
    identity: Option<ProxyIdentity>,
    /// Goes through the proxy; used for IP echo
    proxied: Arc<dyn Transport>,
    /// Goes direct; used for rotation endpoints
    direct: Arc<dyn Transport>,
}

impl ProxyController {
    pub fn new(config: ProxyConfig, proxied: Arc<dyn Transport>, direct: Arc<dyn Transport>) -> Self {
        let endpoints = config.rotation_endpoints();
        Self {
            config,
            endpoints,
            index: 0,
            identity: None,
            proxied,
            direct,
        }
    }

    pub fn has_endpoints(&self) -> bool {
        !self.endpoints.is_empty()
    }

    /// Index of the endpoint the next rotation starts with.
    pub fn rotation_index(&self) -> usize {
        self.index
    }

    /// Last exit identity confirmed by a rotation.
    pub fn identity(&self) -> Option<&ProxyIdentity> {
        self.identity.as_ref()
    }

    /// Ask the echo service for the current external IP.
    pub async fn current_ip(&self) -> Option<String> {
        let request = HttpRequest::get(&self.config.ip_echo_url).timeout(self.config.endpoint_timeout());
        match self.proxied.get(&request).await {
            Ok(response) if response.status == 200 => {
                let ip = response.body.trim();
                (!ip.is_empty()).then(|| ip.to_string())
            }
            Ok(response) => {
                log::warn!("IP echo answered with status {}", response.status);
                None
            }
            Err(e) => {
                log::warn!("Could not read current IP: {}", e);
                None
            }
        }
    }

    /// Rotate the exit IP, walking the endpoint list on failure.
    pub async fn change_ip(&mut self) -> RotationOutcome {
        if self.endpoints.is_empty() {
            log::info!("IP rotation requested but no rotation endpoint is configured");
            return RotationOutcome::NoEndpoints;
        }

        let max_attempts = self.config.max_rotation_attempts.max(1);
        let total = self.endpoints.len();

        for attempt in 0..max_attempts {
            let old_ip = self.current_ip().await;
            if let Some(ip) = &old_ip {
                log::info!("Current IP: {}", ip);
            }

            let slot = self.index % total;
            log::info!("Rotating IP using endpoint {}/{}", slot + 1, total);
            let request =
                HttpRequest::get(&self.endpoints[slot]).timeout(self.config.endpoint_timeout());

            match self.direct.get(&request).await {
                Ok(response) if response.status == 200 => {
                    tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
                    match self.current_ip().await {
                        Some(new_ip) if old_ip.as_deref() != Some(new_ip.as_str()) => {
                            log::info!(
                                "IP changed: {} -> {}",
                                old_ip.as_deref().unwrap_or("unknown"),
                                new_ip
                            );
                            self.index = 0;
                            self.identity = Some(ProxyIdentity::observed(&new_ip));
                            return RotationOutcome::Rotated {
                                from: old_ip,
                                to: new_ip,
                            };
                        }
                        Some(new_ip) => {
                            log::warn!("IP unchanged ({}), trying the next endpoint", new_ip);
                        }
                        None => {
                            log::warn!("Could not read the new IP after rotation");
                            return RotationOutcome::EchoUnavailable;
                        }
                    }
                }
                Ok(response) => {
                    log::warn!("Rotation endpoint answered with status {}", response.status);
                }
                Err(e) => log::warn!("Rotation request failed: {}", e),
            }

            self.index = (self.index + 1) % total;
            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.jitter(attempt)).await;
            }
        }

        log::error!("IP rotation gave up after {} attempts", max_attempts);
        RotationOutcome::Exhausted {
            attempts: max_attempts,
        }
    }

    /// Exponential pause with random jitter, `base * 2^attempt + [0, base]`.
    fn jitter(&self, attempt: u32) -> Duration {
        let base = self.config.rotation_backoff_ms;
        let spread = rand::rng().random_range(0..=base);
        Duration::from_millis(base.saturating_mul(1u64 << attempt.min(16)).saturating_add(spread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTransport, ok, status, timeout};

    const ECHO: &str = "https://api.ipify.org";

    fn config(endpoints: &[&str]) -> ProxyConfig {
        ProxyConfig {
            proxy_string: Some("user:pass@10.0.0.1:8000".into()),
            proxy_change_urls: endpoints.iter().map(|s| s.to_string()).collect(),
            settle_ms: 0,
            rotation_backoff_ms: 0,
            max_rotation_attempts: 3,
            ..ProxyConfig::default()
        }
    }

    fn controller(config: ProxyConfig, transport: Arc<ScriptedTransport>) -> ProxyController {
        ProxyController::new(config, transport.clone(), transport)
    }

    #[tokio::test]
    async fn test_rotation_succeeds_on_first_endpoint() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(ECHO, vec![ok("1.1.1.1"), ok("2.2.2.2")])
                .route("https://rot/a", vec![ok("ok")]),
        );
        let mut proxy = controller(config(&["https://rot/a"]), transport.clone());

        let outcome = proxy.change_ip().await;
        assert_eq!(
            outcome,
            RotationOutcome::Rotated {
                from: Some("1.1.1.1".into()),
                to: "2.2.2.2".into()
            }
        );
        assert_eq!(proxy.rotation_index(), 0);
        assert_eq!(proxy.identity().map(|i| i.ip.as_str()), Some("2.2.2.2"));
    }

    #[tokio::test]
    async fn test_unchanged_ip_moves_to_next_endpoint_then_resets() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(
                    ECHO,
                    vec![ok("1.1.1.1"), ok("1.1.1.1"), ok("1.1.1.1"), ok("3.3.3.3")],
                )
                .route("https://rot/a", vec![ok("ok")])
                .route("https://rot/b", vec![ok("ok")]),
        );
        let mut proxy = controller(config(&["https://rot/a", "https://rot/b"]), transport.clone());

        assert!(proxy.change_ip().await.is_success());
        assert_eq!(transport.requests_to("https://rot/a"), 1);
        assert_eq!(transport.requests_to("https://rot/b"), 1);
        assert_eq!(proxy.rotation_index(), 0);
    }

    #[tokio::test]
    async fn test_bounded_when_ip_never_changes() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(ECHO, vec![ok("1.1.1.1")])
                .route("https://rot/a", vec![ok("ok")])
                .route("https://rot/b", vec![ok("ok")]),
        );
        let mut proxy = controller(config(&["https://rot/a", "https://rot/b"]), transport.clone());

        assert_eq!(
            proxy.change_ip().await,
            RotationOutcome::Exhausted { attempts: 3 }
        );
        assert_eq!(transport.requests_to("https://rot/"), 3);
        // a, b, a were used; the next rotation starts at b
        assert_eq!(proxy.rotation_index(), 1);
    }

    #[test]
    fn test_jitter_bounds() {
        let mut cfg = config(&["https://rot/a"]);
        cfg.rotation_backoff_ms = 100;
        let proxy = controller(cfg, Arc::new(ScriptedTransport::new()));

        for attempt in 0..4 {
            let floor = Duration::from_millis(100 * (1 << attempt));
            for _ in 0..50 {
                let pause = proxy.jitter(attempt);
                assert!(pause >= floor, "{attempt}: {pause:?}");
                assert!(pause <= floor + Duration::from_millis(100), "{attempt}: {pause:?}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_between_attempts_grow_exponentially() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(ECHO, vec![ok("1.1.1.1")])
                .route("https://rot/a", vec![ok("ok")]),
        );
        let mut cfg = config(&["https://rot/a"]);
        cfg.rotation_backoff_ms = 100;
        let mut proxy = controller(cfg, transport);

        let started = tokio::time::Instant::now();
        assert_eq!(
            proxy.change_ip().await,
            RotationOutcome::Exhausted { attempts: 3 }
        );
        let elapsed = started.elapsed();

        // 100+[0,100] after the first attempt, 200+[0,100] after the second, none after the last
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(500), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_failing_endpoint_is_skipped() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(ECHO, vec![ok("1.1.1.1"), ok("1.1.1.1"), ok("4.4.4.4")])
                .route("https://rot/a", vec![timeout()])
                .route("https://rot/b", vec![status(200)]),
        );
        let mut proxy = controller(config(&["https://rot/a", "https://rot/b"]), transport.clone());

        assert!(proxy.change_ip().await.is_success());
        assert_eq!(transport.requests_to("https://rot/a"), 1);
    }

    #[tokio::test]
    async fn test_unreadable_new_ip_is_definitive() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(ECHO, vec![ok("1.1.1.1"), status(500)])
                .route("https://rot/a", vec![ok("ok")]),
        );
        let mut proxy = controller(config(&["https://rot/a"]), transport);

        assert_eq!(proxy.change_ip().await, RotationOutcome::EchoUnavailable);
    }

    #[tokio::test]
    async fn test_legacy_single_endpoint_fallback() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(ECHO, vec![ok("1.1.1.1"), ok("2.2.2.2")])
                .route("https://legacy", vec![ok("ok")]),
        );
        let mut cfg = config(&[]);
        cfg.proxy_change_url = Some("https://legacy".into());
        let mut proxy = controller(cfg, transport.clone());

        assert!(proxy.change_ip().await.is_success());
        assert_eq!(transport.requests_to("https://legacy"), 1);
    }

    #[tokio::test]
    async fn test_no_endpoints() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut proxy = controller(config(&[]), transport.clone());

        assert_eq!(proxy.change_ip().await, RotationOutcome::NoEndpoints);
        assert!(transport.requests().is_empty());
    }
}
