// src/services/session.rs

//! Session acquisition.
//!
//! Getting past the marketplace's bot challenge is delegated to a
//! [`ChallengeSolver`]. [`SessionManager`] only adds the retry policy.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::SessionState;
use crate::utils::http::{HttpRequest, Transport};

/// Black box producing a trusted cookie set and the user-agent it belongs to.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn solve(&self) -> Result<SessionState>;
}

/// Retries a solver with linearly growing delays.
pub struct SessionManager {
    solver: Arc<dyn ChallengeSolver>,
}

impl SessionManager {
    pub fn new(solver: Arc<dyn ChallengeSolver>) -> Self {
        Self { solver }
    }

    /// Obtain a fresh session, or `None` once every attempt failed.
    ///
    /// An empty cookie set counts as a failed attempt.
    pub async fn get_cookies(&self, max_retries: u32, delay: Duration) -> Option<SessionState> {
        let max_retries = max_retries.max(1);
        for attempt in 1..=max_retries {
            match self.solver.solve().await {
                Ok(state) if !state.is_empty() => {
                    log::info!("Fresh cookies obtained on attempt {}", attempt);
                    return Some(state);
                }
                Ok(_) => log::warn!("Cookie attempt {} returned an empty jar", attempt),
                Err(e) => log::warn!("Cookie attempt {} failed: {}", attempt, e),
            }

            if attempt < max_retries {
                tokio::time::sleep(delay * attempt).await;
            }
        }

        log::error!("All {} cookie attempts failed", max_retries);
        None
    }
}

/// Solver that visits the site origin like a first-time browser and keeps
/// whatever cookies the response sets.
///
/// Enough when the site only fingerprints cookie-less clients; a headless
/// browser solver can replace it through [`ChallengeSolver`].
pub struct WarmupSolver {
    transport: Arc<dyn Transport>,
    origin: String,
    user_agent: String,
    headers: BTreeMap<String, String>,
    timeout: Duration,
}

impl WarmupSolver {
    pub fn new(
        transport: Arc<dyn Transport>,
        origin: impl Into<String>,
        user_agent: impl Into<String>,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            origin: origin.into(),
            user_agent: user_agent.into(),
            headers,
            timeout,
        }
    }
}

#[async_trait]
impl ChallengeSolver for WarmupSolver {
    async fn solve(&self) -> Result<SessionState> {
        let mut request = HttpRequest::get(&self.origin)
            .timeout(self.timeout)
            .header("user-agent", &self.user_agent);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = self
            .transport
            .get(&request)
            .await
            .map_err(|e| AppError::solver(format!("warm-up request failed: {e}")))?;

        if matches!(response.status, 403 | 429) {
            return Err(AppError::solver(format!(
                "warm-up request blocked with status {}",
                response.status
            )));
        }

        Ok(SessionState::new(
            response.cookies.into_iter().collect(),
            Some(self.user_agent.clone()),
        ))
    }
}
