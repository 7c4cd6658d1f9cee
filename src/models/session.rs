//! Session jar, exit identity and per-job counters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cookie jar plus the user-agent it was issued to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl SessionState {
    pub fn new(cookies: BTreeMap<String, String>, user_agent: Option<String>) -> Self {
        Self {
            cookies,
            user_agent,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Value for a `Cookie` request header.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Fold cookies set by a response into the jar.
    pub fn merge_cookies<I>(&mut self, cookies: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.cookies.extend(cookies);
    }
}

/// External IP of the outbound connection at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyIdentity {
    pub ip: String,
    pub observed_at: DateTime<Utc>,
}

impl ProxyIdentity {
    pub fn observed(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Request and rotation tallies for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub good_requests: u64,
    pub bad_requests: u64,
    /// Rotations that ended without a confirmed new exit IP
    pub failed_rotations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_joins_pairs() {
        let mut state = SessionState::default();
        assert_eq!(state.cookie_header(), None);

        state.merge_cookies([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(state.cookie_header().as_deref(), Some("a=1; b=2"));
    }

    #[test]
    fn merge_overwrites_existing_values() {
        let mut state = SessionState::default();
        state.merge_cookies([("sid".to_string(), "old".to_string())]);
        state.merge_cookies([("sid".to_string(), "new".to_string())]);
        assert_eq!(state.cookies["sid"], "new");
    }
}
