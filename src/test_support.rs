//! Scripted doubles for the network, solver and session store seams.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::SessionState;
use crate::services::ChallengeSolver;
use crate::utils::http::{HttpRequest, HttpResponse, Transport, TransportError, TransportErrorKind};

type Reply = std::result::Result<HttpResponse, TransportError>;

/// Replays queued replies per URL prefix. The last reply of a queue repeats.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<(String, VecDeque<Reply>)>>,
    requests: Mutex<Vec<HttpRequest>>,
    resets: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, prefix: &str, replies: Vec<Reply>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), replies.into()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .count()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, request: &HttpRequest) -> Reply {
        self.requests.lock().unwrap().push(request.clone());
        let mut routes = self.routes.lock().unwrap();
        let Some((_, queue)) = routes
            .iter_mut()
            .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
        else {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                format!("no route for {}", request.url),
            ));
        };
        match queue.len() {
            0 => Err(TransportError::new(TransportErrorKind::Other, "empty route")),
            1 => queue[0].clone(),
            _ => queue.pop_front().unwrap(),
        }
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn ok(body: &str) -> Reply {
    Ok(HttpResponse::new(200, body))
}

pub fn status(code: u16) -> Reply {
    Ok(HttpResponse::new(code, ""))
}

pub fn timeout() -> Reply {
    Err(TransportError::new(
        TransportErrorKind::Timeout,
        "operation timed out",
    ))
}

/// Solver handing out a fixed cookie, failing the first `failures` calls.
pub struct CountingSolver {
    calls: AtomicUsize,
    failures: usize,
}

impl CountingSolver {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for CountingSolver {
    async fn solve(&self) -> Result<SessionState> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(AppError::solver("challenge not passed"));
        }
        let cookies = BTreeMap::from([("ft".to_string(), format!("fresh-{call}"))]);
        Ok(SessionState::new(cookies, Some("SolverAgent/1.0".to_string())))
    }
}

/// Minimal search page embedding `items` the way the marketplace does.
pub fn catalog_page(items: serde_json::Value) -> String {
    let state = serde_json::json!({ "state": { "data": { "catalog": { "items": items } } } });
    let escaped = state
        .to_string()
        .replace('&', "&amp;")
        .replace('"', "&quot;");
    format!(
        "<html><head><script type=\"mime/invalid\" data-mfe-state=\"true\">{escaped}</script></head><body></body></html>"
    )
}
