//! In-memory fetcher for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{FetchRequest, FetchResponse, Fetcher};
use crate::errors::FetchError;

/// Serves canned responses by URL. Unknown URLs get a 404; `set_offline(true)`
/// makes every fetch fail like a dropped connection.
#[derive(Default)]
pub struct StubFetcher {
    responses: Mutex<HashMap<String, FetchResponse>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: FetchResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn respond_ok(&self, url: &str, body: &str) {
        self.respond(url, FetchResponse::new(200, body));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches attempted for `url`, including failed ones.
    pub fn calls_to(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::NetworkUnavailable(format!(
                "stub offline: {}",
                url
            )));
        }

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| FetchResponse::new(404, "not found")))
    }
}
