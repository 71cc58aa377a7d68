//! Per-request caching policy for the offline proxy.
//!
//! `classify` decides which strategy a request gets; `RequestRouter::handle`
//! runs it. Rules, first match wins:
//!
//! 1. non-GET: straight to the network, never cached
//! 2. navigation within the app origin: cached app shell, else network
//! 3. map tile host: network-first, cache as fallback
//! 4. everything else: cache-first, network as fallback
//!
//! Cache writes happen in the background so they never delay a response.
//! They are tracked, and `shutdown` waits for them.

use std::sync::Arc;

use reqwest::Url;
use tokio_util::task::TaskTracker;

use crate::cache::CacheManager;
use crate::errors::FetchError;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};

/// Strategy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Passthrough,
    Navigation,
    MapTile,
    Static,
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
        }
    }
}

/// Inputs to classification.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    /// Origin the app shell is served from; relative requests resolve against it
    pub app_origin: Url,
    /// Substrings that mark a host as a map tile server
    pub tile_hosts: Vec<String>,
}

impl RoutePolicy {
    /// Cache keys tried, in order, when serving a navigation offline.
    fn shell_documents(&self) -> Vec<Url> {
        let mut docs = Vec::with_capacity(2);
        if let Ok(index) = self.app_origin.join("index.html") {
            docs.push(index);
        }
        docs.push(self.app_origin.clone());
        docs
    }

    fn is_app_origin(&self, url: &Url) -> bool {
        url.origin() == self.app_origin.origin()
    }

    fn is_tile_host(&self, url: &Url) -> bool {
        url.host_str()
            .map(|host| self.tile_hosts.iter().any(|pattern| host.contains(pattern.as_str())))
            .unwrap_or(false)
    }
}

/// A served response and how it was obtained.
#[derive(Debug, Clone)]
pub struct Routed {
    pub class: RouteClass,
    pub source: ResponseSource,
    pub response: FetchResponse,
}

fn is_navigation(request: &FetchRequest) -> bool {
    if let Some(mode) = request.header("sec-fetch-mode") {
        return mode.eq_ignore_ascii_case("navigate");
    }
    request
        .header("accept")
        .and_then(|accept| accept.split(',').next())
        .map(|first| first.trim().starts_with("text/html"))
        .unwrap_or(false)
}

/// Pick the strategy for a request.
pub fn classify(request: &FetchRequest, policy: &RoutePolicy) -> RouteClass {
    if !request.is_get() {
        RouteClass::Passthrough
    } else if is_navigation(request) && policy.is_app_origin(&request.url) {
        RouteClass::Navigation
    } else if policy.is_tile_host(&request.url) {
        RouteClass::MapTile
    } else {
        RouteClass::Static
    }
}

/// Runs the caching strategy for each intercepted request.
#[derive(Clone)]
pub struct RequestRouter {
    cache: CacheManager,
    fetcher: Arc<dyn Fetcher>,
    policy: Arc<RoutePolicy>,
    pending_writes: TaskTracker,
}

impl RequestRouter {
    pub fn new(cache: CacheManager, fetcher: Arc<dyn Fetcher>, policy: RoutePolicy) -> Self {
        Self {
            cache,
            fetcher,
            policy: Arc::new(policy),
            pending_writes: TaskTracker::new(),
        }
    }

    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    #[cfg(test)]
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub async fn handle(&self, request: FetchRequest) -> Result<Routed, FetchError> {
        let class = classify(&request, &self.policy);
        tracing::debug!(method = %request.method, url = %request.url, ?class, "Routing request");

        let (source, response) = match class {
            RouteClass::Passthrough => (ResponseSource::Network, self.network_only(&request).await?),
            RouteClass::Navigation => self.navigation(&request).await?,
            RouteClass::MapTile => self.network_first(request).await?,
            RouteClass::Static => self.cache_first(request).await?,
        };

        Ok(Routed {
            class,
            source,
            response,
        })
    }

    async fn network_only(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.fetcher.fetch(request).await.map_err(offline)
    }

    async fn navigation(
        &self,
        request: &FetchRequest,
    ) -> Result<(ResponseSource, FetchResponse), FetchError> {
        for document in self.policy.shell_documents() {
            if let Some(cached) = self.cached(&FetchRequest::get(document)).await {
                return Ok((ResponseSource::Cache, cached));
            }
        }
        let response = self.network_only(request).await?;
        Ok((ResponseSource::Network, response))
    }

    async fn network_first(
        &self,
        request: FetchRequest,
    ) -> Result<(ResponseSource, FetchResponse), FetchError> {
        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.store_in_background(request, response.clone());
                }
                Ok((ResponseSource::Network, response))
            }
            Err(err) => {
                tracing::debug!(url = %request.url, error = %err, "Tile fetch failed, trying cache");
                match self.cached(&request).await {
                    Some(cached) => Ok((ResponseSource::Cache, cached)),
                    None => Err(offline(err)),
                }
            }
        }
    }

    async fn cache_first(
        &self,
        request: FetchRequest,
    ) -> Result<(ResponseSource, FetchResponse), FetchError> {
        if let Some(cached) = self.cached(&request).await {
            return Ok((ResponseSource::Cache, cached));
        }

        let response = self.network_only(&request).await?;
        if response.is_cacheable() {
            self.store_in_background(request, response.clone());
        }
        Ok((ResponseSource::Network, response))
    }

    /// Cache lookup where a storage failure counts as a miss.
    async fn cached(&self, request: &FetchRequest) -> Option<FetchResponse> {
        match self.cache.lookup(request).await {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(url = %request.url, error = %err, "Cache lookup failed");
                None
            }
        }
    }

    fn store_in_background(&self, request: FetchRequest, response: FetchResponse) {
        let cache = self.cache.clone();
        self.pending_writes.spawn(async move {
            if let Err(err) = cache.store(&request, &response).await {
                tracing::warn!(url = %request.url, error = %err, "Background cache write failed");
            }
        });
    }

    /// Wait until every background cache write issued so far has finished.
    #[cfg(test)]
    pub async fn flush(&self) {
        self.pending_writes.close();
        self.pending_writes.wait().await;
        self.pending_writes.reopen();
    }

    /// Stop accepting background writes and wait for the outstanding ones.
    pub async fn shutdown(&self) {
        self.pending_writes.close();
        self.pending_writes.wait().await;
        tracing::info!("Pending cache writes flushed");
    }
}

fn offline(err: FetchError) -> FetchError {
    match err {
        FetchError::NetworkUnavailable(_) => err,
        other => FetchError::NetworkUnavailable(other.to_string()),
    }
}
