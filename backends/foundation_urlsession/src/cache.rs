use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use url::Url;

use crate::response::CachedResponse;

/// In-memory response cache keyed by request URL.
#[derive(Debug, Default)]
pub struct UrlCache {
    entries: Mutex<HashMap<String, CachedResponse>>,
}

impl UrlCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, url: &Url, cached: CachedResponse) {
        tracing::debug!("Caching response for {}", url);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.as_str().to_string(), cached);
    }

    #[must_use]
    pub fn cached_response(&self, url: &Url) -> Option<CachedResponse> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url.as_str())
            .cloned()
    }

    pub fn remove(&self, url: &Url) -> Option<CachedResponse> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
