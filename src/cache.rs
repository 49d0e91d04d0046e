use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use bytes::Bytes;
use http::HeaderMap;
use http::header::{ETAG, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

use crate::util::lock_unpoisoned;

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub body: Bytes,
    pub etag: Option<HeaderValue>,
    pub last_modified: Option<HeaderValue>,
    pub stored_at: SystemTime,
}

pub fn cache_key(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split('#').next().unwrap_or(url).to_owned(),
    }
}

#[derive(Debug, Default)]
pub struct CacheValidator {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        lock_unpoisoned(&self.entries).get(&cache_key(url)).cloned()
    }

    pub fn attach_conditional_headers(&self, url: &str, headers: &mut HeaderMap) -> bool {
        let Some(entry) = self.get(url) else {
            return false;
        };
        if let Some(etag) = entry.etag {
            headers.insert(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = entry.last_modified {
            headers.insert(IF_MODIFIED_SINCE, last_modified);
        }
        true
    }

    pub fn store(&self, url: &str, body: Bytes, headers: &HeaderMap) {
        let entry = CacheEntry {
            body,
            etag: headers.get(ETAG).cloned(),
            last_modified: headers.get(LAST_MODIFIED).cloned(),
            stored_at: SystemTime::now(),
        };
        lock_unpoisoned(&self.entries).insert(cache_key(url), entry);
    }

    pub fn revalidated_body(&self, url: &str) -> Option<Bytes> {
        self.get(url).map(|entry| entry.body)
    }

    pub fn remove(&self, url: &str) -> bool {
        lock_unpoisoned(&self.entries)
            .remove(&cache_key(url))
            .is_some()
    }

    pub fn clear(&self) {
        lock_unpoisoned(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
