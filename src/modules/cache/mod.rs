//! Per-identifier TTL cache of parsed profiles.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::CacheSettings;
use crate::profile::{ProfileId, ProfileRecord};

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: Instant,
    record: ProfileRecord,
}

#[derive(Debug)]
pub struct ProfileCache {
    enabled: bool,
    ttl: Duration,
    entries: Mutex<HashMap<ProfileId, CacheEntry>>,
}

impl ProfileCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: settings.ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns a live entry. Expired entries are removed on the way out.
    pub fn get(&self, id: &ProfileId) -> Option<ProfileRecord> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(id) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.record.clone()),
            Some(_) => {
                log::debug!("evicting expired cache entry for {id}");
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, id: ProfileId, record: ProfileRecord) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            id,
            CacheEntry {
                stored_at: Instant::now(),
                record,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }
}
