//! In-Memory Backend
//!
//! Key map with TTL metadata behind the same command interface as the
//! Redis backends. Every key gets a slot number when first inserted; scans
//! walk the slots in order and the cursor is the next slot to visit, so
//! deleting keys mid-scan never hides a surviving one. Failures can be
//! injected per key or for the scan.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ConnectionHandle, KeyTtl, ScanCursor, ScanPage};
use crate::error::StoreError;

/// Entry in the store with expiration
#[derive(Debug, Clone)]
struct Entry {
    slot: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(slot: u64, ttl: Option<Duration>) -> Self {
        Self {
            slot,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Instant::now() >= t).unwrap_or(false)
    }
}

/// Kind of injected failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The command itself is rejected
    Command,
    /// The connection drops
    Disconnect,
}

impl Fault {
    fn error(self, what: &str) -> StoreError {
        match self {
            Fault::Command => StoreError::Backend(format!("{} rejected", what)),
            Fault::Disconnect => StoreError::Redis(redis::RedisError::from(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                format!("connection reset during {}", what),
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<Bytes, Entry>,
    /// Scan order: slot -> key
    slots: BTreeMap<u64, Bytes>,
    last_slot: u64,
    read_faults: HashMap<Bytes, Fault>,
    write_faults: HashMap<Bytes, Fault>,
    scan_fault: Option<Fault>,
    scan_calls: u64,
    expire_calls: u64,
}

/// Shared in-memory keyspace
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key` with an optional TTL, replacing any previous entry
    pub fn set(&self, key: impl Into<Bytes>, ttl: Option<Duration>) {
        let key = key.into();
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let slot = match inner.entries.get(&key) {
            Some(entry) => entry.slot,
            None => {
                inner.last_slot += 1;
                inner.slots.insert(inner.last_slot, key.clone());
                inner.last_slot
            }
        };
        inner.entries.insert(key, Entry::new(slot, ttl));
    }

    /// Delete key, returns true if key existed
    pub fn del(&self, key: &[u8]) -> bool {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        match inner.entries.remove(key) {
            Some(entry) => {
                inner.slots.remove(&entry.slot);
                true
            }
            None => false,
        }
    }

    /// Check if key exists and is not expired
    pub fn exists(&self, key: &[u8]) -> bool {
        self.inner
            .read()
            .entries
            .get(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Remaining TTL of `key`, rounded to the nearest second
    pub fn ttl(&self, key: &[u8]) -> KeyTtl {
        let inner = self.inner.read();
        match inner.entries.get(key) {
            None => KeyTtl::Missing,
            Some(entry) if entry.is_expired() => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::NoExpiry,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                let secs = (remaining.as_millis() + 500) / 1000;
                KeyTtl::Expires(Duration::from_secs(secs as u64))
            }
        }
    }

    /// Set a TTL on an existing key, returns false if the key is gone
    pub fn expire(&self, key: &[u8], ttl: Duration) -> bool {
        let mut inner = self.inner.write();
        inner.expire_calls += 1;
        match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            _ => false,
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .entries
            .values()
            .filter(|e| !e.is_expired())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of EXPIRE calls received so far
    pub fn expire_calls(&self) -> u64 {
        self.inner.read().expire_calls
    }

    /// Number of SCAN calls received so far
    pub fn scan_calls(&self) -> u64 {
        self.inner.read().scan_calls
    }

    /// Make every TTL read of `key` fail
    pub fn fail_ttl_read(&self, key: impl Into<Bytes>, fault: Fault) {
        self.inner.write().read_faults.insert(key.into(), fault);
    }

    /// Make every TTL write of `key` fail
    pub fn fail_ttl_write(&self, key: impl Into<Bytes>, fault: Fault) {
        self.inner.write().write_faults.insert(key.into(), fault);
    }

    /// Make every scan fail
    pub fn fail_scan(&self, fault: Fault) {
        self.inner.write().scan_fault = Some(fault);
    }

    fn scan(&self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage, StoreError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.scan_calls += 1;
        if let Some(fault) = inner.scan_fault {
            return Err(fault.error("SCAN"));
        }

        let mut keys = Vec::new();
        let mut last_visited = None;
        for (&slot, key) in inner.slots.range(cursor.0..).take(count.max(1)) {
            last_visited = Some(slot);
            let live = inner
                .entries
                .get(key)
                .map(|e| !e.is_expired())
                .unwrap_or(false);
            if live && glob_match(pattern.as_bytes(), key) {
                keys.push(key.clone());
            }
        }

        let next = match last_visited {
            Some(slot) if inner.slots.range(slot + 1..).next().is_some() => ScanCursor(slot + 1),
            _ => ScanCursor::START,
        };
        Ok(ScanPage { next, keys })
    }
}

/// [`ConnectionHandle`] over a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    store: MemoryStore,
}

impl MemoryConnection {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl ConnectionHandle for MemoryConnection {
    async fn scan_next(
        &mut self,
        cursor: ScanCursor,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        self.store.scan(cursor, pattern, count)
    }

    async fn get_ttl(&mut self, key: &[u8]) -> Result<KeyTtl, StoreError> {
        if let Some(fault) = self.store.inner.read().read_faults.get(key) {
            return Err(fault.error("TTL"));
        }
        Ok(self.store.ttl(key))
    }

    async fn set_ttl(&mut self, key: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        if let Some(fault) = self.store.inner.read().write_faults.get(key) {
            return Err(fault.error("EXPIRE"));
        }
        Ok(self.store.expire(key, ttl))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Redis-style glob: `*` any run, `?` any byte, `\` escapes the next byte
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it was tried against
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some(b'?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some(b'\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                p += 2;
                t += 1;
                continue;
            }
            Some(&c) if c != b'\\' && c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star, tried)) => {
                p = star + 1;
                t = tried + 1;
                backtrack = Some((star, tried + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let store = MemoryStore::new();

        store.set("plain", None);
        store.set("timed", Some(Duration::from_secs(300)));

        assert!(store.exists(b"plain"));
        assert_eq!(store.ttl(b"plain"), KeyTtl::NoExpiry);
        assert_eq!(store.ttl(b"timed"), KeyTtl::Expires(Duration::from_secs(300)));
        assert_eq!(store.ttl(b"absent"), KeyTtl::Missing);
        assert_eq!(store.len(), 2);

        assert!(store.del(b"plain"));
        assert!(!store.exists(b"plain"));
        assert_eq!(store.ttl(b"plain"), KeyTtl::Missing);
    }

    #[test]
    fn test_expire() {
        let store = MemoryStore::new();
        store.set("k", None);

        assert!(store.expire(b"k", Duration::from_secs(60)));
        assert_eq!(store.ttl(b"k"), KeyTtl::Expires(Duration::from_secs(60)));
        assert!(!store.expire(b"gone", Duration::from_secs(60)));
        assert_eq!(store.expire_calls(), 2);
    }

    #[test]
    fn test_expired_entries_behave_as_missing() {
        let store = MemoryStore::new();
        store.set("short", Some(Duration::ZERO));

        assert!(!store.exists(b"short"));
        assert_eq!(store.ttl(b"short"), KeyTtl::Missing);
        assert!(!store.expire(b"short", Duration::from_secs(10)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_scan_pages_until_cursor_returns_to_start() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store.set(format!("key:{:02}", i), None);
        }

        let mut cursor = ScanCursor::START;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.scan(cursor, "*", 10).unwrap();
            pages += 1;
            seen.extend(page.keys);
            if page.next.is_start() {
                break;
            }
            cursor = page.next;
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 25);
        assert_eq!(store.scan_calls(), 3);
    }

    fn scan_all(store: &MemoryStore, count: usize, mut after_page: impl FnMut(usize)) -> Vec<Bytes> {
        let mut cursor = ScanCursor::START;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.scan(cursor, "*", count).unwrap();
            pages += 1;
            seen.extend(page.keys);
            after_page(pages);
            if page.next.is_start() {
                return seen;
            }
            cursor = page.next;
        }
    }

    #[test]
    fn test_scan_survives_deletes_behind_cursor() {
        let store = MemoryStore::new();
        for key in ["k0", "k1", "k2", "k3"] {
            store.set(key, None);
        }

        let seen = scan_all(&store, 2, |page| {
            if page == 1 {
                store.del(b"k0");
            }
        });

        for key in ["k1", "k2", "k3"] {
            assert!(seen.contains(&Bytes::from(key)), "{} was skipped", key);
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_scan_visits_keys_added_during_scan() {
        let store = MemoryStore::new();
        store.set("b", None);
        store.set("c", None);

        let seen = scan_all(&store, 1, |page| {
            if page == 1 {
                store.set("a", None);
                store.set("c", Some(Duration::from_secs(5)));
            }
        });

        // "c" keeps its slot when overwritten, "a" is appended
        assert_eq!(seen, vec![Bytes::from("b"), Bytes::from("c"), Bytes::from("a")]);
    }

    #[test]
    fn test_scan_empty_store_returns_one_page() {
        let store = MemoryStore::new();
        let page = store.scan(ScanCursor::START, "*", 10).unwrap();
        assert!(page.keys.is_empty());
        assert!(page.next.is_start());
    }

    #[test]
    fn test_scan_filters_by_pattern() {
        let store = MemoryStore::new();
        store.set("user:1", None);
        store.set("user:2", None);
        store.set("session:1", None);

        let page = store.scan(ScanCursor::START, "user:*", 100).unwrap();
        assert_eq!(page.keys, vec![Bytes::from("user:1"), Bytes::from("user:2")]);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = MemoryStore::new();
        store.set("bad", None);
        store.fail_ttl_read("bad", Fault::Command);
        store.fail_ttl_write("bad", Fault::Disconnect);

        let mut conn = MemoryConnection::new(store.clone());
        let read = conn.get_ttl(b"bad").await.unwrap_err();
        assert!(!read.is_connection_failure());
        let write = conn.set_ttl(b"bad", Duration::from_secs(1)).await.unwrap_err();
        assert!(write.is_connection_failure());

        store.fail_scan(Fault::Command);
        assert!(conn.scan_next(ScanCursor::START, "*", 10).await.is_err());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"user:*", b"user:42"));
        assert!(!glob_match(b"user:*", b"session:42"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(glob_match(b"*:cache:*", b"app:cache:item"));
        assert!(!glob_match(b"*:cache:*", b"app:store:item"));
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
        assert!(!glob_match(b"abc", b"ab"));
    }
}
