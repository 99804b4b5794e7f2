//! Decoded-image memoization across compositor runs.
//!
//! Changing the template or canvas size re-runs the whole pipeline from
//! scratch. Without a cache that means re-fetching and re-decoding every
//! selected image even though nothing about them changed. This module lets
//! the loader skip both when the same image was decoded by an earlier run.
//!
//! # Design
//!
//! The cache only short-circuits fetch + decode. Layout, compositing and
//! export always run, so a cached entry can never produce a stale canvas.
//!
//! ## Cache keys
//!
//! Keys are SHA-256 of `(access mode, url)`. The access mode is part of the
//! key because the same URL fetched anonymously and with credentials may get
//! different CORS answers, and the taint flag travels with the entry.
//!
//! ## Storage
//!
//! In memory only, shared behind a mutex. Entries hold `Arc`s, so a hit
//! costs a refcount bump, not a pixel copy. Nothing is persisted: a fresh
//! process starts cold.
//!
//! The cache holds at most `capacity` images. Inserting past that drops the
//! least recently used entry, so a long session that keeps changing its
//! selection does not accumulate every full-resolution decode it has seen.

use crate::types::{AccessMode, ImageRef};
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// A decoded image plus the CORS verdict it was fetched under.
#[derive(Debug, Clone)]
pub struct CachedDecode {
    pub image: Arc<DynamicImage>,
    pub cors_granted: bool,
}

#[derive(Debug)]
struct Slot {
    entry: CachedDecode,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Slot>,
    clock: u64,
    stats: CacheStats,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// In-memory LRU decode cache keyed by [`cache_key`].
#[derive(Debug)]
pub struct DecodeCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl DecodeCache {
    /// A cache holding at most `capacity` decoded images (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up an image, counting the hit or miss and marking it recently used.
    pub fn get(&self, image: &ImageRef) -> Option<CachedDecode> {
        let key = cache_key(image.access, &image.url);
        let mut inner = self.lock();
        let now = inner.tick();
        let found = inner.entries.get_mut(&key).map(|slot| {
            slot.last_used = now;
            slot.entry.clone()
        });
        match found {
            Some(_) => inner.stats.hit(),
            None => inner.stats.miss(),
        }
        found
    }

    /// Store a decode, evicting least recently used entries past capacity.
    pub fn insert(&self, image: &ImageRef, entry: CachedDecode) {
        let key = cache_key(image.access, &image.url);
        let mut inner = self.lock();
        let now = inner.tick();
        inner.entries.insert(
            key,
            Slot {
                entry,
                last_used: now,
            },
        );
        while inner.entries.len() > self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    inner.entries.remove(&key);
                    inner.stats.evicted += 1;
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

/// SHA-256 of access mode and URL, returned as a hex string.
pub fn cache_key(access: AccessMode, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(access.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hit/miss counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    /// Entries dropped to stay within capacity.
    pub evicted: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn miss(&mut self) {
        self.misses += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} fetched ({} total)",
                self.hits,
                self.misses,
                self.total()
            )?;
        } else {
            write!(f, "{} fetched", self.misses)?;
        }
        if self.evicted > 0 {
            write!(f, ", {} evicted", self.evicted)?;
        }
        Ok(())
    }
}
