//! Compiled regex cache shared by every query.
//!
//! EQL regexes are compiled once per (pattern, flags) and reused across
//! matches and scans. The cache is bounded; the least recently used entries
//! are evicted first.

use super::query::RegexFlags;
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use std::num::NonZeroUsize;

pub const REGEX_CACHE_CAPACITY: usize = 512;

static REGEX_CACHE: Lazy<Mutex<LruCache<(String, RegexFlags), Regex>>> = Lazy::new(|| {
    let capacity = NonZeroUsize::new(REGEX_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
    Mutex::new(LruCache::new(capacity))
});

pub fn get_regex(pattern: &str, flags: RegexFlags) -> Result<Regex, regex::Error> {
    let key = (pattern.to_string(), flags);
    if let Some(existing) = REGEX_CACHE.lock().get(&key) {
        return Ok(existing.clone());
    }

    let compiled = RegexBuilder::new(pattern)
        .case_insensitive(flags.case_insensitive)
        .multi_line(flags.multi_line)
        .dot_matches_new_line(flags.dot_matches_new_line)
        .ignore_whitespace(flags.ignore_whitespace)
        .build()?;
    REGEX_CACHE.lock().put(key, compiled.clone());

    Ok(compiled)
}

/// Number of compiled regexes currently held.
pub fn cached_regex_count() -> usize {
    REGEX_CACHE.lock().len()
}
