//! Keyword namespaces: compact string→integer interning.
//!
//! The parser classifies HTTP methods and header field names by interning
//! them into a [`KeywordSet`], a case-insensitive hashed table mapping
//! each name to a small positive index plus a reverse index→text table.
//! The hash is computed incrementally, one byte at a time, *while* the
//! scanner is already walking the token, so a lookup never makes a second
//! pass over the text.
//!
//! Registration is append-only: once assigned, an index is stable for the
//! process lifetime. New keywords (a nonstandard HTTP method, say) may be
//! defined at runtime while lookups from other threads are in flight; the
//! table is republished as a fresh snapshot via [`arc_swap::ArcSwap`], so
//! readers never lock and never observe a partially updated table.

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// One step of the case-insensitive rolling hash.
///
/// `0x5f` masks off the ASCII case bit, so `Host` and `host` hash alike.
/// Scanners fold this per byte as they advance; see
/// [`KeywordSet::lookup`] for the consuming end.
#[inline]
pub fn hash_byte(hash: u32, byte: u8) -> u32 {
    (hash << 1) ^ (u32::from(byte) & 0x5f)
}

/// Hashes a whole keyword. Only for callers that are not already
/// scanning the text (registration, tests); the parser folds
/// [`hash_byte`] into its single forward scan instead.
pub fn hash_bytes(text: &[u8]) -> u32 {
    text.iter().fold(0, |h, &b| hash_byte(h, b))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeywordError {
    #[error("keyword index {index} already bound to a different keyword")]
    IndexTaken { index: u32 },
}

/// A string→index interning table with a reverse index→string table.
#[derive(Debug)]
pub struct KeywordSet {
    table: ArcSwap<Table>,
    write: Mutex<()>,
}

#[derive(Debug, Clone)]
struct Table {
    /// Reverse table; slot 0 is reserved so indices are always positive.
    keys: Vec<Option<Arc<str>>>,
    /// Power-of-two bucket array of indices into `keys`.
    buckets: Vec<Vec<u32>>,
}

impl Table {
    fn bucket_of(&self, hash: u32) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    fn count(&self) -> usize {
        self.keys.iter().flatten().count()
    }
}

impl KeywordSet {
    /// Creates a namespace sized for roughly `reserved` keywords.
    pub fn with_capacity(reserved: usize) -> Self {
        let buckets = (reserved * 2).next_power_of_two().max(8);
        Self {
            table: ArcSwap::from_pointee(Table { keys: vec![None], buckets: vec![Vec::new(); buckets] }),
            write: Mutex::new(()),
        }
    }

    /// Number of defined keywords.
    pub fn len(&self) -> usize {
        self.table.load().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `text` at `requested` (or the next free index if `None`).
    ///
    /// Defining the same text at the same index again is a no-op returning
    /// the existing index; a different text at an occupied index fails.
    /// Appending keeps every existing index and bucket chain valid, so
    /// concurrent lookups stay correct; call [`optimize`](Self::optimize)
    /// afterwards to restore ideal chain lengths.
    pub fn define(&self, text: &str, requested: Option<u32>) -> Result<u32, KeywordError> {
        let _guard = self.write.lock().expect("keyword table lock poisoned");
        let mut table = Table::clone(&self.table.load());

        // Interning is idempotent: racing definers of the same text must
        // agree on one index.
        if let Some(existing) = self.lookup(text.as_bytes(), false, hash_bytes(text.as_bytes()))
            && requested.is_none_or(|r| r == existing)
        {
            return Ok(existing);
        }

        let index = match requested {
            Some(index) => index,
            None => table
                .keys
                .iter()
                .enumerate()
                .skip(1)
                .find_map(|(i, slot)| slot.is_none().then_some(i as u32))
                .unwrap_or(table.keys.len() as u32),
        };
        debug_assert!(index >= 1, "keyword indices are positive");

        if let Some(Some(existing)) = table.keys.get(index as usize) {
            return if existing.eq_ignore_ascii_case(text) { Ok(index) } else { Err(KeywordError::IndexTaken { index }) };
        }

        if table.keys.len() <= index as usize {
            table.keys.resize(index as usize + 1, None);
        }
        table.keys[index as usize] = Some(Arc::from(text));

        let bucket = table.bucket_of(hash_bytes(text.as_bytes()));
        table.buckets[bucket].push(index);

        self.table.store(Arc::new(table));
        Ok(index)
    }

    /// Bucket lookup by precomputed rolling hash, confirmed by a single
    /// length + byte comparison per chain entry.
    pub fn lookup(&self, text: &[u8], case_sensitive: bool, hash: u32) -> Option<u32> {
        let table = self.table.load();
        let bucket = &table.buckets[table.bucket_of(hash)];
        for &index in bucket {
            let key = table.keys[index as usize].as_ref().expect("bucket entry points at defined keyword");
            let key = key.as_bytes();
            let matched = if case_sensitive { key == text } else { key.eq_ignore_ascii_case(text) };
            if matched {
                return Some(index);
            }
        }
        None
    }

    /// Convenience lookup that hashes `text` itself.
    pub fn lookup_text(&self, text: &[u8], case_sensitive: bool) -> Option<u32> {
        self.lookup(text, case_sensitive, hash_bytes(text))
    }

    /// Reverse lookup: the text assigned to `index`, if any.
    pub fn get(&self, index: u32) -> Option<Arc<str>> {
        self.table.load().keys.get(index as usize)?.clone()
    }

    /// Rebuilds the bucket array for the current key set, restoring short
    /// chains after dynamic [`define`](Self::define) calls. Indices never
    /// move; safe to call repeatedly and concurrently with lookups.
    pub fn optimize(&self) {
        let _guard = self.write.lock().expect("keyword table lock poisoned");
        let mut table = Table::clone(&self.table.load());

        let buckets = (table.count() * 2).next_power_of_two().max(8);
        table.buckets = vec![Vec::new(); buckets];
        for (index, slot) in table.keys.iter().enumerate().skip(1) {
            if let Some(key) = slot {
                let bucket = hash_bytes(key.as_bytes()) as usize & (buckets - 1);
                table.buckets[bucket].push(index as u32);
            }
        }

        self.table.store(Arc::new(table));
    }
}

/// Well-known HTTP method indices in the global method namespace.
pub mod method {
    pub const GET: u32 = 1;
    pub const HEAD: u32 = 2;
    pub const POST: u32 = 3;
    pub const PUT: u32 = 4;
    pub const DELETE: u32 = 5;
    pub const TRACE: u32 = 6;
    pub const OPTIONS: u32 = 7;
    pub const CONNECT: u32 = 8;
}

static METHODS: Lazy<KeywordSet> = Lazy::new(|| {
    let set = KeywordSet::with_capacity(16);
    let standard = [
        ("GET", method::GET),
        ("HEAD", method::HEAD),
        ("POST", method::POST),
        ("PUT", method::PUT),
        ("DELETE", method::DELETE),
        ("TRACE", method::TRACE),
        ("OPTIONS", method::OPTIONS),
        ("CONNECT", method::CONNECT),
    ];
    for (text, index) in standard {
        set.define(text, Some(index)).expect("fresh namespace");
    }
    set.optimize();
    set
});

/// The process-wide HTTP method namespace.
pub fn methods() -> &'static KeywordSet {
    &METHODS
}

/// Registers a nonstandard HTTP method, returning its stable index.
///
/// Safe to call while parses on other threads are looking methods up;
/// existing indices never move. Idempotent per method name.
pub fn register_method(text: &str) -> Result<u32, KeywordError> {
    let set = methods();
    if let Some(index) = set.lookup_text(text.as_bytes(), true) {
        return Ok(index);
    }
    let index = set.define(text, None)?;
    set.optimize();
    Ok(index)
}
