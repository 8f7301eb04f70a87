//! Ciphertext registry keyed by random file id.
//!
//! Each record is stored as an `Arc<EncryptedBlob>` inside a sharded
//! `DashMap`. Inserts go through the entry API so a record is either fully
//! present or absent. Readers clone the `Arc`, so a concurrent delete never
//! exposes a half-removed record. Expired records are removed with
//! `remove_if`, re-checking expiry under the shard lock.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Result, ServiceError};
use crate::keys;
use crate::stego_crypto::TAG_LEN;

/// Number of entries `/graph` reports.
pub const STATS_LIMIT: usize = 5;

/// Opaque, unguessable file identifier (32 lowercase hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn random() -> Result<Self> {
        Ok(Self(keys::random_file_id()?))
    }

    /// Accepts only the canonical form produced by [`FileId::random`].
    pub fn parse(text: &str) -> Option<Self> {
        let valid = text.len() == keys::FILE_ID_BYTES * 2
            && text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata supplied by the caller at store time.
#[derive(Debug, Clone)]
pub struct BlobMetadata {
    pub content_type: Option<String>,
    pub original_size: usize,
}

#[derive(Debug)]
pub struct EncryptedBlob {
    pub file_id: FileId,
    pub ciphertext: Vec<u8>,
    pub auth_tag: [u8; TAG_LEN],
    pub content_type: Option<String>,
    pub original_size: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EncryptedBlob {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One row of the `/graph` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphStat {
    #[serde(rename = "fileType")]
    pub file_type: Option<String>,
    pub count: usize,
}

/// Named types sort lexically; a missing type sorts after every named one.
fn compare_types(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub struct BlobStore {
    blobs: DashMap<FileId, Arc<EncryptedBlob>>,
    clock: Arc<dyn Clock>,
}

impl BlobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            blobs: DashMap::new(),
            clock,
        }
    }

    /// Fresh id not currently held by any record.
    pub fn allocate_id(&self) -> Result<FileId> {
        loop {
            let id = FileId::random()?;
            if !self.blobs.contains_key(&id) {
                return Ok(id);
            }
            tracing::warn!("file id collision, drawing again");
        }
    }

    /// Insert a record that expires `ttl` from now. Never overwrites.
    pub fn put(
        &self,
        file_id: FileId,
        ciphertext: Vec<u8>,
        auth_tag: [u8; TAG_LEN],
        metadata: BlobMetadata,
        ttl: Duration,
    ) -> Result<FileId> {
        let created_at = self.clock.now();
        let blob = Arc::new(EncryptedBlob {
            file_id: file_id.clone(),
            ciphertext,
            auth_tag,
            content_type: metadata.content_type,
            original_size: metadata.original_size,
            created_at,
            expires_at: created_at + ttl,
        });

        match self.blobs.entry(file_id.clone()) {
            Entry::Occupied(_) => Err(ServiceError::Internal(format!(
                "file id {} already in use",
                file_id
            ))),
            Entry::Vacant(slot) => {
                tracing::debug!(
                    file_id = %file_id,
                    bytes = blob.ciphertext.len(),
                    expires_at = %blob.expires_at,
                    "stored blob"
                );
                slot.insert(blob);
                Ok(file_id)
            }
        }
    }

    /// Fetch a live record. Past `expires_at` the record is dropped and
    /// `Expired` returned.
    pub fn get(&self, file_id: &FileId) -> Result<Arc<EncryptedBlob>> {
        let blob = self
            .blobs
            .get(file_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ServiceError::NotFound)?;

        let now = self.clock.now();
        if blob.is_expired_at(now) {
            if self.remove_if_expired(file_id, now) {
                tracing::debug!(file_id = %file_id, "purged expired blob on read");
            }
            return Err(ServiceError::Expired);
        }
        Ok(blob)
    }

    fn remove_if_expired(&self, file_id: &FileId, now: DateTime<Utc>) -> bool {
        self.blobs
            .remove_if(file_id, |_, blob| blob.is_expired_at(now))
            .is_some()
    }

    /// Delete every record whose `expires_at` has passed. Returns the number
    /// removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let candidates: Vec<FileId> = self
            .blobs
            .iter()
            .filter(|entry| entry.value().is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        candidates
            .iter()
            .filter(|id| self.remove_if_expired(id, now))
            .count()
    }

    /// Live records grouped by content type: count descending, then type
    /// ascending, at most [`STATS_LIMIT`] rows.
    pub fn stats(&self) -> Vec<GraphStat> {
        let now = self.clock.now();
        let mut counts: HashMap<Option<String>, usize> = HashMap::new();
        for entry in self.blobs.iter() {
            let blob = entry.value();
            if !blob.is_expired_at(now) {
                *counts.entry(blob.content_type.clone()).or_default() += 1;
            }
        }

        let mut stats: Vec<GraphStat> = counts
            .into_iter()
            .map(|(file_type, count)| GraphStat { file_type, count })
            .collect();
        stats.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| compare_types(&a.file_type, &b.file_type))
        });
        stats.truncate(STATS_LIMIT);
        stats
    }

    /// Number of live (unexpired) records.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.blobs
            .iter()
            .filter(|entry| !entry.value().is_expired_at(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records physically held, including expired ones not yet purged.
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_at_epoch() -> (Arc<ManualClock>, BlobStore) {
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        let store = BlobStore::new(clock.clone());
        (clock, store)
    }

    fn put_typed(store: &BlobStore, content_type: Option<&str>, ttl_minutes: i64) -> FileId {
        let id = store.allocate_id().unwrap();
        store
            .put(
                id,
                vec![1, 2, 3],
                [0u8; TAG_LEN],
                BlobMetadata {
                    content_type: content_type.map(str::to_string),
                    original_size: 3,
                },
                Duration::minutes(ttl_minutes),
            )
            .unwrap()
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let (_, store) = store_at_epoch();
        let id = FileId::random().unwrap();
        assert!(matches!(store.get(&id), Err(ServiceError::NotFound)));
    }

    #[test]
    fn test_expiry_boundary() {
        let (clock, store) = store_at_epoch();
        let id = put_typed(&store, Some("text/plain"), 30);

        clock.advance(Duration::minutes(30) - Duration::seconds(1));
        let blob = store.get(&id).unwrap();
        assert_eq!(blob.ciphertext, vec![1, 2, 3]);

        clock.advance(Duration::seconds(1));
        assert!(matches!(store.get(&id), Err(ServiceError::Expired)));
        // Lazily purged by the failed read.
        assert!(matches!(store.get(&id), Err(ServiceError::NotFound)));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (clock, store) = store_at_epoch();
        let short = put_typed(&store, Some("a/a"), 30);
        let long = put_typed(&store, Some("a/a"), 60);

        clock.advance(Duration::minutes(45));
        assert_eq!(store.sweep_expired(), 1);
        assert!(matches!(store.get(&short), Err(ServiceError::NotFound)));
        assert!(store.get(&long).is_ok());
        assert_eq!(store.sweep_expired(), 0);
    }

    #[test]
    fn test_duplicate_put_never_overwrites() {
        let (_, store) = store_at_epoch();
        let id = put_typed(&store, None, 30);
        let result = store.put(
            id.clone(),
            vec![9],
            [1u8; TAG_LEN],
            BlobMetadata {
                content_type: None,
                original_size: 1,
            },
            Duration::minutes(30),
        );
        assert!(matches!(result, Err(ServiceError::Internal(_))));
        assert_eq!(store.get(&id).unwrap().ciphertext, vec![1, 2, 3]);
    }

    #[test]
    fn test_stats_ordering_and_ties() {
        let (_, store) = store_at_epoch();
        for _ in 0..10 {
            put_typed(&store, Some("image/png"), 30);
        }
        for _ in 0..7 {
            put_typed(&store, Some("text/plain"), 30);
            put_typed(&store, Some("application/pdf"), 30);
        }

        let stats = store.stats();
        let types: Vec<Option<&str>> = stats.iter().map(|s| s.file_type.as_deref()).collect();
        assert_eq!(
            types,
            vec![Some("image/png"), Some("application/pdf"), Some("text/plain")]
        );
        assert_eq!(stats[0].count, 10);
        assert_eq!(stats[1].count, 7);
    }

    #[test]
    fn test_stats_capped_and_untyped_last() {
        let (_, store) = store_at_epoch();
        for t in ["a/1", "a/2", "a/3", "a/4", "a/5"] {
            put_typed(&store, Some(t), 30);
        }
        put_typed(&store, None, 30);

        let stats = store.stats();
        assert_eq!(stats.len(), STATS_LIMIT);
        assert!(stats.iter().all(|s| s.file_type.is_some()));
    }

    #[test]
    fn test_stats_skip_expired() {
        let (clock, store) = store_at_epoch();
        put_typed(&store, Some("image/png"), 30);
        put_typed(&store, Some("text/plain"), 120);
        clock.advance(Duration::minutes(60));

        let stats = store.stats();
        assert_eq!(
            stats,
            vec![GraphStat {
                file_type: Some("text/plain".to_string()),
                count: 1
            }]
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_len_counts_only_live_records() {
        let (clock, store) = store_at_epoch();
        assert!(store.is_empty());
        put_typed(&store, None, 30);
        assert!(!store.is_empty());

        clock.advance(Duration::minutes(30));
        assert!(store.is_empty());
        assert_eq!(store.blob_count(), 1);
    }

    #[test]
    fn test_concurrent_puts_all_land() {
        let (_, store) = store_at_epoch();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| put_typed(&store, Some("a/a"), 30))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: Vec<FileId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 2000);
        assert_eq!(store.len(), 2000);
        for id in &ids {
            assert_eq!(store.get(id).unwrap().ciphertext, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_readers_racing_sweep_see_whole_records() {
        let (clock, store) = store_at_epoch();
        let store = Arc::new(store);
        let ids: Vec<FileId> = (0..200)
            .map(|i| put_typed(&store, Some("text/plain"), 1 + i % 20))
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let ids = ids.clone();
                std::thread::spawn(move || {
                    let mut seen = 0usize;
                    for _ in 0..50 {
                        for id in &ids {
                            match store.get(id) {
                                Ok(blob) => {
                                    assert_eq!(&blob.file_id, id);
                                    assert_eq!(blob.ciphertext, vec![1, 2, 3]);
                                    assert_eq!(blob.content_type.as_deref(), Some("text/plain"));
                                    seen += 1;
                                }
                                Err(ServiceError::Expired) | Err(ServiceError::NotFound) => {}
                                Err(other) => panic!("unexpected error: {:?}", other),
                            }
                        }
                    }
                    seen
                })
            })
            .collect();

        let sweeper = {
            let store = store.clone();
            let clock = clock.clone();
            std::thread::spawn(move || {
                let mut purged = 0;
                for _ in 0..25 {
                    clock.advance(Duration::minutes(1));
                    purged += store.sweep_expired();
                    std::thread::yield_now();
                }
                purged
            })
        };

        for reader in readers {
            reader.join().unwrap();
        }
        let purged = sweeper.join().unwrap();

        // Every record is past its expiry by now. Readers purge lazily, so
        // the sweeper can account for at most all of them.
        assert!(purged <= 200);
        assert!(store.is_empty());
        store.sweep_expired();
        assert_eq!(store.blob_count(), 0);
    }

    #[test]
    fn test_file_id_parse() {
        let id = FileId::random().unwrap();
        assert_eq!(FileId::parse(id.as_str()), Some(id));
        assert!(FileId::parse("ABCDEF0123456789abcdef0123456789").is_none());
        assert!(FileId::parse("../etc/passwd").is_none());
        assert!(FileId::parse("").is_none());
    }
}
