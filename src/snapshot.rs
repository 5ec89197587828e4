//! Versioned byte-stable save/load for every cache type.
//!
//! ## Frame layout
//!
//! ```text
//!   ┌───────┬─────────┬─────────┬────────┬──────────┬──────────────┐
//!   │ magic │ major   │ minor   │ policy │ length   │ payload      │
//!   │ BXCS  │ u16 LE  │ u16 LE  │ u8     │ u64 LE   │ JSON bytes   │
//!   └───────┴─────────┴─────────┴────────┴──────────┴──────────────┘
//! ```
//!
//! The payload is a serde-serialized snapshot struct carrying the bound,
//! policy parameters and the entries in policy order: FIFO/LRU save their
//! ring order, LFU saves `(key, value, frequency)` in insertion order so
//! tie-breaking survives the round trip, and the TTL policies save
//! *remaining* seconds — monotonic instants cannot cross processes, so
//! deadlines are re-anchored to the loading process's clock. Entries
//! already due at save time are skipped.
//!
//! Loading checks, in order: the magic, the major version (a mismatch is
//! [`SnapshotError::Version`]), and the policy tag (a FIFO stream refuses
//! to load as an LRU with [`SnapshotError::Policy`]). Malformed payloads
//! surface as [`SnapshotError::Corrupt`].
//!
//! ## Example Usage
//!
//! ```
//! use boxcache::FifoCache;
//!
//! let cache = FifoCache::new(4);
//! cache.insert("a".to_string(), 1);
//! cache.insert("b".to_string(), 2);
//!
//! let mut buffer = Vec::new();
//! cache.save_to(&mut buffer).unwrap();
//!
//! let restored = FifoCache::<String, i32>::load_from(buffer.as_slice()).unwrap();
//! assert_eq!(restored, cache);
//! assert_eq!(restored.popitem(), Some(("a".to_string(), 1)));
//! ```

use std::hash::Hash;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::policy::fifo::FifoCache;
use crate::policy::lfu::LfuCache;
use crate::policy::lru::LruCache;
use crate::policy::nopolicy::Cache;
use crate::policy::rr::RrCache;
use crate::policy::ttl::TtlCache;
use crate::policy::vttl::VttlCache;

const MAGIC: [u8; 4] = *b"BXCS";

/// Current format major version; streams from another major fail to load.
pub const FORMAT_MAJOR: u16 = 1;
/// Current format minor version; informational.
pub const FORMAT_MINOR: u16 = 0;

mod tag {
    pub const NO_POLICY: u8 = 0;
    pub const FIFO: u8 = 1;
    pub const LRU: u8 = 2;
    pub const LFU: u8 = 3;
    pub const RR: u8 = 4;
    pub const TTL: u8 = 5;
    pub const VTTL: u8 = 6;
}

// ---------------------------------------------------------------------------
// Frame helpers
// ---------------------------------------------------------------------------

fn write_frame<W: Write, P: Serialize>(
    mut writer: W,
    policy: u8,
    payload: &P,
) -> Result<(), SnapshotError> {
    let body = serde_json::to_vec(payload)
        .map_err(|err| SnapshotError::Corrupt(format!("payload encoding failed: {err}")))?;
    writer.write_all(&MAGIC)?;
    writer.write_all(&FORMAT_MAJOR.to_le_bytes())?;
    writer.write_all(&FORMAT_MINOR.to_le_bytes())?;
    writer.write_all(&[policy])?;
    writer.write_all(&(body.len() as u64).to_le_bytes())?;
    writer.write_all(&body)?;
    Ok(())
}

fn read_frame<R: Read, P: DeserializeOwned>(
    mut reader: R,
    expected_policy: u8,
) -> Result<P, SnapshotError> {
    let mut header = [0u8; 17];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(SnapshotError::Corrupt("bad magic".into()));
    }
    let major = u16::from_le_bytes([header[4], header[5]]);
    if major != FORMAT_MAJOR {
        return Err(SnapshotError::Version {
            found: major,
            expected: FORMAT_MAJOR,
        });
    }
    let policy = header[8];
    if policy != expected_policy {
        return Err(SnapshotError::Policy {
            found: policy,
            expected: expected_policy,
        });
    }
    let length = u64::from_le_bytes(header[9..17].try_into().unwrap_or([0; 8])) as usize;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body)
        .map_err(|err| SnapshotError::Corrupt(format!("payload decoding failed: {err}")))
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct PlainSnapshot<K, V> {
    maxsize: u64,
    entries: Vec<(K, V)>,
}

#[derive(Serialize, Deserialize)]
struct LfuSnapshot<K, V> {
    maxsize: u64,
    entries: Vec<(K, V, u64)>,
}

#[derive(Serialize, Deserialize)]
struct TtlSnapshot<K, V> {
    maxsize: u64,
    ttl_secs: f64,
    entries: Vec<(K, V, f64)>,
}

#[derive(Serialize, Deserialize)]
struct VttlSnapshot<K, V> {
    maxsize: u64,
    entries: Vec<(K, V, Option<f64>)>,
}

// ---------------------------------------------------------------------------
// Per-policy implementations
// ---------------------------------------------------------------------------

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Serializes the cache into `writer`.
    pub fn save_to<W: Write>(&self, writer: W) -> Result<(), SnapshotError> {
        let payload = self.read_core(|core| PlainSnapshot {
            maxsize: core.maxsize() as u64,
            entries: core
                .table()
                .iter()
                .map(|(_, entry)| (entry.key.clone(), entry.value.clone()))
                .collect(),
        });
        write_frame(writer, tag::NO_POLICY, &payload)
    }

    /// Restores a cache previously written by [`save_to`](Self::save_to).
    pub fn load_from<R: Read>(reader: R) -> Result<Self, SnapshotError> {
        let payload: PlainSnapshot<K, V> = read_frame(reader, tag::NO_POLICY)?;
        let cache = Cache::with_capacity(payload.maxsize as usize, payload.entries.len());
        cache
            .update(payload.entries)
            .map_err(|_| SnapshotError::Corrupt("more entries than maxsize".into()))?;
        Ok(cache)
    }
}

impl<K, V> FifoCache<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Serializes the cache, preserving insertion order.
    pub fn save_to<W: Write>(&self, writer: W) -> Result<(), SnapshotError> {
        let payload = self.read_core(|core| PlainSnapshot {
            maxsize: core.maxsize() as u64,
            entries: core
                .ring()
                .iter()
                .filter_map(|slot| core.table().entry(slot))
                .map(|entry| (entry.key.clone(), entry.value.clone()))
                .collect(),
        });
        write_frame(writer, tag::FIFO, &payload)
    }

    /// Restores a cache previously written by [`save_to`](Self::save_to).
    pub fn load_from<R: Read>(reader: R) -> Result<Self, SnapshotError> {
        let payload: PlainSnapshot<K, V> = read_frame(reader, tag::FIFO)?;
        let cache = FifoCache::with_capacity(payload.maxsize as usize, payload.entries.len());
        cache.update(payload.entries);
        Ok(cache)
    }
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Serializes the cache, preserving recency order (LRU first).
    pub fn save_to<W: Write>(&self, writer: W) -> Result<(), SnapshotError> {
        let payload = self.read_core(|core| PlainSnapshot {
            maxsize: core.maxsize() as u64,
            entries: core
                .ring()
                .iter()
                .filter_map(|slot| core.table().entry(slot))
                .map(|entry| (entry.key.clone(), entry.value.clone()))
                .collect(),
        });
        write_frame(writer, tag::LRU, &payload)
    }

    /// Restores a cache previously written by [`save_to`](Self::save_to).
    pub fn load_from<R: Read>(reader: R) -> Result<Self, SnapshotError> {
        let payload: PlainSnapshot<K, V> = read_frame(reader, tag::LRU)?;
        let cache = LruCache::with_capacity(payload.maxsize as usize, payload.entries.len());
        cache.update(payload.entries);
        Ok(cache)
    }
}

impl<K, V> LfuCache<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Serializes the cache, preserving frequencies and the insertion
    /// order that breaks frequency ties.
    pub fn save_to<W: Write>(&self, writer: W) -> Result<(), SnapshotError> {
        let payload = self.read_core(|core| {
            let mut rows: Vec<(u64, K, V, u64)> = core
                .table()
                .iter()
                .map(|(_, entry)| {
                    (
                        entry.meta.seq,
                        entry.key.clone(),
                        entry.value.clone(),
                        entry.meta.freq,
                    )
                })
                .collect();
            rows.sort_unstable_by_key(|&(seq, ..)| seq);
            LfuSnapshot {
                maxsize: core.maxsize() as u64,
                entries: rows
                    .into_iter()
                    .map(|(_, key, value, freq)| (key, value, freq))
                    .collect(),
            }
        });
        write_frame(writer, tag::LFU, &payload)
    }

    /// Restores a cache previously written by [`save_to`](Self::save_to).
    pub fn load_from<R: Read>(reader: R) -> Result<Self, SnapshotError> {
        let payload: LfuSnapshot<K, V> = read_frame(reader, tag::LFU)?;
        let cache = LfuCache::with_capacity(payload.maxsize as usize, payload.entries.len());
        cache.write_core(|core| {
            for (key, value, freq) in payload.entries {
                core.insert_restored(key, value, freq);
            }
        });
        Ok(cache)
    }
}

impl<K, V> RrCache<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Serializes the cache.
    pub fn save_to<W: Write>(&self, writer: W) -> Result<(), SnapshotError> {
        let payload = self.read_core(|core| PlainSnapshot {
            maxsize: core.maxsize() as u64,
            entries: core
                .table()
                .iter()
                .map(|(_, entry)| (entry.key.clone(), entry.value.clone()))
                .collect(),
        });
        write_frame(writer, tag::RR, &payload)
    }

    /// Restores a cache previously written by [`save_to`](Self::save_to).
    pub fn load_from<R: Read>(reader: R) -> Result<Self, SnapshotError> {
        let payload: PlainSnapshot<K, V> = read_frame(reader, tag::RR)?;
        let cache = RrCache::with_capacity(payload.maxsize as usize, payload.entries.len());
        cache.update(payload.entries);
        Ok(cache)
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Serializes the cache, storing each live entry's remaining lifetime.
    /// Entries already due are skipped.
    pub fn save_to<W: Write>(&self, writer: W) -> Result<(), SnapshotError> {
        let now = Instant::now();
        let payload = self.read_core(|core| {
            let ttl = core.ttl();
            TtlSnapshot {
                maxsize: core.maxsize() as u64,
                ttl_secs: ttl.as_secs_f64(),
                entries: core
                    .ring()
                    .iter()
                    .filter_map(|slot| core.table().entry(slot))
                    .filter_map(|entry| {
                        let remaining = entry.meta.deadline.saturating_duration_since(now);
                        if remaining.is_zero() {
                            None
                        } else {
                            Some((
                                entry.key.clone(),
                                entry.value.clone(),
                                remaining.as_secs_f64(),
                            ))
                        }
                    })
                    .collect(),
            }
        });
        write_frame(writer, tag::TTL, &payload)
    }

    /// Restores a cache previously written by [`save_to`](Self::save_to).
    ///
    /// Deadlines are re-anchored: an entry saved with `r` seconds remaining
    /// will expire `r` seconds after the load.
    pub fn load_from<R: Read>(reader: R) -> Result<Self, SnapshotError> {
        let payload: TtlSnapshot<K, V> = read_frame(reader, tag::TTL)?;
        if !payload.ttl_secs.is_finite() || payload.ttl_secs <= 0.0 {
            return Err(SnapshotError::Corrupt("non-positive ttl".into()));
        }
        let ttl = Duration::from_secs_f64(payload.ttl_secs);
        let cache = TtlCache::with_capacity(payload.maxsize as usize, ttl, payload.entries.len());
        let now = Instant::now();
        cache.write_core(|core| {
            for (key, value, remaining) in payload.entries {
                if !remaining.is_finite() || remaining <= 0.0 {
                    continue;
                }
                let remaining = Duration::from_secs_f64(remaining.min(payload.ttl_secs));
                core.insert_restored(key, value, now + remaining);
            }
        });
        Ok(cache)
    }
}

impl<K, V> VttlCache<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Serializes the cache, storing each live entry's remaining lifetime
    /// (`None` for never-expiring). Entries already due are skipped.
    pub fn save_to<W: Write>(&self, writer: W) -> Result<(), SnapshotError> {
        let now = Instant::now();
        let payload = self.read_core(|core| {
            let mut rows: Vec<(u64, K, V, Option<f64>)> = core
                .table()
                .iter()
                .filter_map(|(_, entry)| {
                    let remaining = match entry.meta.deadline {
                        Some(deadline) => {
                            let left = deadline.saturating_duration_since(now);
                            if left.is_zero() {
                                return None;
                            }
                            Some(left.as_secs_f64())
                        },
                        None => None,
                    };
                    Some((
                        entry.meta.seq,
                        entry.key.clone(),
                        entry.value.clone(),
                        remaining,
                    ))
                })
                .collect();
            rows.sort_unstable_by_key(|&(seq, ..)| seq);
            VttlSnapshot {
                maxsize: core.maxsize() as u64,
                entries: rows
                    .into_iter()
                    .map(|(_, key, value, remaining)| (key, value, remaining))
                    .collect(),
            }
        });
        write_frame(writer, tag::VTTL, &payload)
    }

    /// Restores a cache previously written by [`save_to`](Self::save_to).
    pub fn load_from<R: Read>(reader: R) -> Result<Self, SnapshotError> {
        let payload: VttlSnapshot<K, V> = read_frame(reader, tag::VTTL)?;
        let cache = VttlCache::with_capacity(payload.maxsize as usize, payload.entries.len());
        let now = Instant::now();
        cache.write_core(|core| {
            for (key, value, remaining) in payload.entries {
                let deadline = remaining
                    .filter(|&secs| secs.is_finite() && secs > 0.0)
                    .map(|secs| now + Duration::from_secs_f64(secs));
                core.insert_restored(key, value, deadline);
            }
        });
        Ok(cache)
    }
}
