use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::hll::HyperLogLog;
use crate::clock::{Clock, SystemClock};
use crate::store::CounterStore;

/// Minimum clock time between two full expiry sweeps.
const SWEEP_EVERY: chrono::Duration = chrono::Duration::seconds(60);

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

enum Value {
    Str(String),
    Hash(HashMap<String, i64>),
    Pf(Box<HyperLogLog>),
    Set(BTreeSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn deadline(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(ttl.as_millis() as i64)
}

fn parse_counter(raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| anyhow!("value is not an integer or out of range"))
}

/// In-process [`CounterStore`] with Redis semantics.
///
/// An expired key is dropped the next time anything touches it, and every
/// operation sweeps the whole map once a minute of clock time has
/// passed since the last sweep, so keys nobody reads again do not pile up.
/// Time is judged against the injected [`Clock`]. Every operation runs under
/// one lock, which gives `set_nx` the same single-winner guarantee as Redis.
pub struct MemoryCounterStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
    next_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            next_sweep: Mutex::new(None),
        }
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now)
    }

    /// Number of live and not yet evicted keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(&self, entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) -> usize {
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        *self.next_sweep.lock() = Some(now + SWEEP_EVERY);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "evicted expired keys");
        }
        evicted
    }

    /// Remaining lifetime of `key`; `None` for missing or persistent keys.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        purge(&mut entries, key, now);
        let at = entries.get(key)?.expires_at?;
        (at - now).to_std().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        purge(&mut entries, key, now);
        entries.contains_key(key)
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>, DateTime<Utc>) -> T) -> T {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let due = self.next_sweep.lock().map_or(true, |at| now >= at);
        if due {
            self.sweep(&mut entries, now);
        }
        f(&mut entries, now)
    }
}

fn purge(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
}

fn read_counter(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
    purge(entries, key, now);
    match entries.get(key) {
        None => Ok(None),
        Some(Entry {
            value: Value::Str(raw),
            ..
        }) => parse_counter(raw).map(Some),
        Some(_) => bail!(WRONG_TYPE),
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::Str("0".to_string())));
            let next = match &entry.value {
                Value::Str(raw) => parse_counter(raw)? + 1,
                _ => bail!(WRONG_TYPE),
            };
            entry.value = Value::Str(next.to_string());
            if let Some(ttl) = ttl {
                entry.expires_at = Some(deadline(now, ttl));
            }
            Ok(next)
        })
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        self.with_entries(|entries, now| read_counter(entries, key, now))
    }

    async fn get_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>> {
        self.with_entries(|entries, now| {
            keys.iter()
                .map(|key| read_counter(entries, key, now))
                .collect()
        })
    }

    async fn hincr(&self, key: &str, field: &str) -> Result<i64> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
            let Value::Hash(fields) = &mut entry.value else {
                bail!(WRONG_TYPE);
            };
            let count = fields.entry(field.to_string()).or_insert(0);
            *count += 1;
            Ok(*count)
        })
    }

    async fn hget_counters(&self, key: &str, fields: &[String]) -> Result<Vec<Option<i64>>> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            match entries.get(key) {
                None => Ok(vec![None; fields.len()]),
                Some(Entry {
                    value: Value::Hash(map),
                    ..
                }) => Ok(fields.iter().map(|f| map.get(f).copied()).collect()),
                Some(_) => bail!(WRONG_TYPE),
            }
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.with_entries(|entries, now| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: ttl.map(|ttl| deadline(now, ttl)),
                },
            );
            Ok(())
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            match entries.get(key) {
                None => Ok(None),
                Some(Entry {
                    value: Value::Str(raw),
                    ..
                }) => Ok(Some(raw.clone())),
                Some(_) => bail!(WRONG_TYPE),
            }
        })
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(deadline(now, ttl)),
                },
            );
            Ok(true)
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.contains(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(deadline(now, ttl));
            }
            Ok(())
        })
    }

    async fn pf_add(&self, key: &str, element: &str) -> Result<bool> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::Pf(Box::default())));
            let Value::Pf(hll) = &mut entry.value else {
                bail!(WRONG_TYPE);
            };
            Ok(hll.add(element.as_bytes()))
        })
    }

    async fn pf_count(&self, key: &str) -> Result<u64> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            match entries.get(key) {
                None => Ok(0),
                Some(Entry {
                    value: Value::Pf(hll),
                    ..
                }) => Ok(hll.count()),
                Some(_) => bail!(WRONG_TYPE),
            }
        })
    }

    async fn pf_merge(&self, dest: &str, sources: &[String]) -> Result<()> {
        self.with_entries(|entries, now| {
            let mut union = HyperLogLog::new();
            for key in sources.iter().map(String::as_str).chain(std::iter::once(dest)) {
                purge(entries, key, now);
                match entries.get(key) {
                    None => {}
                    Some(Entry {
                        value: Value::Pf(hll),
                        ..
                    }) => union.merge(hll),
                    Some(_) => bail!(WRONG_TYPE),
                }
            }
            let entry = entries
                .entry(dest.to_string())
                .or_insert_with(|| Entry::new(Value::Pf(Box::default())));
            entry.value = Value::Pf(Box::new(union));
            Ok(())
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new())));
            let Value::Set(members) = &mut entry.value else {
                bail!(WRONG_TYPE);
            };
            members.insert(member.to_string());
            Ok(())
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            match entries.get(key) {
                None => Ok(Vec::new()),
                Some(Entry {
                    value: Value::Set(members),
                    ..
                }) => Ok(members.iter().cloned().collect()),
                Some(_) => bail!(WRONG_TYPE),
            }
        })
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.with_entries(|entries, now| {
            purge(entries, key, now);
            let now_empty = match entries.get_mut(key) {
                None => return Ok(()),
                Some(Entry {
                    value: Value::Set(members),
                    ..
                }) => {
                    members.remove(member);
                    members.is_empty()
                }
                Some(_) => bail!(WRONG_TYPE),
            };
            if now_empty {
                entries.remove(key);
            }
            Ok(())
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
