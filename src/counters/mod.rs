//! Submission counters
//!
//! Two counters live in the key-value store: one per UTC calendar day
//! (`formSubmissions_<YYYY-MM-DD>`) and one lifetime total
//! (`formSubmissionsTotal`). Absent or unreadable values count as zero.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use crate::config::ResetScope;
use crate::storage::{self, Entries, KeyValueStore, MemoryStore};

pub const KEY_PREFIX: &str = "formSubmissions";
pub const TOTAL_KEY: &str = "formSubmissionsTotal";

pub fn day_key(day: NaiveDate) -> String {
    format!("{KEY_PREFIX}_{}", day.format("%Y-%m-%d"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub day: NaiveDate,
    pub today: u64,
    pub total: u64,
}

/// Counter capability injected into the submission controller.
pub trait CounterStore: Send + Sync {
    fn get(&self, day: NaiveDate) -> Result<CounterSnapshot>;

    /// Add one successful submission to `day` and to the total.
    fn increment(&self, day: NaiveDate) -> Result<CounterSnapshot>;

    fn reset(&self) -> Result<()>;
}

impl<T: CounterStore + ?Sized> CounterStore for Box<T> {
    fn get(&self, day: NaiveDate) -> Result<CounterSnapshot> {
        (**self).get(day)
    }

    fn increment(&self, day: NaiveDate) -> Result<CounterSnapshot> {
        (**self).increment(day)
    }

    fn reset(&self) -> Result<()> {
        (**self).reset()
    }
}

/// Counters backed by the on-disk store, or by memory when the data
/// directory cannot be used. Submissions keep working either way.
pub fn open_counters(reset_scope: ResetScope) -> Box<dyn CounterStore> {
    match storage::init_storage() {
        Ok(store) => Box::new(SubmissionCounters::new(store, reset_scope)),
        Err(err) => {
            tracing::warn!(error = %err, "local storage unavailable, counters will not persist");
            Box::new(SubmissionCounters::new(MemoryStore::new(), reset_scope))
        }
    }
}

pub struct SubmissionCounters<S> {
    store: S,
    reset_scope: ResetScope,
}

impl<S: KeyValueStore> SubmissionCounters<S> {
    pub fn new(store: S, reset_scope: ResetScope) -> Self {
        Self { store, reset_scope }
    }

    fn is_reset_target(&self, key: &str) -> bool {
        match self.reset_scope {
            ResetScope::All => key.starts_with(KEY_PREFIX),
            ResetScope::DaysOnly => key
                .strip_prefix(KEY_PREFIX)
                .is_some_and(|rest| rest.starts_with('_')),
        }
    }
}

fn parse_count(key: &str, raw: Option<&str>) -> u64 {
    let Some(raw) = raw else {
        return 0;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unreadable counter value");
            0
        }
    }
}

fn bump(entries: &mut Entries, key: &str) -> u64 {
    let next = parse_count(key, entries.get(key).map(String::as_str)).saturating_add(1);
    entries.insert(key.to_string(), next.to_string());
    next
}

impl<S: KeyValueStore> CounterStore for SubmissionCounters<S> {
    fn get(&self, day: NaiveDate) -> Result<CounterSnapshot> {
        let day_key = day_key(day);
        Ok(CounterSnapshot {
            day,
            today: parse_count(&day_key, self.store.get(&day_key)?.as_deref()),
            total: parse_count(TOTAL_KEY, self.store.get(TOTAL_KEY)?.as_deref()),
        })
    }

    fn increment(&self, day: NaiveDate) -> Result<CounterSnapshot> {
        let day_key = day_key(day);
        let mut snapshot = CounterSnapshot {
            day,
            today: 0,
            total: 0,
        };
        // Both keys move together or not at all.
        self.store.update(&mut |entries| {
            snapshot.today = bump(entries, &day_key);
            snapshot.total = bump(entries, TOTAL_KEY);
            Ok(())
        })?;
        Ok(snapshot)
    }

    fn reset(&self) -> Result<()> {
        let mut removed = 0usize;
        self.store.update(&mut |entries| {
            let before = entries.len();
            entries.retain(|key, _| !self.is_reset_target(key));
            removed = before - entries.len();
            Ok(())
        })?;
        tracing::info!(removed, scope = ?self.reset_scope, "submission counters reset");
        Ok(())
    }
}
