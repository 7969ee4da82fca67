//! In-memory counter store with optimistic concurrency.
//!
//! Each transaction snapshots the record and its version, yields to the
//! scheduler, then commits only if the version is unchanged. Interleaved
//! allocations therefore really do collide and abort, which is what makes
//! this store useful for exercising the allocator under contention.

use super::store::{CounterRecord, CounterStore, CounterValue, UpdateFn};
use crate::error::{StoreError, TransactError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::trace;

#[derive(Debug, Default)]
struct Versioned {
    record: Option<CounterRecord>,
    version: u64,
}

/// Optimistic, versioned in-memory [`CounterStore`].
#[derive(Debug)]
pub struct InMemoryCounterStore {
    state: Mutex<Versioned>,
    /// Commit attempts per `transact` call before surfacing a conflict. Default: 64.
    max_internal_retries: u32,
    injected_conflicts: AtomicU32,
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Versioned::default()),
            max_internal_retries: 64,
            injected_conflicts: AtomicU32::new(0),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        }
    }

    /// Start from an existing record.
    pub fn with_record(year: i32, last_number: u32) -> Self {
        Self {
            state: Mutex::new(Versioned {
                record: Some(CounterValue { year, last_number }.stamped(Utc::now())),
                version: 1,
            }),
            ..Self::new()
        }
    }

    pub fn with_max_internal_retries(mut self, n: u32) -> Self {
        self.max_internal_retries = n.max(1);
        self
    }

    /// Make the next `n` transactions abort with a conflict before running
    /// their update function.
    pub fn fail_next_transactions(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of committed transactions and puts.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of optimistic commits that lost a race and were re-run.
    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Result<(Option<CounterRecord>, u64), StoreError> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok((state.record.clone(), state.version))
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable("counter state lock poisoned".into())
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self) -> Result<Option<CounterRecord>, StoreError> {
        Ok(self.snapshot()?.0)
    }

    async fn transact(&self, update: &UpdateFn) -> Result<CounterRecord, TransactError> {
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict("injected conflict".into()).into());
        }

        for attempt in 1..=self.max_internal_retries {
            let (current, version) = self.snapshot()?;
            let next = update(current.as_ref()).map_err(TransactError::Rejected)?;

            // Let other transactions run between read and commit.
            tokio::task::yield_now().await;

            let mut state = self.state.lock().map_err(poisoned)?;
            if state.version == version {
                let record = next.stamped(Utc::now());
                state.record = Some(record.clone());
                state.version += 1;
                self.commits.fetch_add(1, Ordering::SeqCst);
                return Ok(record);
            }
            drop(state);
            self.aborts.fetch_add(1, Ordering::SeqCst);
            trace!("counter transaction aborted on attempt {}", attempt);
        }

        Err(StoreError::Conflict(format!(
            "gave up after {} contended commits",
            self.max_internal_retries
        ))
        .into())
    }

    async fn put(&self, value: CounterValue) -> Result<CounterRecord, StoreError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let record = value.stamped(Utc::now());
        state.record = Some(record.clone());
        state.version += 1;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }
}
