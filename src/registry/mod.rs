//! Registration-number allocation.
//!
//! [`Allocator`] hands out unique, gap-free, year-scoped numbers of the form
//! `PREFIX-YYYY-NNNNNN`. All mutation of the counter happens inside one
//! [`CounterStore::transact`] call per attempt, so two concurrent callers can
//! never both commit the same sequence value.
//!
//! ## Retry policy
//!
//! ```text
//! attempt 1 ──conflict──▶ sleep(base) ──▶ attempt 2 ──conflict──▶ sleep(2·base) ──▶ attempt 3
//!                                                                     │
//!                                               conflict ─────────────┴──▶ AllocationFailed
//! ```
//!
//! Only transient store errors are retried. Validation errors, overflow and
//! corrupt records surface on the first attempt.

pub mod file;
pub mod memory;
pub mod number;
pub mod store;

pub use file::JsonFileCounterStore;
pub use memory::InMemoryCounterStore;
pub use number::{ParseNumberError, RegistrationNumber};
pub use store::{CounterRecord, CounterStore, CounterValue, UpdateFn, COUNTER_RECORD_PATH};

use crate::error::{RegistryError, StoreError, TransactError, MAX_SEQUENCE};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_PREFIX: &str = "REG";
pub const DEFAULT_PADDING: u8 = 6;
pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;

/// Per-call overrides for [`Allocator::allocate`].
#[derive(Debug, Clone, Default)]
pub struct AllocateOptions {
    /// Digits of zero padding, 1–10. Default: 6.
    pub padding: Option<u8>,
    /// Non-empty prefix. Default: `"REG"`.
    pub prefix: Option<String>,
    /// Calendar year in [2000, 2100]. Default: current year in the allocator's time zone.
    pub year: Option<i32>,
}

impl AllocateOptions {
    pub fn year(year: i32) -> Self {
        Self {
            year: Some(year),
            ..Self::default()
        }
    }
}

/// Bounded exponential backoff for transient store failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first. Default: 3.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each retry. Default: 200 ms.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt `attempt` (1-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Sleep abstraction so tests can observe backoff without waiting.
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Delay`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Proof that the caller passed administrative authorisation.
///
/// Only the access-control layer should construct one; the allocator logs
/// the actor on every reset.
#[derive(Debug, Clone)]
pub struct AdminGrant {
    actor: String,
}

impl AdminGrant {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}

/// Allocates registration numbers against a [`CounterStore`].
#[derive(Clone)]
pub struct Allocator {
    store: Arc<dyn CounterStore>,
    retry: RetryPolicy,
    delay: Arc<dyn Delay>,
    time_zone: Tz,
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("store", &"<dyn CounterStore>")
            .field("retry", &self.retry)
            .field("time_zone", &self.time_zone)
            .finish()
    }
}

impl Allocator {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            delay: Arc::new(TokioDelay),
            time_zone: chrono_tz::Europe::Bucharest,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            ..retry
        };
        self
    }

    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_time_zone(mut self, tz: Tz) -> Self {
        self.time_zone = tz;
        self
    }

    /// Current calendar year in the allocator's time zone.
    pub fn current_year(&self) -> i32 {
        Utc::now().with_timezone(&self.time_zone).year()
    }

    /// Allocate the next registration number.
    ///
    /// # Errors
    /// * validation errors for bad `padding`/`prefix`/`year`, never retried
    /// * [`RegistryError::Overflow`] when 999 999 numbers were already issued for the year
    /// * [`RegistryError::CorruptCounter`] when the stored record is invalid
    /// * [`RegistryError::AllocationFailed`] when every attempt hit a transient store error
    pub async fn allocate(
        &self,
        options: &AllocateOptions,
    ) -> Result<RegistrationNumber, RegistryError> {
        let (prefix, padding, year) = self.resolve(options)?;
        let update = move |current: Option<&CounterRecord>| next_value(current, year);

        let mut last_error = None;
        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let backoff = self.retry.backoff(attempt - 1);
                warn!(
                    "Allocation retry {}/{} after {}ms",
                    attempt,
                    self.retry.max_attempts,
                    backoff.as_millis()
                );
                self.delay.sleep(backoff).await;
            }

            match self.store.transact(&update).await {
                Ok(record) => {
                    let number =
                        RegistrationNumber::new(prefix, record.year, record.last_number, padding);
                    info!("Allocated registration number {}", number);
                    return Ok(number);
                }
                Err(TransactError::Rejected(e)) => return Err(e),
                Err(TransactError::Store(e)) if e.is_transient() => {
                    warn!("Allocation attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                }
                Err(TransactError::Store(e)) => return Err(map_store_error(e)),
            }
        }

        Err(RegistryError::AllocationFailed {
            attempts: self.retry.max_attempts,
            source: last_error
                .unwrap_or_else(|| StoreError::Unavailable("no attempt was made".into())),
        })
    }

    /// Read the counter without mutating it.
    pub async fn peek_current_counter(&self) -> Result<Option<CounterRecord>, RegistryError> {
        self.store.get().await.map_err(map_store_error)
    }

    /// What [`Allocator::allocate`] would return right now.
    ///
    /// Advisory only: this is a plain read, not a reservation, and a
    /// concurrent allocation can take the number before the caller does.
    pub async fn preview_next(
        &self,
        options: &AllocateOptions,
    ) -> Result<RegistrationNumber, RegistryError> {
        let (prefix, padding, year) = self.resolve(options)?;
        let current = self.peek_current_counter().await?;
        let next = next_value(current.as_ref(), year)?;
        Ok(RegistrationNumber::new(prefix, year, next.last_number, padding))
    }

    /// Overwrite the counter so the next allocation in `year` yields `start + 1`.
    ///
    /// Dangerous: resetting below an already-issued number makes duplicates
    /// possible. Requires an [`AdminGrant`].
    pub async fn reset_counter(
        &self,
        grant: &AdminGrant,
        year: i32,
        start: u32,
    ) -> Result<CounterRecord, RegistryError> {
        validate_year(year)?;
        if start > MAX_SEQUENCE {
            return Err(RegistryError::InvalidResetStart(start));
        }
        let previous = self.peek_current_counter().await.ok().flatten();
        warn!(
            "Counter reset by '{}': {:?} -> {}/{}",
            grant.actor(),
            previous.map(|r| (r.year, r.last_number)),
            year,
            start
        );
        self.store
            .put(CounterValue {
                year,
                last_number: start,
            })
            .await
            .map_err(map_store_error)
    }

    fn resolve(&self, options: &AllocateOptions) -> Result<(String, u8, i32), RegistryError> {
        let padding = options.padding.unwrap_or(DEFAULT_PADDING);
        if !(1..=10).contains(&padding) {
            return Err(RegistryError::InvalidPadding(padding));
        }
        let prefix = options.prefix.as_deref().unwrap_or(DEFAULT_PREFIX);
        if prefix.trim().is_empty() {
            return Err(RegistryError::InvalidPrefix(prefix.to_string()));
        }
        let year = options.year.unwrap_or_else(|| self.current_year());
        validate_year(year)?;
        Ok((prefix.to_string(), padding, year))
    }
}

fn validate_year(year: i32) -> Result<(), RegistryError> {
    if (MIN_YEAR..=MAX_YEAR).contains(&year) {
        Ok(())
    } else {
        Err(RegistryError::InvalidYear(year))
    }
}

/// The transaction body: increment within a year, restart at 1 on rollover.
fn next_value(current: Option<&CounterRecord>, year: i32) -> Result<CounterValue, RegistryError> {
    let last = match current {
        Some(rec) => {
            if !(MIN_YEAR..=MAX_YEAR).contains(&rec.year) {
                return Err(RegistryError::CorruptCounter {
                    detail: format!("stored year {} is out of range", rec.year),
                });
            }
            if rec.last_number > MAX_SEQUENCE {
                return Err(RegistryError::CorruptCounter {
                    detail: format!("stored lastNumber {} exceeds {}", rec.last_number, MAX_SEQUENCE),
                });
            }
            if rec.year == year {
                rec.last_number
            } else {
                0
            }
        }
        None => 0,
    };

    let next = last + 1;
    if next > MAX_SEQUENCE {
        return Err(RegistryError::Overflow {
            year,
            max: MAX_SEQUENCE,
        });
    }
    Ok(CounterValue {
        year,
        last_number: next,
    })
}

fn map_store_error(e: StoreError) -> RegistryError {
    match e {
        StoreError::Corrupt(detail) => RegistryError::CorruptCounter { detail },
        other => RegistryError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDelay {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Delay for RecordingDelay {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn allocator(store: Arc<InMemoryCounterStore>) -> (Allocator, Arc<RecordingDelay>) {
        let delay = Arc::new(RecordingDelay::default());
        let alloc = Allocator::new(store).with_delay(delay.clone());
        (alloc, delay)
    }

    #[tokio::test]
    async fn first_allocation_starts_at_one() {
        let (alloc, _) = allocator(Arc::new(InMemoryCounterStore::new()));
        let n = alloc.allocate(&AllocateOptions::year(2025)).await.unwrap();
        assert_eq!(n.to_string(), "REG-2025-000001");
    }

    #[tokio::test]
    async fn custom_prefix_and_padding() {
        let (alloc, _) = allocator(Arc::new(InMemoryCounterStore::with_record(2025, 41)));
        let opts = AllocateOptions {
            padding: Some(4),
            prefix: Some("PMB".into()),
            year: Some(2025),
        };
        assert_eq!(alloc.allocate(&opts).await.unwrap().to_string(), "PMB-2025-0042");
    }

    #[tokio::test]
    async fn validation_errors_fail_without_touching_store() {
        let store = Arc::new(InMemoryCounterStore::new());
        let (alloc, delay) = allocator(store.clone());
        let bad = [
            AllocateOptions {
                padding: Some(0),
                ..AllocateOptions::year(2025)
            },
            AllocateOptions {
                padding: Some(11),
                ..AllocateOptions::year(2025)
            },
            AllocateOptions {
                prefix: Some("  ".into()),
                ..AllocateOptions::year(2025)
            },
            AllocateOptions::year(1999),
            AllocateOptions::year(2101),
        ];
        for opts in &bad {
            let err = alloc.allocate(opts).await.unwrap_err();
            assert!(!err.is_retryable(), "{err}");
        }
        assert_eq!(store.commits(), 0);
        assert!(delay.slept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_conflicts_are_retried_with_backoff() {
        let store = Arc::new(InMemoryCounterStore::new());
        store.fail_next_transactions(2);
        let (alloc, delay) = allocator(store.clone());
        let alloc = alloc.with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        });

        let n = alloc.allocate(&AllocateOptions::year(2025)).await.unwrap();
        assert_eq!(n.sequence(), 1);
        assert_eq!(
            *delay.slept.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn exhausted_retries_wrap_last_cause() {
        let store = Arc::new(InMemoryCounterStore::new());
        store.fail_next_transactions(10);
        let (alloc, delay) = allocator(store.clone());

        let err = alloc.allocate(&AllocateOptions::year(2025)).await.unwrap_err();
        match err {
            RegistryError::AllocationFailed { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, StoreError::Conflict(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(delay.slept.lock().unwrap().len(), 2);
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_record_is_not_overwritten() {
        let store = Arc::new(InMemoryCounterStore::with_record(1970, 3));
        let (alloc, _) = allocator(store.clone());
        let err = alloc.allocate(&AllocateOptions::year(2025)).await.unwrap_err();
        assert!(matches!(err, RegistryError::CorruptCounter { .. }));
        assert_eq!(store.get().await.unwrap().unwrap().year, 1970);
    }

    #[tokio::test]
    async fn preview_does_not_mutate() {
        let store = Arc::new(InMemoryCounterStore::with_record(2025, 9));
        let (alloc, _) = allocator(store.clone());
        let preview = alloc.preview_next(&AllocateOptions::year(2025)).await.unwrap();
        assert_eq!(preview.to_string(), "REG-2025-000010");
        assert_eq!(store.get().await.unwrap().unwrap().last_number, 9);
        let real = alloc.allocate(&AllocateOptions::year(2025)).await.unwrap();
        assert_eq!(real, preview);
    }

    #[tokio::test]
    async fn reset_overwrites_counter() {
        let store = Arc::new(InMemoryCounterStore::with_record(2025, 500));
        let (alloc, _) = allocator(store.clone());
        let grant = AdminGrant::new("admin@primarie.ro");
        alloc.reset_counter(&grant, 2026, 0).await.unwrap();
        let n = alloc.allocate(&AllocateOptions::year(2026)).await.unwrap();
        assert_eq!(n.sequence(), 1);

        assert!(matches!(
            alloc.reset_counter(&grant, 2026, 1_000_000).await,
            Err(RegistryError::InvalidResetStart(_))
        ));
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(50));
        assert_eq!(p.backoff(2), Duration::from_millis(100));
        assert_eq!(p.backoff(3), Duration::from_millis(200));
    }
}
