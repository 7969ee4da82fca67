//! The counter-store port.
//!
//! The allocator never touches persistence directly. It hands a pure
//! update function to [`CounterStore::transact`], and the backend is
//! responsible for running it as one atomic read-modify-write: either the
//! returned value is committed against exactly the record the function saw,
//! or the transaction aborts with [`StoreError::Conflict`].

use crate::error::{RegistryError, StoreError, TransactError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical address of the single counter record.
pub const COUNTER_RECORD_PATH: &str = "config/registratura_counter";

/// The persisted counter: last issued sequence for `year`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterRecord {
    pub year: i32,
    pub last_number: u32,
    /// Assigned by the store at commit time.
    pub updated_at: DateTime<Utc>,
}

/// The part of a [`CounterRecord`] a writer controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterValue {
    pub year: i32,
    pub last_number: u32,
}

impl CounterValue {
    pub(crate) fn stamped(self, at: DateTime<Utc>) -> CounterRecord {
        CounterRecord {
            year: self.year,
            last_number: self.last_number,
            updated_at: at,
        }
    }
}

/// Update function run inside a transaction.
///
/// Receives the current record (`None` if it was never written) and returns
/// the value to commit, or an error to abort without writing. It may be
/// called more than once if the store retries internally, so it must be pure.
pub type UpdateFn = dyn Fn(Option<&CounterRecord>) -> Result<CounterValue, RegistryError> + Send + Sync;

/// A transactional store holding the registration counter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Point read, outside any transaction.
    async fn get(&self) -> Result<Option<CounterRecord>, StoreError>;

    /// Atomic read-modify-write. Returns the committed record.
    async fn transact(&self, update: &UpdateFn) -> Result<CounterRecord, TransactError>;

    /// Unconditional overwrite. Reserved for administrative resets.
    async fn put(&self, value: CounterValue) -> Result<CounterRecord, StoreError>;
}
