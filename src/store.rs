//! Persistence layer: the `Store` capability set and its Postgres
//! implementation.

pub mod postgres;

use crate::types::{Delegation, FetchedDelegation};
use anyhow::Result;
use async_trait::async_trait;

pub use postgres::PostgresStore;

/// Operations the ingestion core and the read API need from persistence.
///
/// `save_delegations` is atomic: a partial failure rolls the whole batch
/// back. `current_level` is the maximum persisted block, or 0 when the table
/// is empty.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_delegations(&self, delegations: &[FetchedDelegation]) -> Result<()>;

    async fn current_level(&self) -> Result<u64>;

    /// Removes every row with `block >= level`.
    async fn delete_from_level(&self, level: u64) -> Result<()>;

    /// Read side: delegations ordered by timestamp descending, optionally
    /// restricted to one calendar year.
    async fn get_delegations(&self, year: Option<i32>) -> Result<Vec<Delegation>>;
}
