//! Core records shared between the upstream client, the pipeline, and the
//! store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Address wrapper for the delegating account as TzKT reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub address: String,
}

/// A delegation operation as decoded from the TzKT REST response.
///
/// Immutable once received; `level` always matches the level the batch was
/// requested for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedDelegation {
    pub level: u64,
    pub timestamp: DateTime<Utc>,
    pub sender: Sender,
    pub amount: u64,
}

/// Read-model row served by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub timestamp: DateTime<Utc>,
    pub amount: u64,
    pub delegator: String,
    pub block: u64,
}

/// Message flowing from the upstream client to the processor.
///
/// When `reorg` is set, `data` is empty and `level` is the first invalidated
/// block; everything at or above it must be removed. Otherwise every entry in
/// `data` carries `entry.level == level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMessage {
    pub level: u64,
    pub reorg: bool,
    pub data: Vec<FetchedDelegation>,
}

impl PipelineMessage {
    /// Builds a delegation batch message for one level.
    pub fn delegations(level: u64, data: Vec<FetchedDelegation>) -> Self {
        Self {
            level,
            reorg: false,
            data,
        }
    }

    /// Builds a rollback marker for the first invalidated level.
    pub fn reorg(level: u64) -> Self {
        Self {
            level,
            reorg: true,
            data: Vec::new(),
        }
    }
}
