//! The reward crediting core: allocation strategies, the resource pool,
//! ledger read/write paths, the approval workflow and the streak/achievement
//! evaluators.
//!
//! Everything here operates on a plain `SqliteConnection` so that a whole
//! approval composes into one transaction (see `Store::transaction`).

pub mod achievements;
pub mod approval;
pub mod coded;
pub mod ledger;
pub mod manual;
pub mod pool;
pub mod registry;
pub mod streak;

use chrono::NaiveDateTime;
use chorecredit_shared::domain::{Device, StrategyCode};
use diesel::prelude::*;

use crate::storage::StorageError;
use crate::storage::models::LedgerEntry;

/// Static metadata describing a strategy to client UIs.
#[derive(Debug, Clone)]
pub struct StrategyDescriptor {
    pub code: StrategyCode,
    pub name: &'static str,
    /// Whether grants draw from the pre-issued resource pool.
    pub requires_pool: bool,
}

/// One reward grant, as resolved by the approval workflow.
#[derive(Debug)]
pub struct GrantRequest<'a> {
    pub family_id: Option<i32>,
    pub child_id: &'a str,
    pub minutes: i32,
    pub device: Device,
    pub submission_id: Option<i32>,
    /// Caller-supplied code that bypasses pool selection.
    pub explicit_code: Option<&'a str>,
    pub reason: Option<&'a str>,
}

/// An unused pool unit surfaced as a redeemable offer.
#[derive(Debug, Clone)]
pub struct RewardOffer {
    pub unit_id: i32,
    pub code: String,
    pub minutes: i32,
    pub device: String,
    pub created_at: NaiveDateTime,
}

/// Unpaid ledger minutes aggregated per (child, device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPayout {
    pub child_id: String,
    pub target_device: String,
    pub total_minutes: i64,
    pub entry_count: i64,
}

/// Pluggable policy for how an approved reward is recorded and whether it
/// consumes a resource code. Exactly one strategy is bound per
/// (family, device) pair; see [`registry::StrategyRegistry`].
pub trait AllocationStrategy: Send + Sync {
    fn descriptor(&self) -> StrategyDescriptor;

    /// Create the ledger entry for an approved reward. Runs inside the
    /// caller's transaction; any error rolls the whole approval back.
    fn grant(
        &self,
        conn: &mut SqliteConnection,
        req: &GrantRequest<'_>,
    ) -> Result<LedgerEntry, StorageError>;

    /// Pre-issued inventory redeemable under this strategy, oldest first.
    fn list_available(
        &self,
        conn: &mut SqliteConnection,
        family_id: Option<i32>,
        device: Option<Device>,
    ) -> Result<Vec<RewardOffer>, StorageError>;

    /// Earned-but-unpaid minutes recorded under this strategy's tag.
    fn list_pending_payouts(
        &self,
        conn: &mut SqliteConnection,
        family_id: Option<i32>,
        child_id: Option<&str>,
        device: Option<Device>,
    ) -> Result<Vec<PendingPayout>, StorageError>;
}
