//! Tracked and Untracked strategies: codeless grants. The two differ only
//! in descriptive metadata; they give family administrators a
//! device-provider label, not distinct allocation logic.

use chrono::Utc;
use chorecredit_shared::domain::{Device, StrategyCode};
use diesel::prelude::*;

use super::{
    AllocationStrategy, GrantRequest, PendingPayout, RewardOffer, StrategyDescriptor, ledger,
};
use crate::storage::StorageError;
use crate::storage::models::{LedgerEntry, NewLedgerEntry};

pub struct ManualStrategy {
    code: StrategyCode,
    name: &'static str,
}

/// Minutes tracked here, unlocked by the parent in the device vendor's own
/// parental-control app.
pub fn tracked() -> ManualStrategy {
    ManualStrategy {
        code: StrategyCode::Tracked,
        name: "Tracked (vendor app)",
    }
}

/// Default fallback for unconfigured (family, device) pairs.
pub fn untracked() -> ManualStrategy {
    ManualStrategy {
        code: StrategyCode::Untracked,
        name: "Untracked",
    }
}

impl AllocationStrategy for ManualStrategy {
    fn descriptor(&self) -> StrategyDescriptor {
        StrategyDescriptor {
            code: self.code,
            name: self.name,
            requires_pool: false,
        }
    }

    fn grant(
        &self,
        conn: &mut SqliteConnection,
        req: &GrantRequest<'_>,
    ) -> Result<LedgerEntry, StorageError> {
        ledger::append(
            conn,
            NewLedgerEntry {
                child_id: req.child_id,
                family_id: req.family_id,
                submission_id: req.submission_id,
                minutes: req.minutes,
                target_device: req.device.as_str(),
                resource_code: None,
                strategy: self.code.as_str(),
                expires_at: None,
                reason: req.reason,
                paid_out: false,
                created_at: Utc::now().naive_utc(),
            },
        )
    }

    fn list_available(
        &self,
        _conn: &mut SqliteConnection,
        _family_id: Option<i32>,
        _device: Option<Device>,
    ) -> Result<Vec<RewardOffer>, StorageError> {
        // No pre-issued inventory for codeless strategies.
        Ok(Vec::new())
    }

    fn list_pending_payouts(
        &self,
        conn: &mut SqliteConnection,
        family_id: Option<i32>,
        child_id: Option<&str>,
        device: Option<Device>,
    ) -> Result<Vec<PendingPayout>, StorageError> {
        ledger::aggregate_unpaid(conn, family_id, child_id, device, Some(self.code))
    }
}
