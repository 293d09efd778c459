//! The Coded strategy: grants consume a pre-issued unique code from the
//! resource pool (oldest unused unit first).

use chrono::Utc;
use chorecredit_shared::domain::{Device, StrategyCode};
use diesel::prelude::*;
use tracing::{debug, warn};

use super::{
    AllocationStrategy, GrantRequest, PendingPayout, RewardOffer, StrategyDescriptor, ledger,
};
use crate::storage::StorageError;
use crate::storage::models::{LedgerEntry, NewLedgerEntry, ResourceUnit};
use crate::storage::schema::resource_units::dsl as ru;

/// Bounded retries when a concurrently claimed unit slips away between
/// candidate selection and the conditional update.
const CLAIM_ATTEMPTS: usize = 3;

pub struct CodedStrategy;

impl AllocationStrategy for CodedStrategy {
    fn descriptor(&self) -> StrategyDescriptor {
        StrategyDescriptor {
            code: StrategyCode::Coded,
            name: "Coded (TAN pool)",
            requires_pool: true,
        }
    }

    fn grant(
        &self,
        conn: &mut SqliteConnection,
        req: &GrantRequest<'_>,
    ) -> Result<LedgerEntry, StorageError> {
        let claimed;
        let code: Option<&str> = match req.explicit_code {
            Some(c) => Some(c),
            None => {
                claimed = claim_next_unit(conn, req.family_id, req.device, req.child_id)?;
                match &claimed {
                    Some(unit) => {
                        debug!(code = %unit.code, child_id = %req.child_id, "claimed pool unit");
                        Some(unit.code.as_str())
                    }
                    None => {
                        // Deliberate fallback, not an error: minutes are still
                        // tracked and the parent can hand over a code later.
                        warn!(
                            child_id = %req.child_id,
                            device = %req.device,
                            "resource pool exhausted; granting without code"
                        );
                        None
                    }
                }
            }
        };

        ledger::append(
            conn,
            NewLedgerEntry {
                child_id: req.child_id,
                family_id: req.family_id,
                submission_id: req.submission_id,
                minutes: req.minutes,
                target_device: req.device.as_str(),
                resource_code: code,
                strategy: StrategyCode::Coded.as_str(),
                expires_at: None,
                reason: req.reason,
                paid_out: false,
                created_at: Utc::now().naive_utc(),
            },
        )
    }

    fn list_available(
        &self,
        conn: &mut SqliteConnection,
        family_id: Option<i32>,
        device: Option<Device>,
    ) -> Result<Vec<RewardOffer>, StorageError> {
        let mut q = ru::resource_units
            .filter(ru::used.eq(false))
            .into_boxed();
        q = match family_id {
            Some(f) => q.filter(ru::family_id.eq(f).or(ru::family_id.is_null())),
            None => q.filter(ru::family_id.is_null()),
        };
        if let Some(d) = device {
            q = q.filter(ru::target_device.eq(d.as_str()));
        }
        let units = q
            .order((ru::created_at.asc(), ru::id.asc()))
            .load::<ResourceUnit>(conn)?;
        Ok(units
            .into_iter()
            .map(|u| RewardOffer {
                unit_id: u.id,
                code: u.code,
                minutes: u.minutes,
                device: u.target_device,
                created_at: u.created_at,
            })
            .collect())
    }

    fn list_pending_payouts(
        &self,
        conn: &mut SqliteConnection,
        family_id: Option<i32>,
        child_id: Option<&str>,
        device: Option<Device>,
    ) -> Result<Vec<PendingPayout>, StorageError> {
        ledger::aggregate_unpaid(conn, family_id, child_id, device, Some(StrategyCode::Coded))
    }
}

/// Claim the oldest unused unit for (family, device): strict FIFO by
/// creation time, falling back to the shared (family-less) pool. The claim
/// itself is a single conditional UPDATE guarded on `used = false`; losing a
/// race moves on to the next-oldest unit instead of failing the grant.
pub fn claim_next_unit(
    conn: &mut SqliteConnection,
    family_id: Option<i32>,
    device: Device,
    child_id: &str,
) -> Result<Option<ResourceUnit>, StorageError> {
    for _ in 0..CLAIM_ATTEMPTS {
        let mut q = ru::resource_units
            .filter(ru::used.eq(false))
            .filter(ru::target_device.eq(device.as_str()))
            .into_boxed();
        q = match family_id {
            Some(f) => q.filter(ru::family_id.eq(f).or(ru::family_id.is_null())),
            None => q.filter(ru::family_id.is_null()),
        };
        let candidate = q
            .order((ru::created_at.asc(), ru::id.asc()))
            .first::<ResourceUnit>(conn)
            .optional()?;
        let Some(unit) = candidate else {
            return Ok(None);
        };

        let now = Utc::now().naive_utc();
        let rows = diesel::update(
            ru::resource_units
                .filter(ru::id.eq(unit.id))
                .filter(ru::used.eq(false)),
        )
        .set((
            ru::used.eq(true),
            ru::used_at.eq(now),
            ru::used_by.eq(child_id),
        ))
        .execute(conn)?;
        if rows == 1 {
            return Ok(Some(ResourceUnit {
                used: true,
                used_at: Some(now),
                used_by: Some(child_id.to_string()),
                ..unit
            }));
        }
        // Lost the race; the next pass selects the next-oldest unit.
    }
    Ok(None)
}
