//! Ledger write and read paths. The ledger is append-only: rows never
//! change after insert except for the one-way `paid_out` flag.

use chrono::Utc;
use chorecredit_shared::domain::{Device, StrategyCode};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;

use super::PendingPayout;
use crate::storage::StorageError;
use crate::storage::models::{LedgerEntry, NewLedgerEntry};
use crate::storage::schema::ledger_entries::dsl as le;

/// Append a new entry. A resource-code collision with any existing row is a
/// hard [`StorageError::Conflict`]; the caller's transaction must roll back
/// so that a unit claimed in the same attempt is released.
pub fn append(
    conn: &mut SqliteConnection,
    entry: NewLedgerEntry<'_>,
) -> Result<LedgerEntry, StorageError> {
    if entry.minutes <= 0 {
        return Err(StorageError::InvalidInput(
            "minutes must be positive".to_string(),
        ));
    }
    diesel::insert_into(le::ledger_entries)
        .values(&entry)
        .get_result::<LedgerEntry>(conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                StorageError::Conflict(format!(
                    "resource code already granted: {}",
                    entry.resource_code.unwrap_or("<none>")
                ))
            }
            other => other.into(),
        })
}

/// Canonical balance: unpaid minutes aggregated per (child, device),
/// optionally scoped by family, child, device or strategy tag.
pub fn aggregate_unpaid(
    conn: &mut SqliteConnection,
    family_id: Option<i32>,
    child_id: Option<&str>,
    device: Option<Device>,
    strategy: Option<StrategyCode>,
) -> Result<Vec<PendingPayout>, StorageError> {
    use diesel::dsl::{count_star, sum};

    let mut q = le::ledger_entries
        .group_by((le::child_id, le::target_device))
        .select((
            le::child_id,
            le::target_device,
            sum(le::minutes),
            count_star(),
        ))
        .filter(le::paid_out.eq(false))
        .into_boxed();
    if let Some(f) = family_id {
        q = q.filter(le::family_id.eq(f));
    }
    if let Some(c) = child_id {
        q = q.filter(le::child_id.eq(c.to_string()));
    }
    if let Some(d) = device {
        q = q.filter(le::target_device.eq(d.as_str()));
    }
    if let Some(s) = strategy {
        q = q.filter(le::strategy.eq(s.as_str()));
    }
    let rows = q
        .order((le::child_id.asc(), le::target_device.asc()))
        .load::<(String, String, Option<i64>, i64)>(conn)?;
    Ok(rows
        .into_iter()
        .map(|(child, device, total, count)| PendingPayout {
            child_id: child,
            target_device: device,
            total_minutes: total.unwrap_or(0),
            entry_count: count,
        })
        .collect())
}

/// Full entry history for a child, newest first.
pub fn list_for_child(
    conn: &mut SqliteConnection,
    child_id: &str,
) -> Result<Vec<LedgerEntry>, StorageError> {
    Ok(le::ledger_entries
        .filter(le::child_id.eq(child_id))
        .order(le::created_at.desc())
        .load::<LedgerEntry>(conn)?)
}

/// Settle an entry. Idempotent: marking an already-paid entry again is a
/// no-op success.
pub fn mark_paid(conn: &mut SqliteConnection, entry_id: i32) -> Result<LedgerEntry, StorageError> {
    let entry = le::ledger_entries
        .filter(le::id.eq(entry_id))
        .first::<LedgerEntry>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("ledger entry {entry_id}")))?;
    if entry.paid_out {
        return Ok(entry);
    }
    Ok(diesel::update(le::ledger_entries.filter(le::id.eq(entry_id)))
        .set(le::paid_out.eq(true))
        .get_result::<LedgerEntry>(conn)?)
}

/// Manual payout: a parent hands over time directly, outside any
/// submission. The entry is created already settled.
pub fn manual_payout(
    conn: &mut SqliteConnection,
    family_id: Option<i32>,
    child_id: &str,
    minutes: i32,
    device: Device,
    resource_code: Option<&str>,
    reason: Option<&str>,
) -> Result<LedgerEntry, StorageError> {
    append(
        conn,
        NewLedgerEntry {
            child_id,
            family_id,
            submission_id: None,
            minutes,
            target_device: device.as_str(),
            resource_code,
            strategy: StrategyCode::Untracked.as_str(),
            expires_at: None,
            reason: reason.or(Some("manual payout")),
            paid_out: true,
            created_at: Utc::now().naive_utc(),
        },
    )
}
