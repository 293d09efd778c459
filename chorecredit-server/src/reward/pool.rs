//! Resource pool maintenance: bulk import, listing, stats and deletion.
//! FIFO claiming lives in [`super::coded`].

use std::collections::BTreeMap;

use chrono::Utc;
use chorecredit_shared::domain::Device;
use diesel::prelude::*;

use crate::storage::StorageError;
use crate::storage::models::{NewResourceUnit, ResourceUnit};
use crate::storage::schema::resource_units::dsl as ru;

#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUnit {
    pub code: String,
    pub minutes: i32,
    pub device: Device,
}

#[derive(Debug, Default)]
pub struct PoolStats {
    pub total: i64,
    pub available: i64,
    pub used: i64,
    pub by_device: BTreeMap<String, i64>,
}

/// Parse a vendor export. One unit per line, `CODE;MINUTES;CREATED;DEVICE`;
/// the CREATED column is ignored (import time wins). Malformed lines become
/// per-line errors without aborting the batch.
pub fn parse_import(raw: &str) -> (Vec<ParsedUnit>, Vec<String>) {
    let mut units = Vec::new();
    let mut errors = Vec::new();

    for (i, line) in raw.trim().lines().enumerate() {
        let lineno = i + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Heuristic header detection on the first line.
        if lineno == 1 {
            let upper = line.to_uppercase();
            if upper.contains("TAN") || upper.contains("MINUTES") {
                continue;
            }
        }
        let parts: Vec<&str> = line.split(';').collect();
        if parts.len() < 4 {
            errors.push(format!(
                "line {lineno}: invalid format (expected CODE;MINUTES;CREATED;DEVICE)"
            ));
            continue;
        }
        let code = parts[0].trim();
        if code.is_empty() {
            errors.push(format!("line {lineno}: empty code"));
            continue;
        }
        let minutes = match parts[1].trim().parse::<i32>() {
            Ok(m) if m > 0 => m,
            _ => {
                errors.push(format!("line {lineno}: invalid minutes '{}'", parts[1].trim()));
                continue;
            }
        };
        let device = match Device::from_loose(parts[3]) {
            Ok(d) => d,
            Err(e) => {
                errors.push(format!("line {lineno}: {e}"));
                continue;
            }
        };
        units.push(ParsedUnit {
            code: code.to_string(),
            minutes,
            device,
        });
    }

    (units, errors)
}

/// Import parsed units into the pool, deduplicating by code: a code already
/// present is skipped, never overwritten.
pub fn import(
    conn: &mut SqliteConnection,
    family_id: Option<i32>,
    raw: &str,
) -> Result<ImportOutcome, StorageError> {
    let (units, errors) = parse_import(raw);
    let mut outcome = ImportOutcome {
        errors,
        ..Default::default()
    };

    for unit in &units {
        let row = NewResourceUnit {
            code: &unit.code,
            minutes: unit.minutes,
            target_device: unit.device.as_str(),
            family_id,
            created_at: Utc::now().naive_utc(),
        };
        let inserted = diesel::insert_into(ru::resource_units)
            .values(&row)
            .on_conflict(ru::code)
            .do_nothing()
            .execute(conn)?;
        if inserted == 1 {
            outcome.imported += 1;
        } else {
            outcome.skipped += 1;
        }
    }

    Ok(outcome)
}

pub fn list(
    conn: &mut SqliteConnection,
    family_id: Option<i32>,
    available_only: bool,
    device: Option<Device>,
) -> Result<Vec<ResourceUnit>, StorageError> {
    let mut q = ru::resource_units.into_boxed();
    if let Some(f) = family_id {
        q = q.filter(ru::family_id.eq(f).or(ru::family_id.is_null()));
    }
    if available_only {
        q = q.filter(ru::used.eq(false));
    }
    if let Some(d) = device {
        q = q.filter(ru::target_device.eq(d.as_str()));
    }
    Ok(q.order(ru::created_at.desc()).load::<ResourceUnit>(conn)?)
}

pub fn stats(conn: &mut SqliteConnection, family_id: Option<i32>) -> Result<PoolStats, StorageError> {
    let units = list(conn, family_id, false, None)?;
    let mut stats = PoolStats {
        total: units.len() as i64,
        ..Default::default()
    };
    for u in units {
        if u.used {
            stats.used += 1;
        } else {
            stats.available += 1;
            *stats.by_device.entry(u.target_device).or_insert(0) += 1;
        }
    }
    Ok(stats)
}

/// Delete an unused unit. Deleting a used unit is a conflict: the claim
/// triple (used, used_at, used_by) is part of the audit trail.
pub fn delete(conn: &mut SqliteConnection, unit_id: i32) -> Result<(), StorageError> {
    let unit = ru::resource_units
        .filter(ru::id.eq(unit_id))
        .first::<ResourceUnit>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("resource unit {unit_id}")))?;
    if unit.used {
        return Err(StorageError::Conflict(format!(
            "resource unit {} already used",
            unit.code
        )));
    }
    diesel::delete(ru::resource_units.filter(ru::id.eq(unit_id))).execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lines_and_normalizes_devices() {
        let raw = "TAN;Minutes;Created;Device\n\
                   AAAA-1;30;2026-01-01;Handy#\n\
                   BBBB-2;60;2026-01-02;Laptop\n\
                   CCCC-3;15;2026-01-03;iPad\n";
        let (units, errors) = parse_import(raw);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].code, "AAAA-1");
        assert_eq!(units[0].device, Device::Phone);
        assert_eq!(units[1].device, Device::Pc);
        assert_eq!(units[2].device, Device::Tablet);
        assert_eq!(units[2].minutes, 15);
    }

    #[test]
    fn collects_errors_without_aborting() {
        let raw = "AAAA-1;30;2026-01-01;phone\n\
                   broken line\n\
                   BBBB-2;xx;2026-01-02;pc\n\
                   CCCC-3;10;2026-01-03;fridge\n\
                   DDDD-4;45;2026-01-04;console\n";
        let (units, errors) = parse_import(raw);
        assert_eq!(units.len(), 2);
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("line 2"));
        assert!(errors[1].contains("invalid minutes"));
        assert!(errors[2].contains("unknown device"));
    }

    #[test]
    fn first_line_header_is_skipped_only_when_it_looks_like_one() {
        let (units, errors) = parse_import("AAAA-1;30;2026-01-01;pc\n");
        assert_eq!(units.len(), 1);
        assert!(errors.is_empty());

        let (units, errors) = parse_import("TAN;MINUTES;CREATED;DEVICE\n");
        assert!(units.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn rejects_non_positive_minutes() {
        let (units, errors) = parse_import("AAAA-1;0;2026-01-01;pc\n");
        assert!(units.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
