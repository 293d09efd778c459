//! Resolves the active allocation strategy for a (family, device) pair.
//!
//! The registry is built once at startup and treated as immutable
//! configuration injected into request handlers.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chorecredit_shared::domain::{Device, StrategyCode};
use diesel::prelude::*;

use super::{AllocationStrategy, StrategyDescriptor, coded::CodedStrategy, manual};
use crate::storage::StorageError;
use crate::storage::models::{DeviceStrategy, NewDeviceStrategy};
use crate::storage::schema::device_strategies::dsl as ds;

pub struct StrategyRegistry {
    strategies: HashMap<StrategyCode, Arc<dyn AllocationStrategy>>,
}

impl StrategyRegistry {
    /// The three built-in strategies.
    pub fn builtin() -> Self {
        let mut strategies: HashMap<StrategyCode, Arc<dyn AllocationStrategy>> = HashMap::new();
        strategies.insert(StrategyCode::Coded, Arc::new(CodedStrategy));
        strategies.insert(StrategyCode::Tracked, Arc::new(manual::tracked()));
        strategies.insert(StrategyCode::Untracked, Arc::new(manual::untracked()));
        Self { strategies }
    }

    pub fn get(&self, code: StrategyCode) -> Arc<dyn AllocationStrategy> {
        // All enum variants are registered by `builtin`.
        self.strategies
            .get(&code)
            .cloned()
            .unwrap_or_else(|| Arc::new(manual::untracked()))
    }

    /// Strategy bound to (family, device), defaulting to Untracked when
    /// unconfigured.
    pub fn resolve(
        &self,
        conn: &mut SqliteConnection,
        family_id: Option<i32>,
        device: Device,
    ) -> Result<Arc<dyn AllocationStrategy>, StorageError> {
        let Some(family) = family_id else {
            return Ok(self.get(StrategyCode::Untracked));
        };
        let bound = ds::device_strategies
            .filter(ds::family_id.eq(family))
            .filter(ds::device.eq(device.as_str()))
            .first::<DeviceStrategy>(conn)
            .optional()?;
        let code = match bound {
            Some(row) => StrategyCode::from_str(&row.strategy).map_err(|e| {
                // A row with an unparseable code can only appear by editing
                // the DB out-of-band; surface it instead of misallocating.
                StorageError::InvalidState(e.to_string())
            })?,
            None => StrategyCode::Untracked,
        };
        Ok(self.get(code))
    }

    pub fn descriptors(&self) -> Vec<StrategyDescriptor> {
        let mut out: Vec<StrategyDescriptor> =
            self.strategies.values().map(|s| s.descriptor()).collect();
        out.sort_by_key(|d| d.code.as_str());
        out
    }
}

/// Bind a strategy to (family, device). Unknown codes are rejected here, at
/// configuration time, never at grant time; `settings` is opaque to the
/// core.
pub fn set_device_strategy(
    conn: &mut SqliteConnection,
    family_id: i32,
    device: Device,
    strategy_code: &str,
    settings: Option<&str>,
) -> Result<DeviceStrategy, StorageError> {
    let code = StrategyCode::from_str(strategy_code)
        .map_err(|e| StorageError::InvalidState(e.to_string()))?;
    let row = NewDeviceStrategy {
        family_id,
        device: device.as_str(),
        strategy: code.as_str(),
        settings,
    };
    diesel::insert_into(ds::device_strategies)
        .values(&row)
        .on_conflict((ds::family_id, ds::device))
        .do_update()
        .set((ds::strategy.eq(code.as_str()), ds::settings.eq(settings)))
        .execute(conn)?;
    Ok(ds::device_strategies
        .filter(ds::family_id.eq(family_id))
        .filter(ds::device.eq(device.as_str()))
        .first::<DeviceStrategy>(conn)?)
}
