//! REST DTOs exchanged between the server and its clients.
//!
//! Timestamps travel as RFC3339 UTC strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Device, StrategyCode, SubmissionStatus};

// Submissions

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionCreateReq {
    pub task_id: String,
    pub child_id: String,
    pub family_id: Option<i32>,
    pub selected_device: Device,
    pub comment: Option<String>,
    pub photo_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionDto {
    pub id: i32,
    pub task_id: String,
    pub child_id: String,
    pub family_id: Option<i32>,
    pub status: SubmissionStatus,
    pub selected_device: Device,
    pub comment: Option<String>,
    pub photo_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Response for submission creation. For auto-approve tasks the reward is
/// settled inline and `ledger_entry`/`new_achievements` are populated.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmissionCreateResp {
    pub submission: SubmissionDto,
    pub ledger_entry: Option<LedgerEntryDto>,
    pub new_achievements: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApproveReq {
    /// Override of the task's configured reward minutes.
    pub minutes: Option<i32>,
    /// Explicit resource code to bind instead of drawing from the pool.
    pub resource_code: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveResp {
    pub submission: SubmissionDto,
    pub ledger_entry: LedgerEntryDto,
    pub new_achievements: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RetryReq {
    pub comment: Option<String>,
}

// Ledger

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryDto {
    pub id: i32,
    pub child_id: String,
    pub family_id: Option<i32>,
    pub submission_id: Option<i32>,
    pub minutes: i32,
    pub target_device: Device,
    pub resource_code: Option<String>,
    pub strategy: StrategyCode,
    pub expires_at: Option<String>,
    pub reason: Option<String>,
    pub paid_out: bool,
    pub created_at: String,
}

/// Unpaid balance aggregated by (child, device); also the shape of a
/// strategy's pending payouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceDto {
    pub child_id: String,
    pub target_device: Device,
    pub total_minutes: i64,
    pub entry_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PayoutCreateReq {
    pub child_id: String,
    pub family_id: Option<i32>,
    pub minutes: i32,
    pub target_device: Device,
    pub resource_code: Option<String>,
    pub reason: Option<String>,
}

// Resource pool

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolImportReq {
    pub family_id: Option<i32>,
    /// Semicolon-delimited lines: `CODE;MINUTES;CREATED;DEVICE`.
    pub raw_text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolImportResp {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUnitDto {
    pub id: i32,
    pub code: String,
    pub minutes: i32,
    pub target_device: Device,
    pub family_id: Option<i32>,
    pub used: bool,
    pub used_at: Option<String>,
    pub used_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolStatsDto {
    pub total: i64,
    pub available: i64,
    pub used: i64,
    /// Available units per device.
    pub by_device: BTreeMap<String, i64>,
}

// Strategies

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDescriptorDto {
    pub code: StrategyCode,
    pub name: String,
    pub requires_pool: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetStrategyReq {
    pub strategy: String,
    /// Strategy-specific settings; opaque to the core.
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardOfferDto {
    pub unit_id: i32,
    pub code: String,
    pub minutes: i32,
    pub target_device: Device,
    pub created_at: String,
}

// Streaks & achievements

#[derive(Debug, Serialize, Deserialize)]
pub struct StreakDto {
    pub child_id: String,
    pub streak_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementDto {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: String,
    pub threshold: Option<i32>,
    pub bonus_minutes: Option<i32>,
    pub unlocked: bool,
    pub unlocked_at: Option<String>,
}

// Learning sessions

#[derive(Debug, Serialize, Deserialize)]
pub struct LearningSessionReq {
    pub child_id: String,
    pub completed: bool,
    pub correct_answers: i32,
    pub total_questions: i32,
}
