use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::storage::schema::{
    achievement_unlocks, achievements, children, device_strategies, learning_sessions,
    ledger_entries, resource_units, submissions, tasks,
};

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = children)]
pub struct Child {
    pub id: String,
    pub display_name: String,
}

#[derive(Insertable)]
#[diesel(table_name = children)]
pub struct NewChild<'a> {
    pub id: &'a str,
    pub display_name: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = tasks)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub reward_minutes: i32,
    pub active: bool,
    pub auto_approve: bool,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub reward_minutes: i32,
    pub active: bool,
    pub auto_approve: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = submissions)]
#[diesel(belongs_to(Child, foreign_key = child_id))]
#[diesel(belongs_to(Task, foreign_key = task_id))]
pub struct Submission {
    pub id: i32,
    pub task_id: String,
    pub child_id: String,
    pub family_id: Option<i32>,
    pub status: String,
    pub selected_device: String,
    pub comment: Option<String>,
    pub photo_path: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = submissions)]
pub struct NewSubmission<'a> {
    pub task_id: &'a str,
    pub child_id: &'a str,
    pub family_id: Option<i32>,
    pub status: &'a str,
    pub selected_device: &'a str,
    pub comment: Option<&'a str>,
    pub photo_path: Option<&'a str>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Immutable once written, except for `paid_out` (false -> true, once).
#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = ledger_entries)]
#[diesel(belongs_to(Child, foreign_key = child_id))]
pub struct LedgerEntry {
    pub id: i32,
    pub child_id: String,
    pub family_id: Option<i32>,
    pub submission_id: Option<i32>,
    pub minutes: i32,
    pub target_device: String,
    pub resource_code: Option<String>,
    pub strategy: String,
    pub expires_at: Option<NaiveDateTime>,
    pub reason: Option<String>,
    pub paid_out: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = ledger_entries)]
pub struct NewLedgerEntry<'a> {
    pub child_id: &'a str,
    pub family_id: Option<i32>,
    pub submission_id: Option<i32>,
    pub minutes: i32,
    pub target_device: &'a str,
    pub resource_code: Option<&'a str>,
    pub strategy: &'a str,
    pub expires_at: Option<NaiveDateTime>,
    pub reason: Option<&'a str>,
    pub paid_out: bool,
    pub created_at: NaiveDateTime,
}

/// A pre-issued redemption code; claimable at most once.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = resource_units)]
pub struct ResourceUnit {
    pub id: i32,
    pub code: String,
    pub minutes: i32,
    pub target_device: String,
    pub family_id: Option<i32>,
    pub used: bool,
    pub used_at: Option<NaiveDateTime>,
    pub used_by: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = resource_units)]
pub struct NewResourceUnit<'a> {
    pub code: &'a str,
    pub minutes: i32,
    pub target_device: &'a str,
    pub family_id: Option<i32>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = device_strategies)]
pub struct DeviceStrategy {
    pub id: i32,
    pub family_id: i32,
    pub device: String,
    pub strategy: String,
    pub settings: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = device_strategies)]
pub struct NewDeviceStrategy<'a> {
    pub family_id: i32,
    pub device: &'a str,
    pub strategy: &'a str,
    pub settings: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = achievements)]
pub struct Achievement {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: String,
    pub threshold: Option<i32>,
    pub bonus_minutes: Option<i32>,
    pub active: bool,
    pub sort_order: i32,
}

#[derive(Insertable)]
#[diesel(table_name = achievements)]
pub struct NewAchievement<'a> {
    pub code: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub icon: &'a str,
    pub category: &'a str,
    pub threshold: Option<i32>,
    pub bonus_minutes: Option<i32>,
    pub active: bool,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = achievement_unlocks)]
#[diesel(belongs_to(Achievement, foreign_key = achievement_id))]
pub struct AchievementUnlock {
    pub id: i32,
    pub child_id: String,
    pub achievement_id: i32,
    pub unlocked_at: NaiveDateTime,
    pub notified: bool,
}

#[derive(Insertable)]
#[diesel(table_name = achievement_unlocks)]
pub struct NewAchievementUnlock<'a> {
    pub child_id: &'a str,
    pub achievement_id: i32,
    pub unlocked_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = learning_sessions)]
pub struct LearningSession {
    pub id: i32,
    pub child_id: String,
    pub completed: bool,
    pub correct_answers: i32,
    pub total_questions: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = learning_sessions)]
pub struct NewLearningSession<'a> {
    pub child_id: &'a str,
    pub completed: bool,
    pub correct_answers: i32,
    pub total_questions: i32,
    pub created_at: NaiveDateTime,
}
