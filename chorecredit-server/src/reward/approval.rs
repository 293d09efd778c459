//! Submission lifecycle: `pending -> {approved, retry}`.
//!
//! `approved` is terminal; `retry` hands the task back to the child and the
//! same row stays re-approvable. Approval resolves the bound allocation
//! strategy, writes the ledger entry and re-evaluates achievements, all on
//! the caller's transaction.

use std::str::FromStr;

use chrono::Utc;
use chrono_tz::Tz;
use chorecredit_shared::domain::{Device, SubmissionStatus};
use diesel::prelude::*;
use tracing::info;

use super::{GrantRequest, achievements, registry::StrategyRegistry};
use crate::storage::StorageError;
use crate::storage::models::{Achievement, LedgerEntry, NewSubmission, Submission, Task};
use crate::storage::schema::submissions::dsl as s;
use crate::storage::schema::tasks::dsl as t;

/// Result of a settled (or still pending) submission operation.
#[derive(Debug)]
pub struct ApprovalOutcome {
    pub submission: Submission,
    /// Present when a reward was granted (approval or auto-approval).
    pub ledger_entry: Option<LedgerEntry>,
    pub new_achievements: Vec<Achievement>,
}

pub struct SubmissionInput<'a> {
    pub task_id: &'a str,
    pub child_id: &'a str,
    pub family_id: Option<i32>,
    pub device: Device,
    pub comment: Option<&'a str>,
    pub photo_path: Option<&'a str>,
}

/// Record a new submission. Tasks flagged auto-approve settle synchronously
/// with no human step; everything else starts out `pending`.
pub fn create(
    conn: &mut SqliteConnection,
    registry: &StrategyRegistry,
    tz: Tz,
    input: &SubmissionInput<'_>,
) -> Result<ApprovalOutcome, StorageError> {
    let task = t::tasks
        .filter(t::id.eq(input.task_id))
        .first::<Task>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("task {}", input.task_id)))?;
    if !task.active {
        return Err(StorageError::InvalidState(format!(
            "task {} is not active",
            task.id
        )));
    }

    let now = Utc::now().naive_utc();
    let submission: Submission = diesel::insert_into(s::submissions)
        .values(&NewSubmission {
            task_id: input.task_id,
            child_id: input.child_id,
            family_id: input.family_id,
            status: SubmissionStatus::Pending.as_str(),
            selected_device: input.device.as_str(),
            comment: input.comment,
            photo_path: input.photo_path,
            created_at: now,
            updated_at: now,
        })
        .get_result(conn)?;

    if task.auto_approve {
        let reason = format!("auto-approved: {}", task.name);
        return settle(
            conn,
            registry,
            tz,
            submission,
            &task,
            task.reward_minutes,
            None,
            None,
            Some(&reason),
        );
    }

    Ok(ApprovalOutcome {
        submission,
        ledger_entry: None,
        new_achievements: Vec::new(),
    })
}

/// Approve a pending (or retried) submission. Minutes default to the task's
/// configured reward; the target device is the child's own selection on the
/// submission.
pub fn approve(
    conn: &mut SqliteConnection,
    registry: &StrategyRegistry,
    tz: Tz,
    submission_id: i32,
    minutes_override: Option<i32>,
    explicit_code: Option<&str>,
    comment: Option<&str>,
) -> Result<ApprovalOutcome, StorageError> {
    let submission = get(conn, submission_id)?;
    let status = parse_status(&submission)?;
    if status == SubmissionStatus::Approved {
        // Terminal state; re-approval must not double-credit.
        return Err(StorageError::InvalidState(format!(
            "submission {submission_id} already approved"
        )));
    }

    let task = t::tasks
        .filter(t::id.eq(&submission.task_id))
        .first::<Task>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("task {}", submission.task_id)))?;
    if !task.active {
        return Err(StorageError::InvalidState(format!(
            "task {} is not active",
            task.id
        )));
    }

    let minutes = minutes_override.unwrap_or(task.reward_minutes);
    let reason = format!("task: {}", task.name);
    settle(
        conn,
        registry,
        tz,
        submission,
        &task,
        minutes,
        explicit_code,
        comment,
        Some(&reason),
    )
}

/// Send a submission back to the child. No ledger effect; only the comment
/// and `updated_at` change, and the row stays approvable.
pub fn retry(
    conn: &mut SqliteConnection,
    submission_id: i32,
    comment: Option<&str>,
) -> Result<Submission, StorageError> {
    let submission = get(conn, submission_id)?;
    if parse_status(&submission)? == SubmissionStatus::Approved {
        return Err(StorageError::InvalidState(format!(
            "submission {submission_id} already approved"
        )));
    }
    Ok(diesel::update(s::submissions.filter(s::id.eq(submission_id)))
        .set((
            s::status.eq(SubmissionStatus::Retry.as_str()),
            s::comment.eq(comment.unwrap_or("please try again")),
            s::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result::<Submission>(conn)?)
}

#[allow(clippy::too_many_arguments)]
fn settle(
    conn: &mut SqliteConnection,
    registry: &StrategyRegistry,
    tz: Tz,
    submission: Submission,
    task: &Task,
    minutes: i32,
    explicit_code: Option<&str>,
    comment: Option<&str>,
    reason: Option<&str>,
) -> Result<ApprovalOutcome, StorageError> {
    if minutes <= 0 {
        return Err(StorageError::InvalidInput(
            "minutes must be positive".to_string(),
        ));
    }
    // Only the child knows which device they intend to redeem on.
    let device = Device::from_str(&submission.selected_device)
        .map_err(|e| StorageError::InvalidState(e.to_string()))?;

    let strategy = registry.resolve(conn, submission.family_id, device)?;
    let entry = strategy.grant(
        conn,
        &GrantRequest {
            family_id: submission.family_id,
            child_id: &submission.child_id,
            minutes,
            device,
            submission_id: Some(submission.id),
            explicit_code,
            reason,
        },
    )?;

    let submission: Submission = diesel::update(s::submissions.filter(s::id.eq(submission.id)))
        .set((
            s::status.eq(SubmissionStatus::Approved.as_str()),
            s::comment.eq(comment.or(submission.comment.as_deref())),
            s::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(conn)?;

    let new_achievements = achievements::evaluate_for_child(conn, &submission.child_id, tz)?;

    info!(
        submission_id = submission.id,
        child_id = %submission.child_id,
        task_id = %task.id,
        minutes = entry.minutes,
        device = %entry.target_device,
        code = entry.resource_code.as_deref().unwrap_or("-"),
        strategy = %entry.strategy,
        "submission approved"
    );

    Ok(ApprovalOutcome {
        submission,
        ledger_entry: Some(entry),
        new_achievements,
    })
}

pub fn get(conn: &mut SqliteConnection, submission_id: i32) -> Result<Submission, StorageError> {
    s::submissions
        .filter(s::id.eq(submission_id))
        .first::<Submission>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("submission {submission_id}")))
}

/// Pending submissions awaiting a parent decision, newest first.
pub fn list_pending(conn: &mut SqliteConnection) -> Result<Vec<Submission>, StorageError> {
    Ok(s::submissions
        .filter(s::status.eq(SubmissionStatus::Pending.as_str()))
        .order(s::created_at.desc())
        .load::<Submission>(conn)?)
}

/// Submission history, newest first, optionally for one child.
pub fn history(
    conn: &mut SqliteConnection,
    child_id: Option<&str>,
) -> Result<Vec<Submission>, StorageError> {
    let mut q = s::submissions.into_boxed();
    if let Some(c) = child_id {
        q = q.filter(s::child_id.eq(c.to_string()));
    }
    Ok(q.order(s::created_at.desc()).load::<Submission>(conn)?)
}

fn parse_status(submission: &Submission) -> Result<SubmissionStatus, StorageError> {
    SubmissionStatus::from_str(&submission.status)
        .map_err(|e| StorageError::InvalidState(e.to_string()))
}
