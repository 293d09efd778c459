//! Achievement rules and idempotent unlock evaluation.
//!
//! The rule table is stateless: each rule is a pure predicate over a
//! child's historical data. Unlock rows are inserted at most once per
//! (child, achievement), enforced by a unique constraint; races between
//! concurrent evaluations resolve to silent no-ops.

use std::collections::HashSet;

use chrono::{Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use chorecredit_shared::domain::SubmissionStatus;
use diesel::prelude::*;
use tracing::info;

use super::streak;
use crate::storage::StorageError;
use crate::storage::models::{Achievement, AchievementUnlock, NewAchievement, NewAchievementUnlock};
use crate::storage::schema::achievement_unlocks::dsl as au;
use crate::storage::schema::achievements::dsl as a;
use crate::storage::schema::learning_sessions::dsl as ls;
use crate::storage::schema::submissions::dsl as s;

pub struct AchievementDef {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub category: &'static str,
    pub threshold: Option<i32>,
    pub bonus_minutes: Option<i32>,
}

/// Built-in achievement catalog, seeded to the database at startup.
pub const DEFINITIONS: &[AchievementDef] = &[
    AchievementDef {
        code: "streak_3",
        name: "3-Day Streak",
        description: "Completed tasks three days in a row",
        icon: "local_fire_department",
        category: "streak",
        threshold: Some(3),
        bonus_minutes: Some(5),
    },
    AchievementDef {
        code: "streak_7",
        name: "Week Champion",
        description: "Completed tasks seven days in a row",
        icon: "local_fire_department",
        category: "streak",
        threshold: Some(7),
        bonus_minutes: Some(15),
    },
    AchievementDef {
        code: "streak_14",
        name: "Fortnight Hero",
        description: "Completed tasks fourteen days in a row",
        icon: "local_fire_department",
        category: "streak",
        threshold: Some(14),
        bonus_minutes: Some(30),
    },
    AchievementDef {
        code: "streak_30",
        name: "Monthly Master",
        description: "Completed tasks thirty days in a row",
        icon: "emoji_events",
        category: "streak",
        threshold: Some(30),
        bonus_minutes: Some(60),
    },
    AchievementDef {
        code: "tasks_5",
        name: "Starter",
        description: "Five approved tasks",
        icon: "star",
        category: "tasks",
        threshold: Some(5),
        bonus_minutes: Some(5),
    },
    AchievementDef {
        code: "tasks_25",
        name: "Diligent",
        description: "Twenty-five approved tasks",
        icon: "star",
        category: "tasks",
        threshold: Some(25),
        bonus_minutes: Some(10),
    },
    AchievementDef {
        code: "tasks_50",
        name: "Task Pro",
        description: "Fifty approved tasks",
        icon: "star",
        category: "tasks",
        threshold: Some(50),
        bonus_minutes: Some(20),
    },
    AchievementDef {
        code: "tasks_100",
        name: "Task Master",
        description: "One hundred approved tasks",
        icon: "military_tech",
        category: "tasks",
        threshold: Some(100),
        bonus_minutes: Some(45),
    },
    AchievementDef {
        code: "tasks_250",
        name: "Superstar",
        description: "Two hundred fifty approved tasks",
        icon: "workspace_premium",
        category: "tasks",
        threshold: Some(250),
        bonus_minutes: Some(90),
    },
    AchievementDef {
        code: "learn_first",
        name: "Curious Mind",
        description: "First learning session completed",
        icon: "school",
        category: "learning",
        threshold: Some(1),
        bonus_minutes: Some(5),
    },
    AchievementDef {
        code: "learn_10",
        name: "Learning Enthusiast",
        description: "Ten learning sessions completed",
        icon: "school",
        category: "learning",
        threshold: Some(10),
        bonus_minutes: Some(15),
    },
    AchievementDef {
        code: "learn_perfect",
        name: "Perfectionist",
        description: "A learning session finished with a perfect score",
        icon: "psychology",
        category: "learning",
        threshold: None,
        bonus_minutes: Some(10),
    },
    AchievementDef {
        code: "early_bird",
        name: "Early Bird",
        description: "Task submitted before 8 in the morning",
        icon: "wb_sunny",
        category: "special",
        threshold: None,
        bonus_minutes: Some(5),
    },
    AchievementDef {
        code: "weekend_warrior",
        name: "Weekend Warrior",
        description: "Task completed on a weekend",
        icon: "celebration",
        category: "special",
        threshold: None,
        bonus_minutes: Some(5),
    },
    AchievementDef {
        code: "photo_pro",
        name: "Photo Pro",
        description: "Ten tasks submitted with a photo",
        icon: "photo_camera",
        category: "special",
        threshold: Some(10),
        bonus_minutes: Some(10),
    },
];

/// Seed missing catalog rows; existing codes are left untouched. Returns
/// the number of newly inserted achievements.
pub fn seed(conn: &mut SqliteConnection) -> Result<usize, StorageError> {
    let mut created = 0;
    for (i, def) in DEFINITIONS.iter().enumerate() {
        let row = NewAchievement {
            code: def.code,
            name: def.name,
            description: def.description,
            icon: def.icon,
            category: def.category,
            threshold: def.threshold,
            bonus_minutes: def.bonus_minutes,
            active: true,
            sort_order: i as i32,
        };
        created += diesel::insert_into(a::achievements)
            .values(&row)
            .on_conflict(a::code)
            .do_nothing()
            .execute(conn)?;
    }
    Ok(created)
}

/// Snapshot of the per-child history the rules are evaluated against.
#[derive(Debug, Default, Clone)]
pub struct ChildStats {
    pub streak_days: u32,
    pub approved_count: i64,
    pub learning_completed: i64,
    pub has_perfect_session: bool,
    pub has_early_submission: bool,
    pub has_weekend_submission: bool,
    pub photo_submissions: i64,
}

impl ChildStats {
    pub fn collect(
        conn: &mut SqliteConnection,
        child_id: &str,
        tz: Tz,
    ) -> Result<Self, StorageError> {
        let rows: Vec<(chrono::NaiveDateTime, Option<String>)> = s::submissions
            .filter(s::child_id.eq(child_id))
            .filter(s::status.eq(SubmissionStatus::Approved.as_str()))
            .select((s::created_at, s::photo_path))
            .load(conn)?;

        let mut stats = ChildStats {
            approved_count: rows.len() as i64,
            ..Default::default()
        };
        let mut days = HashSet::new();
        for (created_at, photo) in &rows {
            let local = Utc.from_utc_datetime(created_at).with_timezone(&tz);
            days.insert(local.date_naive());
            if local.hour() < 8 {
                stats.has_early_submission = true;
            }
            let wd = local.weekday();
            if wd == chrono::Weekday::Sat || wd == chrono::Weekday::Sun {
                stats.has_weekend_submission = true;
            }
            if photo.is_some() {
                stats.photo_submissions += 1;
            }
        }
        let today = Utc::now().with_timezone(&tz).date_naive();
        stats.streak_days = streak::streak_from_days(&days, today);

        stats.learning_completed = ls::learning_sessions
            .filter(ls::child_id.eq(child_id))
            .filter(ls::completed.eq(true))
            .count()
            .get_result(conn)?;
        stats.has_perfect_session = diesel::select(diesel::dsl::exists(
            ls::learning_sessions
                .filter(ls::child_id.eq(child_id))
                .filter(ls::completed.eq(true))
                .filter(ls::total_questions.gt(0))
                .filter(ls::correct_answers.eq(ls::total_questions)),
        ))
        .get_result(conn)?;

        Ok(stats)
    }
}

enum Rule {
    Streak(u32),
    ApprovedCount(i64),
    LearningCount(i64),
    PerfectLearning,
    EarlyBird,
    WeekendWarrior,
    PhotoCount(i64),
}

impl Rule {
    fn for_achievement(achievement: &Achievement) -> Option<Rule> {
        match achievement.category.as_str() {
            "streak" => Some(Rule::Streak(achievement.threshold? as u32)),
            "tasks" => Some(Rule::ApprovedCount(achievement.threshold? as i64)),
            "learning" => match achievement.code.as_str() {
                "learn_perfect" => Some(Rule::PerfectLearning),
                _ => Some(Rule::LearningCount(achievement.threshold? as i64)),
            },
            "special" => match achievement.code.as_str() {
                "early_bird" => Some(Rule::EarlyBird),
                "weekend_warrior" => Some(Rule::WeekendWarrior),
                "photo_pro" => Some(Rule::PhotoCount(achievement.threshold.unwrap_or(10) as i64)),
                _ => None,
            },
            _ => None,
        }
    }

    fn met(&self, stats: &ChildStats) -> bool {
        match self {
            Rule::Streak(n) => stats.streak_days >= *n,
            Rule::ApprovedCount(n) => stats.approved_count >= *n,
            Rule::LearningCount(n) => stats.learning_completed >= *n,
            Rule::PerfectLearning => stats.has_perfect_session,
            Rule::EarlyBird => stats.has_early_submission,
            Rule::WeekendWarrior => stats.has_weekend_submission,
            Rule::PhotoCount(n) => stats.photo_submissions >= *n,
        }
    }
}

/// Evaluate every active achievement the child has not unlocked yet and
/// insert unlock rows for newly met ones. Returns only the achievements
/// unlocked by this call; a concurrent evaluation winning the insert race
/// simply drops the row from this call's result.
pub fn evaluate_for_child(
    conn: &mut SqliteConnection,
    child_id: &str,
    tz: Tz,
) -> Result<Vec<Achievement>, StorageError> {
    let unlocked_ids: HashSet<i32> = au::achievement_unlocks
        .filter(au::child_id.eq(child_id))
        .select(au::achievement_id)
        .load::<i32>(conn)?
        .into_iter()
        .collect();
    let catalog = a::achievements
        .filter(a::active.eq(true))
        .order(a::sort_order.asc())
        .load::<Achievement>(conn)?;

    let stats = ChildStats::collect(conn, child_id, tz)?;
    let mut newly = Vec::new();
    for achievement in catalog {
        if unlocked_ids.contains(&achievement.id) {
            continue;
        }
        let Some(rule) = Rule::for_achievement(&achievement) else {
            continue;
        };
        if !rule.met(&stats) {
            continue;
        }
        let inserted = diesel::insert_into(au::achievement_unlocks)
            .values(&NewAchievementUnlock {
                child_id,
                achievement_id: achievement.id,
                unlocked_at: Utc::now().naive_utc(),
            })
            .on_conflict((au::child_id, au::achievement_id))
            .do_nothing()
            .execute(conn)?;
        if inserted == 1 {
            info!(child_id, code = %achievement.code, "achievement unlocked");
            newly.push(achievement);
        }
    }
    Ok(newly)
}

/// Full catalog with the child's unlock status, in display order.
pub fn list_with_status(
    conn: &mut SqliteConnection,
    child_id: &str,
) -> Result<Vec<(Achievement, Option<chrono::NaiveDateTime>)>, StorageError> {
    let catalog = a::achievements
        .filter(a::active.eq(true))
        .order(a::sort_order.asc())
        .load::<Achievement>(conn)?;
    let unlocks: Vec<AchievementUnlock> = au::achievement_unlocks
        .filter(au::child_id.eq(child_id))
        .load(conn)?;
    let by_id: std::collections::HashMap<i32, chrono::NaiveDateTime> = unlocks
        .into_iter()
        .map(|u| (u.achievement_id, u.unlocked_at))
        .collect();
    Ok(catalog
        .into_iter()
        .map(|ach| {
            let at = by_id.get(&ach.id).copied();
            (ach, at)
        })
        .collect())
}

/// Unlocks not yet surfaced to the child, flipping their one-shot
/// `notified` flag. Each unlock is returned exactly once across calls.
pub fn take_unnotified(
    conn: &mut SqliteConnection,
    child_id: &str,
) -> Result<Vec<Achievement>, StorageError> {
    let pending: Vec<AchievementUnlock> = au::achievement_unlocks
        .filter(au::child_id.eq(child_id))
        .filter(au::notified.eq(false))
        .load(conn)?;
    if pending.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<i32> = pending.iter().map(|u| u.id).collect();
    diesel::update(au::achievement_unlocks.filter(au::id.eq_any(&ids)))
        .set(au::notified.eq(true))
        .execute(conn)?;
    let ach_ids: Vec<i32> = pending.iter().map(|u| u.achievement_id).collect();
    Ok(a::achievements
        .filter(a::id.eq_any(&ach_ids))
        .order(a::sort_order.asc())
        .load::<Achievement>(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn achievement(code: &str, category: &str, threshold: Option<i32>) -> Achievement {
        Achievement {
            id: 1,
            code: code.to_string(),
            name: String::new(),
            description: String::new(),
            icon: String::new(),
            category: category.to_string(),
            threshold,
            bonus_minutes: None,
            active: true,
            sort_order: 0,
        }
    }

    #[test]
    fn streak_rule_uses_threshold() {
        let rule = Rule::for_achievement(&achievement("streak_7", "streak", Some(7))).unwrap();
        let mut stats = ChildStats::default();
        stats.streak_days = 6;
        assert!(!rule.met(&stats));
        stats.streak_days = 7;
        assert!(rule.met(&stats));
    }

    #[test]
    fn perfect_learning_is_code_specific() {
        let rule =
            Rule::for_achievement(&achievement("learn_perfect", "learning", None)).unwrap();
        let stats = ChildStats {
            has_perfect_session: true,
            ..Default::default()
        };
        assert!(rule.met(&stats));
    }

    #[test]
    fn unknown_special_codes_have_no_rule() {
        assert!(Rule::for_achievement(&achievement("mystery", "special", None)).is_none());
    }

    #[test]
    fn catalog_codes_are_unique_and_ruleable() {
        let mut seen = HashSet::new();
        for def in DEFINITIONS {
            assert!(seen.insert(def.code), "duplicate code {}", def.code);
            let ach = Achievement {
                id: 0,
                code: def.code.to_string(),
                name: def.name.to_string(),
                description: String::new(),
                icon: String::new(),
                category: def.category.to_string(),
                threshold: def.threshold,
                bonus_minutes: def.bonus_minutes,
                active: true,
                sort_order: 0,
            };
            assert!(
                Rule::for_achievement(&ach).is_some(),
                "no rule for {}",
                def.code
            );
        }
    }
}
