//! # Evaluation Rules
//!
//! A client has at most one draft evaluation; submitted evaluations are
//! history. Submitting (directly or from a draft) reschedules the client:
//!
//! ```text
//! next_evaluation_date = evaluation_date + interval_weeks × 7 days
//! ```
//!
//! with `interval_weeks` defaulting to [`DEFAULT_INTERVAL_WEEKS`] when the
//! client has none (or a non-positive one).

use std::collections::HashSet;

use chrono::{Days, NaiveDate};
use thiserror::Error;

use care_core::records::ClientEvaluation;
use care_core::{EvaluationStatus, GoalProgressStatus};

/// Interval used when the client has no evaluation interval set.
pub const DEFAULT_INTERVAL_WEEKS: i32 = 5;

/// Evaluations due within this many days (or overdue) are critical.
pub const CRITICAL_WINDOW_DAYS: i64 = 7;

/// Evaluations due within this many days (but not critical) are scheduled.
pub const SCHEDULED_WINDOW_DAYS: i64 = 30;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationRuleError {
    #[error("at least one progress log is required")]
    ProgressLogsRequired,

    #[error("goal {0} appears more than once")]
    DuplicateGoal(String),

    #[error("goal {0} does not belong to this client")]
    UnknownGoal(String),

    #[error("evaluation {0} is not a draft")]
    NotADraft(String),

    #[error("evaluation {0} is a draft; submit it before updating")]
    NotSubmitted(String),

    #[error("next evaluation date is out of range")]
    DateOutOfRange,
}

/// One `(goal, status, notes)` entry of an evaluation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub goal_id: String,
    pub status: GoalProgressStatus,
    pub notes: Option<String>,
}

/// Compute the next evaluation date after an evaluation on `date`.
pub fn next_evaluation_date(
    date: NaiveDate,
    interval_weeks: Option<i32>,
) -> Result<NaiveDate, EvaluationRuleError> {
    let weeks = match interval_weeks {
        Some(w) if w > 0 => w,
        _ => DEFAULT_INTERVAL_WEEKS,
    };
    let days = u64::try_from(weeks).map_err(|_| EvaluationRuleError::DateOutOfRange)? * 7;
    date.checked_add_days(Days::new(days))
        .ok_or(EvaluationRuleError::DateOutOfRange)
}

/// Require ≥ 1 entry, distinct goals, each belonging to the client.
pub fn validate_progress_logs(
    entries: &[ProgressEntry],
    client_goal_ids: &HashSet<String>,
) -> Result<(), EvaluationRuleError> {
    if entries.is_empty() {
        return Err(EvaluationRuleError::ProgressLogsRequired);
    }
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.goal_id.as_str()) {
            return Err(EvaluationRuleError::DuplicateGoal(entry.goal_id.clone()));
        }
        if !client_goal_ids.contains(&entry.goal_id) {
            return Err(EvaluationRuleError::UnknownGoal(entry.goal_id.clone()));
        }
    }
    Ok(())
}

pub fn ensure_draft(evaluation: &ClientEvaluation) -> Result<(), EvaluationRuleError> {
    match evaluation.status {
        EvaluationStatus::Draft => Ok(()),
        EvaluationStatus::Submitted => Err(EvaluationRuleError::NotADraft(evaluation.id.clone())),
    }
}

pub fn ensure_submitted(evaluation: &ClientEvaluation) -> Result<(), EvaluationRuleError> {
    match evaluation.status {
        EvaluationStatus::Submitted => Ok(()),
        EvaluationStatus::Draft => Err(EvaluationRuleError::NotSubmitted(evaluation.id.clone())),
    }
}

/// Which upcoming-evaluation listing a client falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueBucket {
    /// Due within 7 days, or overdue.
    Critical,
    /// Due in 8 to 30 days.
    Scheduled,
    Later,
}

pub fn classify_due(next: NaiveDate, today: NaiveDate) -> DueBucket {
    let days = (next - today).num_days();
    if days <= CRITICAL_WINDOW_DAYS {
        DueBucket::Critical
    } else if days <= SCHEDULED_WINDOW_DAYS {
        DueBucket::Scheduled
    } else {
        DueBucket::Later
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(goal: &str) -> ProgressEntry {
        ProgressEntry {
            goal_id: goal.into(),
            status: GoalProgressStatus::OnTrack,
            notes: None,
        }
    }

    fn goals(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn evaluation(status: EvaluationStatus) -> ClientEvaluation {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        ClientEvaluation {
            id: "EV1".into(),
            client_id: "C1".into(),
            coordinator_id: "E1".into(),
            evaluation_date: date(2024, 3, 1),
            overall_notes: None,
            status,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn four_week_interval() {
        assert_eq!(
            next_evaluation_date(date(2024, 3, 1), Some(4)).unwrap(),
            date(2024, 3, 29)
        );
    }

    #[test]
    fn unset_interval_defaults_to_five_weeks() {
        assert_eq!(
            next_evaluation_date(date(2024, 3, 1), None).unwrap(),
            date(2024, 4, 5)
        );
        assert_eq!(
            next_evaluation_date(date(2024, 3, 1), Some(0)).unwrap(),
            date(2024, 4, 5)
        );
    }

    #[test]
    fn progress_logs_must_be_present_distinct_and_owned() {
        let owned = goals(&["G1", "G2"]);
        assert_eq!(
            validate_progress_logs(&[], &owned),
            Err(EvaluationRuleError::ProgressLogsRequired)
        );
        assert_eq!(
            validate_progress_logs(&[entry("G1"), entry("G1")], &owned),
            Err(EvaluationRuleError::DuplicateGoal("G1".into()))
        );
        assert_eq!(
            validate_progress_logs(&[entry("G9")], &owned),
            Err(EvaluationRuleError::UnknownGoal("G9".into()))
        );
        assert!(validate_progress_logs(&[entry("G1"), entry("G2")], &owned).is_ok());
    }

    #[test]
    fn draft_and_submitted_guards() {
        assert!(ensure_draft(&evaluation(EvaluationStatus::Draft)).is_ok());
        assert_eq!(
            ensure_draft(&evaluation(EvaluationStatus::Submitted)),
            Err(EvaluationRuleError::NotADraft("EV1".into()))
        );
        assert!(ensure_submitted(&evaluation(EvaluationStatus::Submitted)).is_ok());
        assert!(ensure_submitted(&evaluation(EvaluationStatus::Draft)).is_err());
    }

    #[test]
    fn due_buckets() {
        let today = date(2024, 3, 1);
        assert_eq!(classify_due(date(2024, 2, 20), today), DueBucket::Critical);
        assert_eq!(classify_due(today, today), DueBucket::Critical);
        assert_eq!(classify_due(date(2024, 3, 8), today), DueBucket::Critical);
        assert_eq!(classify_due(date(2024, 3, 9), today), DueBucket::Scheduled);
        assert_eq!(classify_due(date(2024, 3, 31), today), DueBucket::Scheduled);
        assert_eq!(classify_due(date(2024, 4, 1), today), DueBucket::Later);
    }
}
