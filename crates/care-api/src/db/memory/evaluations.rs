//! Evaluation transactions and listings.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};

use care_core::records::{
    ClientEvaluation, EvaluationDetail, EvaluationSummary, GoalProgressLog, UpcomingEvaluation,
};
use care_core::{ClientStatus, EvaluationStatus};
use care_state::{
    ensure_draft, ensure_submitted, next_evaluation_date, validate_progress_logs, ProgressEntry,
};

use super::tables::{count, Tables};
use crate::db::{DraftInput, EvaluationOutcome, EvaluationUpdate, NewEvaluation, StoreError};

impl Tables {
    /// `CreateEvaluationTx`.
    pub(crate) fn create_evaluation(
        &mut self,
        input: NewEvaluation,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, StoreError> {
        self.check_evaluation_refs(&input.client_id, &input.coordinator_id)?;
        validate_progress_logs(&input.progress, &self.goal_ids_of(&input.client_id))?;
        if input.draft && self.draft_of(&input.client_id).is_some() {
            return Err(StoreError::DraftAlreadyExists);
        }
        if self.evaluations.contains_key(&input.id) {
            return Err(StoreError::AlreadyExists("client_evaluations_pkey".into()));
        }

        let evaluation = ClientEvaluation {
            id: input.id,
            client_id: input.client_id,
            coordinator_id: input.coordinator_id,
            evaluation_date: input.evaluation_date,
            overall_notes: input.overall_notes,
            status: if input.draft {
                EvaluationStatus::Draft
            } else {
                EvaluationStatus::Submitted
            },
            created_at: now,
            updated_at: now,
        };
        self.replace_logs(&evaluation.id, &input.progress);
        self.evaluations
            .insert(evaluation.id.clone(), evaluation.clone());

        let next_evaluation_date = if input.draft {
            None
        } else {
            Some(self.reschedule(&evaluation, now)?)
        };
        Ok(EvaluationOutcome {
            detail: self.detail(&evaluation),
            next_evaluation_date,
        })
    }

    /// `SaveDraftTx`: update the client's draft in place, or start one.
    pub(crate) fn save_draft(
        &mut self,
        input: DraftInput,
        now: DateTime<Utc>,
    ) -> Result<ClientEvaluation, StoreError> {
        self.check_evaluation_refs(&input.client_id, &input.coordinator_id)?;
        if !input.progress.is_empty() {
            validate_progress_logs(&input.progress, &self.goal_ids_of(&input.client_id))?;
        }

        let evaluation = match self.draft_of(&input.client_id).cloned() {
            Some(existing) => ClientEvaluation {
                coordinator_id: input.coordinator_id,
                evaluation_date: input.evaluation_date,
                overall_notes: input.overall_notes,
                updated_at: now,
                ..existing
            },
            None => ClientEvaluation {
                id: input.id,
                client_id: input.client_id,
                coordinator_id: input.coordinator_id,
                evaluation_date: input.evaluation_date,
                overall_notes: input.overall_notes,
                status: EvaluationStatus::Draft,
                created_at: now,
                updated_at: now,
            },
        };
        self.replace_logs(&evaluation.id, &input.progress);
        self.evaluations
            .insert(evaluation.id.clone(), evaluation.clone());
        Ok(evaluation)
    }

    /// `SubmitDraftTx`.
    pub(crate) fn submit_draft(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, StoreError> {
        let mut evaluation = self
            .evaluations
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound("draft evaluation"))?;
        ensure_draft(&evaluation)?;

        let progress: Vec<ProgressEntry> = self
            .logs_of(id)
            .into_iter()
            .map(|log| ProgressEntry {
                goal_id: log.goal_id,
                status: log.status,
                notes: log.progress_notes,
            })
            .collect();
        validate_progress_logs(&progress, &self.goal_ids_of(&evaluation.client_id))?;

        evaluation.status = EvaluationStatus::Submitted;
        evaluation.updated_at = now;
        self.evaluations.insert(evaluation.id.clone(), evaluation.clone());
        let next = self.reschedule(&evaluation, now)?;
        Ok(EvaluationOutcome {
            detail: self.detail(&evaluation),
            next_evaluation_date: Some(next),
        })
    }

    /// `DeleteDraftTx`.
    pub(crate) fn delete_draft(&mut self, id: &str) -> Result<(), StoreError> {
        let evaluation = self
            .evaluations
            .get(id)
            .ok_or(StoreError::NotFound("evaluation"))?;
        ensure_draft(evaluation)?;
        self.evaluations.remove(id);
        self.progress_logs.retain(|_, l| l.evaluation_id != id);
        Ok(())
    }

    /// `UpdateEvaluationTx`: upsert logs by goal, keep the schedule.
    pub(crate) fn update_evaluation(
        &mut self,
        id: &str,
        update: EvaluationUpdate,
        now: DateTime<Utc>,
    ) -> Result<EvaluationDetail, StoreError> {
        let mut evaluation = self
            .evaluations
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound("evaluation"))?;
        ensure_submitted(&evaluation)?;
        validate_progress_logs(&update.progress, &self.goal_ids_of(&evaluation.client_id))?;

        for entry in &update.progress {
            self.upsert_log(id, entry);
        }
        evaluation.evaluation_date = update.evaluation_date;
        evaluation.overall_notes = update.overall_notes;
        evaluation.updated_at = now;
        self.evaluations.insert(evaluation.id.clone(), evaluation.clone());
        Ok(self.detail(&evaluation))
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub(crate) fn detail(&self, evaluation: &ClientEvaluation) -> EvaluationDetail {
        EvaluationDetail {
            evaluation: evaluation.clone(),
            progress_logs: self.logs_of(&evaluation.id),
        }
    }

    pub(crate) fn upcoming_evaluations(
        &self,
        from: Option<NaiveDate>,
        to: NaiveDate,
        today: NaiveDate,
    ) -> Vec<UpcomingEvaluation> {
        let mut rows: Vec<UpcomingEvaluation> = self
            .clients
            .values()
            .filter(|c| c.status == ClientStatus::InCare)
            .filter_map(|c| {
                let next = c.next_evaluation_date?;
                if next > to || from.is_some_and(|f| next < f) {
                    return None;
                }
                Some(UpcomingEvaluation {
                    client_id: c.id.clone(),
                    first_name: c.first_name.clone(),
                    last_name: c.last_name.clone(),
                    coordinator_id: c.coordinator_id.clone(),
                    assigned_location_id: c.assigned_location_id.clone(),
                    next_evaluation_date: next,
                    days_until: (next - today).num_days(),
                    has_draft: self.draft_of(&c.id).is_some(),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            a.next_evaluation_date
                .cmp(&b.next_evaluation_date)
                .then_with(|| a.client_id.cmp(&b.client_id))
        });
        rows
    }

    pub(crate) fn recent_evaluations(&self, limit: i64) -> Vec<EvaluationSummary> {
        let mut submitted: Vec<&ClientEvaluation> = self
            .evaluations
            .values()
            .filter(|e| e.status == EvaluationStatus::Submitted)
            .collect();
        submitted.sort_by(|a, b| {
            (b.evaluation_date, b.created_at, &b.id).cmp(&(a.evaluation_date, a.created_at, &a.id))
        });
        submitted
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .filter_map(|e| {
                let client = self.clients.get(&e.client_id)?;
                Some(EvaluationSummary {
                    evaluation: e.clone(),
                    client_first_name: client.first_name.clone(),
                    client_last_name: client.last_name.clone(),
                    progress_log_count: count(
                        self.progress_logs
                            .values()
                            .filter(|l| l.evaluation_id == e.id)
                            .count(),
                    ),
                    has_draft: self.draft_of(&e.client_id).is_some(),
                })
            })
            .collect()
    }

    pub(crate) fn last_submitted(&self, client_id: &str) -> Option<&ClientEvaluation> {
        self.evaluations
            .values()
            .filter(|e| e.client_id == client_id && e.status == EvaluationStatus::Submitted)
            .max_by(|a, b| {
                (a.evaluation_date, a.created_at, &a.id).cmp(&(b.evaluation_date, b.created_at, &b.id))
            })
    }

    pub(crate) fn draft_of(&self, client_id: &str) -> Option<&ClientEvaluation> {
        self.evaluations
            .values()
            .find(|e| e.client_id == client_id && e.status == EvaluationStatus::Draft)
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn check_evaluation_refs(&self, client_id: &str, coordinator_id: &str) -> Result<(), StoreError> {
        if !self.clients.contains_key(client_id) {
            return Err(StoreError::NotFound("client"));
        }
        if !self.employees.contains_key(coordinator_id) {
            return Err(StoreError::InvalidReference(
                "client_evaluations_coordinator_id_fkey".into(),
            ));
        }
        Ok(())
    }

    fn goal_ids_of(&self, client_id: &str) -> HashSet<String> {
        self.goals
            .values()
            .filter(|g| g.client_id.as_deref() == Some(client_id))
            .map(|g| g.id.clone())
            .collect()
    }

    fn logs_of(&self, evaluation_id: &str) -> Vec<GoalProgressLog> {
        let mut logs: Vec<GoalProgressLog> = self
            .progress_logs
            .values()
            .filter(|l| l.evaluation_id == evaluation_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| a.goal_id.cmp(&b.goal_id));
        logs
    }

    /// Replace the evaluation's logs, keeping the row id of goals that stay.
    fn replace_logs(&mut self, evaluation_id: &str, entries: &[ProgressEntry]) {
        let keep: HashSet<&str> = entries.iter().map(|e| e.goal_id.as_str()).collect();
        self.progress_logs
            .retain(|_, l| l.evaluation_id != evaluation_id || keep.contains(l.goal_id.as_str()));
        for entry in entries {
            self.upsert_log(evaluation_id, entry);
        }
    }

    fn upsert_log(&mut self, evaluation_id: &str, entry: &ProgressEntry) {
        let existing = self
            .progress_logs
            .values_mut()
            .find(|l| l.evaluation_id == evaluation_id && l.goal_id == entry.goal_id);
        match existing {
            Some(log) => {
                log.status = entry.status;
                log.progress_notes = entry.notes.clone();
            }
            None => {
                let log = GoalProgressLog {
                    id: care_core::new_id(),
                    evaluation_id: evaluation_id.to_string(),
                    goal_id: entry.goal_id.clone(),
                    status: entry.status,
                    progress_notes: entry.notes.clone(),
                };
                self.progress_logs.insert(log.id.clone(), log);
            }
        }
    }

    fn reschedule(
        &mut self,
        evaluation: &ClientEvaluation,
        now: DateTime<Utc>,
    ) -> Result<NaiveDate, StoreError> {
        let client = self
            .clients
            .get_mut(&evaluation.client_id)
            .ok_or(StoreError::NotFound("client"))?;
        let next = next_evaluation_date(evaluation.evaluation_date, client.evaluation_interval_weeks)?;
        client.next_evaluation_date = Some(next);
        client.updated_at = now;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use care_core::records::{Client, ClientGoal, Employee};
    use care_core::{CareType, Gender, GoalProgressStatus, WaitingListPriority};
    use care_state::EvaluationRuleError;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fixture(interval: Option<i32>) -> Tables {
        let mut t = Tables::seeded();
        t.employees.insert(
            "E1".into(),
            Employee {
                id: "E1".into(),
                user_id: "U1".into(),
                first_name: "Ada".into(),
                last_name: "Jansen".into(),
                bsn: "999".into(),
                date_of_birth: date(1980, 1, 1),
                phone: None,
                gender: Gender::Female,
                role_label: None,
                deleted_at: None,
                created_at: now(),
                updated_at: now(),
            },
        );
        t.clients.insert(
            "C1".into(),
            Client {
                id: "C1".into(),
                registration_form_id: "R1".into(),
                intake_form_id: "I1".into(),
                first_name: "John".into(),
                last_name: "Doe".into(),
                bsn: "123456789".into(),
                date_of_birth: date(1990, 1, 1),
                gender: Gender::Male,
                care_type: CareType::ProtectedLiving,
                status: ClientStatus::InCare,
                waiting_list_priority: WaitingListPriority::Normal,
                care_start_date: Some(date(2024, 2, 1)),
                care_end_date: None,
                ambulatory_weekly_hours: None,
                assigned_location_id: Some("L1".into()),
                coordinator_id: Some("E1".into()),
                family_situation: None,
                main_provider: None,
                limitations: None,
                focus_areas: None,
                notes: None,
                discharge_date: None,
                discharge_reason: None,
                discharge_status: None,
                closing_report: None,
                evaluation_report: None,
                discharge_attachment_ids: Vec::new(),
                next_evaluation_date: None,
                evaluation_interval_weeks: interval,
                created_at: now(),
                updated_at: now(),
            },
        );
        for goal in ["G1", "G2"] {
            t.goals.insert(
                goal.into(),
                ClientGoal {
                    id: goal.into(),
                    intake_form_id: "I1".into(),
                    client_id: Some("C1".into()),
                    title: format!("goal {goal}"),
                    description: None,
                    created_at: now(),
                    updated_at: now(),
                },
            );
        }
        t
    }

    fn entry(goal: &str, status: GoalProgressStatus) -> ProgressEntry {
        ProgressEntry {
            goal_id: goal.into(),
            status,
            notes: None,
        }
    }

    fn new_eval(id: &str, draft: bool) -> NewEvaluation {
        NewEvaluation {
            id: id.into(),
            client_id: "C1".into(),
            coordinator_id: "E1".into(),
            evaluation_date: date(2024, 3, 1),
            overall_notes: None,
            progress: vec![entry("G1", GoalProgressStatus::OnTrack)],
            draft,
        }
    }

    fn draft_input(progress: Vec<ProgressEntry>) -> DraftInput {
        DraftInput {
            id: "D1".into(),
            client_id: "C1".into(),
            coordinator_id: "E1".into(),
            evaluation_date: date(2024, 3, 1),
            overall_notes: Some("halfway".into()),
            progress,
        }
    }

    #[test]
    fn submitted_evaluation_reschedules_with_default_interval() {
        let mut t = fixture(None);
        let out = t.create_evaluation(new_eval("V1", false), now()).unwrap();
        assert_eq!(out.next_evaluation_date, Some(date(2024, 4, 5)));
        assert_eq!(t.clients["C1"].next_evaluation_date, Some(date(2024, 4, 5)));
        assert_eq!(out.detail.progress_logs.len(), 1);
    }

    #[test]
    fn draft_leaves_schedule_alone_and_is_unique() {
        let mut t = fixture(Some(2));
        let out = t.create_evaluation(new_eval("V1", true), now()).unwrap();
        assert_eq!(out.next_evaluation_date, None);
        assert_eq!(t.clients["C1"].next_evaluation_date, None);
        assert!(matches!(
            t.create_evaluation(new_eval("V2", true), now()),
            Err(StoreError::DraftAlreadyExists)
        ));
    }

    #[test]
    fn foreign_goal_is_rejected() {
        let mut t = fixture(None);
        let mut input = new_eval("V1", false);
        input.progress = vec![entry("G9", GoalProgressStatus::Starting)];
        assert!(matches!(
            t.create_evaluation(input, now()),
            Err(StoreError::Evaluation(EvaluationRuleError::UnknownGoal(_)))
        ));
    }

    #[test]
    fn saving_the_same_draft_twice_is_idempotent() {
        let mut t = fixture(None);
        let progress = vec![
            entry("G1", GoalProgressStatus::Starting),
            entry("G2", GoalProgressStatus::Delayed),
        ];
        let first = t.save_draft(draft_input(progress.clone()), now()).unwrap();
        let logs_before = t.detail(&first).progress_logs;
        let second = t.save_draft(draft_input(progress), now()).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(t.detail(&second).progress_logs, logs_before);
        assert_eq!(t.evaluations.len(), 1);
    }

    #[test]
    fn save_draft_replaces_logs_wholesale() {
        let mut t = fixture(None);
        t.save_draft(
            draft_input(vec![
                entry("G1", GoalProgressStatus::Starting),
                entry("G2", GoalProgressStatus::Starting),
            ]),
            now(),
        )
        .unwrap();
        let draft = t
            .save_draft(draft_input(vec![entry("G2", GoalProgressStatus::Achieved)]), now())
            .unwrap();
        let logs = t.detail(&draft).progress_logs;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, GoalProgressStatus::Achieved);
    }

    #[test]
    fn submit_then_delete_is_rejected() {
        let mut t = fixture(Some(4));
        let draft = t
            .save_draft(draft_input(vec![entry("G1", GoalProgressStatus::OnTrack)]), now())
            .unwrap();
        let out = t.submit_draft(&draft.id, now()).unwrap();
        assert_eq!(out.next_evaluation_date, Some(date(2024, 3, 29)));
        assert!(t.draft_of("C1").is_none());
        assert!(matches!(
            t.delete_draft(&draft.id),
            Err(StoreError::Evaluation(EvaluationRuleError::NotADraft(_)))
        ));
        assert!(matches!(
            t.submit_draft("missing", now()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn update_upserts_logs_without_rescheduling() {
        let mut t = fixture(None);
        t.create_evaluation(new_eval("V1", false), now()).unwrap();
        let scheduled = t.clients["C1"].next_evaluation_date;
        let update = EvaluationUpdate {
            evaluation_date: date(2024, 3, 2),
            overall_notes: Some("revised".into()),
            progress: vec![
                entry("G1", GoalProgressStatus::Achieved),
                entry("G2", GoalProgressStatus::Starting),
            ],
        };
        let once = t.update_evaluation("V1", update.clone(), now()).unwrap();
        let twice = t.update_evaluation("V1", update, now()).unwrap();
        assert_eq!(once.progress_logs, twice.progress_logs);
        assert_eq!(twice.progress_logs.len(), 2);
        assert_eq!(t.clients["C1"].next_evaluation_date, scheduled);
    }

    #[test]
    fn upcoming_lists_in_care_clients_with_draft_flag() {
        let mut t = fixture(None);
        t.create_evaluation(new_eval("V1", false), now()).unwrap();
        t.save_draft(draft_input(Vec::new()), now()).unwrap();
        let today = date(2024, 4, 1);
        let critical = t.upcoming_evaluations(None, date(2024, 4, 8), today);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].days_until, 4);
        assert!(critical[0].has_draft);
        assert!(t
            .upcoming_evaluations(Some(date(2024, 4, 9)), date(2024, 5, 1), today)
            .is_empty());
    }

    #[test]
    fn recent_lists_submitted_only() {
        let mut t = fixture(None);
        t.create_evaluation(new_eval("V1", false), now()).unwrap();
        t.create_evaluation(new_eval("V2", true), now()).unwrap();
        let recent = t.recent_evaluations(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].evaluation.id, "V1");
        assert_eq!(recent[0].progress_log_count, 1);
        assert!(recent[0].has_draft);
        assert_eq!(t.last_submitted("C1").map(|e| e.id.as_str()), Some("V1"));
    }
}
