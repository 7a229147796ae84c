//! Aggregate counters for the overview dashboard.

use chrono::{Duration, NaiveDate};
use sqlx::PgPool;

use care_core::records::{DashboardOverview, LocationOccupancy};
use care_state::evaluation::CRITICAL_WINDOW_DAYS;

use super::directory;
use crate::db::StoreError;

#[derive(sqlx::FromRow)]
struct ClientCounts {
    waiting_list: i64,
    in_care: i64,
    discharged: i64,
    discharging: i64,
    waiting_high: i64,
    waiting_normal: i64,
    waiting_low: i64,
    critical: i64,
}

pub(super) async fn overview(
    pool: &PgPool,
    today: NaiveDate,
) -> Result<DashboardOverview, StoreError> {
    let critical_cutoff = today + Duration::days(CRITICAL_WINDOW_DAYS);
    let counts = sqlx::query_as::<_, ClientCounts>(
        "SELECT
             COUNT(*) FILTER (WHERE status = 'waiting_list') AS waiting_list,
             COUNT(*) FILTER (WHERE status = 'in_care') AS in_care,
             COUNT(*) FILTER (WHERE status = 'discharged') AS discharged,
             COUNT(*) FILTER (WHERE status = 'in_care' AND discharge_status = 'in_progress')
                 AS discharging,
             COUNT(*) FILTER (WHERE status = 'waiting_list' AND waiting_list_priority = 'high')
                 AS waiting_high,
             COUNT(*) FILTER (WHERE status = 'waiting_list' AND waiting_list_priority = 'normal')
                 AS waiting_normal,
             COUNT(*) FILTER (WHERE status = 'waiting_list' AND waiting_list_priority = 'low')
                 AS waiting_low,
             COUNT(*) FILTER (WHERE status = 'in_care' AND next_evaluation_date <= $1)
                 AS critical
         FROM clients",
    )
    .bind(critical_cutoff)
    .fetch_one(pool)
    .await?;

    let open_incidents: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM incidents WHERE deleted_at IS NULL AND status <> 'completed'",
    )
    .fetch_one(pool)
    .await?;

    let locations = directory::all_locations(pool)
        .await?
        .into_iter()
        .map(|l| LocationOccupancy {
            over_capacity: l.is_over_capacity(),
            location_id: l.id,
            name: l.name,
            capacity: l.capacity,
            occupied: l.occupied,
        })
        .collect();

    Ok(DashboardOverview {
        clients_waiting_list: counts.waiting_list,
        clients_in_care: counts.in_care,
        clients_discharged: counts.discharged,
        clients_discharging: counts.discharging,
        waiting_list_high: counts.waiting_high,
        waiting_list_normal: counts.waiting_normal,
        waiting_list_low: counts.waiting_low,
        critical_evaluations: counts.critical,
        open_incidents,
        locations,
    })
}
