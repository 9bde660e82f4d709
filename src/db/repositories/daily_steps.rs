use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{parse_datetime, to_i64, to_u64},
        models::DailySteps,
    },
    models::EpochKey,
};

const WEEK_DAYS: i64 = 7;

fn row_to_daily_steps(row: &Row) -> Result<DailySteps> {
    let day: String = row.get("day")?;
    let steps: i64 = row.get("steps")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(DailySteps {
        day: EpochKey::from_stored(day),
        steps: to_u64(steps, "steps")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

/// Keeps the larger of the stored and the incoming total, so a count that
/// restarted after a reboot never lowers the day.
fn upsert_daily_max(conn: &mut Connection, day: &str, steps: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO daily_steps (day, steps, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(day) DO UPDATE SET
             steps = MAX(daily_steps.steps, excluded.steps),
             updated_at = excluded.updated_at",
        params![day, to_i64(steps)?, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("failed to record steps for {day}"))?;
    Ok(())
}

impl Database {
    pub async fn record_daily_steps(&self, day: &EpochKey, steps: u64) -> Result<()> {
        let day = day.as_str().to_string();
        self.execute(move |conn| upsert_daily_max(conn, &day, steps))
            .await
    }

    /// Fire-and-forget variant for synchronous subscribers.
    pub fn queue_daily_steps(&self, day: &EpochKey, steps: u64) -> Result<()> {
        let day = day.as_str().to_string();
        self.execute_detached("record daily steps", move |conn| {
            upsert_daily_max(conn, &day, steps)
        })
    }

    pub async fn get_daily_steps(&self, day: &EpochKey) -> Result<Option<DailySteps>> {
        let day = day.as_str().to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT day, steps, updated_at
                 FROM daily_steps
                 WHERE day = ?1",
            )?;

            let mut rows = stmt.query(params![day])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_daily_steps(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// The last seven recorded days, oldest first.
    pub async fn weekly_steps(&self) -> Result<Vec<DailySteps>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT day, steps, updated_at FROM (
                     SELECT day, steps, updated_at
                     FROM daily_steps
                     ORDER BY day DESC
                     LIMIT ?1
                 )
                 ORDER BY day ASC",
            )?;

            let mut rows = stmt.query(params![WEEK_DAYS])?;
            let mut days = Vec::new();
            while let Some(row) = rows.next()? {
                days.push(row_to_daily_steps(row)?);
            }
            Ok(days)
        })
        .await
    }

    /// Sum of all recorded days in a `YYYY-MM` month.
    pub async fn monthly_total(&self, month: &str) -> Result<u64> {
        let pattern = format!("{month}-%");
        self.execute(move |conn| {
            let total: i64 = conn
                .query_row(
                    "SELECT COALESCE(SUM(steps), 0) FROM daily_steps WHERE day LIKE ?1",
                    params![pattern],
                    |row| row.get(0),
                )
                .with_context(|| "failed to sum monthly steps")?;
            to_u64(total, "monthly total")
        })
        .await
    }
}
