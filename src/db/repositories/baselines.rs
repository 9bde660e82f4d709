use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{parse_datetime, to_i64, to_u64},
        models::BaselineRecord,
    },
    models::{Baseline, EpochKey},
    service::BaselineStore,
};

fn row_to_baseline(row: &Row) -> Result<BaselineRecord> {
    let epoch_key: String = row.get("epoch_key")?;
    let value: i64 = row.get("value")?;
    let recorded_at: String = row.get("recorded_at")?;

    Ok(BaselineRecord {
        epoch_key: EpochKey::from_stored(epoch_key),
        baseline: Baseline::new(to_u64(value, "value")?),
        recorded_at: parse_datetime(&recorded_at, "recorded_at")?,
    })
}

impl Database {
    pub async fn load_baseline(&self, epoch: &EpochKey) -> Result<Option<BaselineRecord>> {
        let epoch_key = epoch.as_str().to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT epoch_key, value, recorded_at
                 FROM baselines
                 WHERE epoch_key = ?1",
            )?;

            let mut rows = stmt.query(params![epoch_key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_baseline(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn save_baseline(&self, epoch: &EpochKey, baseline: Baseline) -> Result<()> {
        let epoch_key = epoch.as_str().to_string();
        let recorded_at = Utc::now().to_rfc3339();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO baselines (epoch_key, value, recorded_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(epoch_key) DO UPDATE SET
                     value = excluded.value,
                     recorded_at = excluded.recorded_at",
                params![epoch_key, to_i64(baseline.value)?, recorded_at],
            )
            .with_context(|| "failed to save baseline")?;
            Ok(())
        })
        .await
    }

    pub async fn delete_baseline(&self, epoch: &EpochKey) -> Result<()> {
        let epoch_key = epoch.as_str().to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM baselines WHERE epoch_key = ?1",
                params![epoch_key],
            )
            .with_context(|| "failed to delete baseline")?;
            Ok(())
        })
        .await
    }

    /// Removes baselines of days before `epoch`. Returns how many were dropped.
    pub async fn prune_baselines_before(&self, epoch: &EpochKey) -> Result<usize> {
        let epoch_key = epoch.as_str().to_string();
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM baselines WHERE epoch_key < ?1",
                    params![epoch_key],
                )
                .with_context(|| "failed to prune baselines")?;
            Ok(removed)
        })
        .await
    }

    pub async fn list_baselines(&self) -> Result<Vec<BaselineRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT epoch_key, value, recorded_at
                 FROM baselines
                 ORDER BY epoch_key ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_baseline(row)?);
            }
            Ok(records)
        })
        .await
    }
}

impl BaselineStore for Database {
    async fn get_baseline(&self, epoch: &EpochKey) -> Result<Option<Baseline>> {
        Ok(self.load_baseline(epoch).await?.map(|record| record.baseline))
    }

    async fn put_baseline(&self, epoch: &EpochKey, baseline: Baseline) -> Result<()> {
        self.save_baseline(epoch, baseline).await
    }

    async fn clear_baseline(&self, epoch: &EpochKey) -> Result<()> {
        self.delete_baseline(epoch).await
    }
}
