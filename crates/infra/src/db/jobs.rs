use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use chargeflow_core::{Job, JobId};

use super::{Database, StoreError};

fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    Ok(Job {
        job_id: JobId::new(row.try_get::<i64, _>("job_id")?),
        is_done: row.try_get::<bool, _>("is_done")?,
    })
}

impl Database {
    /// Open a new pending job. Committed before this returns.
    pub async fn create_job(&self) -> Result<Job, StoreError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT
            INTO        job (is_done)
            VALUES      (FALSE)
            RETURNING   job_id, is_done
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;
        let job = job_from_row(&row)?;

        tx.commit().await?;
        Ok(job)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT  job_id, is_done
            FROM    job
            WHERE   job_id = ?1
            "#,
        )
        .bind(job_id.get())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }
}
