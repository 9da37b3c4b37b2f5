use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, warn};

use chargeflow_core::{Charge, JobId, QueueMessage};

use super::{Database, StoreError};

fn charge_from_row(row: &SqliteRow) -> Result<Charge, StoreError> {
    Ok(Charge {
        claim_id: row.try_get("claim_id")?,
        patient_id: row.try_get("patient_id")?,
        charge_amount: row.try_get("charge_amount")?,
        cpt_code: row.try_get("cpt_code")?,
        risk_score: row.try_get("risk_score")?,
    })
}

async fn insert_charge(
    tx: &mut Transaction<'static, Sqlite>,
    charge: &Charge,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT
        INTO    charge (claim_id, patient_id, charge_amount, cpt_code, risk_score)
        VALUES  (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(&charge.claim_id)
    .bind(&charge.patient_id)
    .bind(charge.charge_amount)
    .bind(&charge.cpt_code)
    .bind(charge.risk_score)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn mark_done(tx: &mut Transaction<'static, Sqlite>, job_id: JobId) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE  job
        SET     is_done = TRUE
        WHERE   job_id = ?1
        "#,
    )
    .bind(job_id.get())
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::JobMissing(job_id));
    }
    Ok(())
}

impl Database {
    /// Look up a charge by claim id.
    ///
    /// Claim ids may repeat across batches; the earliest written row wins.
    pub async fn get_charge(&self, claim_id: &str) -> Result<Charge, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT      claim_id, patient_id, charge_amount, cpt_code, risk_score
            FROM        charge
            WHERE       claim_id = ?1
            ORDER BY    rowid
            LIMIT       1
            "#,
        )
        .bind(claim_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => charge_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    pub async fn charge_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM charge")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Apply one batch atomically: every charge (scored, in order) and then
    /// the job's completion mark commit together, or nothing does.
    ///
    /// Returns the number of charges written.
    pub async fn apply_batch(&self, message: &QueueMessage) -> Result<usize, StoreError> {
        let job_id = message.job.job_id;
        let mut tx = self.begin().await?;

        match write_batch(&mut tx, message).await {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "rolling back batch");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(job_id = %job_id, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

async fn write_batch(
    tx: &mut Transaction<'static, Sqlite>,
    message: &QueueMessage,
) -> Result<usize, StoreError> {
    let job_id = message.job.job_id;

    for input in &message.charges {
        let charge = Charge::score(input.clone());
        debug!(job_id = %job_id, claim_id = %charge.claim_id, "writing charge");
        insert_charge(tx, &charge).await?;
    }

    mark_done(tx, job_id).await?;
    Ok(message.charges.len())
}
