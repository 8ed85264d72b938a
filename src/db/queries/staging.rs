//! Staging (sellout_temp) write queries

use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::db::store::StagedUpload;
use crate::types::{DateSpan, JobStatus, NewStagedRow, UploadBatch};

/// Rows per multi-row INSERT; 33 binds per row stays well under the
/// 65535 parameter limit.
const INSERT_CHUNK: usize = 1000;

/// Replace-by-range, insert the batch and its rows, enqueue the job.
/// Everything commits together or not at all.
///
/// The delete is scoped by the branch the earlier uploads were made under
/// (`upload_batch.branch`), not by the `kodebranch` code inside the staged
/// rows, so a file carrying another branch's codes cannot wipe that branch's
/// staging. Staged rows without an `upload_batch` record are never matched.
pub async fn stage_upload(
    pool: &PgPool,
    batch: &UploadBatch,
    rows: &[NewStagedRow],
    span: DateSpan,
) -> Result<StagedUpload> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query(
        r#"
        DELETE FROM sellout_temp st
        USING upload_batch ub
        WHERE st.upload_batch_id = ub.id
          AND ub.branch = $1
          AND st.invoice_date BETWEEN $2 AND $3
        "#,
    )
    .bind(&batch.branch)
    .bind(span.start)
    .bind(span.end)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query(
        r#"
        INSERT INTO upload_batch (id, branch, created_by, total_rows, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(batch.id)
    .bind(&batch.branch)
    .bind(&batch.created_by)
    .bind(batch.total_rows)
    .bind(batch.created_at)
    .execute(&mut *tx)
    .await?;

    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO sellout_temp (
                upload_batch_id, kodebranch, id_salesman, id_customer, id_product,
                qty1, qty2, qty3, price, grossamount,
                discount1, discount2, discount3, discount4,
                discount5, discount6, discount7, discount8,
                total_discount, dpp, tax, nett,
                order_no, order_date, invoice_no, invoice_date, invoice_type,
                sfa_order_no, sfa_order_date,
                flag_bonus, flag_move, createdate, createby
            )
            "#,
        );
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.upload_batch_id)
                .push_bind(row.kodebranch.as_deref())
                .push_bind(row.id_salesman.as_deref())
                .push_bind(row.id_customer.as_deref())
                .push_bind(row.id_product.as_deref())
                .push_bind(row.qty1)
                .push_bind(row.qty2)
                .push_bind(row.qty3)
                .push_bind(row.price)
                .push_bind(row.grossamount)
                .push_bind(row.discount1)
                .push_bind(row.discount2)
                .push_bind(row.discount3)
                .push_bind(row.discount4)
                .push_bind(row.discount5)
                .push_bind(row.discount6)
                .push_bind(row.discount7)
                .push_bind(row.discount8)
                .push_bind(row.total_discount)
                .push_bind(row.dpp)
                .push_bind(row.tax)
                .push_bind(row.nett)
                .push_bind(row.order_no.as_deref())
                .push_bind(row.order_date)
                .push_bind(row.invoice_no.as_deref())
                .push_bind(row.invoice_date)
                .push_bind(row.invoice_type.as_deref())
                .push_bind(row.sfa_order_no.as_deref())
                .push_bind(row.sfa_order_date)
                .push_bind(row.flag_bonus.as_str())
                .push_bind(row.flag_move.as_str())
                .push_bind(row.createdate)
                .push_bind(row.createby.as_str());
        });
        builder.build().execute(&mut *tx).await?;
    }

    let job_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO sellout_process_queue (upload_batch_id, status, created_at)
        VALUES ($1, $2, NOW())
        RETURNING id
        "#,
    )
    .bind(batch.id)
    .bind(JobStatus::Pending)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        "Staged batch {} for branch {}: {} rows inserted, {} replaced ({}..={}), job {}",
        batch.id,
        batch.branch,
        rows.len(),
        deleted,
        span.start,
        span.end,
        job_id
    );

    Ok(StagedUpload {
        deleted_rows: deleted,
        job_id,
    })
}
