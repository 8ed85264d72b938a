//! Branch upload configuration queries

use anyhow::Result;
use sqlx::PgPool;

use crate::types::BranchConfigRecord;

/// Latest configuration row for a branch (highest id wins)
pub async fn latest_for_branch(pool: &PgPool, branch: &str) -> Result<Option<BranchConfigRecord>> {
    let record = sqlx::query_as::<_, BranchConfigRecord>(
        r#"
        SELECT
            id, branch,
            kodebranch, id_salesman, id_customer, id_product,
            qty1, qty2, qty3, price, grossamount,
            discount1, discount2, discount3, discount4,
            discount5, discount6, discount7, discount8,
            total_discount, flag_bonus, dpp, tax, nett,
            order_no, order_date, invoice_no, invoice_date, invoice_type,
            sfa_order_no, sfa_order_date,
            file_extension, separator_file, first_row
        FROM config
        WHERE branch = $1
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(branch)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}
