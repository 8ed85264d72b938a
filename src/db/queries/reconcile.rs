//! Reconciliation engine queries
//!
//! Every dimension resolves through one `LATERAL ... LIMIT 1` lookup so that
//! duplicate mapping entries never multiply rows. Branch-scoped entries win
//! over global ones. The claim, the fact insert and the error lookup all use
//! the same lookup, so "resolvable" means the same thing in each.

use anyhow::{bail, Result};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::types::{Classifier, MappingErrorReason, MappingLookup};

/// `FROM` clause resolving all four dimensions of `sellout_temp st`
macro_rules! resolved_rows {
    () => {
        r#"
        FROM sellout_temp st
        LEFT JOIN LATERAL (
            SELECT m.kodebranch FROM mapping_branch m
            WHERE m.kodebranch_dist = st.kodebranch
            ORDER BY m.id
            LIMIT 1
        ) mb ON TRUE
        LEFT JOIN LATERAL (
            SELECT m.id_salesman FROM mapping_salesman m
            WHERE m.id_salesman_dist = st.id_salesman
              AND (m.branch_dist IS NULL OR m.branch_dist = st.kodebranch)
            ORDER BY m.branch_dist NULLS LAST, m.id
            LIMIT 1
        ) ms ON TRUE
        LEFT JOIN LATERAL (
            SELECT m.custno FROM mapping_customer m
            WHERE m.custno_dist = st.id_customer
              AND (m.branch_dist IS NULL OR m.branch_dist = st.kodebranch)
            ORDER BY m.branch_dist NULLS LAST, m.id
            LIMIT 1
        ) mc ON TRUE
        LEFT JOIN LATERAL (
            SELECT m.pcode_prc FROM mapping_product m
            WHERE m.pcode_dist = st.id_product
              AND (m.branch_dist IS NULL OR m.branch_dist = st.kodebranch)
            ORDER BY m.branch_dist NULLS LAST, m.id
            LIMIT 1
        ) mp ON TRUE
        LEFT JOIN branch b ON b.kodebranch = mb.kodebranch
        LEFT JOIN customer_prc c ON c.custno = mc.custno
        LEFT JOIN product_group pg ON pg.pcode = mp.pcode_prc
        "#
    };
}

/// Row is resolvable: all four mappings and the required master records exist
macro_rules! resolvable {
    () => {
        r#"
          AND ms.id_salesman IS NOT NULL
          AND b.kodebranch IS NOT NULL
          AND c.custno IS NOT NULL
          AND pg.pcode IS NOT NULL
        "#
    };
}

const CLAIM_RESOLVABLE: &str = concat!(
    "SELECT st.id ",
    resolved_rows!(),
    "WHERE st.upload_batch_id = $1 AND st.flag_move = 'N'",
    resolvable!(),
    "ORDER BY st.id LIMIT $2 FOR UPDATE OF st SKIP LOCKED",
);

const INSERT_FACTS: &str = concat!(
    r#"
    INSERT INTO sellout (
        upload_batch_id, sellout_temp_id,
        region_code, region_name, entity_code, entity_name,
        branch_code, branch_name, area_code, area_name,
        salesman_code, salesman_name,
        custcode_prc, custcode_dist, custname, custaddress, custcity,
        sub_channel, type_outlet,
        order_no, order_date, invoice_no, invoice_type, invoice_date,
        product_brand, product_group1, product_group2, product_group3,
        pcode, pcode_name,
        qty1, qty2, qty3, flag_bonus, grossamount,
        discount1, discount2, discount3, discount4,
        discount5, discount6, discount7, discount8,
        total_discount, dpp, tax, nett,
        category, vtkp, npd,
        createdate, createby
    )
    SELECT
        st.upload_batch_id, st.id,
        r.koderegion, r.keterangan, e.id_entity, e.keterangan,
        b.kodebranch, b.nama_branch, a.id_area, a.description,
        ms.id_salesman, sm.nama,
        c.custno, st.id_customer, c.custname, c.custadd, c.city,
        c.sub_channel, c.type,
        st.order_no, st.order_date, st.invoice_no, st.invoice_type, st.invoice_date,
        pg.brand, pg.product_group_1, pg.product_group_2, pg.product_group_3,
        mp.pcode_prc, pp.pcodename,
        st.qty1, st.qty2, st.qty3, st.flag_bonus, st.grossamount,
        st.discount1, st.discount2, st.discount3, st.discount4,
        st.discount5, st.discount6, st.discount7, st.discount8,
        st.total_discount, st.dpp, st.tax, st.nett,
        pg.category_item, pg.vtkp, pg.npd,
        NOW(), $2
    "#,
    resolved_rows!(),
    r#"
        LEFT JOIN entity e ON e.id_entity = b.entity
        LEFT JOIN region r ON r.koderegion = COALESCE(e.koderegion, b.koderegion)
        LEFT JOIN area a ON a.id_area = b.id_area
        LEFT JOIN salesman_master sm ON sm.id_salesman = ms.id_salesman
        LEFT JOIN product_prc pp ON pp.pcode = mp.pcode_prc
    WHERE st.id = ANY($1)
    "#,
    resolvable!(),
);

const LOOKUP_UNRESOLVED: &str = concat!(
    r#"
    SELECT
        st.id,
        mb.kodebranch IS NOT NULL AS branch_mapped,
        ms.id_salesman IS NOT NULL AS salesman_mapped,
        mc.custno IS NOT NULL AS customer_mapped,
        mp.pcode_prc IS NOT NULL AS product_mapped,
        c.custno IS NOT NULL AS customer_in_master,
        pg.pcode IS NOT NULL AS product_in_group,
        b.kodebranch IS NOT NULL AS branch_in_master
    "#,
    resolved_rows!(),
    "WHERE st.upload_batch_id = $1 AND st.flag_move = 'N' ",
    "ORDER BY st.id LIMIT $2 FOR UPDATE OF st SKIP LOCKED",
);

const INSERT_ERRORS: &str = r#"
    INSERT INTO mapping_error (
        upload_batch_id, sellout_temp_id,
        kodebranch, id_salesman, id_customer, id_product,
        order_no, order_date, sfa_order_no, sfa_order_date,
        invoice_no, invoice_date,
        price, qty1, qty2, qty3, grossamount,
        status, modified_date, modified_by
    )
    SELECT
        st.upload_batch_id, st.id,
        st.kodebranch, st.id_salesman, st.id_customer, st.id_product,
        st.order_no, st.order_date, st.sfa_order_no, st.sfa_order_date,
        st.invoice_no, st.invoice_date,
        st.price, st.qty1, st.qty2, st.qty3, st.grossamount,
        classified.status, NOW(), $3
    FROM UNNEST($1::bigint[], $2::text[]) AS classified (id, status)
    JOIN sellout_temp st ON st.id = classified.id
"#;

const MARK_MOVED: &str = "UPDATE sellout_temp SET flag_move = 'Y' WHERE id = ANY($1)";

#[derive(Debug, FromRow)]
struct LookupRow {
    id: i64,
    branch_mapped: bool,
    salesman_mapped: bool,
    customer_mapped: bool,
    product_mapped: bool,
    customer_in_master: bool,
    product_in_group: bool,
    branch_in_master: bool,
}

impl LookupRow {
    fn to_lookup(&self) -> MappingLookup {
        MappingLookup {
            branch_mapped: self.branch_mapped,
            salesman_mapped: self.salesman_mapped,
            customer_mapped: self.customer_mapped,
            product_mapped: self.product_mapped,
            customer_in_master: self.customer_in_master,
            product_in_group: self.product_in_group,
            branch_in_master: self.branch_in_master,
        }
    }
}

/// Claim, resolve and move one batch of resolvable rows
pub async fn move_resolvable_batch(
    pool: &PgPool,
    upload_batch_id: Uuid,
    limit: i64,
    actor: &str,
) -> Result<u64> {
    let mut tx = pool.begin().await?;

    let ids: Vec<i64> = sqlx::query_scalar(CLAIM_RESOLVABLE)
        .bind(upload_batch_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

    if ids.is_empty() {
        tx.rollback().await?;
        return Ok(0);
    }

    let inserted = sqlx::query(INSERT_FACTS)
        .bind(&ids)
        .bind(actor)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    // A mapping edit between claim and insert can change resolvability;
    // dropping the transaction rolls the whole batch back
    if inserted != ids.len() as u64 {
        bail!(
            "Batch {}: claimed {} rows but resolved {} fact rows",
            upload_batch_id,
            ids.len(),
            inserted
        );
    }

    sqlx::query(MARK_MOVED)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    debug!(
        "Batch {}: moved {} rows (ids {}..={})",
        upload_batch_id,
        ids.len(),
        ids[0],
        ids[ids.len() - 1]
    );
    Ok(inserted)
}

/// Classify and move one batch of rows left behind by the resolver
pub async fn drain_unresolved_batch(
    pool: &PgPool,
    upload_batch_id: Uuid,
    limit: i64,
    classify: Classifier,
    actor: &str,
) -> Result<Vec<MappingErrorReason>> {
    let mut tx = pool.begin().await?;

    let unresolved = sqlx::query_as::<_, LookupRow>(LOOKUP_UNRESOLVED)
        .bind(upload_batch_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

    if unresolved.is_empty() {
        tx.rollback().await?;
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = unresolved.iter().map(|p| p.id).collect();
    let reasons: Vec<MappingErrorReason> = unresolved.iter().map(|p| classify(&p.to_lookup())).collect();
    let statuses: Vec<&str> = reasons.iter().map(|r| r.as_str()).collect();

    sqlx::query(INSERT_ERRORS)
        .bind(&ids)
        .bind(&statuses)
        .bind(actor)
        .execute(&mut *tx)
        .await?;

    sqlx::query(MARK_MOVED)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    debug!("Batch {}: drained {} unresolved rows", upload_batch_id, ids.len());
    Ok(reasons)
}
