//! Staged sellout rows and upload batches

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `'N'` / `'Y'` flag columns (`flag_bonus`, `flag_move`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum YesNo {
    #[default]
    N,
    Y,
}

impl YesNo {
    pub fn as_str(&self) -> &'static str {
        match self {
            YesNo::N => "N",
            YesNo::Y => "Y",
        }
    }
}

/// One upload of one distributor file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatch {
    pub id: Uuid,
    pub branch: String,
    pub created_by: String,
    pub total_rows: i32,
    pub created_at: DateTime<Utc>,
}

/// A normalized transaction line ready to be written to `sellout_temp`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStagedRow {
    pub upload_batch_id: Uuid,

    // Distributor-side codes
    pub kodebranch: Option<String>,
    pub id_salesman: Option<String>,
    pub id_customer: Option<String>,
    pub id_product: Option<String>,

    pub qty1: Option<f64>,
    pub qty2: Option<f64>,
    pub qty3: Option<f64>,
    pub price: f64,
    pub grossamount: f64,
    pub discount1: Option<f64>,
    pub discount2: Option<f64>,
    pub discount3: Option<f64>,
    pub discount4: Option<f64>,
    pub discount5: Option<f64>,
    pub discount6: Option<f64>,
    pub discount7: Option<f64>,
    pub discount8: Option<f64>,
    pub total_discount: Option<f64>,
    pub dpp: Option<f64>,
    pub tax: Option<f64>,
    pub nett: Option<f64>,

    pub order_no: Option<String>,
    pub order_date: Option<NaiveDate>,
    pub invoice_no: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub invoice_type: Option<String>,
    pub sfa_order_no: Option<String>,
    pub sfa_order_date: Option<NaiveDate>,

    pub flag_bonus: YesNo,
    pub flag_move: YesNo,
    pub createdate: DateTime<Utc>,
    pub createby: String,
}

/// Inclusive invoice-date range covered by an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    /// Smallest span covering every invoice date; `None` if no row has one
    pub fn of_rows(rows: &[NewStagedRow]) -> Option<Self> {
        let mut dates = rows.iter().filter_map(|r| r.invoice_date);
        let first = dates.next()?;
        let (start, end) = dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)));
        Some(Self { start, end })
    }

    #[cfg(test)]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}
