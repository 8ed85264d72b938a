//! Branch upload configuration types
//!
//! A branch configuration tells the normalizer where every logical field
//! lives in a distributor's export. Column indexes are 1-based; a missing or
//! zero index means the field is not present in that distributor's files.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Supported distributor file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Xlsx,
    Csv,
    Txt,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Xlsx => "xlsx",
            FileFormat::Csv => "csv",
            FileFormat::Txt => "txt",
        }
    }

    /// Parse a file extension, with or without the leading dot
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "xlsx" => Some(FileFormat::Xlsx),
            "csv" => Some(FileFormat::Csv),
            "txt" => Some(FileFormat::Txt),
            _ => None,
        }
    }

    /// Field separator used when the configuration leaves it blank
    pub fn default_separator(&self) -> u8 {
        match self {
            FileFormat::Txt => b'|',
            FileFormat::Csv | FileFormat::Xlsx => b',',
        }
    }
}

/// Row of the `config` table, latest row per branch wins
#[derive(Debug, Clone, FromRow)]
pub struct BranchConfigRecord {
    pub id: i64,
    pub branch: String,
    pub kodebranch: Option<i32>,
    pub id_salesman: Option<i32>,
    pub id_customer: Option<i32>,
    pub id_product: Option<i32>,
    pub qty1: Option<i32>,
    pub qty2: Option<i32>,
    pub qty3: Option<i32>,
    pub price: Option<i32>,
    pub grossamount: Option<i32>,
    pub discount1: Option<i32>,
    pub discount2: Option<i32>,
    pub discount3: Option<i32>,
    pub discount4: Option<i32>,
    pub discount5: Option<i32>,
    pub discount6: Option<i32>,
    pub discount7: Option<i32>,
    pub discount8: Option<i32>,
    pub total_discount: Option<i32>,
    pub flag_bonus: Option<i32>,
    pub dpp: Option<i32>,
    pub tax: Option<i32>,
    pub nett: Option<i32>,
    pub order_no: Option<i32>,
    pub order_date: Option<i32>,
    pub invoice_no: Option<i32>,
    pub invoice_date: Option<i32>,
    pub invoice_type: Option<i32>,
    pub sfa_order_no: Option<i32>,
    pub sfa_order_date: Option<i32>,
    pub file_extension: String,
    pub separator_file: Option<String>,
    pub first_row: i32,
}

/// Logical field → 1-based column index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMap {
    pub kodebranch: Option<usize>,
    pub id_salesman: Option<usize>,
    pub id_customer: Option<usize>,
    pub id_product: Option<usize>,
    pub qty1: Option<usize>,
    pub qty2: Option<usize>,
    pub qty3: Option<usize>,
    pub price: Option<usize>,
    pub grossamount: Option<usize>,
    pub discount1: Option<usize>,
    pub discount2: Option<usize>,
    pub discount3: Option<usize>,
    pub discount4: Option<usize>,
    pub discount5: Option<usize>,
    pub discount6: Option<usize>,
    pub discount7: Option<usize>,
    pub discount8: Option<usize>,
    pub total_discount: Option<usize>,
    pub flag_bonus: Option<usize>,
    pub dpp: Option<usize>,
    pub tax: Option<usize>,
    pub nett: Option<usize>,
    pub order_no: Option<usize>,
    pub order_date: Option<usize>,
    pub invoice_no: Option<usize>,
    pub invoice_date: Option<usize>,
    pub invoice_type: Option<usize>,
    pub sfa_order_no: Option<usize>,
    pub sfa_order_date: Option<usize>,
}

impl ColumnMap {
    /// Every configured (field name, column) pair
    pub fn configured(&self) -> Vec<(&'static str, usize)> {
        let fields = [
            ("kodebranch", self.kodebranch),
            ("id_salesman", self.id_salesman),
            ("id_customer", self.id_customer),
            ("id_product", self.id_product),
            ("qty1", self.qty1),
            ("qty2", self.qty2),
            ("qty3", self.qty3),
            ("price", self.price),
            ("grossamount", self.grossamount),
            ("discount1", self.discount1),
            ("discount2", self.discount2),
            ("discount3", self.discount3),
            ("discount4", self.discount4),
            ("discount5", self.discount5),
            ("discount6", self.discount6),
            ("discount7", self.discount7),
            ("discount8", self.discount8),
            ("total_discount", self.total_discount),
            ("flag_bonus", self.flag_bonus),
            ("dpp", self.dpp),
            ("tax", self.tax),
            ("nett", self.nett),
            ("order_no", self.order_no),
            ("order_date", self.order_date),
            ("invoice_no", self.invoice_no),
            ("invoice_date", self.invoice_date),
            ("invoice_type", self.invoice_type),
            ("sfa_order_no", self.sfa_order_no),
            ("sfa_order_date", self.sfa_order_date),
        ];
        fields
            .into_iter()
            .filter_map(|(name, col)| col.map(|c| (name, c)))
            .collect()
    }
}

/// Upload layout for one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchUploadConfig {
    pub id: i64,
    pub branch: String,
    pub columns: ColumnMap,
    pub format: FileFormat,
    /// Raw separator as configured; `None` falls back to the format default
    pub separator: Option<String>,
    /// 1-based row where data starts
    pub first_row: u32,
}

impl BranchUploadConfig {
    /// Number of leading rows to skip before data starts
    pub fn skip_rows(&self) -> usize {
        self.first_row.saturating_sub(1) as usize
    }

    /// Field separator byte for delimited formats
    pub fn separator_byte(&self) -> u8 {
        self.separator
            .as_deref()
            .and_then(|s| parse_separator(s).ok().flatten())
            .unwrap_or_else(|| self.format.default_separator())
    }
}

/// Byte for a configured separator; blank means "use the format default".
/// Quotes around the value are ignored and `\t`/`tab` mean a tab.
fn parse_separator(raw: &str) -> Result<Option<u8>> {
    let token = raw.trim_matches(|c: char| c == '"' || c == '\'');
    if matches!(token, "\\t" | "tab" | "TAB") {
        return Ok(Some(b'\t'));
    }
    match token.as_bytes() {
        [] => Ok(None),
        [byte] => Ok(Some(*byte)),
        _ => Err(anyhow!("separator '{}' is not a single ASCII character", raw)),
    }
}

fn column(idx: Option<i32>) -> Option<usize> {
    idx.filter(|&i| i > 0).map(|i| i as usize)
}

impl TryFrom<BranchConfigRecord> for BranchUploadConfig {
    type Error = anyhow::Error;

    fn try_from(r: BranchConfigRecord) -> Result<Self> {
        let format = FileFormat::from_extension(&r.file_extension).ok_or_else(|| {
            anyhow!(
                "Branch {} has unsupported file extension '{}'",
                r.branch,
                r.file_extension
            )
        })?;

        let separator = r.separator_file.filter(|s| !s.is_empty());
        if let Some(raw) = separator.as_deref() {
            parse_separator(raw)
                .with_context(|| format!("Branch {} has an unusable separator", r.branch))?;
        }

        Ok(Self {
            id: r.id,
            branch: r.branch,
            columns: ColumnMap {
                kodebranch: column(r.kodebranch),
                id_salesman: column(r.id_salesman),
                id_customer: column(r.id_customer),
                id_product: column(r.id_product),
                qty1: column(r.qty1),
                qty2: column(r.qty2),
                qty3: column(r.qty3),
                price: column(r.price),
                grossamount: column(r.grossamount),
                discount1: column(r.discount1),
                discount2: column(r.discount2),
                discount3: column(r.discount3),
                discount4: column(r.discount4),
                discount5: column(r.discount5),
                discount6: column(r.discount6),
                discount7: column(r.discount7),
                discount8: column(r.discount8),
                total_discount: column(r.total_discount),
                flag_bonus: column(r.flag_bonus),
                dpp: column(r.dpp),
                tax: column(r.tax),
                nett: column(r.nett),
                order_no: column(r.order_no),
                order_date: column(r.order_date),
                invoice_no: column(r.invoice_no),
                invoice_date: column(r.invoice_date),
                invoice_type: column(r.invoice_type),
                sfa_order_no: column(r.sfa_order_no),
                sfa_order_date: column(r.sfa_order_date),
            },
            format,
            separator,
            first_row: r.first_row.max(1) as u32,
        })
    }
}
