//! Distributor file normalizer
//!
//! Turns a raw distributor export (xlsx, csv or txt) into staged rows using
//! the branch's column layout. Every field is read from its configured column
//! independently per row; blank cells become nulls.
//!
//! Derived rules applied per row, in this order:
//! 1. no gross-amount column configured → `gross = qty3 × price`
//! 2. configured bonus flag equals `Y` → bonus row, `discount8 = qty3`, `qty3 = 0`
//! 3. price, gross, dpp and nett all null or zero → same bonus treatment
//!
//! Rules 2 and 3 are evaluated independently, so a row hitting both ends up
//! with `discount8 = 0`.

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::LazyLock;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::types::{BranchUploadConfig, FileFormat, NewStagedRow, YesNo};

const TEXT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y", "%Y%m%d",
];

/// `1,234,567.89`: commas only as thousands separators
static RE_THOUSANDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d{1,3}(,\d{3})+(\.\d+)?$").expect("valid pattern"));

/// Ingestion failures; nothing is persisted when one of these is returned
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("cannot read workbook: {0}")]
    Workbook(String),

    #[error("workbook has no sheets")]
    NoSheets,

    #[error("cannot read delimited file: {0}")]
    Delimited(#[from] csv::Error),

    #[error("column {column} configured for '{field}' is missing (widest row has {width} columns)")]
    MissingColumn {
        field: &'static str,
        column: usize,
        width: usize,
    },

    #[error("row {row}: '{field}' is not a number: '{value}'")]
    InvalidNumber {
        row: usize,
        field: &'static str,
        value: String,
    },

    #[error("row {row}: '{field}' is not a date: '{value}'")]
    InvalidDate {
        row: usize,
        field: &'static str,
        value: String,
    },
}

/// A single spreadsheet/delimited cell after type detection
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl Cell {
    fn text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Render as text. Integral numbers lose the trailing `.0`, so a code
    /// typed as a number in Excel still matches its mapping.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) | Data::DurationIso(s) => Cell::text(s),
        Data::DateTimeIso(s) => parse_date_text(s).map(Cell::Date).unwrap_or_else(|| Cell::text(s)),
        Data::Float(f) if f.is_nan() => Cell::Empty,
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            excel_serial_to_date(serial)
                .map(Cell::Date)
                .unwrap_or(Cell::Number(serial))
        }
    }
}

/// Excel serial day number (1900 date system) to a calendar date
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_signed(Duration::days(serial.floor() as i64))
}

fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    // "2026-03-01 00:00:00" / "2026-03-01T00:00:00" → date part only
    let date_part = raw.trim().split([' ', 'T']).next()?;
    TEXT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Plain numbers, or comma-grouped thousands. A decimal comma (`12,5`) is
/// not guessed at and fails like any other malformed cell.
fn parse_number_text(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if let Ok(n) = s.parse::<f64>() {
        return Some(n);
    }
    if RE_THOUSANDS.is_match(s) {
        return s.replace(',', "").parse().ok();
    }
    None
}

/// Decode a text export: UTF-8 (BOM stripped) or Windows-1252 as fallback
fn decode_text(content: &[u8]) -> Cow<'_, str> {
    let content = content.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(content);
    match std::str::from_utf8(content) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(content);
            decoded
        }
    }
}

fn read_workbook(content: &[u8]) -> Result<Vec<Vec<Cell>>, NormalizeError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(content))
        .map_err(|e| NormalizeError::Workbook(e.to_string()))?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(NormalizeError::NoSheets)?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| NormalizeError::Workbook(e.to_string()))?;

    // Ranges start at the first used cell; pad so column indexes stay absolute
    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    let mut grid: Vec<Vec<Cell>> = (0..first_row).map(|_| Vec::new()).collect();
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; first_col as usize];
        cells.extend(row.iter().map(cell_from_data));
        grid.push(cells);
    }

    debug!("Read worksheet '{}': {} rows", sheet, grid.len());
    Ok(grid)
}

fn read_delimited(content: &[u8], separator: u8) -> Result<Vec<Vec<Cell>>, NormalizeError> {
    let text = decode_text(content);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(separator)
        .from_reader(text.as_bytes());

    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record?;
        grid.push(record.iter().map(Cell::text).collect());
    }
    Ok(grid)
}

/// Load the whole file as a grid of cells, header rows included
pub fn load_grid(content: &[u8], config: &BranchUploadConfig) -> Result<Vec<Vec<Cell>>, NormalizeError> {
    match config.format {
        FileFormat::Xlsx => read_workbook(content),
        FileFormat::Csv | FileFormat::Txt => read_delimited(content, config.separator_byte()),
    }
}

/// One data row with its 1-based position in the file
struct SourceRow<'a> {
    number: usize,
    cells: &'a [Cell],
}

impl SourceRow<'_> {
    fn cell(&self, column: Option<usize>) -> Option<&Cell> {
        let column = column?;
        self.cells.get(column - 1).filter(|c| !c.is_empty())
    }

    fn text(&self, column: Option<usize>) -> Option<String> {
        self.cell(column).and_then(Cell::to_text)
    }

    fn number(&self, field: &'static str, column: Option<usize>) -> Result<Option<f64>, NormalizeError> {
        match self.cell(column) {
            None => Ok(None),
            Some(Cell::Number(n)) => Ok(Some(*n)),
            Some(Cell::Text(s)) => match parse_number_text(s) {
                Some(n) if n.is_nan() => Ok(None),
                Some(n) => Ok(Some(n)),
                None => Err(NormalizeError::InvalidNumber {
                    row: self.number,
                    field,
                    value: s.clone(),
                }),
            },
            Some(other) => Err(NormalizeError::InvalidNumber {
                row: self.number,
                field,
                value: other.to_text().unwrap_or_default(),
            }),
        }
    }

    fn date(&self, field: &'static str, column: Option<usize>) -> Result<Option<NaiveDate>, NormalizeError> {
        let parsed = match self.cell(column) {
            None | Some(Cell::Empty) => return Ok(None),
            Some(Cell::Date(d)) => Some(*d),
            Some(Cell::Number(n)) => {
                // 20260301 style integers, otherwise an Excel serial
                if n.fract() == 0.0 && (19_000_101.0..=29_991_231.0).contains(n) {
                    NaiveDate::parse_from_str(&format!("{}", *n as i64), "%Y%m%d").ok()
                } else {
                    excel_serial_to_date(*n)
                }
            }
            Some(Cell::Text(s)) => parse_date_text(s),
        };

        parsed.map(Some).ok_or_else(|| NormalizeError::InvalidDate {
            row: self.number,
            field,
            value: self.text(column).unwrap_or_default(),
        })
    }
}

fn is_null_or_zero(value: Option<f64>) -> bool {
    value.map_or(true, |v| v == 0.0)
}

fn normalize_row(
    source: &SourceRow<'_>,
    config: &BranchUploadConfig,
    uploaded_by: &str,
    upload_batch_id: Uuid,
    now: DateTime<Utc>,
) -> Result<NewStagedRow, NormalizeError> {
    let cols = &config.columns;

    let mut qty3 = source.number("qty3", cols.qty3)?;
    let price = source.number("price", cols.price)?;
    let mut gross = source.number("grossamount", cols.grossamount)?;
    let dpp = source.number("dpp", cols.dpp)?;
    let nett = source.number("nett", cols.nett)?;

    if cols.grossamount.is_none() {
        gross = Some(qty3.unwrap_or(0.0) * price.unwrap_or(0.0));
    }

    let mut discount8 = source.number("discount8", cols.discount8)?;
    let mut flag_bonus = YesNo::N;

    if cols.flag_bonus.is_some() && source.text(cols.flag_bonus).as_deref() == Some("Y") {
        flag_bonus = YesNo::Y;
        discount8 = qty3;
        qty3 = Some(0.0);
    }

    if [price, gross, dpp, nett].into_iter().all(is_null_or_zero) {
        flag_bonus = YesNo::Y;
        discount8 = qty3;
        qty3 = Some(0.0);
    }

    Ok(NewStagedRow {
        upload_batch_id,
        kodebranch: source.text(cols.kodebranch),
        id_salesman: source.text(cols.id_salesman),
        id_customer: source.text(cols.id_customer),
        id_product: source.text(cols.id_product),
        qty1: source.number("qty1", cols.qty1)?,
        qty2: source.number("qty2", cols.qty2)?,
        qty3,
        price: price.unwrap_or(0.0),
        grossamount: gross.unwrap_or(0.0),
        discount1: source.number("discount1", cols.discount1)?,
        discount2: source.number("discount2", cols.discount2)?,
        discount3: source.number("discount3", cols.discount3)?,
        discount4: source.number("discount4", cols.discount4)?,
        discount5: source.number("discount5", cols.discount5)?,
        discount6: source.number("discount6", cols.discount6)?,
        discount7: source.number("discount7", cols.discount7)?,
        discount8,
        total_discount: source.number("total_discount", cols.total_discount)?,
        dpp,
        tax: source.number("tax", cols.tax)?,
        nett,
        order_no: source.text(cols.order_no),
        order_date: source.date("order_date", cols.order_date)?,
        invoice_no: source.text(cols.invoice_no),
        invoice_date: source.date("invoice_date", cols.invoice_date)?,
        invoice_type: source.text(cols.invoice_type),
        sfa_order_no: source.text(cols.sfa_order_no),
        sfa_order_date: source.date("sfa_order_date", cols.sfa_order_date)?,
        flag_bonus,
        flag_move: YesNo::N,
        createdate: now,
        createby: uploaded_by.to_string(),
    })
}

/// Normalize an already loaded grid. Rows before `first_row` and fully blank
/// rows are skipped; output order follows the file.
pub fn normalize_grid(
    grid: &[Vec<Cell>],
    config: &BranchUploadConfig,
    uploaded_by: &str,
    upload_batch_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<NewStagedRow>, NormalizeError> {
    let data: Vec<SourceRow<'_>> = grid
        .iter()
        .enumerate()
        .skip(config.skip_rows())
        .filter(|(_, cells)| cells.iter().any(|c| !c.is_empty()))
        .map(|(idx, cells)| SourceRow {
            number: idx + 1,
            cells,
        })
        .collect();

    if data.is_empty() {
        return Ok(Vec::new());
    }

    let width = data.iter().map(|r| r.cells.len()).max().unwrap_or(0);
    if let Some((field, column)) = config
        .columns
        .configured()
        .into_iter()
        .find(|(_, column)| *column > width)
    {
        return Err(NormalizeError::MissingColumn { field, column, width });
    }

    data.iter()
        .map(|source| normalize_row(source, config, uploaded_by, upload_batch_id, now))
        .collect()
}

/// Parse a raw distributor file into staged rows for one upload batch
pub fn normalize_file(
    content: &[u8],
    config: &BranchUploadConfig,
    uploaded_by: &str,
    upload_batch_id: Uuid,
) -> Result<Vec<NewStagedRow>, NormalizeError> {
    let grid = load_grid(content, config)?;
    normalize_grid(&grid, config, uploaded_by, upload_batch_id, Utc::now())
}
