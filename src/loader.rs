use std::fs;
use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{SourceConfig, Sources};
use crate::encoding::TextEncoding;
use crate::error::{ReportError, Result, RowError};
use crate::types::{
    ManagerContact, RawContactRow, RawSalesRow, RawStoreRow, SalesRecord, StoreProfile,
};
use crate::util::{non_blank, parse_date_safe, parse_f64_safe, parse_i64_safe, parse_store_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited { delimiter: u8 },
    Spreadsheet,
}

impl SourceFormat {
    /// Spreadsheet for workbook extensions, delimited text otherwise.
    pub fn infer(path: &Path, delimiter: u8) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods") => SourceFormat::Spreadsheet,
            _ => SourceFormat::Delimited { delimiter },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub total_rows: usize,
    pub parsed_rows: usize,
    pub parse_errors: usize,
}

/// The three input datasets, cleaned and typed.
#[derive(Debug, Clone, Default)]
pub struct Datasets {
    pub sales: Vec<SalesRecord>,
    pub profiles: Vec<StoreProfile>,
    pub contacts: Vec<ManagerContact>,
}

/// A raw source row and the header columns it cannot do without.
pub trait SourceRow: DeserializeOwned {
    const COLUMNS: &'static [&'static str];
}

impl SourceRow for RawSalesRow {
    const COLUMNS: &'static [&'static str] =
        &["Store ID", "Date", "Sale Code", "Product", "Quantity", "Final Value"];
}

impl SourceRow for RawStoreRow {
    const COLUMNS: &'static [&'static str] = &["Store ID", "Store", "Manager"];
}

impl SourceRow for RawContactRow {
    const COLUMNS: &'static [&'static str] = &["Store", "E-mail"];
}

/// Rows read from one source. Records that could not be deserialized
/// (short lines, missing cells) are counted in `malformed` and left out.
#[derive(Debug)]
pub struct Parsed<T> {
    pub rows: Vec<T>,
    pub malformed: usize,
}

impl<T> Parsed<T> {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            malformed: 0,
        }
    }

    fn push(&mut self, row: std::result::Result<T, csv::Error>, line: u64) {
        match row {
            Ok(row) => self.rows.push(row),
            Err(e) => {
                self.malformed += 1;
                debug!(line, error = %e, "malformed row skipped");
            }
        }
    }
}

fn check_columns<T: SourceRow>(headers: &StringRecord) -> Result<()> {
    let missing: Vec<&'static str> = T::COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReportError::MissingColumns(missing))
    }
}

/// Try each candidate encoding in order and return the rows of the first
/// attempt that decodes and carries every required column.
///
/// Spreadsheets carry their own encoding, so every attempt reads the same
/// way; the list is still walked so both formats share one retry path.
pub fn load_with_encodings<T: SourceRow>(
    path: &Path,
    format: SourceFormat,
    encodings: &[TextEncoding],
) -> Result<Parsed<T>> {
    for encoding in encodings {
        match read_attempt(path, format, *encoding) {
            Ok(parsed) => {
                info!(
                    path = %path.display(),
                    %encoding,
                    rows = parsed.rows.len(),
                    malformed = parsed.malformed,
                    "loaded source"
                );
                return Ok(parsed);
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    %encoding,
                    error = %e,
                    "failed to read source with encoding"
                );
            }
        }
    }
    Err(ReportError::LoadFailure {
        path: path.to_path_buf(),
        encodings: encodings.to_vec(),
    })
}

fn read_attempt<T: SourceRow>(
    path: &Path,
    format: SourceFormat,
    encoding: TextEncoding,
) -> Result<Parsed<T>> {
    match format {
        SourceFormat::Delimited { delimiter } => {
            let bytes = fs::read(path)?;
            let text = encoding.decode(&bytes)?;
            parse_delimited(text.as_bytes(), delimiter)
        }
        SourceFormat::Spreadsheet => read_spreadsheet(path),
    }
}

/// Parse delimited text. Only a header without the required columns fails
/// the parse; a bad record is skipped and counted.
pub fn parse_delimited<T: SourceRow, R: Read>(reader: R, delimiter: u8) -> Result<Parsed<T>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();
    check_columns::<T>(&headers)?;

    let mut parsed = Parsed::new();
    for result in rdr.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        parsed.push(record.deserialize(Some(&headers)), line);
    }
    Ok(parsed)
}

fn read_spreadsheet<T: SourceRow>(path: &Path) -> Result<Parsed<T>> {
    let mut workbook = open_workbook_auto(path)?;
    let range = first_worksheet(path, workbook.worksheet_range_at(0))?;
    parse_range(&range)
}

fn first_worksheet(
    path: &Path,
    sheet: Option<std::result::Result<Range<Data>, calamine::Error>>,
) -> Result<Range<Data>> {
    let range = sheet.ok_or_else(|| ReportError::EmptyWorkbook(path.to_path_buf()))??;
    Ok(range)
}

/// The first row of the range holds the column names. Rows where every
/// cell is empty are dropped.
fn parse_range<T: SourceRow>(range: &Range<Data>) -> Result<Parsed<T>> {
    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|header| StringRecord::from(header.iter().map(cell_text).collect::<Vec<_>>()))
        .unwrap_or_default();
    check_columns::<T>(&headers)?;

    let mut parsed = Parsed::new();
    for (idx, row) in rows.enumerate() {
        let record = StringRecord::from(row.iter().map(cell_text).collect::<Vec<_>>());
        if record.iter().all(str::is_empty) {
            continue;
        }
        // sheet row, header is row 1
        parsed.push(record.deserialize(Some(&headers)), idx as u64 + 2);
    }
    Ok(parsed)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.date().format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        Data::DateTimeIso(s) => s.split('T').next().unwrap_or(s).to_string(),
        other => other.to_string(),
    }
}

// Cleaning: raw rows -> typed records. Rows that cannot be typed are skipped
// and counted.

impl TryFrom<RawSalesRow> for SalesRecord {
    type Error = RowError;

    fn try_from(row: RawSalesRow) -> std::result::Result<Self, Self::Error> {
        Ok(SalesRecord {
            store_id: parse_store_id(Some(&row.store_id)).ok_or_else(|| RowError::Invalid {
                column: "Store ID",
                value: row.store_id.clone(),
            })?,
            date: parse_date_safe(Some(&row.date)).ok_or_else(|| RowError::Invalid {
                column: "Date",
                value: row.date.clone(),
            })?,
            sale_code: non_blank(&row.sale_code).ok_or(RowError::Missing("Sale Code"))?,
            product: non_blank(&row.product).ok_or(RowError::Missing("Product"))?,
            quantity: parse_i64_safe(Some(&row.quantity)).ok_or_else(|| RowError::Invalid {
                column: "Quantity",
                value: row.quantity.clone(),
            })?,
            final_value: parse_f64_safe(Some(&row.final_value)).ok_or_else(|| {
                RowError::Invalid {
                    column: "Final Value",
                    value: row.final_value.clone(),
                }
            })?,
        })
    }
}

impl TryFrom<RawStoreRow> for StoreProfile {
    type Error = RowError;

    fn try_from(row: RawStoreRow) -> std::result::Result<Self, Self::Error> {
        Ok(StoreProfile {
            store_id: parse_store_id(Some(&row.store_id)).ok_or_else(|| RowError::Invalid {
                column: "Store ID",
                value: row.store_id.clone(),
            })?,
            store: non_blank(&row.store).ok_or(RowError::Missing("Store"))?,
            manager: non_blank(&row.manager).ok_or(RowError::Missing("Manager"))?,
        })
    }
}

impl TryFrom<RawContactRow> for ManagerContact {
    type Error = RowError;

    fn try_from(row: RawContactRow) -> std::result::Result<Self, Self::Error> {
        Ok(ManagerContact {
            store: non_blank(&row.store).ok_or(RowError::Missing("Store"))?,
            email: non_blank(&row.email).ok_or(RowError::Missing("E-mail"))?,
        })
    }
}

pub fn clean<R, T>(dataset: &str, raw: Parsed<R>) -> (Vec<T>, LoadReport)
where
    T: TryFrom<R, Error = RowError>,
{
    let total_rows = raw.rows.len() + raw.malformed;
    let mut parse_errors = raw.malformed;
    let mut out = Vec::with_capacity(raw.rows.len());
    for row in raw.rows {
        match T::try_from(row) {
            Ok(record) => out.push(record),
            Err(e) => {
                parse_errors += 1;
                debug!(dataset, error = %e, "skipping row");
            }
        }
    }
    if parse_errors > 0 {
        warn!(dataset, parse_errors, total_rows, "rows skipped due to parse/validation errors");
    }
    let report = LoadReport {
        total_rows,
        parsed_rows: out.len(),
        parse_errors,
    };
    (out, report)
}

fn load_source<R, T>(dataset: &str, source: &SourceConfig, delimiter: u8) -> Result<Vec<T>>
where
    R: SourceRow,
    T: TryFrom<R, Error = RowError>,
{
    let format = SourceFormat::infer(&source.path, delimiter);
    let raw: Parsed<R> = load_with_encodings(&source.path, format, &source.encodings)?;
    let (records, report) = clean(dataset, raw);
    info!(
        dataset,
        total_rows = report.total_rows,
        parsed_rows = report.parsed_rows,
        parse_errors = report.parse_errors,
        "dataset ready"
    );
    Ok(records)
}

/// Load all three datasets. Any load failure aborts the run.
pub fn load_datasets(sources: &Sources) -> Result<Datasets> {
    Ok(Datasets {
        sales: load_source::<RawSalesRow, _>("sales", &sources.sales, sources.delimiter)?,
        profiles: load_source::<RawStoreRow, _>("stores", &sources.stores, sources.delimiter)?,
        contacts: load_source::<RawContactRow, _>("contacts", &sources.contacts, sources.delimiter)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    const SALES_CSV: &str = "\
Store ID;Date;Sale Code;Product;Quantity;Final Value
1;2024-01-01;S-1;Shirt;2;100,00
1;02/01/2024;S-2;Shoes;1;50
2;2024-01-02;S-3;Shirt;1;200.00
2;not a date;S-4;Shirt;1;10
";

    fn write_temp(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn infers_format_from_extension() {
        assert_eq!(
            SourceFormat::infer(Path::new("Vendas.XLSX"), b';'),
            SourceFormat::Spreadsheet
        );
        assert_eq!(
            SourceFormat::infer(Path::new("Lojas.csv"), b';'),
            SourceFormat::Delimited { delimiter: b';' }
        );
    }

    #[test]
    fn parses_and_cleans_sales_rows() {
        let raw: Parsed<RawSalesRow> = parse_delimited(SALES_CSV.as_bytes(), b';').unwrap();
        assert_eq!(raw.rows.len(), 4);
        assert_eq!(raw.malformed, 0);
        let (records, report): (Vec<SalesRecord>, _) = clean("sales", raw);
        assert_eq!(report.total_rows, 4);
        assert_eq!(report.parse_errors, 1);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].final_value, 100.0);
        assert_eq!(records[1].date, chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(records[2].store_id, 2);
    }

    #[test]
    fn missing_required_column_fails_the_parse() {
        let csv = "Store ID;Store\n1;Centro\n";
        let parsed: Result<Parsed<RawStoreRow>> = parse_delimited(csv.as_bytes(), b';');
        match parsed {
            Err(ReportError::MissingColumns(columns)) => assert_eq!(columns, vec!["Manager"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn truncated_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "sales.csv",
            b"Store ID;Date;Sale Code;Product;Quantity;Final Value\n\
1;2024-01-01;S-1;Shirt;2;100,00\n\
1;2024-01-02;S-2\n\
2;2024-01-02;S-3;Shirt;1;200.00\n",
        );
        let raw: Parsed<RawSalesRow> = load_with_encodings(
            &path,
            SourceFormat::Delimited { delimiter: b';' },
            &[TextEncoding::Utf8, TextEncoding::Latin1],
        )
        .unwrap();
        assert_eq!(raw.rows.len(), 2);
        assert_eq!(raw.malformed, 1);

        let (records, report): (Vec<SalesRecord>, _) = clean("sales", raw);
        assert_eq!(records.len(), 2);
        assert_eq!(
            report,
            LoadReport {
                total_rows: 3,
                parsed_rows: 2,
                parse_errors: 1,
            }
        );
        assert_eq!(records[1].sale_code, "S-3");
    }

    fn sheet(cells: &[&[Data]]) -> Range<Data> {
        let width = cells.iter().map(|r| r.len()).max().unwrap_or(1) as u32;
        let mut range = Range::new((0, 0), (cells.len() as u32 - 1, width - 1));
        for (r, row) in cells.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                range.set_value((r as u32, c as u32), cell.clone());
            }
        }
        range
    }

    #[test]
    fn spreadsheet_cells_render_as_source_text() {
        assert_eq!(cell_text(&Data::Float(2.0)), "2");
        assert_eq!(cell_text(&Data::Float(10.5)), "10.5");
        assert_eq!(cell_text(&Data::Int(7)), "7");
        assert_eq!(cell_text(&Data::Empty), "");
        assert_eq!(cell_text(&Data::String("  Centro ".to_string())), "Centro");
        // serial 45292 is 2024-01-01
        let serial = calamine::ExcelDateTime::new(45292.0, calamine::ExcelDateTimeType::DateTime, false);
        assert_eq!(cell_text(&Data::DateTime(serial)), "2024-01-01");
        assert_eq!(cell_text(&Data::DateTimeIso("2024-01-02T10:30:00".to_string())), "2024-01-02");
    }

    #[test]
    fn worksheet_rows_deserialize_and_skip_blank_rows() {
        let text = |s: &str| Data::String(s.to_string());
        let range = sheet(&[
            &[text("Store"), text("E-mail")],
            &[text("Centro"), text("centro@example.com")],
            &[Data::Empty, Data::Empty],
            &[text("Norte"), Data::Empty],
            &[text("Sul")],
        ]);
        let parsed: Parsed<RawContactRow> = parse_range(&range).unwrap();
        // blank row dropped, the empty e-mail cell is still a record
        assert_eq!(parsed.rows.len(), 3);
        assert_eq!(parsed.malformed, 0);
        assert_eq!(parsed.rows[0].email, "centro@example.com");
        assert_eq!(parsed.rows[1].email, "");

        let (contacts, report): (Vec<ManagerContact>, _) = clean("contacts", parsed);
        assert_eq!(contacts.len(), 1);
        assert_eq!(report.parse_errors, 2);
    }

    #[test]
    fn worksheet_without_required_header_fails() {
        let range = sheet(&[&[Data::String("Store".to_string())]]);
        assert!(matches!(
            parse_range::<RawContactRow>(&range),
            Err(ReportError::MissingColumns(columns)) if columns == vec!["E-mail"]
        ));
    }

    #[test]
    fn workbook_without_sheets_is_an_error() {
        let err = first_worksheet(Path::new("Vendas.xlsx"), None).unwrap_err();
        assert!(matches!(err, ReportError::EmptyWorkbook(_)));
        assert_eq!(err.to_string(), "Vendas.xlsx has no worksheets");
    }

    #[test]
    fn falls_through_to_the_first_encoding_that_works() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "stores.csv",
            b"Store ID;Store;Manager\n1;S\xe3o Paulo;Jo\xe3o\n",
        );
        let rows: Vec<RawStoreRow> = load_with_encodings(
            &path,
            SourceFormat::Delimited { delimiter: b';' },
            &[TextEncoding::Utf8, TextEncoding::Ascii, TextEncoding::Latin1],
        )
        .unwrap()
        .rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].store, "São Paulo");
        assert_eq!(rows[0].manager, "João");
    }

    #[test]
    fn load_failure_names_path_and_encodings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "contacts.csv", b"Store;E-mail\nCentro;\xe9@x.com\n");
        let err = load_with_encodings::<RawContactRow>(
            &path,
            SourceFormat::Delimited { delimiter: b';' },
            &[TextEncoding::Utf8, TextEncoding::Ascii],
        )
        .unwrap_err();
        match &err {
            ReportError::LoadFailure { path: p, encodings } => {
                assert_eq!(p, &path);
                assert_eq!(encodings, &vec![TextEncoding::Utf8, TextEncoding::Ascii]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.contains("contacts.csv"));
        assert!(message.contains("utf-8, ascii"));
    }

    #[test]
    fn missing_file_is_a_load_failure() {
        let err = load_with_encodings::<RawContactRow>(
            Path::new("/nonexistent/contacts.csv"),
            SourceFormat::Delimited { delimiter: b';' },
            &[TextEncoding::Latin1],
        )
        .unwrap_err();
        assert!(matches!(err, ReportError::LoadFailure { .. }));
    }

    #[test]
    fn blank_reference_keys_are_skipped() {
        let csv = "Store;E-mail\nCentro;centro@example.com\n;orphan@example.com\n";
        let raw: Parsed<RawContactRow> = parse_delimited(csv.as_bytes(), b';').unwrap();
        let (contacts, report): (Vec<ManagerContact>, _) = clean("contacts", raw);
        assert_eq!(contacts.len(), 1);
        assert_eq!(report.parse_errors, 1);
    }
}
