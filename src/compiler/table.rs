use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;

/// An uploaded table as decoded: trimmed header strings plus rows of string
/// cells, padded or truncated to the header width.
#[derive(Debug)]
pub(crate) struct RawTable {
    pub(crate) headers: Vec<String>,
    pub(crate) rows: Vec<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("could not parse CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not open workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("the workbook contains no worksheets")]
    NoWorksheet,
    #[error("the file has no header row")]
    NoHeader,
}

/// Supported upload formats, decided from the filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    Csv,
    Excel,
}

impl FileKind {
    pub(crate) fn from_name(file_name: &str) -> Option<Self> {
        let lowered = file_name.to_ascii_lowercase();
        if lowered.ends_with(".csv") {
            Some(Self::Csv)
        } else if lowered.ends_with(".xlsx") || lowered.ends_with(".xls") {
            Some(Self::Excel)
        } else {
            None
        }
    }
}

pub(crate) fn decode(kind: FileKind, bytes: &[u8]) -> Result<RawTable, TableError> {
    match kind {
        FileKind::Csv => decode_csv(bytes),
        FileKind::Excel => decode_excel(bytes),
    }
}

fn decode_csv(bytes: &[u8]) -> Result<RawTable, TableError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    if headers.iter().all(|header| header.is_empty()) {
        return Err(TableError::NoHeader);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row: Vec<String> = record.iter().map(|cell| cell.to_string()).collect();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    Ok(RawTable { headers, rows })
}

fn decode_excel(bytes: &[u8]) -> Result<RawTable, TableError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(TableError::NoWorksheet)??;

    let mut cells = range.rows();
    let headers: Vec<String> = cells
        .next()
        .ok_or(TableError::NoHeader)?
        .iter()
        .map(|cell| cell_text(cell).trim().to_string())
        .collect();
    if headers.iter().all(|header| header.is_empty()) {
        return Err(TableError::NoHeader);
    }

    let rows = cells
        .map(|cells| {
            let mut row: Vec<String> = cells.iter().map(cell_text).collect();
            row.resize(headers.len(), String::new());
            row
        })
        .collect();

    Ok(RawTable { headers, rows })
}

/// Render a worksheet cell as text. Integral floats lose the trailing `.0`
/// Excel is fond of; date cells render in a readable local form.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        Data::Float(value) => {
            if value.fract() == 0.0 && value.abs() < 1e15 {
                format!("{}", *value as i64)
            } else {
                format!("{value}")
            }
        }
        Data::Int(value) => format!("{value}"),
        Data::Bool(value) => if *value { "TRUE" } else { "FALSE" }.to_string(),
        Data::DateTime(value) => match value.as_datetime() {
            Some(datetime) if datetime.time() == chrono::NaiveTime::MIN => {
                datetime.date().format("%Y-%m-%d").to_string()
            }
            Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format!("{}", value.as_f64()),
        },
        Data::DateTimeIso(value) | Data::DurationIso(value) => value.clone(),
        Data::Error(error) => format!("#{error:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_file_kind_from_extension() {
        assert_eq!(FileKind::from_name("Calendar.XLSX"), Some(FileKind::Excel));
        assert_eq!(FileKind::from_name("screener.xls"), Some(FileKind::Excel));
        assert_eq!(FileKind::from_name("screener.csv"), Some(FileKind::Csv));
        assert_eq!(FileKind::from_name("notes.txt"), None);
    }

    #[test]
    fn csv_headers_are_trimmed_and_short_rows_padded() {
        let table = decode_csv(b" Email , Status ,Notes\na@x.com,Pass\n").expect("decodes");
        assert_eq!(table.headers, vec!["Email", "Status", "Notes"]);
        assert_eq!(table.rows, vec![vec!["a@x.com", "Pass", ""]]);
    }

    #[test]
    fn empty_csv_fails_without_headers() {
        let error = decode_csv(b"").expect_err("no header row");
        assert!(matches!(error, TableError::NoHeader));
    }

    #[test]
    fn integral_floats_render_without_decimal_point() {
        assert_eq!(cell_text(&Data::Float(42.0)), "42");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::Empty), "");
        assert_eq!(cell_text(&Data::Bool(true)), "TRUE");
    }

    #[test]
    fn excel_round_trips_through_writer_bytes() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Email").expect("write header");
        sheet.write_string(0, 1, "Status").expect("write header");
        sheet.write_string(1, 0, "a@x.com").expect("write cell");
        sheet.write_number(1, 1, 5.0).expect("write cell");
        let bytes = workbook.save_to_buffer().expect("serialize");

        let table = decode_excel(&bytes).expect("decodes");
        assert_eq!(table.headers, vec!["Email", "Status"]);
        assert_eq!(table.rows, vec![vec!["a@x.com", "5"]]);
    }
}
