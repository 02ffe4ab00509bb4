use super::join::CompiledTable;
use rust_xlsxwriter::{Format, Workbook, XlsxError};

pub(crate) const SHEET_NAME: &str = "Compiled";

/// Serialize the compiled table to xlsx bytes: one sheet, bold header row,
/// string cells. Empty cells are skipped rather than written.
pub(crate) fn write_workbook(table: &CompiledTable) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    let header_format = Format::new().set_bold();
    for (column, name) in table.columns.iter().enumerate() {
        sheet.write_string_with_format(0, column as u16, name, &header_format)?;
    }

    for (index, row) in table.rows.iter().enumerate() {
        for (column, cell) in row.iter().enumerate() {
            if !cell.is_empty() {
                sheet.write_string((index + 1) as u32, column as u16, cell)?;
            }
        }
    }

    workbook.save_to_buffer()
}
