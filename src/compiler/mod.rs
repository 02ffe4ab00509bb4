//! The compile pipeline: classify two uploads by filename, map their headers
//! onto the canonical calendar/screener schemas, join on the normalized
//! email key, drop linking columns, and serialize one review workbook.

mod join;
mod normalizer;
mod roles;
mod schema;
mod table;
mod workbook;

pub use join::{CompiledTable, JoinMode};
pub use roles::{Role, RoleError};
pub use table::TableError;

use join::CanonicalTable;
use serde::Serialize;
use table::{FileKind, RawTable};

/// One uploaded file: original filename plus raw bytes.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// Per-request knobs. `project` overrides the label derived from the
/// calendar filename.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub project: Option<String>,
    pub join_mode: JoinMode,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            project: None,
            join_mode: JoinMode::Inner,
        }
    }
}

/// Row accounting for the summary line shown after a compile.
#[derive(Debug, Clone, Serialize)]
pub struct CompileSummary {
    pub calendar_rows: usize,
    pub screener_rows: usize,
    pub compiled_rows: usize,
    pub matched: usize,
    pub unmatched_calendar: usize,
    pub unmatched_screener: usize,
    pub calendar_blank_emails: usize,
    pub screener_blank_emails: usize,
    pub duplicates_removed: usize,
}

/// A finished compile: the output filename, the serialized workbook, the
/// projected table (for previews and tests), and the row accounting.
#[derive(Debug, Clone)]
pub struct CompiledWorkbook {
    pub project: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub table: CompiledTable,
    pub summary: CompileSummary,
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("could not assign upload roles: {0}")]
    AmbiguousRole(#[from] RoleError),
    #[error("the {role} file is missing required column '{field}'")]
    MissingRequiredField { role: Role, field: &'static str },
    #[error("no calendar row shared an email with the screener file after normalization")]
    EmptyJoinResult,
    #[error("unsupported file type for '{name}': use .xlsx, .xls, or .csv")]
    UnsupportedFileType { name: String },
    #[error("failed to read the {role} file: {source}")]
    Table {
        role: Role,
        #[source]
        source: TableError,
    },
    #[error("failed to serialize the compiled workbook: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),
}

pub fn output_file_name(project: &str) -> String {
    format!("Compiled Study Data - {project}.xlsx")
}

/// Run the whole pipeline over two uploads, in either order.
pub fn compile(
    first: &Upload,
    second: &Upload,
    options: &CompileOptions,
) -> Result<CompiledWorkbook, CompileError> {
    let assignment = roles::classify(&first.file_name, &second.file_name)?;
    let uploads = [first, second];
    let calendar_upload = uploads[assignment.calendar];
    let screener_upload = uploads[assignment.screener];

    let calendar_raw = decode_upload(Role::Calendar, calendar_upload)?;
    let screener_raw = decode_upload(Role::Screener, screener_upload)?;

    let calendar = canonicalize(Role::Calendar, &calendar_raw)?;
    let screener = canonicalize(Role::Screener, &screener_raw)?;

    let outcome = join::compile_tables(&calendar, &screener, options.join_mode);
    if outcome.table.rows.is_empty() {
        return Err(CompileError::EmptyJoinResult);
    }

    let project = options
        .project
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| roles::project_label(&calendar_upload.file_name));

    let summary = CompileSummary {
        calendar_rows: calendar.rows.len(),
        screener_rows: screener.rows.len(),
        compiled_rows: outcome.table.rows.len(),
        matched: outcome.matched,
        unmatched_calendar: outcome.unmatched_calendar,
        unmatched_screener: outcome.unmatched_screener,
        calendar_blank_emails: calendar.blank_emails,
        screener_blank_emails: screener.blank_emails,
        duplicates_removed: outcome.duplicates_removed,
    };

    let bytes = workbook::write_workbook(&outcome.table)?;

    Ok(CompiledWorkbook {
        file_name: output_file_name(&project),
        project,
        bytes,
        table: outcome.table,
        summary,
    })
}

fn decode_upload(role: Role, upload: &Upload) -> Result<RawTable, CompileError> {
    let kind = FileKind::from_name(&upload.file_name).ok_or_else(|| {
        CompileError::UnsupportedFileType {
            name: upload.file_name.clone(),
        }
    })?;
    table::decode(kind, &upload.bytes).map_err(|source| CompileError::Table { role, source })
}

fn canonicalize(role: Role, raw: &RawTable) -> Result<CanonicalTable, CompileError> {
    CanonicalTable::from_raw(schema::for_role(role), raw)
        .map_err(|error| CompileError::MissingRequiredField {
            role,
            field: error.field,
        })
}
