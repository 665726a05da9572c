// Bulk Export - one snapshot of the store → spreadsheet artifact
//
// The snapshot is a single list() call. The artifact is built in memory, so
// two exports running at once never share a file.

use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use serde::Serialize;
use tracing::{info, warn};

use crate::branch::{Branch, BranchId};
use crate::dataset::{COLUMN_ID, COLUMN_LOCATION, COLUMN_MANAGER, COLUMN_NAME};
use crate::db::BranchRepository;
use crate::error::InterchangeError;

pub const SHEET_NAME: &str = "Branches";
pub const HEADERS: [&str; 4] = [COLUMN_ID, COLUMN_NAME, COLUMN_LOCATION, COLUMN_MANAGER];

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

/// Excel refuses longer cell strings
pub const XLSX_MAX_CELL_CHARS: usize = 32_767;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "xlsx" => Some(ExportFormat::Xlsx),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "branches.xlsx",
            ExportFormat::Csv => "branches.csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => XLSX_CONTENT_TYPE,
            ExportFormat::Csv => CSV_CONTENT_TYPE,
        }
    }
}

/// A field that did not fit in an xlsx cell and was cut to the limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TruncatedField {
    pub id: BranchId,
    pub column: &'static str,
    pub original_chars: usize,
}

/// A complete, downloadable export
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub file_name: &'static str,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    pub record_count: usize,
    pub truncated: Vec<TruncatedField>,
}

/// Read the snapshot and serialize it. Any failure aborts the export; a
/// partial artifact is never returned.
pub fn export_snapshot<R>(store: &R, format: ExportFormat) -> Result<ExportArtifact, InterchangeError>
where
    R: BranchRepository + ?Sized,
{
    let snapshot = store.list()?;

    let (bytes, truncated) = match format {
        ExportFormat::Xlsx => write_xlsx(&snapshot)?,
        ExportFormat::Csv => (write_csv(&snapshot)?, Vec::new()),
    };

    for field in &truncated {
        warn!(
            id = field.id,
            column = field.column,
            chars = field.original_chars,
            "field truncated to fit an xlsx cell"
        );
    }

    info!(records = snapshot.len(), bytes = bytes.len(), ?format, "export built");

    Ok(ExportArtifact {
        file_name: format.file_name(),
        content_type: format.content_type(),
        bytes,
        record_count: snapshot.len(),
        truncated,
    })
}

// ============================================================================
// WRITERS
// ============================================================================

/// Serialize to xlsx. Values longer than an Excel cell allows are cut to
/// `XLSX_MAX_CELL_CHARS` and reported instead of failing the whole export.
pub fn write_xlsx(branches: &[Branch]) -> Result<(Vec<u8>, Vec<TruncatedField>), XlsxError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let mut truncated = Vec::new();

    {
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME)?;
        write_headers(sheet, &header_format)?;

        let mut row: u32 = 1;
        for branch in branches {
            sheet.write_number(row, 0, branch.id as f64)?;

            let values = [
                branch.name.as_deref(),
                branch.location.as_deref(),
                branch.manager.as_deref(),
            ];
            for (i, value) in values.into_iter().enumerate() {
                let col = i as u16 + 1;
                // NULL stays an empty cell
                let Some(value) = value else { continue };

                let chars = value.chars().count();
                if chars > XLSX_MAX_CELL_CHARS {
                    let cut: String = value.chars().take(XLSX_MAX_CELL_CHARS).collect();
                    sheet.write_string(row, col, cut)?;
                    truncated.push(TruncatedField {
                        id: branch.id,
                        column: HEADERS[col as usize],
                        original_chars: chars,
                    });
                } else {
                    sheet.write_string(row, col, value)?;
                }
            }
            row += 1;
        }
    }

    Ok((workbook.save_to_buffer()?, truncated))
}

fn write_headers(sheet: &mut Worksheet, format: &Format) -> Result<(), XlsxError> {
    for (col, header) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, format)?;
    }
    Ok(())
}

pub fn write_csv(branches: &[Branch]) -> Result<Vec<u8>, InterchangeError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADERS).map_err(InterchangeError::Csv)?;

    for branch in branches {
        writer
            .write_record([
                branch.id.to_string().as_str(),
                branch.name.as_deref().unwrap_or_default(),
                branch.location.as_deref().unwrap_or_default(),
                branch.manager.as_deref().unwrap_or_default(),
            ])
            .map_err(InterchangeError::Csv)?;
    }

    writer
        .into_inner()
        .map_err(|e| InterchangeError::Io(e.into_error()))
}
