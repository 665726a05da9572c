// Dataset Parser - untrusted spreadsheet → ordered row records
//
// Only the first sheet of a workbook is read. The first row is the header;
// each later row becomes a column → text map. Headers are trimmed, values are
// kept as written. Empty cells are dropped and fully blank rows are skipped.
// Nothing is mandatory at this stage.

use calamine::{open_workbook_auto, Data, Reader};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::branch::BranchFields;
use crate::error::InterchangeError;

pub const COLUMN_ID: &str = "id";
pub const COLUMN_NAME: &str = "name";
pub const COLUMN_LOCATION: &str = "location";
pub const COLUMN_MANAGER: &str = "manager";

// ============================================================================
// FORMAT DETECTION
// ============================================================================

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Xlsx,
    Xls,
    Ods,
    Csv,
}

impl DatasetFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xlsx" | "xlsm" => Some(DatasetFormat::Xlsx),
            "xls" => Some(DatasetFormat::Xls),
            "ods" => Some(DatasetFormat::Ods),
            "csv" => Some(DatasetFormat::Csv),
            _ => None,
        }
    }

    /// File extension calamine needs to pick the right reader
    pub fn extension(&self) -> &'static str {
        match self {
            DatasetFormat::Xlsx => "xlsx",
            DatasetFormat::Xls => "xls",
            DatasetFormat::Ods => "ods",
            DatasetFormat::Csv => "csv",
        }
    }

    /// Pick a format from the uploaded file name, falling back to the first
    /// bytes of the content when the name says nothing useful.
    pub fn detect(file_name: Option<&str>, head: &[u8]) -> Result<Self, InterchangeError> {
        if let Some(format) = file_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
        {
            return Ok(format);
        }

        if head.starts_with(ZIP_MAGIC) {
            Ok(DatasetFormat::Xlsx)
        } else if head.starts_with(OLE_MAGIC) {
            Ok(DatasetFormat::Xls)
        } else if std::str::from_utf8(head).is_ok() {
            Ok(DatasetFormat::Csv)
        } else {
            Err(InterchangeError::validation(
                "unrecognized file type: expected xlsx, xls, ods or csv",
            ))
        }
    }

    /// Detect from a file already on disk
    pub fn detect_path(path: &Path) -> Result<Self, InterchangeError> {
        let mut head = Vec::with_capacity(512);
        File::open(path)?.take(512).read_to_end(&mut head)?;
        Self::detect(path.file_name().and_then(|n| n.to_str()), utf8_prefix(&head))
    }
}

/// Trim a byte prefix so a multi-byte character cut at the boundary does not
/// make valid UTF-8 text look binary
pub fn utf8_prefix(head: &[u8]) -> &[u8] {
    match std::str::from_utf8(head) {
        Ok(_) => head,
        Err(e) if e.error_len().is_none() => &head[..e.valid_up_to()],
        Err(_) => head,
    }
}

// ============================================================================
// ROW RECORDS
// ============================================================================

/// One data row, keyed by lower-cased header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowRecord {
    /// 1-based line in the sheet (the header is line 1)
    pub row_number: usize,
    pub values: BTreeMap<String, String>,
}

impl RowRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(|s| s.as_str())
    }

    /// Extract the branch columns; anything else in the row is ignored,
    /// including an `id` column
    pub fn to_fields(&self) -> BranchFields {
        BranchFields {
            name: self.get(COLUMN_NAME).map(str::to_string),
            location: self.get(COLUMN_LOCATION).map(str::to_string),
            manager: self.get(COLUMN_MANAGER).map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// Sheet that was read (None for csv)
    pub sheet: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<RowRecord>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

// ============================================================================
// READERS
// ============================================================================

/// Parse a materialized upload. The file is only read; the caller may delete
/// it as soon as this returns.
pub fn read_dataset(path: &Path, format: DatasetFormat) -> Result<Dataset, InterchangeError> {
    match format {
        DatasetFormat::Csv => read_csv(path),
        DatasetFormat::Xlsx | DatasetFormat::Xls | DatasetFormat::Ods => read_workbook(path),
    }
}

fn read_workbook(path: &Path) -> Result<Dataset, InterchangeError> {
    let mut workbook = open_workbook_auto(path)?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| InterchangeError::validation("workbook has no worksheet"))?;

    let range = workbook.worksheet_range(&sheet)?;

    // the used range may not start at A1
    let first_line = range.start().map(|(row, _)| row as usize + 1).unwrap_or(1);

    let lines = range
        .rows()
        .enumerate()
        .map(|(i, cells)| (first_line + i, cells.iter().map(cell_text).collect::<Vec<_>>()));

    let mut dataset = build_dataset(lines);
    dataset.sheet = Some(sheet);
    Ok(dataset)
}

fn read_csv(path: &Path) -> Result<Dataset, InterchangeError> {
    let data = std::fs::read(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data.as_slice());

    let mut lines = Vec::new();
    let mut cursor = LineCursor::default();
    for record in reader.records() {
        let record =
            record.map_err(|e| InterchangeError::validation(format!("malformed csv: {}", e)))?;
        let start = record.position().map(|pos| pos.byte() as usize).unwrap_or(cursor.offset);
        let line = cursor.advance_to_record(&data, start);

        lines.push((
            line,
            record
                .iter()
                .map(|field| (!field.is_empty()).then(|| field.to_string()))
                .collect::<Vec<_>>(),
        ));
    }

    Ok(build_dataset(lines))
}

/// Tracks the physical line of each csv record. The reader reports the start
/// of a skipped run of blank lines as the record position, so the blank
/// lines are stepped over here before counting.
#[derive(Debug, Default)]
struct LineCursor {
    offset: usize,
    newlines: usize,
}

impl LineCursor {
    fn advance_to_record(&mut self, data: &[u8], start: usize) -> usize {
        let mut start = start.clamp(self.offset, data.len());
        while start < data.len() && matches!(data[start], b'\n' | b'\r') {
            start += 1;
        }

        self.newlines += data[self.offset..start].iter().filter(|&&b| b == b'\n').count();
        self.offset = start;
        self.newlines + 1
    }
}

/// (line number, cells) pairs → dataset. The first pair is the header.
fn build_dataset<I>(lines: I) -> Dataset
where
    I: IntoIterator<Item = (usize, Vec<Option<String>>)>,
{
    let mut lines = lines.into_iter();

    let Some((_, header)) = lines.next() else {
        return Dataset::default();
    };

    let columns: Vec<String> = header
        .into_iter()
        .map(|cell| cell.unwrap_or_default().trim().to_lowercase())
        .collect();

    let mut rows = Vec::new();
    for (line, cells) in lines {
        let mut values = BTreeMap::new();

        for (column, cell) in columns.iter().zip(cells) {
            let Some(value) = cell else { continue };
            if column.is_empty() {
                continue;
            }
            // duplicate header: first column wins
            values.entry(column.clone()).or_insert(value);
        }

        if values.is_empty() {
            continue;
        }

        rows.push(RowRecord {
            row_number: line,
            values,
        });
    }

    Dataset {
        sheet: None,
        columns,
        rows,
    }
}

fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.clone(),
        Data::Float(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", *v as i64),
        Data::Float(v) => v.to_string(),
        Data::Int(v) => v.to_string(),
        Data::Bool(v) => v.to_string(),
        other => other.to_string(),
    };

    (!text.is_empty()).then_some(text)
}
