// Bulk Import - apply parsed rows to the record store
//
// Every row becomes a NEW record (import is additive: no dedup, no upsert,
// an `id` column is ignored). Rows are applied in order, one autocommit
// create per row. A failed row is logged and collected; it never stops the
// batch and never rolls back earlier rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::branch::BranchId;
use crate::dataset::{read_dataset, DatasetFormat, RowRecord};
use crate::db::BranchRepository;
use crate::error::InterchangeError;

// ============================================================================
// IMPORT REPORT
// ============================================================================

/// A row whose create call failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row_number: usize,
    pub reason: String,
}

/// A row that was applied but looks suspicious
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowWarning {
    pub row_number: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_read: usize,
    pub applied: usize,
    pub created_ids: Vec<BranchId>,
    pub failed: Vec<RowFailure>,
    pub warnings: Vec<RowWarning>,
}

impl ImportReport {
    fn begin() -> Self {
        let now = Utc::now();
        ImportReport {
            batch_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            rows_read: 0,
            applied: 0,
            created_ids: Vec::new(),
            failed: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

// ============================================================================
// APPLY
// ============================================================================

/// Create one record per row. Never fails as a whole: per-row storage errors
/// land in `ImportReport::failed`.
pub fn apply_rows<R>(store: &R, rows: &[RowRecord]) -> ImportReport
where
    R: BranchRepository + ?Sized,
{
    let mut report = ImportReport::begin();
    let span = info_span!("import", batch_id = %report.batch_id);
    let _guard = span.enter();

    report.rows_read = rows.len();

    for row in rows {
        let fields = row.to_fields();

        if fields.name.is_none() {
            report.warnings.push(RowWarning {
                row_number: row.row_number,
                message: if fields.is_blank() {
                    "no name, location or manager; created an empty record".to_string()
                } else {
                    "missing name".to_string()
                },
            });
        }

        match store.create(&fields) {
            Ok(id) => {
                report.applied += 1;
                report.created_ids.push(id);
            }
            Err(e) => {
                warn!(row = row.row_number, error = %e, "failed to import row");
                report.failed.push(RowFailure {
                    row_number: row.row_number,
                    reason: e.to_string(),
                });
            }
        }
    }

    report.finished_at = Utc::now();
    info!(
        rows = report.rows_read,
        applied = report.applied,
        failed = report.failed.len(),
        warnings = report.warnings.len(),
        "import finished"
    );

    report
}

/// Parse a staged file and apply its rows. A parse failure is returned before
/// any row touches the store.
pub fn import_file<R>(
    store: &R,
    path: &Path,
    format: DatasetFormat,
) -> Result<ImportReport, InterchangeError>
where
    R: BranchRepository + ?Sized,
{
    let dataset = read_dataset(path, format)?;
    info!(
        sheet = dataset.sheet.as_deref().unwrap_or("-"),
        rows = dataset.len(),
        "dataset parsed"
    );

    Ok(apply_rows(store, &dataset.rows))
}
