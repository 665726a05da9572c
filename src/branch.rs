// Branch Record - the one entity this directory holds
//
// Identity is assigned by the store and never changes.
// Values (name, location, manager) are only ever replaced as a whole.

use serde::{Deserialize, Serialize};

/// Store-assigned identity (SQLite rowid, AUTOINCREMENT so never reused)
pub type BranchId = i64;

// ============================================================================
// MUTABLE FIELDS
// ============================================================================

/// The replaceable part of a branch record.
///
/// Every field is optional: a missing JSON key or an empty spreadsheet cell is
/// stored as NULL. Nothing here rejects an empty name; the import path reports
/// that as a warning instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFields {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub manager: Option<String>,
}

impl BranchFields {
    pub fn new(name: &str, location: &str, manager: &str) -> Self {
        BranchFields {
            name: Some(name.to_string()),
            location: Some(location.to_string()),
            manager: Some(manager.to_string()),
        }
    }

    /// True when no field carries a value
    pub fn is_blank(&self) -> bool {
        self.name.is_none() && self.location.is_none() && self.manager.is_none()
    }
}

// ============================================================================
// BRANCH RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub name: Option<String>,
    pub location: Option<String>,
    pub manager: Option<String>,
}

impl Branch {
    pub fn from_fields(id: BranchId, fields: BranchFields) -> Self {
        Branch {
            id,
            name: fields.name,
            location: fields.location,
            manager: fields.manager,
        }
    }

    pub fn fields(&self) -> BranchFields {
        BranchFields {
            name: self.name.clone(),
            location: self.location.clone(),
            manager: self.manager.clone(),
        }
    }
}
