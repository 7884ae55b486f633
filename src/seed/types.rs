use serde::Serialize;

use crate::models::NewBusiness;

use super::geocode::GeocodeSummary;

// ═══════════════════════════════════════════════════════════
// Ingested rows
// ═══════════════════════════════════════════════════════════

/// One untyped data row from the uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRow {
    /// 1-based position among data rows (header excluded).
    pub index: usize,
    /// Source line in the file, when the format has lines.
    pub line: Option<u64>,
    /// Canonical field name → cell text, in column order.
    pub fields: Vec<(String, String)>,
}

impl RawRow {
    /// Cell value for a canonical field, `None` when absent or blank.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.trim().is_empty())
    }
}

// ═══════════════════════════════════════════════════════════
// Issues and classification
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// Row classification: the worst severity among its issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    MissingName,
    NameLength,
    MissingCategory,
    UnknownCategory,
    InvalidSlug,
    InvalidCoordinate,
    CoordinateOutOfRange,
    PartialCoordinates,
    NullIsland,
    MissingLocation,
    UnknownStatus,
    InvalidPhone,
    InvalidEmail,
    InvalidWebsite,
    InvalidImageUrl,
    InvalidHours,
    DescriptionTruncated,
    UnknownColumns,
    Duplicate,
    GeocodeNotFound,
    GeocodeFailed,
    GeocodeUnavailable,
    GeocodeBudgetExceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowIssue {
    pub field: Option<String>,
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
}

impl RowIssue {
    pub fn error(field: &str, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.to_string()),
            severity: Severity::Error,
            code,
            message: message.into(),
        }
    }

    pub fn warning(field: &str, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.to_string()),
            severity: Severity::Warning,
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    ExistingSlug,
    ExistingIdentity,
    InFile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateOf {
    pub reason: DuplicateReason,
    /// Slug of the stored record (for `existing_*`).
    pub existing_slug: Option<String>,
    /// Index of the earlier row in the same file (for `in_file`).
    pub row_index: Option<usize>,
}

// ═══════════════════════════════════════════════════════════
// Validated rows
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedRow {
    pub index: usize,
    pub line: Option<u64>,
    pub status: RowStatus,
    /// Normalized listing; `None` when name or category were unusable.
    pub business: Option<NewBusiness>,
    pub issues: Vec<RowIssue>,
    pub duplicate_of: Option<DuplicateOf>,
}

impl ValidatedRow {
    pub fn new(index: usize, line: Option<u64>) -> Self {
        Self {
            index,
            line,
            status: RowStatus::Ok,
            business: None,
            issues: Vec::new(),
            duplicate_of: None,
        }
    }

    pub fn push(&mut self, issue: RowIssue) {
        self.issues.push(issue);
        self.recompute_status();
    }

    pub fn recompute_status(&mut self) {
        self.status = match self.issues.iter().map(|i| i.severity).max() {
            None => RowStatus::Ok,
            Some(Severity::Warning) => RowStatus::Warning,
            Some(Severity::Error) => RowStatus::Error,
        };
    }

    pub fn has_issue(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// Rows worth geocoding: writable, not a duplicate, no coordinates yet.
    pub fn wants_geocode(&self) -> bool {
        self.status != RowStatus::Error
            && self.duplicate_of.is_none()
            && self
                .business
                .as_ref()
                .is_some_and(|b| b.coordinates().is_none() && b.location_query().is_some())
    }
}

/// Per-status totals for a prepared batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub ok: usize,
    pub warning: usize,
    pub error: usize,
    pub duplicates: usize,
    pub geocode: Option<GeocodeSummary>,
}

impl ValidationSummary {
    pub fn from_rows(rows: &[ValidatedRow], geocode: Option<GeocodeSummary>) -> Self {
        let mut summary = Self {
            total: rows.len(),
            geocode,
            ..Default::default()
        };
        for row in rows {
            match row.status {
                RowStatus::Ok => summary.ok += 1,
                RowStatus::Warning => summary.warning += 1,
                RowStatus::Error => summary.error += 1,
            }
            if row.duplicate_of.is_some() {
                summary.duplicates += 1;
            }
        }
        summary
    }
}
