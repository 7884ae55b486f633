//! Row validator: normalizes each raw row into a `NewBusiness` and classifies it.

use std::collections::HashMap;
use std::str::FromStr;

use rusqlite::Connection;

use crate::db::repository::list_categories;
use crate::db::DatabaseError;
use crate::models::{BusinessStatus, Category, CoordinatesSource, GeoPoint, NewBusiness};

use super::hours::parse_hours;
use super::normalize::{
    is_valid_slug, normalize_email, normalize_phone, normalize_text, normalize_website, slugify,
};
use super::types::{IssueCode, RawRow, RowIssue, Severity, ValidatedRow};

pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2000;

/// Canonical columns the validator reads. Anything else is reported once per row.
pub const KNOWN_FIELDS: &[&str] = &[
    "name",
    "slug",
    "category",
    "description",
    "address",
    "city",
    "region",
    "postal_code",
    "country",
    "latitude",
    "longitude",
    "phone",
    "email",
    "website",
    "image_url",
    "hours",
    "status",
];

// ═══════════════════════════════════════════════════════════
// Category catalog
// ═══════════════════════════════════════════════════════════

/// Category lookup by slug or display name, case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct CategoryCatalog {
    by_key: HashMap<String, String>,
}

impl CategoryCatalog {
    pub fn new(categories: Vec<Category>) -> Self {
        let mut by_key = HashMap::with_capacity(categories.len() * 2);
        for category in categories {
            by_key.insert(category.name.trim().to_lowercase(), category.slug.clone());
            by_key.insert(category.slug.to_lowercase(), category.slug);
        }
        Self { by_key }
    }

    pub fn load(conn: &Connection) -> Result<Self, DatabaseError> {
        Ok(Self::new(list_categories(conn)?))
    }

    /// Catalog slug for a cell value, if it names a known category.
    pub fn resolve(&self, value: &str) -> Option<&str> {
        let key = value.trim().to_lowercase();
        self.by_key
            .get(&key)
            .or_else(|| self.by_key.get(&slugify(&key)))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Reference data the validator checks rows against.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub catalog: CategoryCatalog,
}

impl ValidationContext {
    pub fn new(catalog: CategoryCatalog) -> Self {
        Self { catalog }
    }
}

// ═══════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════

pub fn validate_rows(rows: &[RawRow], ctx: &ValidationContext) -> Vec<ValidatedRow> {
    rows.iter().map(|row| validate_row(row, ctx)).collect()
}

pub fn validate_row(raw: &RawRow, ctx: &ValidationContext) -> ValidatedRow {
    let mut row = ValidatedRow::new(raw.index, raw.line);

    let name = check_name(raw, &mut row);
    let category = check_category(raw, ctx, &mut row);
    let city = raw.get("city").and_then(normalize_text);
    let slug = name
        .as_deref()
        .and_then(|n| check_slug(raw, n, city.as_deref(), &mut row));

    let mut business = NewBusiness {
        name: name.clone().unwrap_or_default(),
        slug: slug.clone().unwrap_or_default(),
        category: category.clone().unwrap_or_default(),
        address: raw.get("address").and_then(normalize_text),
        city,
        region: raw.get("region").and_then(normalize_text),
        postal_code: raw.get("postal_code").and_then(normalize_text),
        country: raw.get("country").and_then(normalize_text),
        ..Default::default()
    };

    if let Some(point) = check_coordinates(raw, &mut row) {
        business.set_coordinates(Some(point), Some(CoordinatesSource::Provided));
    }
    if business.coordinates().is_none() && business.address.is_none() && business.city.is_none() {
        row.push(RowIssue::error(
            "address",
            IssueCode::MissingLocation,
            "row needs coordinates, an address or a city",
        ));
    }

    business.status = check_status(raw, &mut row);
    business.description = check_description(raw, &mut row);
    business.phone = check_optional(raw, "phone", normalize_phone, IssueCode::InvalidPhone, &mut row);
    business.email = check_optional(raw, "email", normalize_email, IssueCode::InvalidEmail, &mut row);
    business.website =
        check_optional(raw, "website", normalize_website, IssueCode::InvalidWebsite, &mut row);
    business.image_url = check_optional(
        raw,
        "image_url",
        normalize_image_url,
        IssueCode::InvalidImageUrl,
        &mut row,
    );

    if let Some(text) = raw.get("hours") {
        match parse_hours(text) {
            Ok(hours) if !hours.is_empty() => business.hours = Some(hours),
            Ok(_) => {}
            Err(e) => row.push(RowIssue::warning(
                "hours",
                IssueCode::InvalidHours,
                format!("hours dropped: {e}"),
            )),
        }
    }

    check_unknown_columns(raw, &mut row);

    if name.is_some() && category.is_some() && slug.is_some() {
        row.business = Some(business);
    }
    row
}

fn check_name(raw: &RawRow, row: &mut ValidatedRow) -> Option<String> {
    let Some(name) = raw.get("name").and_then(normalize_text) else {
        row.push(RowIssue::error("name", IssueCode::MissingName, "name is required"));
        return None;
    };
    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        row.push(RowIssue::error(
            "name",
            IssueCode::NameLength,
            format!("name must be {MIN_NAME_LEN}-{MAX_NAME_LEN} characters, got {len}"),
        ));
        return None;
    }
    Some(name)
}

fn check_category(raw: &RawRow, ctx: &ValidationContext, row: &mut ValidatedRow) -> Option<String> {
    let Some(value) = raw.get("category") else {
        row.push(RowIssue::error(
            "category",
            IssueCode::MissingCategory,
            "category is required",
        ));
        return None;
    };
    match ctx.catalog.resolve(value) {
        Some(slug) => Some(slug.to_string()),
        None => {
            row.push(RowIssue::error(
                "category",
                IssueCode::UnknownCategory,
                format!("unknown category '{value}'"),
            ));
            None
        }
    }
}

fn check_slug(
    raw: &RawRow,
    name: &str,
    city: Option<&str>,
    row: &mut ValidatedRow,
) -> Option<String> {
    if let Some(given) = raw.get("slug") {
        let slug = given.to_lowercase();
        if is_valid_slug(&slug) {
            return Some(slug);
        }
        row.push(RowIssue::error(
            "slug",
            IssueCode::InvalidSlug,
            format!("slug '{given}' must be lowercase letters, digits and single dashes"),
        ));
        return None;
    }

    let source = match city {
        Some(city) => format!("{name} {city}"),
        None => name.to_string(),
    };
    let slug = slugify(&source);
    if slug.is_empty() {
        row.push(RowIssue::error(
            "slug",
            IssueCode::InvalidSlug,
            "no slug given and none could be derived from the name",
        ));
        return None;
    }
    Some(slug)
}

/// Parsed, range-checked coordinates. Partial or (0, 0) pairs are dropped with a warning.
fn check_coordinates(raw: &RawRow, row: &mut ValidatedRow) -> Option<GeoPoint> {
    let lat = parse_axis(raw, "latitude", 90.0, row);
    let lng = parse_axis(raw, "longitude", 180.0, row);

    match (raw.get("latitude"), raw.get("longitude")) {
        (None, None) => return None,
        (Some(_), None) | (None, Some(_)) => {
            row.push(RowIssue::warning(
                "latitude",
                IssueCode::PartialCoordinates,
                "only one of latitude/longitude given; both ignored",
            ));
            return None;
        }
        (Some(_), Some(_)) => {}
    }

    let point = GeoPoint::new(lat.flatten()?, lng.flatten()?);
    if point.is_null_island() {
        row.push(RowIssue::warning(
            "latitude",
            IssueCode::NullIsland,
            "coordinates (0, 0) look like a placeholder; ignored",
        ));
        return None;
    }
    Some(point)
}

/// `None` when the cell is absent, `Some(None)` when present but unusable.
fn parse_axis(raw: &RawRow, field: &str, bound: f64, row: &mut ValidatedRow) -> Option<Option<f64>> {
    let text = raw.get(field)?;
    let Ok(value) = f64::from_str(text) else {
        row.push(RowIssue::error(
            field,
            IssueCode::InvalidCoordinate,
            format!("{field} '{text}' is not a number"),
        ));
        return Some(None);
    };
    if !value.is_finite() || value.abs() > bound {
        row.push(RowIssue::error(
            field,
            IssueCode::CoordinateOutOfRange,
            format!("{field} {value} is outside [-{bound}, {bound}]"),
        ));
        return Some(None);
    }
    Some(Some(value))
}

fn check_status(raw: &RawRow, row: &mut ValidatedRow) -> BusinessStatus {
    let Some(value) = raw.get("status") else {
        return BusinessStatus::default();
    };
    match BusinessStatus::from_str(&value.to_lowercase()) {
        Ok(status) => status,
        Err(_) => {
            row.push(RowIssue::error(
                "status",
                IssueCode::UnknownStatus,
                format!(
                    "unknown status '{value}', expected one of {}",
                    BusinessStatus::values().join(", ")
                ),
            ));
            BusinessStatus::default()
        }
    }
}

fn check_description(raw: &RawRow, row: &mut ValidatedRow) -> Option<String> {
    let text = raw.get("description")?;
    if text.chars().count() <= MAX_DESCRIPTION_LEN {
        return Some(text.to_string());
    }
    row.push(RowIssue::warning(
        "description",
        IssueCode::DescriptionTruncated,
        format!("description truncated to {MAX_DESCRIPTION_LEN} characters"),
    ));
    Some(text.chars().take(MAX_DESCRIPTION_LEN).collect())
}

/// Optional contact field: normalized when valid, dropped with a warning otherwise.
fn check_optional(
    raw: &RawRow,
    field: &str,
    normalize: fn(&str) -> Option<String>,
    code: IssueCode,
    row: &mut ValidatedRow,
) -> Option<String> {
    let value = raw.get(field)?;
    let normalized = normalize(value);
    if normalized.is_none() {
        row.push(RowIssue::warning(
            field,
            code,
            format!("{field} '{value}' is invalid and was dropped"),
        ));
    }
    normalized
}

/// Image URLs must carry an explicit http(s) scheme.
fn normalize_image_url(s: &str) -> Option<String> {
    let lower = s.trim().to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return None;
    }
    normalize_website(s)
}

fn check_unknown_columns(raw: &RawRow, row: &mut ValidatedRow) {
    let unknown: Vec<&str> = raw
        .fields
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| !KNOWN_FIELDS.contains(name))
        .collect();
    if unknown.is_empty() {
        return;
    }
    row.push(RowIssue {
        field: None,
        severity: Severity::Warning,
        code: IssueCode::UnknownColumns,
        message: format!("ignored columns: {}", unknown.join(", ")),
    });
}
