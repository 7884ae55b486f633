//! File ingestor: CSV / TSV / JSON bytes → ordered `RawRow`s.

use thiserror::Error;

use super::format::UploadFormat;
use super::types::RawRow;

pub const DEFAULT_MAX_ROWS: usize = 5_000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported file format: export the spreadsheet as CSV (UTF-8) and upload again")]
    UnsupportedFormat,

    #[error("File too large: {size} bytes exceeds {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("Too many rows: {count} exceeds the {max} row limit")]
    TooManyRows { count: usize, max: usize },

    #[error("File contains no data rows")]
    Empty,

    #[error("File is not valid UTF-8 text")]
    InvalidEncoding,

    #[error("File has no header row")]
    MissingHeader,

    #[error("Column '{0}' appears more than once")]
    DuplicateHeader(String),

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parse error: {0}")]
    Json(String),
}

#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub max_rows: usize,
    pub max_upload_bytes: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Header spellings seen in admin spreadsheets, mapped to canonical fields.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("lat", "latitude"),
    ("lng", "longitude"),
    ("lon", "longitude"),
    ("long", "longitude"),
    ("zip", "postal_code"),
    ("zip_code", "postal_code"),
    ("zipcode", "postal_code"),
    ("postcode", "postal_code"),
    ("state", "region"),
    ("province", "region"),
    ("url", "website"),
    ("web", "website"),
    ("telephone", "phone"),
    ("phone_number", "phone"),
    ("image", "image_url"),
    ("photo", "image_url"),
    ("opening_hours", "hours"),
    ("business_name", "name"),
    ("street", "address"),
    ("street_address", "address"),
];

/// Canonical name for a header cell: trimmed, lowercased, separators → `_`, aliases resolved.
pub fn canonical_field(header: &str) -> String {
    let normalized: String = header
        .trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();

    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(normalized)
}

/// Parse the upload into raw rows, enforcing size and row limits.
pub fn parse_rows(
    format: UploadFormat,
    bytes: &[u8],
    limits: &IngestLimits,
) -> Result<Vec<RawRow>, IngestError> {
    if bytes.len() > limits.max_upload_bytes {
        return Err(IngestError::TooLarge {
            size: bytes.len(),
            max: limits.max_upload_bytes,
        });
    }

    let text = std::str::from_utf8(bytes).map_err(|_| IngestError::InvalidEncoding)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let rows = match format {
        UploadFormat::Csv | UploadFormat::Tsv => {
            let delimiter = format.delimiter().ok_or(IngestError::UnsupportedFormat)?;
            parse_delimited(text, delimiter, limits)?
        }
        UploadFormat::Json => parse_json(text, limits)?,
        UploadFormat::Unsupported => return Err(IngestError::UnsupportedFormat),
    };

    if rows.is_empty() {
        return Err(IngestError::Empty);
    }

    tracing::debug!(format = format.as_str(), rows = rows.len(), "Seed file parsed");
    Ok(rows)
}

fn parse_delimited(
    text: &str,
    delimiter: u8,
    limits: &IngestLimits,
) -> Result<Vec<RawRow>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(canonical_field).collect();
    if headers.iter().all(String::is_empty) {
        return Err(IngestError::MissingHeader);
    }
    check_duplicate_headers(&headers)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record
            .position()
            .map(|p| physical_line(text.as_bytes(), p.byte()));

        let fields: Vec<(String, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_empty())
            .map(|(i, h)| (h.clone(), record.get(i).unwrap_or_default().to_string()))
            .collect();

        let row = RawRow {
            index: rows.len() + 1,
            line,
            fields,
        };
        if row.is_blank() {
            continue;
        }
        if rows.len() == limits.max_rows {
            return Err(IngestError::TooManyRows {
                count: rows.len() + 1,
                max: limits.max_rows,
            });
        }
        rows.push(row);
    }

    Ok(rows)
}

/// 1-based line of `offset`; the reader's own line count skips empty lines.
fn physical_line(bytes: &[u8], offset: u64) -> u64 {
    let end = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
    bytes[..end].iter().filter(|b| **b == b'\n').count() as u64 + 1
}

fn parse_json(text: &str, limits: &IngestLimits) -> Result<Vec<RawRow>, IngestError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| IngestError::Json(e.to_string()))?;
    let items = value
        .as_array()
        .ok_or_else(|| IngestError::Json("expected an array of objects".into()))?;

    let mut rows = Vec::new();
    for (position, item) in items.iter().enumerate() {
        let object = item.as_object().ok_or_else(|| {
            IngestError::Json(format!("element {} is not an object", position + 1))
        })?;

        let fields: Vec<(String, String)> = object
            .iter()
            .map(|(key, value)| (canonical_field(key), json_cell(value)))
            .collect();
        let keys: Vec<String> = fields.iter().map(|(k, _)| k.clone()).collect();
        check_duplicate_headers(&keys)?;

        let row = RawRow {
            index: rows.len() + 1,
            line: None,
            fields,
        };
        if row.is_blank() {
            continue;
        }
        if rows.len() == limits.max_rows {
            return Err(IngestError::TooManyRows {
                count: rows.len() + 1,
                max: limits.max_rows,
            });
        }
        rows.push(row);
    }

    Ok(rows)
}

fn json_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn check_duplicate_headers(headers: &[String]) -> Result<(), IngestError> {
    for (i, h) in headers.iter().enumerate() {
        if !h.is_empty() && headers[..i].contains(h) {
            return Err(IngestError::DuplicateHeader(h.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> IngestLimits {
        IngestLimits::default()
    }

    #[test]
    fn canonical_field_maps_aliases() {
        assert_eq!(canonical_field(" Lat "), "latitude");
        assert_eq!(canonical_field("LNG"), "longitude");
        assert_eq!(canonical_field("Zip Code"), "postal_code");
        assert_eq!(canonical_field("Opening-Hours"), "hours");
        assert_eq!(canonical_field("Category"), "category");
    }

    #[test]
    fn parses_csv_with_bom_and_aliases() {
        let csv = "\u{feff}Name,Category,City,Lat,Lng\nJoe's Pizza,restaurants,Springfield,39.78,-89.65\n";
        let rows = parse_rows(UploadFormat::Csv, csv.as_bytes(), &limits()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].line, Some(2));
        assert_eq!(rows[0].get("name"), Some("Joe's Pizza"));
        assert_eq!(rows[0].get("latitude"), Some("39.78"));
        assert_eq!(rows[0].get("longitude"), Some("-89.65"));
    }

    #[test]
    fn blank_rows_skipped_but_lines_tracked() {
        let csv = "name,city\nA,X\n,\n\nB,Y\n";
        let rows = parse_rows(UploadFormat::Csv, csv.as_bytes(), &limits()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].index, 2);
        assert_eq!(rows[1].get("name"), Some("B"));
        assert_eq!(rows[1].line, Some(5));
    }

    #[test]
    fn multiline_cells_and_crlf_keep_physical_lines() {
        let csv = "name,address\r\n\r\nA,\"1 High St\nUnit 2\"\r\nB,2 Low St\r\n";
        let rows = parse_rows(UploadFormat::Csv, csv.as_bytes(), &limits()).unwrap();
        assert_eq!(rows[0].line, Some(3));
        assert_eq!(rows[1].line, Some(5));
    }

    #[test]
    fn ragged_rows_pad_missing_cells() {
        let csv = "name,city,category\nA,X\nB,Y,cafes,extra\n";
        let rows = parse_rows(UploadFormat::Csv, csv.as_bytes(), &limits()).unwrap();
        assert_eq!(rows[0].get("category"), None);
        assert_eq!(rows[1].get("category"), Some("cafes"));
        assert_eq!(rows[1].fields.len(), 3);
    }

    #[test]
    fn quoted_cells_keep_commas() {
        let csv = "name,address\n\"Smith, Jones & Co\",\"1 High St, Unit 2\"\n";
        let rows = parse_rows(UploadFormat::Csv, csv.as_bytes(), &limits()).unwrap();
        assert_eq!(rows[0].get("name"), Some("Smith, Jones & Co"));
        assert_eq!(rows[0].get("address"), Some("1 High St, Unit 2"));
    }

    #[test]
    fn parses_tsv() {
        let tsv = "name\tcity\nA\tX, Y\n";
        let rows = parse_rows(UploadFormat::Tsv, tsv.as_bytes(), &limits()).unwrap();
        assert_eq!(rows[0].get("city"), Some("X, Y"));
    }

    #[test]
    fn parses_json_array_of_objects() {
        let json = r#"[{"name":"A","lat":1.5,"verified":true,"notes":null},{"name":"B"}]"#;
        let rows = parse_rows(UploadFormat::Json, json.as_bytes(), &limits()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("latitude"), Some("1.5"));
        assert_eq!(rows[0].get("verified"), Some("true"));
        assert_eq!(rows[0].get("notes"), None);
        assert_eq!(rows[0].line, None);
    }

    #[test]
    fn json_must_be_array_of_objects() {
        assert!(matches!(
            parse_rows(UploadFormat::Json, br#"{"name":"A"}"#, &limits()),
            Err(IngestError::Json(_))
        ));
        assert!(matches!(
            parse_rows(UploadFormat::Json, br#"[1, 2]"#, &limits()),
            Err(IngestError::Json(_))
        ));
    }

    #[test]
    fn duplicate_headers_rejected_after_aliasing() {
        let csv = "name,lat,latitude\nA,1,2\n";
        let err = parse_rows(UploadFormat::Csv, csv.as_bytes(), &limits()).unwrap_err();
        assert!(matches!(err, IngestError::DuplicateHeader(h) if h == "latitude"));
    }

    #[test]
    fn header_only_file_is_empty() {
        let err = parse_rows(UploadFormat::Csv, b"name,city\n", &limits()).unwrap_err();
        assert!(matches!(err, IngestError::Empty));
    }

    #[test]
    fn enforces_row_and_size_limits() {
        let small = IngestLimits {
            max_rows: 2,
            max_upload_bytes: 1024,
        };
        let csv = "name\nA\nB\nC\n";
        assert!(matches!(
            parse_rows(UploadFormat::Csv, csv.as_bytes(), &small),
            Err(IngestError::TooManyRows { count: 3, max: 2 })
        ));
        let json = r#"[{"name":"A"},{"name":"B"},{"name":"C"},{"name":"D"}]"#;
        assert!(matches!(
            parse_rows(UploadFormat::Json, json.as_bytes(), &small),
            Err(IngestError::TooManyRows { count: 3, max: 2 })
        ));

        let big = vec![b'a'; 2048];
        assert!(matches!(
            parse_rows(UploadFormat::Csv, &big, &small),
            Err(IngestError::TooLarge { size: 2048, max: 1024 })
        ));
    }

    #[test]
    fn rejects_invalid_utf8_and_unsupported() {
        assert!(matches!(
            parse_rows(UploadFormat::Csv, &[0x6E, 0xFF, 0x0A], &limits()),
            Err(IngestError::InvalidEncoding)
        ));
        assert!(matches!(
            parse_rows(UploadFormat::Unsupported, b"name\nA\n", &limits()),
            Err(IngestError::UnsupportedFormat)
        ));
    }
}
