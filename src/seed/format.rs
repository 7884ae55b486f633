use serde::{Deserialize, Serialize};

/// Seed file formats the ingestor understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadFormat {
    Csv,
    Tsv,
    Json,
    Unsupported,
}

impl UploadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Json => "json",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }

    pub fn delimiter(&self) -> Option<u8> {
        match self {
            Self::Csv => Some(b','),
            Self::Tsv => Some(b'\t'),
            _ => None,
        }
    }
}

/// Spreadsheet containers (xlsx is a zip, legacy xls is OLE2).
const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

/// Detect the upload format from its name, falling back to content sniffing.
///
/// Binary spreadsheets are always `Unsupported`, whatever the extension claims.
pub fn detect_format(file_name: &str, bytes: &[u8]) -> UploadFormat {
    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
        return UploadFormat::Unsupported;
    }

    let by_name = mime_guess::from_path(file_name)
        .first_raw()
        .and_then(format_for_mime);
    if let Some(format) = by_name {
        return format;
    }

    sniff_content(bytes)
}

fn format_for_mime(mime: &str) -> Option<UploadFormat> {
    match mime {
        "text/csv" | "text/comma-separated-values" | "application/csv" => Some(UploadFormat::Csv),
        "text/tab-separated-values" => Some(UploadFormat::Tsv),
        "application/json" => Some(UploadFormat::Json),
        "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.oasis.opendocument.spreadsheet" => Some(UploadFormat::Unsupported),
        _ => None,
    }
}

fn sniff_content(bytes: &[u8]) -> UploadFormat {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return UploadFormat::Unsupported;
    };
    let text = text.trim_start_matches('\u{feff}').trim_start();

    if text.starts_with('[') || text.starts_with('{') {
        return UploadFormat::Json;
    }

    let header = text.lines().next().unwrap_or_default();
    let tabs = header.matches('\t').count();
    let commas = header.matches(',').count();
    if tabs > commas {
        UploadFormat::Tsv
    } else if commas > 0 || !header.is_empty() {
        UploadFormat::Csv
    } else {
        UploadFormat::Unsupported
    }
}
