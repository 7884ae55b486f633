//! Field normalization shared by the row validator and duplicate index.

use std::sync::LazyLock;

use regex::Regex;

/// Longest slug accepted by the listing URLs.
pub const MAX_SLUG_LEN: usize = 120;

static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap());

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)+$")
        .unwrap()
});

/// Street-type words folded to one spelling so "Main Street" == "Main St".
const STREET_ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("av", "ave"),
    ("road", "rd"),
    ("boulevard", "blvd"),
    ("drive", "dr"),
    ("lane", "ln"),
    ("place", "pl"),
    ("court", "ct"),
    ("highway", "hwy"),
    ("suite", "ste"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
];

/// Trim and collapse interior whitespace; blank becomes `None`.
pub fn normalize_text(s: &str) -> Option<String> {
    let joined = s.split_whitespace().collect::<Vec<_>>().join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// ASCII fold for the Latin-1 / Latin Extended-A letters we see in business names.
fn fold_char(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'č' => "c",
        'ď' | 'đ' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'ī' => "i",
        'ł' => "l",
        'ñ' | 'ń' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'œ' => "oe",
        'ř' => "r",
        'ś' | 'š' | 'ş' => "s",
        'ß' => "ss",
        'ť' | 'ţ' => "t",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'ý' | 'ÿ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(folded)
}

/// Lowercase, fold diacritics, map `&` to `and`, keep only ASCII alphanumerics;
/// every other run of characters becomes a single separator.
fn fold_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();

    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            current.push(c);
        } else if let Some(folded) = fold_char(c) {
            current.push_str(folded);
        } else if c == '\'' || c == '’' {
            // "Joe's" → "joes"
        } else {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            if c == '&' {
                words.push("and".to_string());
            }
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// URL slug: lowercase ASCII words joined by `-`, capped at `MAX_SLUG_LEN`.
pub fn slugify(s: &str) -> String {
    let mut slug = fold_words(s).join("-");
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}

pub fn is_valid_slug(s: &str) -> bool {
    s.len() <= MAX_SLUG_LEN && SLUG_PATTERN.is_match(s)
}

/// Keep digits and a leading `+`; valid numbers have 7–15 digits (E.164 bound).
pub fn normalize_phone(s: &str) -> Option<String> {
    let trimmed = s.trim();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(char::is_ascii_digit));

    let digits = out.trim_start_matches('+').len();
    (7..=15).contains(&digits).then_some(out)
}

/// Default to https and require an http(s) URL with a host.
pub fn normalize_website(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return None;
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = reqwest::Url::parse(&candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    if !host.contains('.') && host != "localhost" {
        return None;
    }
    Some(url.to_string())
}

pub fn normalize_email(s: &str) -> Option<String> {
    let lower = s.trim().to_lowercase();
    EMAIL_PATTERN.is_match(&lower).then_some(lower)
}

/// Case-, accent- and punctuation-insensitive key for "same business, same place".
pub fn identity_key(name: &str, address: Option<&str>, city: Option<&str>) -> String {
    let name = fold_words(name).join(" ");
    let address = address
        .map(|a| {
            fold_words(a)
                .into_iter()
                .map(|w| {
                    STREET_ABBREVIATIONS
                        .iter()
                        .find(|(long, _)| *long == w)
                        .map(|(_, short)| short.to_string())
                        .unwrap_or(w)
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let city = city.map(|c| fold_words(c).join(" ")).unwrap_or_default();
    format!("{name}|{address}|{city}")
}
