//! Geocoding enrichment for rows that arrive without coordinates.
//!
//! Unique location strings are resolved once each, through the SQLite cache
//! first and then a rate-limited external geocoder with retry and backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine;
use rand::Rng;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::db::repository::{get_cached_geocode, put_cached_geocode};
use crate::models::{CoordinatesSource, GeoPoint};

use super::types::{IssueCode, RowIssue, ValidatedRow};

pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeocodeError {
    #[error("Geocoder unreachable: {0}")]
    Network(String),

    #[error("Geocoder rate limit hit")]
    RateLimited,

    #[error("Geocoder rejected the credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Geocoder returned HTTP {status}")]
    Http { status: u16 },

    #[error("Geocoder response unreadable: {0}")]
    Parse(String),
}

impl GeocodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited)
    }
}

/// Address → coordinates lookup. `Ok(None)` means the service found nothing.
pub trait Geocoder: Send + Sync {
    fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError>;
}

/// Geocoder endpoint plus the enrichment limits applied around it.
#[derive(Debug, Clone)]
pub struct GeocodeSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub qps: u32,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_lookups: usize,
    pub cache_ttl_days: i64,
}

impl Default for GeocodeSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEOCODER_URL.to_string(),
            api_key: None,
            user_agent: format!("{}/{}", crate::config::APP_NAME, crate::config::APP_VERSION),
            timeout_secs: 10,
            qps: 1,
            max_attempts: 3,
            base_backoff_ms: 250,
            max_lookups: 500,
            cache_ttl_days: 30,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Nominatim client
// ═══════════════════════════════════════════════════════════

/// Blocking client for a Nominatim-compatible `/search` endpoint.
///
/// Must be created and dropped off the async runtime (inside `spawn_blocking`).
pub struct NominatimGeocoder {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(settings: &GeocodeSettings) -> Result<Self, GeocodeError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| GeocodeError::Network(e.to_string()))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        let url = format!("{}/search", self.base_url);
        let mut params = vec![("q", query), ("format", "jsonv2"), ("limit", "1")];
        if let Some(key) = self.api_key.as_deref() {
            params.push(("key", key));
        }

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .map_err(|e| GeocodeError::Network(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            429 | 503 => return Err(GeocodeError::RateLimited),
            401 | 402 | 403 => {
                return Err(GeocodeError::Unauthorized {
                    status: status.as_u16(),
                })
            }
            _ if !status.is_success() => {
                return Err(GeocodeError::Http {
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let places: Vec<NominatimPlace> = response
            .json()
            .map_err(|e| GeocodeError::Parse(e.to_string()))?;
        places.first().map(parse_place).transpose()
    }
}

fn parse_place(place: &NominatimPlace) -> Result<GeoPoint, GeocodeError> {
    let lat = place
        .lat
        .parse::<f64>()
        .map_err(|_| GeocodeError::Parse(format!("bad latitude '{}'", place.lat)))?;
    let lon = place
        .lon
        .parse::<f64>()
        .map_err(|_| GeocodeError::Parse(format!("bad longitude '{}'", place.lon)))?;
    Ok(GeoPoint::new(lat, lon))
}

// ═══════════════════════════════════════════════════════════
// Mock geocoder (tests and offline runs)
// ═══════════════════════════════════════════════════════════

/// Scripted geocoder. Unknown queries resolve to `Ok(None)`.
#[derive(Default)]
pub struct MockGeocoder {
    answers: HashMap<String, Result<Option<GeoPoint>, GeocodeError>>,
    transient_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_point(mut self, query: &str, latitude: f64, longitude: f64) -> Self {
        self.answers
            .insert(query.to_string(), Ok(Some(GeoPoint::new(latitude, longitude))));
        self
    }

    pub fn with_error(mut self, query: &str, error: GeocodeError) -> Self {
        self.answers.insert(query.to_string(), Err(error));
        self
    }

    /// The first `n` calls fail with a retryable network error.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Geocoder for MockGeocoder {
    fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(GeocodeError::Network("connection reset".into()));
        }
        self.answers.get(query).cloned().unwrap_or(Ok(None))
    }
}

// ═══════════════════════════════════════════════════════════
// Rate limiting and retry
// ═══════════════════════════════════════════════════════════

/// Enforces a minimum interval between outbound calls.
pub struct RateLimiter {
    min_interval: Duration,
    last_tick: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(qps: u32) -> Self {
        Self {
            min_interval: Self::interval(qps),
            last_tick: Mutex::new(None),
        }
    }

    fn interval(qps: u32) -> Duration {
        let safe_qps = qps.max(1);
        Duration::from_millis((1000_f64 / safe_qps as f64).ceil() as u64)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until the next call is allowed.
    pub fn wait(&self) {
        let mut guard = match self.last_tick.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        *guard = Some(Instant::now());
    }
}

/// Exponential backoff from `base_ms`, capped at 2^6, plus up to `base_ms` of jitter.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    let base = base_ms.saturating_mul(1 << exponent);
    let jitter = if base_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..base_ms)
    };
    Duration::from_millis(base + jitter)
}

fn lookup_with_retry(
    geocoder: &dyn Geocoder,
    limiter: &RateLimiter,
    query: &str,
    settings: &GeocodeSettings,
) -> Result<Option<GeoPoint>, GeocodeError> {
    let max_attempts = settings.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        limiter.wait();
        match geocoder.geocode(query) {
            Ok(point) => return Ok(point),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(attempt, settings.base_backoff_ms);
                tracing::warn!(
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Geocode lookup failed; retrying"
                );
                std::thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Enrichment
// ═══════════════════════════════════════════════════════════

/// Outcome counters for one enrichment run.
///
/// Row counts: `requested`, `resolved`, `not_found`, `failed`, `skipped`.
/// Query counts: `unique_queries`, `cache_hits`, `lookups`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeocodeSummary {
    pub requested: usize,
    pub unique_queries: usize,
    pub cache_hits: usize,
    pub lookups: usize,
    pub resolved: usize,
    pub not_found: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: Option<String>,
}

#[derive(Debug, Clone)]
enum QueryOutcome {
    Found(GeoPoint),
    NotFound,
    Failed(String),
    Unavailable,
    OverBudget,
}

/// Cache key: SHA-256 of the case- and whitespace-normalized query.
pub fn query_key(query: &str) -> String {
    let normalized = query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let hash = Sha256::digest(normalized.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// Fill in coordinates for rows that lack them. Rows are updated in place.
pub fn enrich_rows(
    rows: &mut [ValidatedRow],
    geocoder: &dyn Geocoder,
    cache: Option<&Connection>,
    settings: &GeocodeSettings,
) -> GeocodeSummary {
    let mut summary = GeocodeSummary::default();

    // query key → (query text, row positions), in first-seen order
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (String, Vec<usize>)> = HashMap::new();
    for (pos, row) in rows.iter().enumerate() {
        if !row.wants_geocode() {
            continue;
        }
        let Some(query) = row.business.as_ref().and_then(|b| b.location_query()) else {
            continue;
        };
        summary.requested += 1;
        let key = query_key(&query);
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                (query, Vec::new())
            })
            .1
            .push(pos);
    }
    summary.unique_queries = order.len();
    if order.is_empty() {
        return summary;
    }

    let ttl = chrono::Duration::days(settings.cache_ttl_days.max(0));
    let limiter = RateLimiter::new(settings.qps);

    for key in &order {
        let Some((query, positions)) = groups.get(key) else {
            continue;
        };

        let outcome = resolve_query(
            key,
            query,
            geocoder,
            cache,
            &limiter,
            settings,
            ttl,
            &mut summary,
        );

        for &pos in positions {
            apply_outcome(&mut rows[pos], &outcome, &mut summary);
        }
    }

    tracing::info!(
        requested = summary.requested,
        unique = summary.unique_queries,
        cache_hits = summary.cache_hits,
        lookups = summary.lookups,
        resolved = summary.resolved,
        not_found = summary.not_found,
        failed = summary.failed,
        skipped = summary.skipped,
        "Geocoding enrichment complete"
    );
    summary
}

#[allow(clippy::too_many_arguments)]
fn resolve_query(
    key: &str,
    query: &str,
    geocoder: &dyn Geocoder,
    cache: Option<&Connection>,
    limiter: &RateLimiter,
    settings: &GeocodeSettings,
    ttl: chrono::Duration,
    summary: &mut GeocodeSummary,
) -> QueryOutcome {
    if summary.aborted.is_some() {
        return QueryOutcome::Unavailable;
    }

    if let Some(conn) = cache {
        match get_cached_geocode(conn, key, ttl) {
            Ok(Some(hit)) => {
                summary.cache_hits += 1;
                return match hit.point {
                    Some(point) => QueryOutcome::Found(point),
                    None => QueryOutcome::NotFound,
                };
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Geocode cache read failed"),
        }
    }

    if summary.lookups >= settings.max_lookups {
        return QueryOutcome::OverBudget;
    }
    summary.lookups += 1;

    let outcome = match lookup_with_retry(geocoder, limiter, query, settings) {
        Ok(Some(point)) if point.in_range() && !point.is_null_island() => {
            QueryOutcome::Found(point)
        }
        Ok(Some(point)) => {
            tracing::warn!(
                latitude = point.latitude,
                longitude = point.longitude,
                "Geocoder returned unusable coordinates"
            );
            QueryOutcome::NotFound
        }
        Ok(None) => QueryOutcome::NotFound,
        Err(err @ GeocodeError::Unauthorized { .. }) => {
            tracing::warn!(error = %err, "Geocoding aborted");
            summary.aborted = Some(err.to_string());
            return QueryOutcome::Unavailable;
        }
        Err(err) => {
            tracing::warn!(error = %err, "Geocode lookup gave up");
            return QueryOutcome::Failed(err.to_string());
        }
    };

    if let Some(conn) = cache {
        let point = match &outcome {
            QueryOutcome::Found(point) => Some(*point),
            _ => None,
        };
        if let Err(e) = put_cached_geocode(conn, key, query, point) {
            tracing::warn!(error = %e, "Geocode cache write failed");
        }
    }
    outcome
}

fn apply_outcome(row: &mut ValidatedRow, outcome: &QueryOutcome, summary: &mut GeocodeSummary) {
    match outcome {
        QueryOutcome::Found(point) => {
            if let Some(business) = row.business.as_mut() {
                business.set_coordinates(Some(*point), Some(CoordinatesSource::Geocoded));
            }
            summary.resolved += 1;
        }
        QueryOutcome::NotFound => {
            summary.not_found += 1;
            row.push(RowIssue::warning(
                "address",
                IssueCode::GeocodeNotFound,
                "geocoder found no match for this location",
            ));
        }
        QueryOutcome::Failed(message) => {
            summary.failed += 1;
            row.push(RowIssue::warning(
                "address",
                IssueCode::GeocodeFailed,
                format!("geocoding failed: {message}"),
            ));
        }
        QueryOutcome::Unavailable => {
            summary.failed += 1;
            row.push(RowIssue::warning(
                "address",
                IssueCode::GeocodeUnavailable,
                "geocoding unavailable for this run",
            ));
        }
        QueryOutcome::OverBudget => {
            summary.skipped += 1;
            row.push(RowIssue::warning(
                "address",
                IssueCode::GeocodeBudgetExceeded,
                "geocoding budget for this upload exhausted",
            ));
        }
    }
}
