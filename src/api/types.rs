//! Shared types for the admin API layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::core_state::CoreState;
use crate::seed::insert::InsertReport;
use crate::seed::PreparedBatch;

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
/// Wraps `CoreState` plus API-specific caches.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub sessions: Arc<Mutex<SeedSessionStore>>,
    /// SHA-256 of the configured admin token; `None` locks the admin routes.
    pub admin_token_hash: Option<[u8; 32]>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        let config = &core.config;
        let rate_limiter = RateLimiter::new(config.rate_per_minute);
        let sessions = SeedSessionStore::new(config.session_ttl, config.max_sessions);
        let admin_token_hash = config.admin_token.as_deref().map(hash_token);

        Self {
            rate_limiter: Arc::new(Mutex::new(rate_limiter)),
            sessions: Arc::new(Mutex::new(sessions)),
            admin_token_hash,
            core,
        }
    }
}

/// Hash a bearer token string using SHA-256.
pub fn hash_token(token: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// Generate a random admin token (URL-safe base64, 32 bytes of entropy).
pub fn generate_token() -> String {
    use base64::Engine;
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ═══════════════════════════════════════════════════════════
// Rate limiter: per-client sliding window
// ═══════════════════════════════════════════════════════════

/// Per-client rate limiter with per-minute and per-hour limits.
pub struct RateLimiter {
    windows: HashMap<String, Vec<Instant>>,
    per_minute: u32,
    per_hour: u32,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            windows: HashMap::new(),
            per_minute: per_minute.max(1),
            per_hour: per_minute.max(1).saturating_mul(10),
        }
    }

    /// Check if a client is within rate limits. Returns `Ok(())` or
    /// `Err(retry_after_secs)` if exceeded.
    pub fn check(&mut self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        if self.windows.len() > 10_000 {
            self.windows
                .retain(|_, entries| entries.iter().any(|ts| now.duration_since(*ts) < Duration::from_secs(3600)));
        }
        let entries = self.windows.entry(key.to_string()).or_default();

        entries.retain(|ts| now.duration_since(*ts) < Duration::from_secs(3600));

        let last_minute = entries
            .iter()
            .filter(|ts| now.duration_since(**ts) < Duration::from_secs(60))
            .count() as u32;
        if last_minute >= self.per_minute {
            return Err(60);
        }

        if entries.len() as u32 >= self.per_hour {
            return Err(3600);
        }

        entries.push(now);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Seed sessions: prepared batches awaiting an insert decision
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Inserting,
    Inserted,
}

struct SeedSession {
    batch: Arc<PreparedBatch>,
    state: SessionState,
    report: Option<InsertReport>,
    created_at: Instant,
}

/// Snapshot of a stored session.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub batch: Arc<PreparedBatch>,
    pub state: SessionState,
    pub report: Option<InsertReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    NotFound,
    AlreadyInserted,
    InsertInProgress,
    /// Every slot holds a batch mid-insert, so nothing can be evicted.
    StoreFull,
}

/// In-memory batches keyed by id, expiring after `ttl`, at most `max` kept.
pub struct SeedSessionStore {
    sessions: HashMap<Uuid, SeedSession>,
    ttl: Duration,
    max: usize,
}

impl SeedSessionStore {
    pub fn new(ttl: Duration, max: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl,
            max: max.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Store a batch, evicting expired sessions and then the oldest idle one when full.
    /// Sessions mid-insert are never evicted; with only those left the batch is refused.
    pub fn insert(&mut self, batch: PreparedBatch) -> Result<Arc<PreparedBatch>, SessionError> {
        self.cleanup();
        while self.sessions.len() >= self.max {
            let oldest = self
                .sessions
                .iter()
                .filter(|(_, s)| s.state != SessionState::Inserting)
                .min_by_key(|(_, s)| s.created_at)
                .map(|(id, _)| *id);
            let Some(id) = oldest else {
                tracing::warn!(max = self.max, "Seed session store full of running inserts");
                return Err(SessionError::StoreFull);
            };
            tracing::info!(batch_id = %id, "Evicting seed session at capacity");
            self.sessions.remove(&id);
        }

        let batch = Arc::new(batch);
        self.sessions.insert(
            batch.batch_id,
            SeedSession {
                batch: batch.clone(),
                state: SessionState::Pending,
                report: None,
                created_at: Instant::now(),
            },
        );
        Ok(batch)
    }

    pub fn get(&mut self, id: &Uuid) -> Option<SessionView> {
        self.cleanup();
        self.sessions.get(id).map(|s| SessionView {
            batch: s.batch.clone(),
            state: s.state,
            report: s.report.clone(),
        })
    }

    /// Claim a pending batch for insertion.
    pub fn begin_insert(&mut self, id: &Uuid) -> Result<Arc<PreparedBatch>, SessionError> {
        self.cleanup();
        let session = self.sessions.get_mut(id).ok_or(SessionError::NotFound)?;
        match session.state {
            SessionState::Pending => {
                session.state = SessionState::Inserting;
                Ok(session.batch.clone())
            }
            SessionState::Inserting => Err(SessionError::InsertInProgress),
            SessionState::Inserted => Err(SessionError::AlreadyInserted),
        }
    }

    pub fn finish_insert(&mut self, id: &Uuid, report: InsertReport) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.state = SessionState::Inserted;
            session.report = Some(report);
        }
    }

    /// Release a claim after a failure that wrote nothing.
    pub fn abort_insert(&mut self, id: &Uuid) {
        if let Some(session) = self.sessions.get_mut(id) {
            if session.state == SessionState::Inserting {
                session.state = SessionState::Pending;
            }
        }
    }

    pub fn remove(&mut self, id: &Uuid) -> bool {
        self.sessions.remove(id).is_some()
    }

    fn cleanup(&mut self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.sessions
            .retain(|_, s| s.state == SessionState::Inserting || now.duration_since(s.created_at) < ttl);
    }
}
