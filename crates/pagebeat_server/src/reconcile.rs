#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use pagebeat_contracts::hit::{HitKind, HitPayload};
use pagebeat_contracts::{ContractViolation, EpochMillis, Validate};

/// Duplicate initial hits for the same identity and url inside this window
/// fold into the existing row instead of creating a new one.
pub const INITIAL_HIT_DEDUP_WINDOW_MS: u64 = 5_000;

/// A session with no activity for this long is closed; the next hit opens a
/// fresh one.
pub const SESSION_IDLE_TIMEOUT_MS: u64 = 30 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatRowId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    Contract(ContractViolation),
    IdentityMissing,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contract(violation) => write!(f, "hit failed contract validation: {violation:?}"),
            Self::IdentityMissing => write!(f, "hit carries neither uid nor fingerprint"),
        }
    }
}

impl std::error::Error for StoreError {}

/// One reconciled page view.
#[derive(Debug, Clone, PartialEq)]
pub struct StatRecord {
    pub row_id: StatRowId,
    pub session_id: SessionId,
    pub identity_key: String,
    pub url: String,
    pub referrer_url: Option<String>,
    pub user_agent: Option<String>,
    pub device_resolution: Option<String>,
    pub time_on_page_ms: u64,
    pub completed_goals: Vec<u32>,
    pub created_at: EpochMillis,
    pub updated_at: EpochMillis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub identity_key: String,
    pub first_seen: EpochMillis,
    pub last_seen: EpochMillis,
    pub pageview_count: u32,
    /// Exactly one page view so far. Cleared the moment a second page view
    /// lands on the session.
    pub is_bounce: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub row_id: StatRowId,
    pub session_id: SessionId,
    pub created: bool,
    pub deduplicated: bool,
}

/// Typed repository interface for hit reconciliation. The payload is
/// self-describing (identity + url + goals), which is all an implementation
/// needs for idempotent initial hits and session-keyed upserts.
pub trait HitRepo {
    fn reconcile(
        &mut self,
        hit: &HitPayload,
        received_at: EpochMillis,
    ) -> Result<ReconcileOutcome, StoreError>;

    fn stat_rows(&self) -> &[StatRecord];
    fn sessions(&self) -> &BTreeMap<SessionId, SessionRecord>;
}

/// In-memory reference implementation.
#[derive(Debug, Default)]
pub struct MemoryHitRepo {
    rows: Vec<StatRecord>,
    sessions: BTreeMap<SessionId, SessionRecord>,
    next_row_id: u64,
    next_session_id: u64,
}

impl MemoryHitRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_row_id(&mut self) -> StatRowId {
        self.next_row_id += 1;
        StatRowId(self.next_row_id)
    }

    fn allocate_session_id(&mut self) -> SessionId {
        self.next_session_id += 1;
        SessionId(self.next_session_id)
    }

    /// Identity upgrade: the visitor's fingerprint history is re-keyed onto
    /// the persistent uid so both halves count as one visitor.
    fn rekey_identity(&mut self, from: &str, to: &str) {
        for row in self.rows.iter_mut() {
            if row.identity_key == from {
                row.identity_key = to.to_string();
            }
        }
        for session in self.sessions.values_mut() {
            if session.identity_key == from {
                session.identity_key = to.to_string();
            }
        }
    }

    fn open_session(&mut self, identity_key: &str, received_at: EpochMillis) -> SessionId {
        let open = self
            .sessions
            .values()
            .filter(|session| session.identity_key == identity_key)
            .filter(|session| {
                received_at.saturating_since(session.last_seen) < SESSION_IDLE_TIMEOUT_MS
            })
            .map(|session| session.session_id)
            .next_back();
        if let Some(session_id) = open {
            return session_id;
        }
        let session_id = self.allocate_session_id();
        self.sessions.insert(
            session_id,
            SessionRecord {
                session_id,
                identity_key: identity_key.to_string(),
                first_seen: received_at,
                last_seen: received_at,
                pageview_count: 0,
                is_bounce: true,
            },
        );
        session_id
    }

    fn reconcile_initial(
        &mut self,
        hit: &HitPayload,
        identity_key: &str,
        received_at: EpochMillis,
    ) -> ReconcileOutcome {
        // Idempotent duplicate: same identity + url inside the window.
        let duplicate = self.rows.iter_mut().rev().find(|row| {
            row.identity_key == identity_key
                && row.url == hit.url
                && received_at.saturating_since(row.created_at) < INITIAL_HIT_DEDUP_WINDOW_MS
        });
        if let Some(row) = duplicate {
            row.time_on_page_ms += hit.time_on_page;
            merge_goals(&mut row.completed_goals, &hit.completed_goals);
            row.updated_at = received_at;
            let outcome = ReconcileOutcome {
                row_id: row.row_id,
                session_id: row.session_id,
                created: false,
                deduplicated: true,
            };
            let session_id = row.session_id;
            self.touch_session(session_id, received_at);
            return outcome;
        }

        let session_id = self.open_session(identity_key, received_at);
        let row_id = self.allocate_row_id();
        self.rows.push(StatRecord {
            row_id,
            session_id,
            identity_key: identity_key.to_string(),
            url: hit.url.clone(),
            referrer_url: hit.referrer_url.clone(),
            user_agent: hit.user_agent.clone(),
            device_resolution: hit.device_resolution.clone(),
            time_on_page_ms: hit.time_on_page,
            completed_goals: hit.completed_goals.clone(),
            created_at: received_at,
            updated_at: received_at,
        });
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.pageview_count += 1;
            session.is_bounce = session.pageview_count == 1;
            session.last_seen = received_at;
        }
        ReconcileOutcome {
            row_id,
            session_id,
            created: true,
            deduplicated: false,
        }
    }

    fn reconcile_update(
        &mut self,
        hit: &HitPayload,
        identity_key: &str,
        received_at: EpochMillis,
    ) -> ReconcileOutcome {
        let existing = self
            .rows
            .iter_mut()
            .rev()
            .find(|row| row.identity_key == identity_key && row.url == hit.url);
        if let Some(row) = existing {
            row.time_on_page_ms += hit.time_on_page;
            merge_goals(&mut row.completed_goals, &hit.completed_goals);
            row.updated_at = received_at;
            let outcome = ReconcileOutcome {
                row_id: row.row_id,
                session_id: row.session_id,
                created: false,
                deduplicated: false,
            };
            let session_id = row.session_id;
            self.touch_session(session_id, received_at);
            return outcome;
        }
        // Upsert: an update with no prior row still lands as a page view.
        self.reconcile_initial(hit, identity_key, received_at)
    }

    fn touch_session(&mut self, session_id: SessionId, received_at: EpochMillis) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.last_seen = received_at;
        }
    }
}

impl HitRepo for MemoryHitRepo {
    fn reconcile(
        &mut self,
        hit: &HitPayload,
        received_at: EpochMillis,
    ) -> Result<ReconcileOutcome, StoreError> {
        hit.validate().map_err(StoreError::Contract)?;
        let identity_key = match (&hit.uid, &hit.fingerprint) {
            (Some(uid), Some(fingerprint)) => {
                self.rekey_identity(fingerprint, uid);
                uid.clone()
            }
            (Some(uid), None) => uid.clone(),
            (None, Some(fingerprint)) => fingerprint.clone(),
            (None, None) => return Err(StoreError::IdentityMissing),
        };
        let outcome = match hit.inferred_kind() {
            HitKind::Initial => self.reconcile_initial(hit, &identity_key, received_at),
            HitKind::Update => self.reconcile_update(hit, &identity_key, received_at),
        };
        Ok(outcome)
    }

    fn stat_rows(&self) -> &[StatRecord] {
        &self.rows
    }

    fn sessions(&self) -> &BTreeMap<SessionId, SessionRecord> {
        &self.sessions
    }
}

fn merge_goals(existing: &mut Vec<u32>, incoming: &[u32]) {
    for goal in incoming {
        if !existing.contains(goal) {
            existing.push(*goal);
        }
    }
}
