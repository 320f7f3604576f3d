#![forbid(unsafe_code)]

//! Server-side core: reconciliation of incoming hits into stat rows and
//! sessions, and the A/B significance engine that annotates campaign
//! metrics after the fact.

pub mod reconcile;
pub mod significance;

pub use reconcile::{
    HitRepo, MemoryHitRepo, ReconcileOutcome, SessionId, SessionRecord, StatRecord, StatRowId,
    StoreError, INITIAL_HIT_DEDUP_WINDOW_MS, SESSION_IDLE_TIMEOUT_MS,
};
pub use significance::{
    annotate_ab_tests, FUTILITY_TRAFFIC_THRESHOLD, MINIMUM_EFFECT_SIZE, Z_SIGNIFICANCE_THRESHOLD,
};
