#![forbid(unsafe_code)]

//! HTTP boundary around the server core. Request/response shapes live here;
//! the reconciliation and significance logic stays in `pagebeat_server`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use pagebeat_contracts::abtest::{MetricsQuery, MetricsRow};
use pagebeat_contracts::hit::HitPayload;
use pagebeat_contracts::EpochMillis;
use pagebeat_server::{annotate_ab_tests, HitRepo, MemoryHitRepo};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackAdapterResponse {
    pub status: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotateAdapterRequest {
    pub rows: Vec<MetricsRow>,
    pub query: MetricsQuery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotateAdapterResponse {
    pub status: String,
    pub rows: Vec<MetricsRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub stat_rows: usize,
    pub sessions: usize,
}

#[derive(Debug, Default)]
pub struct AdapterRuntime {
    repo: MemoryHitRepo,
}

impl AdapterRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, hit: HitPayload, received_at: EpochMillis) -> TrackAdapterResponse {
        match self.repo.reconcile(&hit, received_at) {
            Ok(outcome) => {
                log::debug!(
                    "hit reconciled: row={} session={} created={} deduplicated={}",
                    outcome.row_id.0,
                    outcome.session_id.0,
                    outcome.created,
                    outcome.deduplicated
                );
                TrackAdapterResponse {
                    status: "ok".to_string(),
                    outcome: "ACCEPTED".to_string(),
                    reason: None,
                }
            }
            Err(err) => TrackAdapterResponse {
                status: "error".to_string(),
                outcome: "REJECTED".to_string(),
                reason: Some(err.to_string()),
            },
        }
    }

    pub fn annotate(&self, request: AnnotateAdapterRequest) -> AnnotateAdapterResponse {
        let mut rows = request.rows;
        annotate_ab_tests(&mut rows, &request.query);
        AnnotateAdapterResponse {
            status: "ok".to_string(),
            rows,
        }
    }

    pub fn health(&self) -> AdapterHealthResponse {
        AdapterHealthResponse {
            status: "ok".to_string(),
            stat_rows: self.repo.stat_rows().len(),
            sessions: self.repo.sessions().len(),
        }
    }
}

pub fn wall_clock_now() -> EpochMillis {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    EpochMillis(since_epoch.as_millis() as u64)
}
