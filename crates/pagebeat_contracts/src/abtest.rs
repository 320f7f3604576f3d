#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const TRAFFIC_COLUMNS: [&str; 3] = ["sessions", "visitors", "pageviews"];

/// Verdict attached to both variants of a resolved A/B pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    StillRunning,
    Significant,
    NoWinner,
}

impl Significance {
    pub fn as_str(self) -> &'static str {
        match self {
            Significance::StillRunning => "still_running",
            Significance::Significant => "significant",
            Significance::NoWinner => "no_winner",
        }
    }
}

/// One row of a metrics query result. Campaign-parameter columns are kept in
/// an ordered map so grouping keys are deterministic; the `winner`,
/// `significance` and `is_ab_test` fields are absent until the significance
/// engine writes them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitors: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pageviews: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_rate: Option<f64>,
    #[serde(default)]
    pub campaign: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significance: Option<Significance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ab_test: Option<bool>,
}

impl MetricsRow {
    pub fn traffic_only(sessions: Option<u64>, visitors: Option<u64>, pageviews: Option<u64>) -> Self {
        Self {
            sessions,
            visitors,
            pageviews,
            conversions: None,
            conversion_rate: None,
            campaign: BTreeMap::new(),
            winner: None,
            significance: None,
            is_ab_test: None,
        }
    }

    /// Traffic count: first non-null of sessions, visitors, pageviews in
    /// that priority order.
    pub fn hits(&self) -> Option<u64> {
        self.sessions.or(self.visitors).or(self.pageviews)
    }

    pub fn is_annotated(&self) -> bool {
        self.winner.is_some() || self.significance.is_some() || self.is_ab_test.is_some()
    }
}

/// Descriptor of the query that produced a row batch. The significance
/// engine only runs for campaign-conversion queries selecting a traffic
/// metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsQuery {
    pub select: Vec<String>,
    pub campaign_parameter_columns: Vec<String>,
    #[serde(default)]
    pub goal_conversion_query: bool,
}

impl MetricsQuery {
    pub fn selects_traffic_metric(&self) -> bool {
        self.select
            .iter()
            .any(|column| TRAFFIC_COLUMNS.contains(&column.as_str()))
    }

    pub fn is_campaign_conversion(&self) -> bool {
        self.goal_conversion_query && !self.campaign_parameter_columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_abtest_01_hits_prefer_sessions_then_visitors_then_pageviews() {
        let row = MetricsRow::traffic_only(Some(10), Some(20), Some(30));
        assert_eq!(row.hits(), Some(10));
        let row = MetricsRow::traffic_only(None, Some(20), Some(30));
        assert_eq!(row.hits(), Some(20));
        let row = MetricsRow::traffic_only(None, None, Some(30));
        assert_eq!(row.hits(), Some(30));
        let row = MetricsRow::traffic_only(None, None, None);
        assert_eq!(row.hits(), None);
    }

    #[test]
    fn at_abtest_02_query_gating_requires_traffic_and_campaign_conversion() {
        let query = MetricsQuery {
            select: vec!["bounces".to_string()],
            campaign_parameter_columns: vec!["utm_campaign".to_string()],
            goal_conversion_query: true,
        };
        assert!(!query.selects_traffic_metric());

        let query = MetricsQuery {
            select: vec!["visitors".to_string()],
            campaign_parameter_columns: Vec::new(),
            goal_conversion_query: true,
        };
        assert!(!query.is_campaign_conversion());

        let query = MetricsQuery {
            select: vec!["visitors".to_string(), "conversions".to_string()],
            campaign_parameter_columns: vec!["utm_campaign".to_string()],
            goal_conversion_query: true,
        };
        assert!(query.selects_traffic_metric());
        assert!(query.is_campaign_conversion());
    }

    #[test]
    fn at_abtest_03_significance_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Significance::StillRunning).unwrap(),
            "\"still_running\""
        );
        assert_eq!(Significance::NoWinner.as_str(), "no_winner");
    }
}
