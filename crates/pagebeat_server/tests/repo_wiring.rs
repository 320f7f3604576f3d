#![forbid(unsafe_code)]

//! End-to-end wiring: hits reconciled through the repository, then the
//! resulting campaign metrics annotated by the significance engine.

use std::collections::BTreeMap;

use pagebeat_contracts::abtest::{MetricsQuery, MetricsRow, Significance};
use pagebeat_contracts::hit::HitPayload;
use pagebeat_contracts::EpochMillis;
use pagebeat_server::{annotate_ab_tests, HitRepo, MemoryHitRepo};

fn initial_hit(url: &str, uid: &str, goals: Vec<u32>) -> HitPayload {
    HitPayload {
        url: url.to_string(),
        referrer_url: Some("https://search.example".to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
        device_resolution: Some("1920x1080".to_string()),
        time_on_page: 1_000,
        completed_goals: goals,
        uid: Some(uid.to_string()),
        fingerprint: None,
    }
}

fn uid(n: u8) -> String {
    format!("{:032x}", u128::from(n))
}

#[test]
fn visitor_journey_lands_as_one_session_with_two_pageviews() {
    let mut repo = MemoryHitRepo::new();
    let visitor = uid(1);

    let landing = repo
        .reconcile(
            &initial_hit("/landing?utm_content=variation-a", &visitor, vec![]),
            EpochMillis(1_000),
        )
        .unwrap();
    let checkout = repo
        .reconcile(
            &initial_hit("/checkout", &visitor, vec![4]),
            EpochMillis(120_000),
        )
        .unwrap();

    assert_eq!(landing.session_id, checkout.session_id);
    let session = &repo.sessions()[&landing.session_id];
    assert_eq!(session.pageview_count, 2);
    assert!(!session.is_bounce);
    assert_eq!(repo.stat_rows().len(), 2);
    assert_eq!(repo.stat_rows()[1].completed_goals, vec![4]);
}

#[test]
fn single_pageview_sessions_stay_bounces() {
    let mut repo = MemoryHitRepo::new();
    for n in 1..=3 {
        repo.reconcile(&initial_hit("/landing", &uid(n), vec![]), EpochMillis(1_000))
            .unwrap();
    }
    assert_eq!(repo.sessions().len(), 3);
    assert!(repo.sessions().values().all(|session| session.is_bounce));
}

#[test]
fn reconciled_campaign_rows_feed_the_significance_engine() {
    // Aggregation by campaign value, the shape a datatable query produces.
    let mut variant_rows: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    variant_rows.insert("variation-a".to_string(), (1_000, 100));
    variant_rows.insert("variation-b".to_string(), (1_000, 150));

    let mut rows: Vec<MetricsRow> = variant_rows
        .into_iter()
        .map(|(tag, (visitors, conversions))| {
            let mut row = MetricsRow::traffic_only(None, Some(visitors), None);
            row.conversions = Some(conversions);
            row.campaign.insert("utm_content".to_string(), tag);
            row
        })
        .collect();

    let query = MetricsQuery {
        select: vec!["visitors".to_string(), "conversions".to_string()],
        campaign_parameter_columns: vec!["utm_content".to_string()],
        goal_conversion_query: true,
    };
    annotate_ab_tests(&mut rows, &query);

    let winner = rows.iter().find(|row| row.winner == Some(true)).unwrap();
    assert_eq!(winner.campaign["utm_content"], "variation-b");
    assert!(rows
        .iter()
        .all(|row| row.significance == Some(Significance::Significant)));
}
