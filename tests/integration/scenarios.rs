//! End-to-end cycles through the scheduler with in-memory collaborators.

use std::time::Duration;

use guardian::types::AnomalyType;

use crate::mocks::{harness, harness_with_stop, milli, settle, wallet, Submission, INTERVAL};

const CRITICAL_DRAIN: &str = r#"{"riskScore": 91, "anomalyType": 5, "reasoning": "82% of balance moved in one transfer"}"#;

// ---------------------------------------------------------------------------
// Seeding and noise floor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_first_cycle_only_seeds_balances() {
    let a = wallet(0xa);
    let mut h = harness(&[a]);

    let report = h.scheduler.run_cycle().await;

    assert_eq!(report.cycle_number, 1);
    assert_eq!(report.wallets_checked, 1);
    assert_eq!(report.significant_deltas, 0);
    assert_eq!(h.reasoner.calls(), 0);
    let tracked = h.scheduler.wallets().get(&a).unwrap();
    assert_eq!(tracked.last_balance, Some(milli(10_000)));
    assert!(tracked.last_checked_at.is_some());
}

#[tokio::test]
async fn test_delta_below_epsilon_is_never_assessed() {
    let a = wallet(0xa);
    let mut h = harness(&[a]);
    h.scheduler.run_cycle().await;

    // 0.005 ETH, under the 0.01 ETH floor.
    h.chain.set_balance(a, milli(9_995));
    let report = h.scheduler.run_cycle().await;

    assert_eq!(report.significant_deltas, 0);
    assert_eq!(report.assessments, 0);
    assert_eq!(h.reasoner.calls(), 0);
    assert!(h.registry.submissions().is_empty());
    assert_eq!(h.scheduler.wallets().get(&a).unwrap().last_balance, Some(milli(9_995)));
}

#[tokio::test]
async fn test_delta_exactly_at_epsilon_is_significant() {
    let a = wallet(0xa);
    let mut h = harness(&[a]);
    h.scheduler.run_cycle().await;

    h.chain.set_balance(a, milli(9_990));
    let report = h.scheduler.run_cycle().await;

    assert_eq!(report.significant_deltas, 1);
    assert_eq!(h.reasoner.calls(), 1);
}

// ---------------------------------------------------------------------------
// Threshold and escalation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_critical_drain_reports_exactly_once() {
    let a = wallet(0xa);
    let b = wallet(0xb);
    let mut h = harness(&[a, b]);
    h.reasoner.reply_for(a, CRITICAL_DRAIN);
    h.scheduler.run_cycle().await;

    h.chain.set_balance(a, milli(1_800));
    let report = h.scheduler.run_cycle().await;

    assert_eq!(report.significant_deltas, 1);
    assert_eq!(report.escalations_started, 1);
    assert_eq!(h.reasoner.calls_for(b), 0);

    let prompt = h.reasoner.last_prompt().unwrap();
    assert!(prompt.contains("-8.2 ETH"), "prompt was: {prompt}");

    let settled = h.scheduler.drain().await;
    assert_eq!(settled.reports_confirmed, 1);
    assert_eq!(
        h.registry.submissions(),
        vec![Submission {
            wallet: a,
            anomaly_type: AnomalyType::HighRiskInteraction.code(),
            risk_score: 91,
        }]
    );
    assert_eq!(h.scheduler.wallets().get(&b).unwrap().last_balance, Some(milli(10_000)));
}

#[tokio::test]
async fn test_score_at_threshold_reports() {
    let a = wallet(0xa);
    let mut h = harness(&[a]);
    h.reasoner.reply_for(a, r#"{"riskScore": 50, "anomalyType": 1, "reasoning": "large"}"#);
    h.scheduler.run_cycle().await;

    h.chain.set_balance(a, milli(7_000));
    let report = h.scheduler.run_cycle().await;
    h.scheduler.drain().await;

    assert_eq!(report.escalations_started, 1);
    assert_eq!(h.registry.submissions().len(), 1);
    assert_eq!(h.registry.submissions()[0].anomaly_type, 1);
}

#[tokio::test]
async fn test_score_below_threshold_writes_nothing() {
    let a = wallet(0xa);
    let mut h = harness(&[a]);
    h.reasoner.reply_for(a, r#"{"riskScore": 49, "anomalyType": 1, "reasoning": "borderline"}"#);
    h.scheduler.run_cycle().await;

    h.chain.set_balance(a, milli(7_000));
    let report = h.scheduler.run_cycle().await;
    let settled = h.scheduler.drain().await;

    assert_eq!(report.assessments, 1);
    assert_eq!(report.escalations_started, 0);
    assert_eq!(settled.reports_confirmed, 0);
    assert!(h.registry.submissions().is_empty());
}

#[tokio::test]
async fn test_unparseable_reply_falls_back_without_report() {
    let a = wallet(0xa);
    let mut h = harness(&[a]);
    h.reasoner.reply_for(a, "I think this wallet looks risky, maybe 90?");
    h.scheduler.run_cycle().await;

    h.chain.set_balance(a, milli(100));
    let report = h.scheduler.run_cycle().await;
    h.scheduler.drain().await;

    assert_eq!(report.assessments, 1);
    assert_eq!(report.escalations_started, 0);
    assert_eq!(report.errors, 0);
    assert!(h.registry.submissions().is_empty());
}

#[tokio::test]
async fn test_reasoning_failure_falls_back_without_report() {
    let a = wallet(0xa);
    let mut h = harness(&[a]);
    h.reasoner.fail_for(a, "HTTP 503");
    h.scheduler.run_cycle().await;

    h.chain.set_balance(a, milli(100));
    let report = h.scheduler.run_cycle().await;
    h.scheduler.drain().await;

    assert_eq!(report.assessments, 1);
    assert_eq!(report.errors, 0);
    assert!(h.registry.submissions().is_empty());
}

#[tokio::test]
async fn test_out_of_range_score_is_clamped_before_submission() {
    let a = wallet(0xa);
    let mut h = harness(&[a]);
    h.reasoner.reply_for(
        a,
        "```json\n{\"riskScore\": 150, \"anomalyType\": 5, \"reasoning\": \"drained\"}\n```",
    );
    h.scheduler.run_cycle().await;

    h.chain.set_balance(a, milli(0));
    h.scheduler.run_cycle().await;
    h.scheduler.drain().await;

    let subs = h.registry.submissions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].risk_score, 100);
}

// ---------------------------------------------------------------------------
// Error isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_read_failure_skips_only_that_wallet() {
    let b = wallet(0xb);
    let c = wallet(0xc);
    let mut h = harness(&[b, c]);
    h.reasoner.reply_for(c, CRITICAL_DRAIN);
    h.scheduler.run_cycle().await;

    h.chain.set_balance(b, milli(1_000));
    h.chain.set_balance(c, milli(1_000));
    h.chain.fail_next_read(b);
    let report = h.scheduler.run_cycle().await;
    h.scheduler.drain().await;

    assert_eq!(report.errors, 1);
    assert_eq!(report.significant_deltas, 1);
    assert_eq!(h.reasoner.calls_for(b), 0);
    assert_eq!(h.registry.submissions().len(), 1);
    assert_eq!(h.registry.submissions()[0].wallet, c);

    // B keeps its old balance and is picked up on the next cycle.
    assert_eq!(h.scheduler.wallets().get(&b).unwrap().last_balance, Some(milli(10_000)));
    let next = h.scheduler.run_cycle().await;
    assert_eq!(next.errors, 0);
    assert_eq!(h.reasoner.calls_for(b), 1);
    assert_eq!(h.chain.reads_of(b), 3);
}

#[tokio::test]
async fn test_failed_submission_is_counted_and_retried_next_cycle() {
    let a = wallet(0xa);
    let mut h = harness(&[a]);
    h.reasoner.reply_for(a, CRITICAL_DRAIN);
    h.registry.fail_broadcast_for(a);
    h.scheduler.run_cycle().await;

    h.chain.set_balance(a, milli(5_000));
    let report = h.scheduler.run_cycle().await;
    assert_eq!(report.escalations_started, 1);

    let settled = h.scheduler.drain().await;
    assert_eq!(settled.reports_failed, 1);
    assert!(h.registry.submissions().is_empty());

    // The slot was released, so the next significant move escalates again.
    h.registry.clear_failures();
    h.chain.set_balance(a, milli(1_000));
    let retry = h.scheduler.run_cycle().await;
    assert_eq!(retry.escalations_started, 1);
    assert_eq!(retry.deduplicated, 0);
    let settled = h.scheduler.drain().await;
    assert_eq!(settled.reports_confirmed, 1);
}

// ---------------------------------------------------------------------------
// Per-wallet dedupe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pending_report_blocks_second_submission() {
    let d = wallet(0xd);
    let mut h = harness(&[d]);
    h.reasoner.reply_for(d, CRITICAL_DRAIN);
    h.registry.hold_confirmations();
    h.scheduler.run_cycle().await;

    h.chain.set_balance(d, milli(5_000));
    let first = h.scheduler.run_cycle().await;
    assert_eq!(first.escalations_started, 1);

    let registry = h.registry.clone();
    settle(|| registry.submissions().len() == 1).await;

    // Still unconfirmed: another high-risk move is assessed but not reported.
    h.chain.set_balance(d, milli(1_000));
    let second = h.scheduler.run_cycle().await;
    assert_eq!(second.assessments, 1);
    assert_eq!(second.escalations_started, 0);
    assert_eq!(second.deduplicated, 1);
    assert_eq!(h.scheduler.pending_escalations(), 1);
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.registry.submissions().len(), 1);

    h.registry.release_confirmations();
    let settled = h.scheduler.drain().await;
    assert_eq!(settled.reports_confirmed, 1);
    assert_eq!(h.scheduler.pending_escalations(), 0);
}

#[tokio::test]
async fn test_confirmed_report_is_reaped_by_next_cycle() {
    let d = wallet(0xd);
    let mut h = harness(&[d]);
    h.reasoner.reply_for(d, CRITICAL_DRAIN);
    h.scheduler.run_cycle().await;

    h.chain.set_balance(d, milli(5_000));
    h.scheduler.run_cycle().await;

    let registry = h.registry.clone();
    settle(|| registry.submissions().len() == 1).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let report = h.scheduler.run_cycle().await;
    assert_eq!(report.reports_confirmed, 1);
    assert_eq!(h.scheduler.pending_escalations(), 0);
}

#[tokio::test]
async fn test_other_wallets_proceed_while_one_report_waits() {
    let d = wallet(0xd);
    let e = wallet(0xe);
    let mut h = harness(&[d, e]);
    h.reasoner.reply_for(d, CRITICAL_DRAIN);
    h.reasoner.reply_for(e, CRITICAL_DRAIN);
    h.registry.hold_confirmations();
    h.scheduler.run_cycle().await;

    h.chain.set_balance(d, milli(5_000));
    h.scheduler.run_cycle().await;

    h.chain.set_balance(e, milli(5_000));
    let report = h.scheduler.run_cycle().await;
    assert_eq!(report.escalations_started, 1);
    assert_eq!(report.deduplicated, 0);

    let registry = h.registry.clone();
    settle(|| registry.submissions().len() == 2).await;
    h.registry.release_confirmations();
    let settled = h.scheduler.drain().await;
    assert_eq!(settled.reports_confirmed, 2);
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_sleeps_interval_between_cycles_and_stops_on_shutdown() {
    let a = wallet(0xa);
    let mut h = harness_with_stop(&[a], 2);
    let clock = h.clock.clone();

    h.scheduler.run(clock.stop.notified()).await;

    assert_eq!(h.scheduler.cycles_completed(), 2);
    assert_eq!(clock.sleeps(), vec![INTERVAL, INTERVAL]);
    assert_eq!(h.chain.reads_of(a), 2);
}

#[tokio::test]
async fn test_run_settles_in_flight_reports_before_returning() {
    let a = wallet(0xa);
    let mut h = harness_with_stop(&[a], 1);
    h.reasoner.reply_for(a, CRITICAL_DRAIN);
    h.scheduler.run_cycle().await;

    h.chain.set_balance(a, milli(1_800));
    let clock = h.clock.clone();
    let settled =
        tokio::time::timeout(Duration::from_secs(5), h.scheduler.run(clock.stop.notified()))
            .await
            .unwrap();

    assert_eq!(settled.reports_confirmed, 1);
    assert_eq!(settled.reports_failed, 0);
    assert_eq!(h.scheduler.cycles_completed(), 2);
    assert_eq!(h.scheduler.pending_escalations(), 0);
    assert_eq!(h.registry.submissions().len(), 1);
}
