// End-to-end scoring scenarios: a session scoring against the simulated
// server, checked ball by ball against what a fresh snapshot would show.

mod common;

use std::time::Duration;

use common::{Harness, Sim};
use crease_app::messages::{Notice, ScorerCommand, UiUpdate};
use crease_app::scoring::delivery::{ExtraKind, WicketType};
use crease_app::scoring::dismissal::DismissalStep;
use crease_app::scoring::projection::{PendingAction, Phase};
use crease_app::scoring::snapshot::projection_from_snapshot;
use crease_core::ws_client::ChannelKind;

fn assert_matches_snapshot(h: &Harness) {
    let from_snapshot = projection_from_snapshot(h.sim_state());
    assert_eq!(
        h.session.projection().scoring_fields(),
        from_snapshot.scoring_fields(),
        "incremental projection drifted from the server snapshot"
    );
}

fn assert_distinct_ends(h: &Harness) {
    let p = h.session.projection();
    if let (Some(s), Some(n)) = (&p.striker, &p.non_striker) {
        assert_ne!(s.id, n.id, "striker and non-striker are the same player");
    }
}

async fn record_wicket(h: &mut Harness, wicket_type: WicketType) {
    h.cmd(ScorerCommand::BeginWicket { extra: None }).await;
    h.cmd(ScorerCommand::WicketType(wicket_type)).await;
    assert_eq!(h.deliver().await, 1, "wicket was not published: {:?}", h.notices());
}

// ===========================================================================
// Snapshot / incremental equivalence
// ===========================================================================

#[tokio::test]
async fn incremental_applies_match_snapshot_over_a_full_over() {
    let mut h = Harness::start(Sim::in_progress(20)).await;
    assert_matches_snapshot(&h);

    let deliveries = [
        (1, None),
        (0, None),
        (4, None),
        (1, Some(ExtraKind::Wide)),
        (2, Some(ExtraKind::Bye)),
        (0, Some(ExtraKind::NoBall)),
        (6, None),
        (1, Some(ExtraKind::LegBye)),
    ];
    for (runs, extra) in deliveries {
        h.ball(runs, extra).await;
        assert_matches_snapshot(&h);
        assert_distinct_ends(&h);
    }

    let p = h.session.projection();
    assert_eq!(p.completed_overs, 1);
    assert_eq!(p.legal_deliveries_in_current_over, 0);
    assert!(p.current_over_ball_log.is_empty());
    // 1 + 0 + 4 + 2 (wide) + 2 + 1 (no-ball) + 6 + 1
    assert_eq!(p.batting_team.score, 17);
    assert_eq!(h.session.pending_action(), Some(PendingAction::AwaitBowlerSelection));

    h.cmd(ScorerCommand::SelectBowler("b2".into())).await;
    assert_eq!(h.session.pending_action(), None);
    assert_eq!(h.session.projection().current_bowler.as_ref().map(|b| b.id.as_str()), Some("b2"));

    for runs in [2, 3, 0] {
        h.ball(runs, None).await;
        assert_matches_snapshot(&h);
    }
    assert_eq!(h.session.projection().overs().to_string(), "1.3");
}

#[tokio::test]
async fn incremental_applies_match_snapshot_through_a_wicket() {
    let mut h = Harness::start(Sim::in_progress(20)).await;
    h.ball(1, None).await;

    record_wicket(&mut h, WicketType::Bowled).await;
    assert_matches_snapshot(&h);
    assert_distinct_ends(&h);
    assert_eq!(h.session.projection().batting_team.wickets, 1);
    assert!(h.session.projection().striker.is_none());

    h.advance(Duration::from_secs(10)).await;
    h.cmd(ScorerCommand::SelectBatsman("a3".into())).await;
    assert_eq!(h.session.pending_action(), None);
    assert_matches_snapshot(&h);

    h.ball(2, None).await;
    assert_matches_snapshot(&h);
    let p = h.session.projection();
    assert_eq!(p.striker.as_ref().map(|b| (b.id.as_str(), b.runs)), Some(("a3", 2)));
}

#[tokio::test]
async fn delivery_counting_ignores_wides_and_no_balls() {
    let mut h = Harness::start(Sim::in_progress(20)).await;
    let extras = [
        Some(ExtraKind::Wide),
        None,
        Some(ExtraKind::NoBall),
        Some(ExtraKind::Wide),
        None,
        Some(ExtraKind::Bye),
    ];
    for extra in extras {
        h.ball(0, extra).await;
    }
    let p = h.session.projection();
    assert_eq!(p.legal_deliveries_in_current_over, 3);
    assert_eq!(p.completed_overs, 0);
    assert_eq!(p.current_over_ball_log, vec!["Wd", "0", "Nb", "Wd", "0", "0B"]);
    assert_matches_snapshot(&h);
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[tokio::test]
async fn scenario_a_last_ball_of_over_prompts_for_bowler() {
    let mut h = Harness::start(Sim::at(50, 19, 5)).await;
    assert_eq!(h.session.projection().overs().to_string(), "19.5");
    assert_eq!(h.session.pending_action(), None);

    h.ball(1, None).await;
    let p = h.session.projection();
    assert_eq!(p.completed_overs, 20);
    assert_eq!(p.legal_deliveries_in_current_over, 0);
    assert!(p.current_over_ball_log.is_empty());
    assert_eq!(p.pending_action, Some(PendingAction::AwaitBowlerSelection));
    assert_eq!(p.previous_bowler_id.as_deref(), Some("b1"));
    assert!(h
        .updates
        .contains(&UiUpdate::Pending(Some(PendingAction::AwaitBowlerSelection))));
}

#[tokio::test]
async fn scenario_a_final_over_needs_no_bowler() {
    let mut h = Harness::start(Sim::at(20, 19, 5)).await;
    h.ball(1, None).await;
    let p = h.session.projection();
    assert_eq!(p.completed_overs, 20);
    assert_eq!(p.pending_action, None);
}

#[tokio::test]
async fn scenario_b_wide_for_two() {
    let mut h = Harness::start(Sim::in_progress(20)).await;
    h.ball(1, None).await;
    let before = h.session.projection().clone();

    // One run taken plus the one-run penalty.
    h.cmd(ScorerCommand::Score {
        runs: 1,
        extra: Some(ExtraKind::Wide),
    })
    .await;
    let sent = h.published().pop().unwrap();
    assert!(sent.wide);
    assert_eq!(sent.runs, 1);
    h.deliver().await;

    let p = h.session.projection();
    assert_eq!(p.legal_deliveries_in_current_over, before.legal_deliveries_in_current_over);
    assert_eq!(p.batting_team.score, before.batting_team.score + 2);
    let faced = |p: &crease_app::scoring::projection::MatchProjection| {
        [&p.striker, &p.non_striker]
            .into_iter()
            .flatten()
            .map(|b| (b.id.clone(), b.balls))
            .collect::<std::collections::BTreeMap<_, _>>()
    };
    assert_eq!(faced(p), faced(&before));
    assert_eq!(p.current_over_ball_log.last().map(String::as_str), Some("2Wd"));
}

#[tokio::test]
async fn scenario_c_run_out_of_non_striker() {
    let mut h = Harness::start(Sim::in_progress(20)).await;

    h.cmd(ScorerCommand::BeginWicket { extra: None }).await;
    assert_eq!(
        h.session.pending_action(),
        Some(PendingAction::AwaitDismissalDetail(DismissalStep::SelectWicketType))
    );
    h.cmd(ScorerCommand::WicketType(WicketType::RunOut)).await;
    assert_eq!(
        h.session.pending_action(),
        Some(PendingAction::AwaitDismissalDetail(DismissalStep::SelectRunOutVictim))
    );

    // Only a batter at the crease can be run out.
    h.cmd(ScorerCommand::RunOutVictim("a9".into())).await;
    assert!(matches!(h.last_notice(), Some(Notice::Rejected(_))));
    assert_eq!(
        h.session.pending_action(),
        Some(PendingAction::AwaitDismissalDetail(DismissalStep::SelectRunOutVictim))
    );

    h.cmd(ScorerCommand::RunOutVictim("a2".into())).await;
    h.cmd(ScorerCommand::RunOutFielder {
        fielder_id: "b7".into(),
        runs: 1,
    })
    .await;

    let published = h.published();
    assert_eq!(published.len(), 1);
    let sent = &published[0];
    assert!(sent.wicket);
    assert_eq!(sent.wicket_type, Some(WicketType::RunOut));
    assert_eq!(sent.runs, 1);
    assert_eq!(sent.striker_id, "a1");
    assert_eq!(sent.run_out_getter_id.as_deref(), Some("a2"));
    assert_eq!(sent.run_out_maker_id.as_deref(), Some("b7"));
    assert_eq!(h.session.pending_action(), None);

    h.deliver().await;
    assert_matches_snapshot(&h);
    let p = h.session.projection();
    assert_eq!(p.batting_team.wickets, 1);
    assert!(p.has_vacancy());
    // Run outs are not the bowler's wicket.
    assert_eq!(p.current_bowler.as_ref().map(|b| b.wickets), Some(0));

    // The prompt waits for the wicket to settle; scoring is held meanwhile.
    assert_eq!(h.session.pending_action(), None);
    h.cmd(ScorerCommand::Score { runs: 0, extra: None }).await;
    assert!(matches!(h.last_notice(), Some(Notice::Rejected(m)) if m.contains("settling")));
    assert_eq!(h.published().len(), 1);

    h.advance(Duration::from_secs(9)).await;
    assert_eq!(h.session.pending_action(), None);
    h.advance(Duration::from_secs(1)).await;
    assert_eq!(h.session.pending_action(), Some(PendingAction::AwaitBatsmanSelection));
    assert!(h
        .updates
        .contains(&UiUpdate::Pending(Some(PendingAction::AwaitBatsmanSelection))));
}

#[tokio::test]
async fn caught_carries_catcher() {
    let mut h = Harness::start(Sim::in_progress(20)).await;
    h.cmd(ScorerCommand::BeginWicket { extra: None }).await;
    h.cmd(ScorerCommand::WicketType(WicketType::Caught)).await;
    assert_eq!(
        h.session.pending_action(),
        Some(PendingAction::AwaitDismissalDetail(DismissalStep::SelectCatcher))
    );
    h.cmd(ScorerCommand::Catcher("b4".into())).await;

    let sent = h.published().pop().unwrap();
    assert_eq!(sent.wicket_type, Some(WicketType::Caught));
    assert_eq!(sent.catcher_id.as_deref(), Some("b4"));
    assert!(sent.run_out_getter_id.is_none());
    assert_eq!(sent.runs, 0);
}

#[tokio::test]
async fn wicket_on_no_ball_keeps_extra_flag() {
    let mut h = Harness::start(Sim::in_progress(20)).await;
    h.cmd(ScorerCommand::BeginWicket {
        extra: Some(ExtraKind::NoBall),
    })
    .await;
    h.cmd(ScorerCommand::WicketType(WicketType::RunOut)).await;
    h.cmd(ScorerCommand::RunOutVictim("a1".into())).await;
    h.cmd(ScorerCommand::RunOutFielder {
        fielder_id: "b3".into(),
        runs: 0,
    })
    .await;
    let sent = h.published().pop().unwrap();
    assert!(sent.no_ball && sent.wicket);
    h.deliver().await;
    assert_eq!(h.session.projection().current_over_ball_log, vec!["NbW"]);
    assert_eq!(h.session.projection().legal_deliveries_in_current_over, 0);
}

#[tokio::test]
async fn tenth_wicket_does_not_prompt_for_batsman() {
    let mut sim = Sim::in_progress(20);
    sim.state.batting_team.wickets = 9;
    let mut h = Harness::start(sim).await;

    record_wicket(&mut h, WicketType::Lbw).await;
    assert_eq!(h.session.projection().batting_team.wickets, 10);
    assert!(!h.session.workflow().is_settling());
    h.advance(Duration::from_secs(30)).await;
    assert_eq!(h.session.pending_action(), None);
}

#[tokio::test]
async fn all_out_innings_matches_snapshot() {
    let mut sim = Sim::in_progress(20);
    sim.state.batting_team.wickets = 9;
    let mut h = Harness::start(sim).await;

    record_wicket(&mut h, WicketType::Bowled).await;
    assert_matches_snapshot(&h);
    assert_eq!(h.session.projection().pending_action, None);
    assert_eq!(projection_from_snapshot(h.sim_state()).pending_action, None);

    h.cmd(ScorerCommand::Resync).await;
    assert_eq!(h.session.projection().batting_team.wickets, 10);
    assert_eq!(h.session.pending_action(), None);
}

#[tokio::test]
async fn second_innings_ends_with_match_complete() {
    let mut sim = Sim::in_progress(20);
    sim.state.innings = 2;
    sim.state.target = Some(5);
    let mut h = Harness::start(sim).await;
    h.ball(4, None).await;

    h.broadcast(r#"{"eventName":"innings-complete","payload":{}}"#).await;
    assert_eq!(h.session.projection().phase, Phase::InningsInProgress);
    assert!(h.session.reconnect_allowed());
    assert!(!h.connector.latest(ChannelKind::Live).closed.load(std::sync::atomic::Ordering::SeqCst));
    assert!(!h.connector.latest(ChannelKind::Submit).closed.load(std::sync::atomic::Ordering::SeqCst));

    // No innings break follows the second innings.
    h.advance(Duration::from_secs(30)).await;
    assert!(!h.updates.contains(&UiUpdate::NextInningsPrompt));

    h.broadcast(r#"{"eventName":"match-complete","payload":{"result":"Tigers won by 1 run"}}"#)
        .await;
    assert_eq!(h.session.projection().phase, Phase::MatchComplete);
    assert!(h.updates.contains(&UiUpdate::MatchComplete {
        result: Some("Tigers won by 1 run".into())
    }));
    assert!(h.connector.latest(ChannelKind::Live).closed.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn scenario_d_match_complete_is_terminal() {
    let mut h = Harness::start(Sim::in_progress(20)).await;
    h.ball(4, None).await;

    h.broadcast(r#"{"eventName":"match-complete","payload":{"result":"Lions won by 5 runs"}}"#)
        .await;
    let p = h.session.projection().clone();
    assert_eq!(p.phase, Phase::MatchComplete);
    assert_eq!(p.result.as_deref(), Some("Lions won by 5 runs"));
    assert!(h.connector.latest(ChannelKind::Submit).closed.load(std::sync::atomic::Ordering::SeqCst));
    assert!(h.connector.latest(ChannelKind::Live).closed.load(std::sync::atomic::Ordering::SeqCst));
    assert!(!h.session.reconnect_allowed());
    assert!(h.updates.contains(&UiUpdate::MatchComplete {
        result: Some("Lions won by 5 runs".into())
    }));

    // Nothing after the final whistle changes the projection.
    h.broadcast(
        r#"{"eventName":"ball-update","payload":{"ball":{"runs":6},"striker":{"id":"a1","name":"A1"}}}"#,
    )
    .await;
    assert_eq!(h.session.projection(), &p);
    assert!(!h.session.is_stale());

    h.cmd(ScorerCommand::Score { runs: 1, extra: None }).await;
    assert!(matches!(h.last_notice(), Some(Notice::Retryable(_)) | Some(Notice::Rejected(_))));
    assert_eq!(h.published().len(), 1);
}

// ===========================================================================
// Invariants
// ===========================================================================

#[tokio::test]
async fn striker_and_non_striker_stay_distinct() {
    let mut h = Harness::start(Sim::in_progress(20)).await;
    h.broadcast(
        r#"{"eventName":"ball-update","payload":{
            "ball":{"runs":1},
            "striker":{"id":"a1","name":"A1","runs":1,"balls":1},
            "nonStriker":{"id":"a1","name":"A1","runs":1,"balls":1},
            "currentBowler":{"id":"b1","name":"B1","balls":1,"runs":1}
        }}"#,
    )
    .await;
    assert_distinct_ends(&h);
    let p = h.session.projection();
    assert!(p.non_striker.is_none());
    // A vacancy with no wicket asks for a batter straight away.
    assert_eq!(p.pending_action, Some(PendingAction::AwaitBatsmanSelection));
}

#[tokio::test]
async fn previous_over_bowler_is_never_offered() {
    let mut h = Harness::start(Sim::at(20, 3, 5)).await;
    h.ball(0, None).await;
    assert_eq!(h.session.pending_action(), Some(PendingAction::AwaitBowlerSelection));

    h.cmd(ScorerCommand::ListBowlers).await;
    let offered = h
        .updates
        .iter()
        .rev()
        .find_map(|u| match u {
            UiUpdate::SelectableBowlers(list) => Some(list.clone()),
            _ => None,
        })
        .expect("no bowler list");
    assert_eq!(offered.len(), 10);
    assert!(offered.iter().all(|b| b.id != "b1"));

    h.cmd(ScorerCommand::SelectBowler("b1".into())).await;
    assert!(matches!(h.last_notice(), Some(Notice::Rejected(m)) if m.contains("previous over")));
    assert!(!h.calls().iter().any(|c| c.starts_with("bowler")));
    assert_eq!(h.session.pending_action(), Some(PendingAction::AwaitBowlerSelection));

    h.cmd(ScorerCommand::SelectBowler("b5".into())).await;
    assert!(h.calls().contains(&"bowler m1 b5".to_string()));
    assert_eq!(h.session.pending_action(), None);
    h.ball(1, None).await;
    assert_eq!(
        h.session.projection().current_bowler.as_ref().map(|b| b.id.as_str()),
        Some("b5")
    );
}
