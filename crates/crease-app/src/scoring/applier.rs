// Event applier: fold one broadcast envelope into the projection.
//
// `apply` mutates the projection and returns the side effects the session
// must carry out (release the submission gate, close channels, schedule a
// timed transition). It never performs I/O itself.

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

use crease_core::protocol::{
    BallUpdatePayload, InningsCompletePayload, MatchCompletePayload, RawEnvelope,
    SecondInningsStartedPayload, EVENT_BALL_UPDATE, EVENT_INNINGS_COMPLETE,
    EVENT_MATCH_COMPLETE, EVENT_SECOND_INNINGS_STARTED,
};

use super::delivery::{dismissal_text, BallOutcome, BALLS_PER_OVER};
use super::projection::{
    distinct_ends, BatterState, BowlerState, InningsCard, MatchProjection, PendingAction, Phase,
};
use super::workflow::{advance, batters_remaining, needs_next_batsman, PhaseTrigger, TimedTransition};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("malformed envelope: missing {0}")]
    Malformed(&'static str),
    #[error("envelope is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("could not decode {event} payload: {source}")]
    Decode {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("match is complete; no further events are applied")]
    MatchComplete,
    #[error("ball-update for match {0} does not belong to this session")]
    OtherMatch(String),
}

/// A decoded broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    BallUpdate(BallUpdatePayload),
    InningsComplete(InningsCompletePayload),
    SecondInningsStarted(SecondInningsStartedPayload),
    MatchComplete(MatchCompletePayload),
    Unknown { event_name: String },
}

/// Work the session must do after an apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A ball was confirmed by the broadcast; the submission gate may open.
    ReleaseGate,
    Schedule(TimedTransition),
    Cancel(TimedTransition),
    DisableReconnect,
    CloseChannels,
    ShowNextInningsPrompt,
    MatchCompleted { result: Option<String> },
    Ignored { event_name: String },
}

pub fn decode_envelope(body: &str) -> Result<Envelope, ApplyError> {
    let raw: RawEnvelope = serde_json::from_str(body).map_err(ApplyError::InvalidJson)?;
    let event_name = raw.event_name.ok_or(ApplyError::Malformed("eventName"))?;
    let payload = raw.payload.ok_or(ApplyError::Malformed("payload"))?;

    fn payload_as<T: DeserializeOwned>(event: &str, v: serde_json::Value) -> Result<T, ApplyError> {
        serde_json::from_value(v).map_err(|source| ApplyError::Decode {
            event: event.to_string(),
            source,
        })
    }

    let envelope = match event_name.as_str() {
        EVENT_BALL_UPDATE => Envelope::BallUpdate(payload_as(&event_name, payload)?),
        EVENT_INNINGS_COMPLETE => Envelope::InningsComplete(payload_as(&event_name, payload)?),
        EVENT_SECOND_INNINGS_STARTED => {
            Envelope::SecondInningsStarted(payload_as(&event_name, payload)?)
        }
        EVENT_MATCH_COMPLETE => Envelope::MatchComplete(payload_as(&event_name, payload)?),
        _ => Envelope::Unknown { event_name },
    };
    Ok(envelope)
}

/// Apply one envelope. After `match-complete` every further call fails with
/// `ApplyError::MatchComplete` and leaves the projection untouched.
pub fn apply(p: &mut MatchProjection, envelope: Envelope) -> Result<Vec<Effect>, ApplyError> {
    if p.phase == Phase::MatchComplete {
        return Err(ApplyError::MatchComplete);
    }
    if let Envelope::BallUpdate(BallUpdatePayload {
        match_id: Some(id), ..
    }) = &envelope
    {
        if *id != p.match_id {
            return Err(ApplyError::OtherMatch(id.clone()));
        }
    }
    let effects = match envelope {
        Envelope::BallUpdate(payload) => apply_ball(p, payload),
        Envelope::InningsComplete(payload) => apply_innings_complete(p, payload),
        Envelope::SecondInningsStarted(payload) => apply_second_innings_started(p, payload),
        Envelope::MatchComplete(payload) => apply_match_complete(p, payload),
        Envelope::Unknown { event_name } => {
            warn!("Ignoring unrecognised broadcast event `{event_name}`");
            vec![Effect::Ignored { event_name }]
        }
    };
    Ok(effects)
}

/// Fire a delayed self-transition.
pub fn apply_transition(p: &mut MatchProjection, transition: TimedTransition) -> Vec<Effect> {
    match transition {
        TimedTransition::PromptNextBatsman => {
            if p.phase == Phase::InningsInProgress && p.has_vacancy() {
                debug!("wicket settled; prompting for next batsman");
                p.pending_action = Some(PendingAction::AwaitBatsmanSelection);
            }
            Vec::new()
        }
        TimedTransition::ShowNextInningsPrompt => {
            if p.phase == Phase::InningsBreak {
                vec![Effect::ShowNextInningsPrompt]
            } else {
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ball-update
// ---------------------------------------------------------------------------

fn apply_ball(p: &mut MatchProjection, payload: BallUpdatePayload) -> Vec<Effect> {
    let ball = payload.ball;
    let outcome = BallOutcome::from_ball(&ball);
    let mut effects = vec![Effect::ReleaseGate];

    if let Some(next) = advance(p.phase, PhaseTrigger::BallConfirmed) {
        p.phase = next;
    }

    let wickets_before = p.batting_team.wickets;
    let striker_before = p.striker.take();
    let non_striker_before = p.non_striker.take();

    // Team totals: authoritative when sent, derived otherwise.
    match payload.batting_team {
        Some(team) => p.batting_team = team.into(),
        None => {
            p.batting_team.score += outcome.runs;
            if outcome.wicket {
                p.batting_team.wickets += 1;
            }
        }
    }
    if let Some(team) = payload.bowling_team {
        p.bowling_team = team.into();
    }

    // Bowler figures.
    p.current_bowler = match payload.current_bowler {
        Some(b) => Some(b.into()),
        None => p.current_bowler.take().map(|mut b| {
            b.credit(&outcome, ball.wicket_type);
            b
        }),
    };

    // The ends as the server now reports them; `None` is a vacant end.
    let (striker, non_striker) = distinct_ends(
        payload.striker.map(BatterState::from),
        payload.non_striker.map(BatterState::from),
    );
    p.striker = striker;
    p.non_striker = non_striker;

    // Over log and counters.
    p.current_over_ball_log.push(outcome.token());
    let mut over_completed = false;
    if outcome.is_legal() {
        p.legal_deliveries_in_current_over += 1;
        if p.legal_deliveries_in_current_over == BALLS_PER_OVER {
            p.legal_deliveries_in_current_over = 0;
            p.completed_overs += 1;
            p.current_over_ball_log.clear();
            over_completed = true;
        }
    }

    // Scorecard.
    let at_crease = crease(p);
    let bowler_now = p.current_bowler.clone();
    let card = p.current_card_mut();
    for batter in &at_crease {
        card.upsert_batter(batter);
    }
    if let Some(bowler) = &bowler_now {
        card.upsert_bowler(bowler);
    }
    if outcome.wicket {
        record_wicket(
            card,
            &ball,
            &outcome,
            [striker_before.as_ref(), non_striker_before.as_ref()],
            &at_crease,
            bowler_now.as_ref(),
        );
    }

    if over_completed {
        p.previous_bowler_id = p.current_bowler.as_ref().map(|b| b.id.clone());
        info!(
            "Over {} complete: {} {}/{}",
            p.completed_overs, p.batting_team.name, p.batting_team.score, p.batting_team.wickets
        );
    }

    // Pending action. A new batter outranks a new bowler; after a wicket the
    // batter prompt waits for the settle delay.
    p.pending_action = None;
    if p.phase == Phase::InningsInProgress {
        if p.has_vacancy() {
            if !outcome.wicket && batters_remaining(p.batting_team.wickets) {
                p.pending_action = Some(PendingAction::AwaitBatsmanSelection);
            } else if needs_next_batsman(wickets_before) {
                effects.push(Effect::Schedule(TimedTransition::PromptNextBatsman));
            }
        } else if over_completed && p.overs_remaining() {
            p.pending_action = Some(PendingAction::AwaitBowlerSelection);
        }
    }

    debug!(
        "applied ball {} -> {} ov, pending {:?}",
        outcome.token(),
        p.overs(),
        p.pending_action
    );
    effects
}

fn crease(p: &MatchProjection) -> Vec<BatterState> {
    [&p.striker, &p.non_striker]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
}

/// Close the dismissed batter's line with their final figures and the
/// dismissal text.
fn record_wicket(
    card: &mut InningsCard,
    ball: &crease_core::protocol::BallDto,
    outcome: &BallOutcome,
    before: [Option<&BatterState>; 2],
    after: &[BatterState],
    bowler: Option<&BowlerState>,
) {
    let still_in = |id: &str| after.iter().any(|b| b.id == id);
    let dismissed_id = ball.dismissed_player_id.clone().or_else(|| {
        // Otherwise: whichever batter from before the ball is no longer in.
        before
            .iter()
            .flatten()
            .find(|b| !still_in(&b.id))
            .map(|b| b.id.clone())
    });
    let Some(dismissed_id) = dismissed_id else {
        warn!("wicket reported but dismissed batter could not be identified");
        return;
    };

    // Final figures for a batter who left the crease come from the
    // pre-ball line plus this delivery (only the striker faced it).
    if !still_in(&dismissed_id) {
        if let Some(b) = before[0].filter(|b| b.id == dismissed_id) {
            let mut finished = b.clone();
            finished.credit(outcome);
            card.upsert_batter(&finished);
        } else if let Some(b) = before[1].filter(|b| b.id == dismissed_id) {
            card.upsert_batter(b);
        }
    }

    let text = ball.dismissal_text.clone().or_else(|| {
        ball.wicket_type.map(|t| {
            let bowler_name = bowler.map(|b| b.name.as_str()).unwrap_or("?");
            dismissal_text(t, bowler_name, None)
        })
    });
    card.record_dismissal(&dismissed_id, text.unwrap_or_else(|| "out".to_string()));
}

// ---------------------------------------------------------------------------
// Lifecycle events
// ---------------------------------------------------------------------------

fn apply_innings_complete(p: &mut MatchProjection, payload: InningsCompletePayload) -> Vec<Effect> {
    if let Some(team) = payload.batting_team {
        p.batting_team = team.into();
    }
    if let Some(team) = payload.bowling_team {
        p.bowling_team = team.into();
    }
    if payload.striker.is_some() || payload.non_striker.is_some() {
        let (s, n) = distinct_ends(
            payload.striker.map(Into::into),
            payload.non_striker.map(Into::into),
        );
        p.striker = s;
        p.non_striker = n;
    }
    if let Some(bowler) = payload.current_bowler {
        p.current_bowler = Some(bowler.into());
    }
    let at_crease = crease(p);
    let bowler_now = p.current_bowler.clone();
    let card = p.current_card_mut();
    for batter in &at_crease {
        card.upsert_batter(batter);
    }
    if let Some(bowler) = &bowler_now {
        card.upsert_bowler(bowler);
    }
    if payload.target.is_some() {
        p.target = payload.target;
    }

    p.pending_action = None;
    info!(
        "Innings {} complete: {} {}/{}",
        p.innings, p.batting_team.name, p.batting_team.score, p.batting_team.wickets
    );

    match advance(p.phase, PhaseTrigger::InningsComplete { innings: p.innings }) {
        Some(next) => {
            p.phase = next;
            vec![
                Effect::Cancel(TimedTransition::PromptNextBatsman),
                Effect::DisableReconnect,
                Effect::CloseChannels,
                Effect::Schedule(TimedTransition::ShowNextInningsPrompt),
            ]
        }
        None => {
            // Second innings: the result arrives as match-complete on the
            // same subscription, so both channels stay up.
            debug!("innings-complete during {} (innings {}); awaiting match-complete", p.phase, p.innings);
            vec![Effect::Cancel(TimedTransition::PromptNextBatsman)]
        }
    }
}

fn apply_second_innings_started(
    p: &mut MatchProjection,
    payload: SecondInningsStartedPayload,
) -> Vec<Effect> {
    match advance(p.phase, PhaseTrigger::SecondInningsStarted) {
        Some(next) => p.phase = next,
        None => {
            warn!("second-innings-started received during {}", p.phase);
            p.phase = Phase::InningsInProgress;
        }
    }
    p.innings = 2;
    p.batting_team = payload.batting_team.into();
    p.bowling_team = payload.bowling_team.into();
    p.target = payload.target.or(p.target);
    p.striker = None;
    p.non_striker = None;
    p.current_bowler = None;
    p.previous_bowler_id = None;
    p.completed_overs = 0;
    p.legal_deliveries_in_current_over = 0;
    p.current_over_ball_log.clear();
    p.second_innings = InningsCard::default();
    // Openers are still to come.
    p.pending_action = Some(PendingAction::AwaitBatsmanSelection);
    info!("Second innings started, target {:?}", p.target);

    vec![Effect::Cancel(TimedTransition::ShowNextInningsPrompt)]
}

fn apply_match_complete(p: &mut MatchProjection, payload: MatchCompletePayload) -> Vec<Effect> {
    p.phase = Phase::MatchComplete;
    p.pending_action = None;
    if payload.result.is_some() {
        p.result = payload.result;
    }
    info!("Match complete: {}", p.result.as_deref().unwrap_or("no result given"));
    vec![
        Effect::DisableReconnect,
        Effect::CloseChannels,
        Effect::MatchCompleted {
            result: p.result.clone(),
        },
    ]
}
