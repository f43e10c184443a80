// Snapshot loader: rebuild the whole projection from the data service's
// authoritative match state.

use crease_core::api::{FetchError, MatchDataService};
use crease_core::protocol::{BattingLineDto, BowlingLineDto, MatchStateDto, MatchStatus};
use tracing::{debug, info};

use super::delivery::{is_legal_token, BALLS_PER_OVER};
use super::projection::{
    distinct_ends, BattingLine, BowlerState, BowlingLine, InningsCard, MatchProjection,
    PendingAction, Phase,
};
use super::workflow::batters_remaining;

/// Fetch the match state and build a fresh projection from it.
pub async fn load_snapshot(
    service: &dyn MatchDataService,
    match_id: &str,
) -> Result<MatchProjection, FetchError> {
    let dto = service.fetch_match_state(match_id).await?;
    let projection = projection_from_snapshot(dto);
    info!(
        "Loaded snapshot for {}: {} {}/{} ({} ov), phase {}",
        projection.match_id,
        projection.batting_team.name,
        projection.batting_team.score,
        projection.batting_team.wickets,
        projection.overs(),
        projection.phase
    );
    Ok(projection)
}

/// Pure conversion from the wire snapshot, deriving the counters, phase and
/// pending action the server does not send.
pub fn projection_from_snapshot(dto: MatchStateDto) -> MatchProjection {
    let legal = dto
        .current_over
        .iter()
        .filter(|t| is_legal_token(t))
        .count() as u32;
    let (striker, non_striker) = distinct_ends(
        dto.striker.map(Into::into),
        dto.non_striker.map(Into::into),
    );
    let current_bowler: Option<BowlerState> = dto.current_bowler.map(Into::into);

    let mut projection = MatchProjection {
        match_id: dto.match_id,
        innings: dto.innings.max(1),
        total_overs: dto.total_overs,
        batting_team: dto.batting_team.into(),
        bowling_team: dto.bowling_team.into(),
        striker,
        non_striker,
        current_bowler,
        previous_bowler_id: dto.previous_bowler_id,
        completed_overs: dto.completed_overs,
        legal_deliveries_in_current_over: legal % BALLS_PER_OVER,
        current_over_ball_log: dto.current_over,
        first_innings: card(dto.first_innings_batting, dto.first_innings_bowling),
        second_innings: card(dto.second_innings_batting, dto.second_innings_bowling),
        phase: Phase::AwaitingFirstInnings,
        pending_action: None,
        target: dto.target,
        result: dto.result,
    };
    projection.phase = derive_phase(dto.status, &projection);
    projection.pending_action = derive_pending_action(&projection);
    debug!(
        "snapshot derived legal={} pending={:?}",
        projection.legal_deliveries_in_current_over, projection.pending_action
    );
    projection
}

fn card(batting: Vec<BattingLineDto>, bowling: Vec<BowlingLineDto>) -> InningsCard {
    InningsCard {
        batting: batting
            .into_iter()
            .map(|l| BattingLine {
                player_id: l.player_id,
                name: l.name,
                runs: l.runs,
                balls: l.balls,
                fours: l.fours,
                sixes: l.sixes,
                dismissal: l.dismissal,
            })
            .collect(),
        bowling: bowling
            .into_iter()
            .map(|l| BowlingLine {
                player_id: l.player_id,
                name: l.name,
                balls: l.balls,
                runs: l.runs,
                wickets: l.wickets,
                maidens: l.maidens,
            })
            .collect(),
    }
}

fn derive_phase(status: MatchStatus, p: &MatchProjection) -> Phase {
    match status {
        MatchStatus::NotStarted => Phase::AwaitingFirstInnings,
        MatchStatus::InningsBreak => Phase::InningsBreak,
        MatchStatus::Completed => Phase::MatchComplete,
        MatchStatus::InProgress => {
            if p.innings == 1 && p.total_overs > 0 && p.completed_overs >= p.total_overs {
                Phase::InningsBreak
            } else {
                Phase::InningsInProgress
            }
        }
    }
}

/// Batsman selection outranks bowler selection; dismissal detail is never
/// derived from a snapshot. A vacant end after the last wicket prompts for
/// nothing.
fn derive_pending_action(p: &MatchProjection) -> Option<PendingAction> {
    if p.phase != Phase::InningsInProgress {
        return None;
    }
    if p.has_vacancy() {
        return batters_remaining(p.batting_team.wickets).then_some(PendingAction::AwaitBatsmanSelection);
    }
    if !p.overs_remaining() {
        return None;
    }
    let over_boundary = p.completed_overs > 0 && p.current_over_ball_log.is_empty();
    // Once the next bowler is chosen the server reports them as current.
    let needs_bowler = match (&p.current_bowler, &p.previous_bowler_id) {
        (None, _) => true,
        (Some(b), Some(prev)) => over_boundary && &b.id == prev,
        (Some(_), None) => false,
    };
    needs_bowler.then_some(PendingAction::AwaitBowlerSelection)
}
