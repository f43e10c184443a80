// The scorer's local view of the match.
//
// Only the snapshot loader and the event applier write to a
// `MatchProjection`. Everything else reads it.

use std::fmt;

use crease_core::protocol::{BatterDto, BowlerDto, PlayerRef, TeamDto};

use super::delivery::{BallOutcome, Overs, WicketType};
use super::dismissal::DismissalStep;

// ---------------------------------------------------------------------------
// Phase and pending action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    AwaitingFirstInnings,
    InningsInProgress,
    InningsBreak,
    MatchComplete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::AwaitingFirstInnings => "awaiting first innings",
            Phase::InningsInProgress => "innings in progress",
            Phase::InningsBreak => "innings break",
            Phase::MatchComplete => "match complete",
        };
        f.write_str(s)
    }
}

/// A prompt that must be answered before the next ball can be scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingAction {
    AwaitBowlerSelection,
    AwaitBatsmanSelection,
    AwaitDismissalDetail(DismissalStep),
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingAction::AwaitBowlerSelection => f.write_str("select next bowler"),
            PendingAction::AwaitBatsmanSelection => f.write_str("select next batsman"),
            PendingAction::AwaitDismissalDetail(step) => write!(f, "dismissal: {step}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Figures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TeamScore {
    pub id: String,
    pub name: String,
    pub score: u32,
    pub wickets: u32,
}

impl From<TeamDto> for TeamScore {
    fn from(t: TeamDto) -> Self {
        Self {
            id: t.id,
            name: t.name,
            score: t.score,
            wickets: t.wickets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatterState {
    pub id: String,
    pub name: String,
    pub runs: u32,
    pub balls: u32,
    pub fours: u32,
    pub sixes: u32,
}

impl BatterState {
    /// Credit one delivery faced by this batter.
    pub fn credit(&mut self, ball: &BallOutcome) {
        self.runs += ball.batter_runs();
        if ball.faces_ball() {
            self.balls += 1;
        }
        if ball.is_four() {
            self.fours += 1;
        }
        if ball.is_six() {
            self.sixes += 1;
        }
    }
}

impl From<BatterDto> for BatterState {
    fn from(b: BatterDto) -> Self {
        Self {
            id: b.id,
            name: b.name,
            runs: b.runs,
            balls: b.balls,
            fours: b.fours,
            sixes: b.sixes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BowlerState {
    pub id: String,
    pub name: String,
    /// Legal deliveries bowled this innings.
    pub balls: u32,
    pub runs: u32,
    pub wickets: u32,
    pub maidens: u32,
}

impl BowlerState {
    pub fn overs(&self) -> Overs {
        Overs::from_legal_balls(self.balls)
    }

    /// Credit one delivery bowled. Run outs do not count as the bowler's
    /// wicket.
    pub fn credit(&mut self, ball: &BallOutcome, wicket_type: Option<WicketType>) {
        self.runs += ball.bowler_conceded();
        if ball.is_legal() {
            self.balls += 1;
        }
        if ball.wicket && wicket_type.map_or(true, |t| t.credited_to_bowler()) {
            self.wickets += 1;
        }
    }
}

impl From<BowlerDto> for BowlerState {
    fn from(b: BowlerDto) -> Self {
        Self {
            id: b.id,
            name: b.name,
            balls: b.balls,
            runs: b.runs,
            wickets: b.wickets,
            maidens: b.maidens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BattingLine {
    pub player_id: String,
    pub name: String,
    pub runs: u32,
    pub balls: u32,
    pub fours: u32,
    pub sixes: u32,
    pub dismissal: Option<String>,
}

impl BattingLine {
    pub fn status(&self) -> &str {
        self.dismissal.as_deref().unwrap_or("not out")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BowlingLine {
    pub player_id: String,
    pub name: String,
    pub balls: u32,
    pub runs: u32,
    pub wickets: u32,
    pub maidens: u32,
}

/// Batting and bowling orders for one innings, in order of appearance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InningsCard {
    pub batting: Vec<BattingLine>,
    pub bowling: Vec<BowlingLine>,
}

impl InningsCard {
    /// Insert or refresh the line for a batter at the crease. An existing
    /// dismissal text is kept.
    pub fn upsert_batter(&mut self, batter: &BatterState) {
        match self.batting.iter_mut().find(|l| l.player_id == batter.id) {
            Some(line) => {
                line.name.clone_from(&batter.name);
                line.runs = batter.runs;
                line.balls = batter.balls;
                line.fours = batter.fours;
                line.sixes = batter.sixes;
            }
            None => self.batting.push(BattingLine {
                player_id: batter.id.clone(),
                name: batter.name.clone(),
                runs: batter.runs,
                balls: batter.balls,
                fours: batter.fours,
                sixes: batter.sixes,
                dismissal: None,
            }),
        }
    }

    pub fn upsert_bowler(&mut self, bowler: &BowlerState) {
        match self.bowling.iter_mut().find(|l| l.player_id == bowler.id) {
            Some(line) => {
                line.name.clone_from(&bowler.name);
                line.balls = bowler.balls;
                line.runs = bowler.runs;
                line.wickets = bowler.wickets;
                line.maidens = bowler.maidens;
            }
            None => self.bowling.push(BowlingLine {
                player_id: bowler.id.clone(),
                name: bowler.name.clone(),
                balls: bowler.balls,
                runs: bowler.runs,
                wickets: bowler.wickets,
                maidens: bowler.maidens,
            }),
        }
    }

    pub fn record_dismissal(&mut self, player_id: &str, text: String) {
        if let Some(line) = self.batting.iter_mut().find(|l| l.player_id == player_id) {
            line.dismissal = Some(text);
        }
    }
}

// ---------------------------------------------------------------------------
// MatchProjection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchProjection {
    pub match_id: String,
    /// 1 or 2.
    pub innings: u8,
    /// Over limit per innings.
    pub total_overs: u32,
    pub batting_team: TeamScore,
    pub bowling_team: TeamScore,
    pub striker: Option<BatterState>,
    pub non_striker: Option<BatterState>,
    pub current_bowler: Option<BowlerState>,
    /// Bowler of the last completed over; may not bowl the next one.
    pub previous_bowler_id: Option<String>,
    pub completed_overs: u32,
    /// 0..=5.
    pub legal_deliveries_in_current_over: u32,
    pub current_over_ball_log: Vec<String>,
    pub first_innings: InningsCard,
    pub second_innings: InningsCard,
    pub phase: Phase,
    pub pending_action: Option<PendingAction>,
    pub target: Option<u32>,
    pub result: Option<String>,
}

/// The fields that must agree between a snapshot load and the same balls
/// applied incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringFields {
    pub batting_team: TeamScore,
    pub bowling_team: TeamScore,
    pub striker: Option<BatterState>,
    pub non_striker: Option<BatterState>,
    pub current_bowler: Option<BowlerState>,
    pub completed_overs: u32,
    pub legal_deliveries_in_current_over: u32,
    pub current_over_ball_log: Vec<String>,
    pub phase: Phase,
}

impl MatchProjection {
    pub fn empty(match_id: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
            innings: 1,
            total_overs: 0,
            batting_team: TeamScore::default(),
            bowling_team: TeamScore::default(),
            striker: None,
            non_striker: None,
            current_bowler: None,
            previous_bowler_id: None,
            completed_overs: 0,
            legal_deliveries_in_current_over: 0,
            current_over_ball_log: Vec::new(),
            first_innings: InningsCard::default(),
            second_innings: InningsCard::default(),
            phase: Phase::AwaitingFirstInnings,
            pending_action: None,
            target: None,
            result: None,
        }
    }

    /// Overs bowled in the current innings.
    pub fn overs(&self) -> Overs {
        Overs {
            completed: self.completed_overs,
            balls: self.legal_deliveries_in_current_over,
        }
    }

    pub fn overs_remaining(&self) -> bool {
        self.completed_overs < self.total_overs
    }

    /// Either crease slot is vacant.
    pub fn has_vacancy(&self) -> bool {
        self.striker.is_none() || self.non_striker.is_none()
    }

    pub fn current_card_mut(&mut self) -> &mut InningsCard {
        if self.innings >= 2 {
            &mut self.second_innings
        } else {
            &mut self.first_innings
        }
    }

    /// Bowlers that may take the next over: every candidate except the one
    /// who bowled the over just completed.
    pub fn selectable_bowlers<'a>(&self, candidates: &'a [PlayerRef]) -> Vec<&'a PlayerRef> {
        candidates
            .iter()
            .filter(|p| Some(p.id.as_str()) != self.previous_bowler_id.as_deref())
            .collect()
    }

    pub fn scoring_fields(&self) -> ScoringFields {
        ScoringFields {
            batting_team: self.batting_team.clone(),
            bowling_team: self.bowling_team.clone(),
            striker: self.striker.clone(),
            non_striker: self.non_striker.clone(),
            current_bowler: self.current_bowler.clone(),
            completed_overs: self.completed_overs,
            legal_deliveries_in_current_over: self.legal_deliveries_in_current_over,
            current_over_ball_log: self.current_over_ball_log.clone(),
            phase: self.phase,
        }
    }

    /// One-line scoreboard, e.g. `Lions 57/2 (7.3 ov) | Asha* 30 (22) ...`.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{} {}/{} ({} ov)",
            self.batting_team.name,
            self.batting_team.score,
            self.batting_team.wickets,
            self.overs()
        );
        if let Some(target) = self.target {
            line.push_str(&format!(" target {target}"));
        }
        for (batter, mark) in [(&self.striker, "*"), (&self.non_striker, "")] {
            match batter {
                Some(b) => line.push_str(&format!(" | {}{} {} ({})", b.name, mark, b.runs, b.balls)),
                None => line.push_str(" | -"),
            }
        }
        if let Some(b) = &self.current_bowler {
            line.push_str(&format!(
                " | {} {}-{}-{}",
                b.name,
                b.overs(),
                b.runs,
                b.wickets
            ));
        }
        if !self.current_over_ball_log.is_empty() {
            line.push_str(&format!(" | this over: {}", self.current_over_ball_log.join(" ")));
        }
        line
    }
}

/// Keep the two ends distinct: if both name the same player the
/// non-striker's end is treated as vacant.
pub(crate) fn distinct_ends(
    striker: Option<BatterState>,
    non_striker: Option<BatterState>,
) -> (Option<BatterState>, Option<BatterState>) {
    match (&striker, &non_striker) {
        (Some(s), Some(n)) if s.id == n.id => {
            tracing::warn!("striker and non-striker both {}; treating non-striker end as vacant", s.id);
            (striker, None)
        }
        _ => (striker, non_striker),
    }
}
