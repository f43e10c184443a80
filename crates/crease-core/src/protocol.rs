// Wire types shared by the real-time channels and the data service.
//
// JSON field names are camelCase throughout, matching the scoring backend.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// Broadcast topic carrying every confirmed event for one match.
pub fn broadcast_topic(match_id: &str) -> String {
    format!("/topic/match/{match_id}")
}

/// Publish target for ball events of one match.
pub fn submit_destination(match_id: &str) -> String {
    format!("/app/match/{match_id}/ball")
}

// ---------------------------------------------------------------------------
// Ball vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtraKind {
    #[serde(rename = "wide")]
    Wide,
    #[serde(rename = "no-ball")]
    NoBall,
    #[serde(rename = "bye")]
    Bye,
    #[serde(rename = "leg-bye")]
    LegBye,
}

impl ExtraKind {
    /// Wides and no-balls are re-bowled and do not count toward the over.
    pub fn is_legal(self) -> bool {
        matches!(self, ExtraKind::Bye | ExtraKind::LegBye)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WicketType {
    Bowled,
    Caught,
    #[serde(rename = "LBW")]
    Lbw,
    Stumped,
    #[serde(rename = "Hit Wicket")]
    HitWicket,
    #[serde(rename = "Run Out")]
    RunOut,
}

impl WicketType {
    pub const ALL: [WicketType; 6] = [
        WicketType::Bowled,
        WicketType::Caught,
        WicketType::Lbw,
        WicketType::Stumped,
        WicketType::HitWicket,
        WicketType::RunOut,
    ];

    /// The wire label, e.g. `"Run Out"`.
    pub fn label(&self) -> &'static str {
        match self {
            WicketType::Bowled => "Bowled",
            WicketType::Caught => "Caught",
            WicketType::Lbw => "LBW",
            WicketType::Stumped => "Stumped",
            WicketType::HitWicket => "Hit Wicket",
            WicketType::RunOut => "Run Out",
        }
    }

    /// Parse a label case-insensitively; accepts `run-out`/`runout` and
    /// `hit-wicket` spellings as well.
    pub fn from_label(s: &str) -> Option<Self> {
        let norm: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match norm.as_str() {
            "bowled" => Some(WicketType::Bowled),
            "caught" => Some(WicketType::Caught),
            "lbw" => Some(WicketType::Lbw),
            "stumped" => Some(WicketType::Stumped),
            "hitwicket" => Some(WicketType::HitWicket),
            "runout" => Some(WicketType::RunOut),
            _ => None,
        }
    }

    /// Run outs are not credited to the bowler.
    pub fn credited_to_bowler(&self) -> bool {
        !matches!(self, WicketType::RunOut)
    }
}

impl fmt::Display for WicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Figures
// ---------------------------------------------------------------------------

/// A batter at the crease with running figures.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatterDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub runs: u32,
    #[serde(default)]
    pub balls: u32,
    #[serde(default)]
    pub fours: u32,
    #[serde(default)]
    pub sixes: u32,
}

/// The bowler in operation. `balls` counts legal deliveries only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BowlerDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub balls: u32,
    #[serde(default)]
    pub runs: u32,
    #[serde(default)]
    pub wickets: u32,
    #[serde(default)]
    pub maidens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDto {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub wickets: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattingLineDto {
    pub player_id: String,
    pub name: String,
    #[serde(default)]
    pub runs: u32,
    #[serde(default)]
    pub balls: u32,
    #[serde(default)]
    pub fours: u32,
    #[serde(default)]
    pub sixes: u32,
    /// Dismissal text (`c Smith b Jones`); absent means not out.
    #[serde(default)]
    pub dismissal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BowlingLineDto {
    pub player_id: String,
    pub name: String,
    #[serde(default)]
    pub balls: u32,
    #[serde(default)]
    pub runs: u32,
    #[serde(default)]
    pub wickets: u32,
    #[serde(default)]
    pub maidens: u32,
}

// ---------------------------------------------------------------------------
// Snapshot (GET matchstate/{matchId})
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    NotStarted,
    InProgress,
    InningsBreak,
    Completed,
}

/// Full authoritative match state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStateDto {
    pub match_id: String,
    pub status: MatchStatus,
    /// 1 or 2.
    #[serde(default = "first_innings")]
    pub innings: u8,
    pub total_overs: u32,
    pub batting_team: TeamDto,
    pub bowling_team: TeamDto,
    #[serde(default)]
    pub striker: Option<BatterDto>,
    #[serde(default)]
    pub non_striker: Option<BatterDto>,
    #[serde(default)]
    pub current_bowler: Option<BowlerDto>,
    /// Bowler of the last completed over; may not bowl the next one.
    #[serde(default)]
    pub previous_bowler_id: Option<String>,
    #[serde(default)]
    pub completed_overs: u32,
    /// Ball-outcome tokens of the over in progress.
    #[serde(default)]
    pub current_over: Vec<String>,
    #[serde(default)]
    pub first_innings_batting: Vec<BattingLineDto>,
    #[serde(default)]
    pub second_innings_batting: Vec<BattingLineDto>,
    #[serde(default)]
    pub first_innings_bowling: Vec<BowlingLineDto>,
    #[serde(default)]
    pub second_innings_bowling: Vec<BowlingLineDto>,
    #[serde(default)]
    pub target: Option<u32>,
    #[serde(default)]
    pub result: Option<String>,
}

fn first_innings() -> u8 {
    1
}

// ---------------------------------------------------------------------------
// Broadcast envelope and payloads
// ---------------------------------------------------------------------------

pub const EVENT_BALL_UPDATE: &str = "ball-update";
pub const EVENT_INNINGS_COMPLETE: &str = "innings-complete";
pub const EVENT_SECOND_INNINGS_STARTED: &str = "second-innings-started";
pub const EVENT_MATCH_COMPLETE: &str = "match-complete";

/// Envelope as received. Both fields are optional here so a malformed
/// envelope can be told apart from undecodable JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEnvelope {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// A delivery as confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallDto {
    /// Total runs credited to the batting team, penalty included.
    pub runs: u32,
    #[serde(default)]
    pub extra: Option<ExtraKind>,
    #[serde(default)]
    pub wicket: bool,
    #[serde(default)]
    pub wicket_type: Option<WicketType>,
    #[serde(default)]
    pub dismissed_player_id: Option<String>,
    /// Scorecard text for the dismissal, when the server composes it.
    #[serde(default)]
    pub dismissal_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallUpdatePayload {
    #[serde(default)]
    pub match_id: Option<String>,
    pub ball: BallDto,
    /// `None` means the striker's end is vacant.
    #[serde(default)]
    pub striker: Option<BatterDto>,
    #[serde(default)]
    pub non_striker: Option<BatterDto>,
    #[serde(default)]
    pub current_bowler: Option<BowlerDto>,
    #[serde(default)]
    pub batting_team: Option<TeamDto>,
    #[serde(default)]
    pub bowling_team: Option<TeamDto>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InningsCompletePayload {
    #[serde(default)]
    pub striker: Option<BatterDto>,
    #[serde(default)]
    pub non_striker: Option<BatterDto>,
    #[serde(default)]
    pub current_bowler: Option<BowlerDto>,
    #[serde(default)]
    pub batting_team: Option<TeamDto>,
    #[serde(default)]
    pub bowling_team: Option<TeamDto>,
    #[serde(default)]
    pub target: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondInningsStartedPayload {
    pub batting_team: TeamDto,
    pub bowling_team: TeamDto,
    #[serde(default)]
    pub target: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCompletePayload {
    #[serde(default)]
    pub result: Option<String>,
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// One ball event published on the submit channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallEventPayload {
    pub match_id: String,
    pub striker_id: String,
    pub bowler_id: String,
    pub runs: u32,
    pub wide: bool,
    pub no_ball: bool,
    pub bye: bool,
    pub leg_bye: bool,
    pub wicket: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wicket_type: Option<WicketType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catcher_id: Option<String>,
    /// Fielder who effected the run out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_out_maker_id: Option<String>,
    /// Batter who was run out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_out_getter_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Data service
// ---------------------------------------------------------------------------

/// Response envelope used by every data-service endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TossDecision {
    Bat,
    Bowl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TossRequest {
    pub winner_team_id: String,
    pub decision: TossDecision,
}

/// Which side's playing XI to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamSide {
    Batting,
    Bowling,
}

impl TeamSide {
    pub fn path_segment(&self) -> &'static str {
        match self {
            TeamSide::Batting => "batting",
            TeamSide::Bowling => "bowling",
        }
    }
}
