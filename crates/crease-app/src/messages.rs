// Messages exchanged between the scoring session and its front end.

use crease_core::protocol::{PlayerRef, TossDecision};
use crease_core::ws_client::ChannelKind;

use crate::scoring::delivery::{ExtraKind, WicketType};
use crate::scoring::projection::{MatchProjection, PendingAction};

/// Scorer input, already parsed by the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScorerCommand {
    /// A delivery without a wicket. `runs` excludes the wide/no-ball penalty.
    Score { runs: u32, extra: Option<ExtraKind> },
    /// Start recording a wicket that fell on a delivery of kind `extra`.
    BeginWicket { extra: Option<ExtraKind> },
    WicketType(WicketType),
    Catcher(String),
    RunOutVictim(String),
    RunOutFielder { fielder_id: String, runs: u32 },
    DismissalBack,
    DismissalCancel,
    SelectBatsman(String),
    SelectBowler(String),
    ListBowlers,
    ListBatters,
    Toss {
        winner_team_id: String,
        decision: TossDecision,
    },
    StartSecondInnings,
    UndoLastBall,
    Resync,
    Quit,
}

/// Something the scorer should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Transport trouble; the same action can be tried again.
    Retryable(String),
    /// No broadcast confirmed the last ball in time.
    AckTimeout,
    /// The action is not allowed right now.
    Rejected(String),
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::Retryable(msg) => write!(f, "{msg} (try again)"),
            Notice::AckTimeout => f.write_str("last ball was not confirmed; resync to check the score"),
            Notice::Rejected(msg) => write!(f, "rejected: {msg}"),
        }
    }
}

/// Updates pushed to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    Projection(Box<MatchProjection>),
    /// The single prompt the scorer must answer next, if any.
    Pending(Option<PendingAction>),
    ChannelStatus { kind: ChannelKind, ready: bool },
    ProjectionStale(bool),
    Notice(Notice),
    SelectableBowlers(Vec<PlayerRef>),
    AvailableBatters(Vec<PlayerRef>),
    NextInningsPrompt,
    MatchComplete { result: Option<String> },
}
