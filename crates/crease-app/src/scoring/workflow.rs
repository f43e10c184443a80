// Match-level state machine.
//
//   AwaitingFirstInnings -> InningsInProgress -> InningsBreak
//       -> InningsInProgress (second) -> MatchComplete
//
// Phase changes come from applied broadcasts and snapshots. The workflow
// also owns the timetable of delayed self-transitions (wicket settle,
// innings break) and validates scorer actions against the current phase.

use std::fmt;
use std::time::Duration;

use crease_core::config::PacingConfig;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use super::projection::{MatchProjection, PendingAction, Phase};

/// After this many wickets the innings is all but over, so no new batter is
/// asked for.
pub const LAST_WICKET_PROMPT_BELOW: u32 = 9;

/// Wickets that end an innings.
pub const ALL_OUT: u32 = 10;

// ---------------------------------------------------------------------------
// Phase transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTrigger {
    BallConfirmed,
    InningsComplete { innings: u8 },
    SecondInningsStarted,
    MatchComplete,
}

/// Next phase for a trigger, or `None` if the trigger does not move the
/// match from `phase`.
pub fn advance(phase: Phase, trigger: PhaseTrigger) -> Option<Phase> {
    use Phase::*;
    match (phase, trigger) {
        (MatchComplete, _) => None,
        (_, PhaseTrigger::MatchComplete) => Some(MatchComplete),
        (AwaitingFirstInnings, PhaseTrigger::BallConfirmed) => Some(InningsInProgress),
        (InningsInProgress, PhaseTrigger::InningsComplete { innings: 1 }) => Some(InningsBreak),
        (InningsBreak, PhaseTrigger::SecondInningsStarted) => Some(InningsInProgress),
        _ => None,
    }
}

/// Whether a dismissal with `wickets_before` already down should lead to a
/// next-batsman prompt.
pub fn needs_next_batsman(wickets_before: u32) -> bool {
    wickets_before < LAST_WICKET_PROMPT_BELOW
}

/// Whether a vacant end can still be filled with `wickets_down` fallen.
pub fn batters_remaining(wickets_down: u32) -> bool {
    wickets_down < ALL_OUT
}

// ---------------------------------------------------------------------------
// Scorer action validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionRejected {
    #[error("cannot {action} during {phase}")]
    WrongPhase { action: &'static str, phase: Phase },
    #[error("no {0} prompt is pending")]
    NotPending(&'static str),
    #[error("{0} bowled the previous over")]
    BowledPreviousOver(String),
    #[error("{0} is already at the crease")]
    AlreadyAtCrease(String),
}

pub fn validate_toss(p: &MatchProjection) -> Result<(), ActionRejected> {
    require_phase(p, Phase::AwaitingFirstInnings, "record the toss")
}

pub fn validate_second_innings_start(p: &MatchProjection) -> Result<(), ActionRejected> {
    require_phase(p, Phase::InningsBreak, "start the second innings")?;
    if p.innings >= 2 {
        return Err(ActionRejected::WrongPhase {
            action: "start the second innings",
            phase: p.phase,
        });
    }
    Ok(())
}

pub fn validate_undo(p: &MatchProjection) -> Result<(), ActionRejected> {
    require_phase(p, Phase::InningsInProgress, "undo a ball")
}

pub fn validate_bowler_choice(p: &MatchProjection, bowler_id: &str) -> Result<(), ActionRejected> {
    require_phase(p, Phase::InningsInProgress, "change bowler")?;
    if p.pending_action != Some(PendingAction::AwaitBowlerSelection) {
        return Err(ActionRejected::NotPending("bowler selection"));
    }
    if p.previous_bowler_id.as_deref() == Some(bowler_id) {
        return Err(ActionRejected::BowledPreviousOver(bowler_id.to_string()));
    }
    Ok(())
}

pub fn validate_batsman_choice(p: &MatchProjection, batter_id: &str) -> Result<(), ActionRejected> {
    require_phase(p, Phase::InningsInProgress, "send in a batter")?;
    if p.pending_action != Some(PendingAction::AwaitBatsmanSelection) {
        return Err(ActionRejected::NotPending("batsman selection"));
    }
    let at_crease = [&p.striker, &p.non_striker]
        .into_iter()
        .flatten()
        .any(|b| b.id == batter_id);
    if at_crease {
        return Err(ActionRejected::AlreadyAtCrease(batter_id.to_string()));
    }
    Ok(())
}

fn require_phase(p: &MatchProjection, phase: Phase, action: &'static str) -> Result<(), ActionRejected> {
    if p.phase == phase {
        Ok(())
    } else {
        Err(ActionRejected::WrongPhase {
            action,
            phase: p.phase,
        })
    }
}

// ---------------------------------------------------------------------------
// Timed transitions
// ---------------------------------------------------------------------------

/// Delayed self-transitions scheduled by applied events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimedTransition {
    /// Wicket has settled; ask for the next batter.
    PromptNextBatsman,
    /// Innings-break summary has been shown long enough; offer the second
    /// innings.
    ShowNextInningsPrompt,
}

impl fmt::Display for TimedTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimedTransition::PromptNextBatsman => f.write_str("prompt next batsman"),
            TimedTransition::ShowNextInningsPrompt => f.write_str("show next innings prompt"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scheduled {
    transition: TimedTransition,
    due: Instant,
}

#[derive(Debug, Clone)]
pub struct Workflow {
    wicket_settle: Duration,
    innings_break: Duration,
    scheduled: Vec<Scheduled>,
    next_innings_prompt: bool,
}

impl Workflow {
    pub fn new(pacing: &PacingConfig) -> Self {
        Self {
            wicket_settle: pacing.wicket_settle(),
            innings_break: pacing.innings_break(),
            scheduled: Vec::new(),
            next_innings_prompt: false,
        }
    }

    pub fn delay_for(&self, transition: TimedTransition) -> Duration {
        match transition {
            TimedTransition::PromptNextBatsman => self.wicket_settle,
            TimedTransition::ShowNextInningsPrompt => self.innings_break,
        }
    }

    /// Schedule `transition` relative to `now`, replacing any earlier entry
    /// for the same transition. Returns the due instant.
    pub fn schedule(&mut self, transition: TimedTransition, now: Instant) -> Instant {
        self.cancel(transition);
        let due = now + self.delay_for(transition);
        debug!("scheduled {transition} in {:?}", self.delay_for(transition));
        self.scheduled.push(Scheduled { transition, due });
        due
    }

    pub fn cancel(&mut self, transition: TimedTransition) -> bool {
        let before = self.scheduled.len();
        self.scheduled.retain(|s| s.transition != transition);
        before != self.scheduled.len()
    }

    pub fn clear(&mut self) {
        self.scheduled.clear();
        self.next_innings_prompt = false;
    }

    pub fn is_scheduled(&self, transition: TimedTransition) -> bool {
        self.scheduled.iter().any(|s| s.transition == transition)
    }

    /// A wicket is settling; scoring waits for the next-batsman prompt.
    pub fn is_settling(&self) -> bool {
        self.is_scheduled(TimedTransition::PromptNextBatsman)
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.scheduled.iter().map(|s| s.due).min()
    }

    /// Remove and return every transition due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimedTransition> {
        let mut due: Vec<Scheduled> = self.scheduled.iter().copied().filter(|s| s.due <= now).collect();
        due.sort_by_key(|s| s.due);
        self.scheduled.retain(|s| s.due > now);
        due.into_iter().map(|s| s.transition).collect()
    }

    pub fn next_innings_prompt(&self) -> bool {
        self.next_innings_prompt
    }

    pub(crate) fn set_next_innings_prompt(&mut self, shown: bool) {
        self.next_innings_prompt = shown;
    }

    /// Bring the timetable in line with a freshly loaded projection. Returns
    /// true if the next-innings prompt became available as a result.
    pub fn reconcile(&mut self, p: &MatchProjection) -> bool {
        if !p.has_vacancy() || p.pending_action == Some(PendingAction::AwaitBatsmanSelection) {
            self.cancel(TimedTransition::PromptNextBatsman);
        }
        match p.phase {
            Phase::InningsBreak => {
                if !self.next_innings_prompt && !self.is_scheduled(TimedTransition::ShowNextInningsPrompt) {
                    // Joined mid-break: nothing left to wait for.
                    self.next_innings_prompt = true;
                    return true;
                }
                false
            }
            Phase::MatchComplete => {
                self.clear();
                false
            }
            _ => {
                self.cancel(TimedTransition::ShowNextInningsPrompt);
                self.next_innings_prompt = false;
                false
            }
        }
    }
}
