// Nested prompt sequence for recording a wicket.
//
//   SelectWicketType -> SelectCatcher                                -> ready
//                    -> SelectRunOutVictim -> SelectRunOutFielder     -> ready
//                    -> (bowled, lbw, stumped, hit wicket)            -> ready
//
// The flow only collects facts. It never touches the projection; the
// finished `DismissalDetail` is handed to the submission pipeline.

use std::fmt;

use thiserror::Error;

use super::delivery::{ExtraKind, WicketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DismissalStep {
    SelectWicketType,
    SelectCatcher,
    SelectRunOutVictim,
    SelectRunOutFielder,
}

impl fmt::Display for DismissalStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DismissalStep::SelectWicketType => "select wicket type",
            DismissalStep::SelectCatcher => "select catcher",
            DismissalStep::SelectRunOutVictim => "select batter run out",
            DismissalStep::SelectRunOutFielder => "select fielder and runs completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DismissalError {
    #[error("no dismissal is being recorded")]
    NotActive,
    #[error("a dismissal is already being recorded")]
    AlreadyActive,
    #[error("expected to {expected}, not {attempted}")]
    WrongStep {
        expected: DismissalStep,
        attempted: DismissalStep,
    },
    #[error("player {0} is not at the crease")]
    NotAtCrease(String),
}

/// Everything the submission needs to know about a wicket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DismissalDetail {
    pub wicket_type: WicketType,
    /// Delivery type the wicket fell on, if not a plain ball.
    pub extra: Option<ExtraKind>,
    pub catcher_id: Option<String>,
    pub run_out_victim_id: Option<String>,
    pub run_out_fielder_id: Option<String>,
    /// Runs completed before the run out; zero otherwise.
    pub runs_completed: u32,
}

/// Result of feeding one answer into the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Next(DismissalStep),
    Ready(DismissalDetail),
}

/// One in-progress dismissal. Each answered step pushes onto a stack so
/// `back()` can unwind a single answer.
#[derive(Debug, Clone)]
pub struct DismissalFlow {
    extra: Option<ExtraKind>,
    answers: Vec<Answer>,
}

#[derive(Debug, Clone)]
enum Answer {
    WicketType(WicketType),
    Victim(String),
}

impl DismissalFlow {
    pub fn new(extra: Option<ExtraKind>) -> Self {
        Self {
            extra,
            answers: Vec::new(),
        }
    }

    pub fn step(&self) -> DismissalStep {
        match self.answers.as_slice() {
            [] => DismissalStep::SelectWicketType,
            [Answer::WicketType(WicketType::Caught)] => DismissalStep::SelectCatcher,
            [Answer::WicketType(WicketType::RunOut)] => DismissalStep::SelectRunOutVictim,
            _ => DismissalStep::SelectRunOutFielder,
        }
    }

    fn expect(&self, attempted: DismissalStep) -> Result<(), DismissalError> {
        let expected = self.step();
        if expected == attempted {
            Ok(())
        } else {
            Err(DismissalError::WrongStep {
                expected,
                attempted,
            })
        }
    }

    fn detail(&self, wicket_type: WicketType) -> DismissalDetail {
        DismissalDetail {
            wicket_type,
            extra: self.extra,
            catcher_id: None,
            run_out_victim_id: None,
            run_out_fielder_id: None,
            runs_completed: 0,
        }
    }

    pub fn choose_wicket_type(&mut self, wicket_type: WicketType) -> Result<Progress, DismissalError> {
        self.expect(DismissalStep::SelectWicketType)?;
        match wicket_type {
            WicketType::Caught | WicketType::RunOut => {
                self.answers.push(Answer::WicketType(wicket_type));
                Ok(Progress::Next(self.step()))
            }
            other => Ok(Progress::Ready(self.detail(other))),
        }
    }

    pub fn choose_catcher(&mut self, catcher_id: &str) -> Result<Progress, DismissalError> {
        self.expect(DismissalStep::SelectCatcher)?;
        let mut detail = self.detail(WicketType::Caught);
        detail.catcher_id = Some(catcher_id.to_string());
        Ok(Progress::Ready(detail))
    }

    /// The victim must be one of the two batters currently at the crease.
    pub fn choose_run_out_victim(
        &mut self,
        victim_id: &str,
        at_crease: [Option<&str>; 2],
    ) -> Result<Progress, DismissalError> {
        self.expect(DismissalStep::SelectRunOutVictim)?;
        if !at_crease.contains(&Some(victim_id)) {
            return Err(DismissalError::NotAtCrease(victim_id.to_string()));
        }
        self.answers.push(Answer::Victim(victim_id.to_string()));
        Ok(Progress::Next(self.step()))
    }

    pub fn choose_run_out_fielder(
        &mut self,
        fielder_id: &str,
        runs_completed: u32,
    ) -> Result<Progress, DismissalError> {
        self.expect(DismissalStep::SelectRunOutFielder)?;
        let victim = self.answers.iter().find_map(|a| match a {
            Answer::Victim(id) => Some(id.clone()),
            Answer::WicketType(_) => None,
        });
        let mut detail = self.detail(WicketType::RunOut);
        detail.run_out_victim_id = victim;
        detail.run_out_fielder_id = Some(fielder_id.to_string());
        detail.runs_completed = runs_completed;
        Ok(Progress::Ready(detail))
    }

    /// Undo the last answer. Returns `None` when there was nothing to undo,
    /// which the caller treats as cancelling the flow.
    pub fn back(&mut self) -> Option<DismissalStep> {
        self.answers.pop().map(|_| self.step())
    }
}

/// Holds at most one active dismissal flow for a session.
#[derive(Debug, Default)]
pub struct DismissalOrchestrator {
    active: Option<DismissalFlow>,
}

impl DismissalOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn step(&self) -> Option<DismissalStep> {
        self.active.as_ref().map(DismissalFlow::step)
    }

    pub fn begin(&mut self, extra: Option<ExtraKind>) -> Result<DismissalStep, DismissalError> {
        if self.active.is_some() {
            return Err(DismissalError::AlreadyActive);
        }
        let flow = DismissalFlow::new(extra);
        let step = flow.step();
        self.active = Some(flow);
        Ok(step)
    }

    pub fn cancel(&mut self) -> bool {
        self.active.take().is_some()
    }

    /// Step back one answer; backing out of the first step cancels.
    pub fn back(&mut self) -> Result<Option<DismissalStep>, DismissalError> {
        let flow = self.active.as_mut().ok_or(DismissalError::NotActive)?;
        match flow.back() {
            Some(step) => Ok(Some(step)),
            None => {
                self.active = None;
                Ok(None)
            }
        }
    }

    /// Feed an answer to the active flow. A `Ready` result closes the flow.
    pub fn answer<F>(&mut self, f: F) -> Result<Progress, DismissalError>
    where
        F: FnOnce(&mut DismissalFlow) -> Result<Progress, DismissalError>,
    {
        let flow = self.active.as_mut().ok_or(DismissalError::NotActive)?;
        let progress = f(flow)?;
        if matches!(progress, Progress::Ready(_)) {
            self.active = None;
        }
        Ok(progress)
    }
}
