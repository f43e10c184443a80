// Submission pipeline: turn a scorer gesture into exactly one published ball
// event, and hold the input gate until the broadcast confirms it.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crease_core::config::SubmissionConfig;
use crease_core::protocol::{submit_destination, BallEventPayload};
use crease_core::ws_client::{Channel, PublishError};

use crate::scoring::delivery::ExtraKind;
use crate::scoring::dismissal::DismissalDetail;
use crate::scoring::projection::{MatchProjection, PendingAction, Phase};

/// Facts the scorer captured for one delivery.
///
/// `runs` are the runs taken off the delivery, not counting the one-run
/// wide or no-ball penalty, which the server adds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionInput {
    pub runs: u32,
    pub extra: Option<ExtraKind>,
    pub dismissal: Option<DismissalDetail>,
}

impl ActionInput {
    pub fn runs(runs: u32) -> Self {
        Self {
            runs,
            ..Default::default()
        }
    }

    pub fn extra(kind: ExtraKind, runs: u32) -> Self {
        Self {
            runs,
            extra: Some(kind),
            dismissal: None,
        }
    }

    pub fn wicket(detail: DismissalDetail) -> Self {
        Self {
            runs: detail.runs_completed,
            extra: detail.extra,
            dismissal: Some(detail),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    /// A previous ball has not been confirmed yet.
    InFlight,
    PendingAction(PendingAction),
    DismissalActive,
    /// A wicket has just fallen and the next-batsman prompt is still due.
    Settling,
}

impl std::fmt::Display for BusyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusyReason::InFlight => f.write_str("previous ball not yet confirmed"),
            BusyReason::PendingAction(a) => write!(f, "{a} first"),
            BusyReason::DismissalActive => f.write_str("dismissal is being recorded"),
            BusyReason::Settling => f.write_str("wicket is settling"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("busy: {0}")]
    Busy(BusyReason),
    #[error("submit channel is not ready")]
    NotReady,
    #[error("submit channel did not become ready within {0:?}")]
    SubmitTimeout(Duration),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("striker and bowler must both be set before scoring")]
    MissingPlayers,
    #[error("cannot score during {0}")]
    NotScoring(Phase),
}

impl SubmitError {
    /// Transport failures can simply be tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubmitError::NotReady | SubmitError::SubmitTimeout(_) | SubmitError::PublishFailed(_)
        )
    }
}

/// Session state outside the projection that also blocks scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blockers {
    pub dismissal_active: bool,
    pub settling: bool,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    published_at: Instant,
    ack_deadline: Instant,
}

pub struct SubmissionPipeline {
    match_id: String,
    scorer_id: String,
    ready_timeout: Duration,
    ready_poll: Duration,
    ack_timeout: Duration,
    in_flight: Option<InFlight>,
}

impl SubmissionPipeline {
    pub fn new(match_id: impl Into<String>, scorer_id: impl Into<String>, config: &SubmissionConfig) -> Self {
        Self {
            match_id: match_id.into(),
            scorer_id: scorer_id.into(),
            ready_timeout: config.ready_timeout(),
            ready_poll: config.ready_poll(),
            ack_timeout: config.ack_timeout(),
            in_flight: None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn ack_deadline(&self) -> Option<Instant> {
        self.in_flight.map(|f| f.ack_deadline)
    }

    /// Preconditions shared by ball submission and starting a dismissal.
    pub fn check(&self, p: &MatchProjection, blockers: Blockers) -> Result<(), SubmitError> {
        if self.in_flight.is_some() {
            return Err(SubmitError::Busy(BusyReason::InFlight));
        }
        if blockers.dismissal_active {
            return Err(SubmitError::Busy(BusyReason::DismissalActive));
        }
        if let Some(action) = p.pending_action {
            return Err(SubmitError::Busy(BusyReason::PendingAction(action)));
        }
        if blockers.settling {
            return Err(SubmitError::Busy(BusyReason::Settling));
        }
        if p.phase != Phase::InningsInProgress {
            return Err(SubmitError::NotScoring(p.phase));
        }
        Ok(())
    }

    pub fn build_payload(&self, p: &MatchProjection, input: &ActionInput) -> Result<BallEventPayload, SubmitError> {
        let (Some(striker), Some(bowler)) = (&p.striker, &p.current_bowler) else {
            return Err(SubmitError::MissingPlayers);
        };
        let dismissal = input.dismissal.as_ref();
        Ok(BallEventPayload {
            match_id: self.match_id.clone(),
            striker_id: striker.id.clone(),
            bowler_id: bowler.id.clone(),
            runs: input.runs,
            wide: input.extra == Some(ExtraKind::Wide),
            no_ball: input.extra == Some(ExtraKind::NoBall),
            bye: input.extra == Some(ExtraKind::Bye),
            leg_bye: input.extra == Some(ExtraKind::LegBye),
            wicket: dismissal.is_some(),
            wicket_type: dismissal.map(|d| d.wicket_type),
            catcher_id: dismissal.and_then(|d| d.catcher_id.clone()),
            run_out_maker_id: dismissal.and_then(|d| d.run_out_fielder_id.clone()),
            run_out_getter_id: dismissal.and_then(|d| d.run_out_victim_id.clone()),
        })
    }

    /// Publish one ball. On success the gate stays held until `acknowledge`
    /// (the broadcast echo) or `expire` (ack timeout). Every error releases
    /// it again.
    pub async fn submit(
        &mut self,
        channel: &dyn Channel,
        p: &MatchProjection,
        blockers: Blockers,
        input: ActionInput,
    ) -> Result<(), SubmitError> {
        self.check(p, blockers)?;
        let payload = self.build_payload(p, &input)?;
        let body = serde_json::to_string(&payload).map_err(|e| SubmitError::PublishFailed(e.to_string()))?;

        let now = Instant::now();
        self.in_flight = Some(InFlight {
            published_at: now,
            ack_deadline: now + self.ack_timeout,
        });

        if let Err(e) = self.wait_ready(channel).await {
            self.in_flight = None;
            warn!("Submission abandoned: {e}");
            return Err(e);
        }

        let destination = submit_destination(&self.match_id);
        let headers = [("user-id", self.scorer_id.as_str())];
        match channel.publish(&destination, body, &headers) {
            Ok(()) => {
                let published_at = Instant::now();
                self.in_flight = Some(InFlight {
                    published_at,
                    ack_deadline: published_at + self.ack_timeout,
                });
                info!(
                    "Published ball: {} runs, extra {:?}, wicket {:?}",
                    payload.runs, input.extra, payload.wicket_type
                );
                Ok(())
            }
            Err(e) => {
                self.in_flight = None;
                warn!("Publish failed: {e}");
                Err(match e {
                    PublishError::NotReady(_) => SubmitError::NotReady,
                    other => SubmitError::PublishFailed(other.to_string()),
                })
            }
        }
    }

    async fn wait_ready(&self, channel: &dyn Channel) -> Result<(), SubmitError> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if channel.is_ready() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SubmitError::SubmitTimeout(self.ready_timeout));
            }
            tokio::time::sleep(self.ready_poll).await;
        }
    }

    /// The broadcast confirmed a ball. Returns whether a gate was held.
    pub fn acknowledge(&mut self) -> bool {
        match self.in_flight.take() {
            Some(f) => {
                debug!("ball acknowledged after {:?}", f.published_at.elapsed());
                true
            }
            None => false,
        }
    }

    /// Release the gate if its acknowledgement deadline has passed.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.in_flight {
            Some(f) if f.ack_deadline <= now => {
                warn!("No broadcast confirmation within {:?}; releasing gate", self.ack_timeout);
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.in_flight = None;
    }
}
