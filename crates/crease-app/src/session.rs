// One scoring session: owns the projection, the two real-time channels and
// the workflow around them, and runs the event loop that feeds them.
//
// Everything that mutates session state runs on the loop in `run`, one
// message at a time. Channel tasks only enqueue `ChannelEvent`s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crease_core::api::{FetchError, MatchDataService};
use crease_core::config::Config;
use crease_core::protocol::{PlayerRef, TeamSide, TossDecision, TossRequest};
use crease_core::ws_client::{Channel, ChannelConnector, ChannelEvent, ChannelKind};

use crate::messages::{Notice, ScorerCommand, UiUpdate};
use crate::pipeline::{ActionInput, Blockers, SubmissionPipeline, SubmitError};
use crate::scoring::applier::{self, ApplyError, Effect};
use crate::scoring::delivery::ExtraKind;
use crate::scoring::dismissal::{DismissalError, DismissalFlow, DismissalOrchestrator, Progress};
use crate::scoring::projection::{MatchProjection, PendingAction, Phase};
use crate::scoring::snapshot::load_snapshot;
use crate::scoring::workflow::{self, Workflow};

const EVENT_BUFFER: usize = 256;

pub struct ScoringSession {
    match_id: String,
    service: Arc<dyn MatchDataService>,
    connector: Arc<dyn ChannelConnector>,
    events_tx: mpsc::Sender<ChannelEvent>,
    projection: MatchProjection,
    workflow: Workflow,
    pipeline: SubmissionPipeline,
    orchestrator: DismissalOrchestrator,
    submit_channel: Option<Box<dyn Channel>>,
    live_channel: Option<Box<dyn Channel>>,
    reconnect_allowed: Arc<AtomicBool>,
    stale: bool,
}

impl ScoringSession {
    /// Build a session. The returned receiver carries channel events and is
    /// handed back to `run` (or drained by hand in tests).
    pub fn new(
        config: &Config,
        match_id: impl Into<String>,
        service: Arc<dyn MatchDataService>,
        connector: Arc<dyn ChannelConnector>,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let match_id = match_id.into();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let session = Self {
            pipeline: SubmissionPipeline::new(
                match_id.clone(),
                config.credentials.scorer_id.clone(),
                &config.submission,
            ),
            projection: MatchProjection::empty(match_id.clone()),
            workflow: Workflow::new(&config.pacing),
            orchestrator: DismissalOrchestrator::new(),
            match_id,
            service,
            connector,
            events_tx,
            submit_channel: None,
            live_channel: None,
            reconnect_allowed: Arc::new(AtomicBool::new(true)),
            stale: false,
        };
        (session, events_rx)
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn projection(&self) -> &MatchProjection {
        &self.projection
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_submission_in_flight(&self) -> bool {
        self.pipeline.is_in_flight()
    }

    pub fn reconnect_allowed(&self) -> bool {
        self.reconnect_allowed.load(Ordering::SeqCst)
    }

    /// The one prompt the scorer must answer next. An active dismissal
    /// outranks whatever the projection has pending.
    pub fn pending_action(&self) -> Option<PendingAction> {
        self.orchestrator
            .step()
            .map(PendingAction::AwaitDismissalDetail)
            .or(self.projection.pending_action)
    }

    /// Earliest instant at which `fire_due` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.workflow.next_due(), self.pipeline.ack_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn blockers(&self) -> Blockers {
        Blockers {
            dismissal_active: self.orchestrator.is_active(),
            settling: self.workflow.is_settling(),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open both channels and load the first snapshot. A failed load leaves
    /// the empty projection in place; the scorer can retry with a resync.
    pub async fn start(&mut self, ui: &mpsc::Sender<UiUpdate>) {
        self.open_channels();
        self.resnapshot(ui).await;
    }

    fn open_channels(&mut self) {
        for kind in [ChannelKind::Submit, ChannelKind::Live] {
            let slot = match kind {
                ChannelKind::Submit => &mut self.submit_channel,
                ChannelKind::Live => &mut self.live_channel,
            };
            if slot.as_ref().is_some_and(|c| !c.is_closed()) {
                continue;
            }
            if let Some(old) = slot.take() {
                old.close();
            }
            info!("Opening {kind} channel for {}", self.match_id);
            *slot = Some(self.connector.open(
                kind,
                &self.match_id,
                self.reconnect_allowed.clone(),
                self.events_tx.clone(),
            ));
        }
    }

    fn close_channels(&mut self) {
        for channel in [self.submit_channel.take(), self.live_channel.take()].into_iter().flatten() {
            debug!("closing {} channel", channel.kind());
            channel.close();
        }
    }

    /// Stop reconnecting and drop both channels. In-flight submissions are
    /// abandoned.
    pub fn shutdown(&mut self) {
        self.reconnect_allowed.store(false, Ordering::SeqCst);
        self.close_channels();
        if self.pipeline.is_in_flight() {
            debug!("abandoning unconfirmed submission");
        }
        self.pipeline.reset();
    }

    /// Replace the projection with the server's current state.
    pub async fn resnapshot(&mut self, ui: &mpsc::Sender<UiUpdate>) -> bool {
        match load_snapshot(self.service.as_ref(), &self.match_id).await {
            Ok(projection) => {
                self.projection = projection;
                let offer_next_innings = self.workflow.reconcile(&self.projection);
                self.set_stale(false, ui).await;
                self.publish_projection(ui).await;
                if offer_next_innings {
                    let _ = ui.send(UiUpdate::NextInningsPrompt).await;
                }
                if self.projection.phase == Phase::MatchComplete {
                    self.finish_match(self.projection.result.clone(), ui).await;
                }
                true
            }
            Err(e) => {
                warn!("Snapshot load failed: {e}");
                notify(ui, Notice::Retryable(format!("could not load match state: {e}"))).await;
                false
            }
        }
    }

    async fn finish_match(&mut self, result: Option<String>, ui: &mpsc::Sender<UiUpdate>) {
        self.reconnect_allowed.store(false, Ordering::SeqCst);
        self.close_channels();
        self.workflow.clear();
        self.orchestrator.cancel();
        self.pipeline.reset();
        let _ = ui.send(UiUpdate::MatchComplete { result }).await;
    }

    async fn set_stale(&mut self, stale: bool, ui: &mpsc::Sender<UiUpdate>) {
        if self.stale != stale {
            self.stale = stale;
            let _ = ui.send(UiUpdate::ProjectionStale(stale)).await;
        }
    }

    async fn publish_projection(&self, ui: &mpsc::Sender<UiUpdate>) {
        let _ = ui
            .send(UiUpdate::Projection(Box::new(self.projection.clone())))
            .await;
        self.publish_pending(ui).await;
    }

    async fn publish_pending(&self, ui: &mpsc::Sender<UiUpdate>) {
        let _ = ui.send(UiUpdate::Pending(self.pending_action())).await;
    }

    // -----------------------------------------------------------------------
    // Channel events and broadcasts
    // -----------------------------------------------------------------------

    /// Handle one channel event from the queue. When a live resubscribe
    /// reloads the snapshot, live broadcasts still queued behind it are
    /// already reflected in that snapshot and are dropped.
    pub async fn process_channel_event(
        &mut self,
        event: ChannelEvent,
        events_rx: &mut mpsc::Receiver<ChannelEvent>,
        ui: &mpsc::Sender<UiUpdate>,
    ) {
        if self.handle_channel_event(event, ui).await {
            self.discard_queued_broadcasts(events_rx, ui).await;
        }
    }

    async fn discard_queued_broadcasts(
        &mut self,
        events_rx: &mut mpsc::Receiver<ChannelEvent>,
        ui: &mpsc::Sender<UiUpdate>,
    ) {
        let mut dropped = 0usize;
        let mut kept = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            match event {
                ChannelEvent::Message {
                    kind: ChannelKind::Live,
                    ..
                } => dropped += 1,
                other => kept.push(other),
            }
        }
        if dropped > 0 {
            info!("Dropped {dropped} broadcast(s) queued before the snapshot");
        }
        for event in kept {
            self.handle_channel_event(event, ui).await;
        }
    }

    /// Returns true when the event reloaded the snapshot.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent, ui: &mpsc::Sender<UiUpdate>) -> bool {
        match event {
            ChannelEvent::Ready { kind } => {
                info!("{kind} channel ready");
                let _ = ui.send(UiUpdate::ChannelStatus { kind, ready: true }).await;
                if kind == ChannelKind::Live {
                    // Anything broadcast while unsubscribed is only in the
                    // snapshot.
                    return self.resnapshot(ui).await;
                }
            }
            ChannelEvent::Closed {
                kind,
                will_reconnect,
            } => {
                let _ = ui.send(UiUpdate::ChannelStatus { kind, ready: false }).await;
                if !will_reconnect && self.reconnect_allowed() && self.projection.phase != Phase::MatchComplete {
                    warn!("{kind} channel lost");
                    notify(ui, Notice::Retryable(format!("{kind} connection lost; resync to reconnect"))).await;
                }
            }
            ChannelEvent::Message {
                kind: ChannelKind::Live,
                body,
            } => self.handle_broadcast(&body, ui).await,
            ChannelEvent::Message { kind, .. } => {
                debug!("ignoring message on {kind} channel");
            }
        }
        false
    }

    /// Decode and apply one broadcast. Bad input is logged and marks the
    /// projection stale; it never ends the session.
    pub async fn handle_broadcast(&mut self, body: &str, ui: &mpsc::Sender<UiUpdate>) {
        let envelope = match applier::decode_envelope(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping broadcast: {e}");
                self.set_stale(true, ui).await;
                return;
            }
        };
        match applier::apply(&mut self.projection, envelope) {
            Ok(effects) => {
                self.publish_projection(ui).await;
                self.run_effects(effects, ui).await;
            }
            Err(ApplyError::MatchComplete) => {
                debug!("match complete; broadcast ignored");
            }
            Err(ApplyError::OtherMatch(id)) => {
                warn!("Ignoring ball-update for match {id} on the {} topic", self.match_id);
            }
            Err(e) => {
                warn!("Could not apply broadcast: {e}");
                self.set_stale(true, ui).await;
            }
        }
    }

    async fn run_effects(&mut self, effects: Vec<Effect>, ui: &mpsc::Sender<UiUpdate>) {
        for effect in effects {
            match effect {
                Effect::ReleaseGate => {
                    self.pipeline.acknowledge();
                }
                Effect::Schedule(transition) => {
                    self.workflow.schedule(transition, Instant::now());
                }
                Effect::Cancel(transition) => {
                    self.workflow.cancel(transition);
                }
                Effect::DisableReconnect => {
                    self.reconnect_allowed.store(false, Ordering::SeqCst);
                }
                Effect::CloseChannels => self.close_channels(),
                Effect::ShowNextInningsPrompt => {
                    self.workflow.set_next_innings_prompt(true);
                    let _ = ui.send(UiUpdate::NextInningsPrompt).await;
                }
                Effect::MatchCompleted { result } => self.finish_match(result, ui).await,
                Effect::Ignored { event_name } => {
                    debug!("no effect for `{event_name}`");
                }
            }
        }
    }

    /// Fire timed transitions and expire the acknowledgement wait.
    pub async fn fire_due(&mut self, now: Instant, ui: &mpsc::Sender<UiUpdate>) {
        let due = self.workflow.take_due(now);
        if !due.is_empty() {
            for transition in due {
                info!("Timed transition: {transition}");
                let effects = applier::apply_transition(&mut self.projection, transition);
                self.run_effects(effects, ui).await;
            }
            self.publish_pending(ui).await;
        }
        if self.pipeline.expire(now) {
            notify(ui, Notice::AckTimeout).await;
            self.set_stale(true, ui).await;
        }
    }

    // -----------------------------------------------------------------------
    // Scorer commands
    // -----------------------------------------------------------------------

    pub async fn handle_command(&mut self, cmd: ScorerCommand, ui: &mpsc::Sender<UiUpdate>) {
        match cmd {
            ScorerCommand::Score { runs, extra } => {
                self.submit(ActionInput { runs, extra, dismissal: None }, ui).await;
            }
            ScorerCommand::BeginWicket { extra } => self.begin_wicket(extra, ui).await,
            ScorerCommand::WicketType(wicket_type) => {
                self.answer_dismissal(|f| f.choose_wicket_type(wicket_type), ui).await;
            }
            ScorerCommand::Catcher(id) => {
                self.answer_dismissal(|f| f.choose_catcher(&id), ui).await;
            }
            ScorerCommand::RunOutVictim(id) => {
                let striker = self.projection.striker.as_ref().map(|b| b.id.clone());
                let non_striker = self.projection.non_striker.as_ref().map(|b| b.id.clone());
                self.answer_dismissal(
                    |f| f.choose_run_out_victim(&id, [striker.as_deref(), non_striker.as_deref()]),
                    ui,
                )
                .await;
            }
            ScorerCommand::RunOutFielder { fielder_id, runs } => {
                self.answer_dismissal(|f| f.choose_run_out_fielder(&fielder_id, runs), ui)
                    .await;
            }
            ScorerCommand::DismissalBack => match self.orchestrator.back() {
                Ok(_) => self.publish_pending(ui).await,
                Err(e) => notify(ui, Notice::Rejected(e.to_string())).await,
            },
            ScorerCommand::DismissalCancel => {
                if self.orchestrator.cancel() {
                    info!("Dismissal cancelled");
                }
                self.publish_pending(ui).await;
            }
            ScorerCommand::SelectBatsman(id) => self.select_batsman(&id, ui).await,
            ScorerCommand::SelectBowler(id) => self.select_bowler(&id, ui).await,
            ScorerCommand::ListBowlers => self.list_bowlers(ui).await,
            ScorerCommand::ListBatters => {
                match self.service.batting_available(&self.match_id).await {
                    Ok(batters) => {
                        let _ = ui.send(UiUpdate::AvailableBatters(batters)).await;
                    }
                    Err(e) => fetch_failed(ui, "list batters", e).await,
                }
            }
            ScorerCommand::Toss {
                winner_team_id,
                decision,
            } => self.record_toss(winner_team_id, decision, ui).await,
            ScorerCommand::StartSecondInnings => self.start_second_innings(ui).await,
            ScorerCommand::UndoLastBall => self.undo_last_ball(ui).await,
            ScorerCommand::Resync => {
                if self.reconnect_allowed() {
                    self.open_channels();
                }
                self.resnapshot(ui).await;
            }
            ScorerCommand::Quit => {}
        }
    }

    async fn submit(&mut self, input: ActionInput, ui: &mpsc::Sender<UiUpdate>) {
        let blockers = self.blockers();
        let Some(channel) = self.submit_channel.as_deref() else {
            notify(ui, Notice::Retryable(SubmitError::NotReady.to_string())).await;
            return;
        };
        if let Err(e) = self
            .pipeline
            .submit(channel, &self.projection, blockers, input)
            .await
        {
            let notice = if e.is_retryable() {
                Notice::Retryable(e.to_string())
            } else {
                Notice::Rejected(e.to_string())
            };
            notify(ui, notice).await;
        }
    }

    async fn begin_wicket(&mut self, extra: Option<ExtraKind>, ui: &mpsc::Sender<UiUpdate>) {
        if let Err(e) = self.pipeline.check(&self.projection, self.blockers()) {
            notify(ui, Notice::Rejected(e.to_string())).await;
            return;
        }
        match self.orchestrator.begin(extra) {
            Ok(step) => {
                debug!("dismissal started at {step}");
                self.publish_pending(ui).await;
            }
            Err(e) => notify(ui, Notice::Rejected(e.to_string())).await,
        }
    }

    async fn answer_dismissal<F>(&mut self, f: F, ui: &mpsc::Sender<UiUpdate>)
    where
        F: FnOnce(&mut DismissalFlow) -> Result<Progress, DismissalError>,
    {
        match self.orchestrator.answer(f) {
            Ok(Progress::Next(_)) => self.publish_pending(ui).await,
            Ok(Progress::Ready(detail)) => {
                info!("Dismissal recorded: {}", detail.wicket_type);
                self.publish_pending(ui).await;
                self.submit(ActionInput::wicket(detail), ui).await;
            }
            Err(e) => notify(ui, Notice::Rejected(e.to_string())).await,
        }
    }

    async fn select_batsman(&mut self, player_id: &str, ui: &mpsc::Sender<UiUpdate>) {
        if let Err(e) = workflow::validate_batsman_choice(&self.projection, player_id) {
            notify(ui, Notice::Rejected(e.to_string())).await;
            return;
        }
        match self.service.select_next_batsman(&self.match_id, player_id).await {
            Ok(()) => {
                info!("Next batsman: {player_id}");
                self.resnapshot(ui).await;
            }
            Err(e) => fetch_failed(ui, "select batsman", e).await,
        }
    }

    async fn select_bowler(&mut self, player_id: &str, ui: &mpsc::Sender<UiUpdate>) {
        if let Err(e) = workflow::validate_bowler_choice(&self.projection, player_id) {
            notify(ui, Notice::Rejected(e.to_string())).await;
            return;
        }
        match self.service.select_next_bowler(&self.match_id, player_id).await {
            Ok(()) => {
                info!("Next bowler: {player_id}");
                self.resnapshot(ui).await;
            }
            Err(e) => fetch_failed(ui, "select bowler", e).await,
        }
    }

    async fn list_bowlers(&mut self, ui: &mpsc::Sender<UiUpdate>) {
        match self.service.playing_xi(&self.match_id, TeamSide::Bowling).await {
            Ok(squad) => {
                let selectable: Vec<PlayerRef> = self
                    .projection
                    .selectable_bowlers(&squad)
                    .into_iter()
                    .cloned()
                    .collect();
                let _ = ui.send(UiUpdate::SelectableBowlers(selectable)).await;
            }
            Err(e) => fetch_failed(ui, "list bowlers", e).await,
        }
    }

    async fn record_toss(
        &mut self,
        winner_team_id: String,
        decision: TossDecision,
        ui: &mpsc::Sender<UiUpdate>,
    ) {
        if let Err(e) = workflow::validate_toss(&self.projection) {
            notify(ui, Notice::Rejected(e.to_string())).await;
            return;
        }
        let toss = TossRequest {
            winner_team_id,
            decision,
        };
        match self.service.submit_toss(&self.match_id, &toss).await {
            Ok(()) => {
                info!("Toss recorded: {} chose to {:?}", toss.winner_team_id, toss.decision);
                self.resnapshot(ui).await;
            }
            Err(e) => fetch_failed(ui, "record toss", e).await,
        }
    }

    /// Start the second innings: tell the server, then run the deliberate
    /// reconnect-then-resubscribe sequence.
    async fn start_second_innings(&mut self, ui: &mpsc::Sender<UiUpdate>) {
        if let Err(e) = workflow::validate_second_innings_start(&self.projection) {
            notify(ui, Notice::Rejected(e.to_string())).await;
            return;
        }
        if !self.workflow.next_innings_prompt() {
            notify(ui, Notice::Rejected("innings break is still in progress".into())).await;
            return;
        }
        match self.service.start_second_innings(&self.match_id).await {
            Ok(()) => {
                info!("Second innings starting; reopening channels");
                self.reconnect_allowed.store(true, Ordering::SeqCst);
                self.open_channels();
                self.resnapshot(ui).await;
            }
            Err(e) => fetch_failed(ui, "start second innings", e).await,
        }
    }

    async fn undo_last_ball(&mut self, ui: &mpsc::Sender<UiUpdate>) {
        if let Err(e) = workflow::validate_undo(&self.projection) {
            notify(ui, Notice::Rejected(e.to_string())).await;
            return;
        }
        if self.pipeline.is_in_flight() || self.orchestrator.is_active() {
            notify(ui, Notice::Rejected("finish the current ball before undoing".into())).await;
            return;
        }
        match self.service.undo_last_ball(&self.match_id).await {
            Ok(()) => {
                info!("Last ball undone");
                self.workflow.cancel(workflow::TimedTransition::PromptNextBatsman);
                self.resnapshot(ui).await;
            }
            Err(e) => fetch_failed(ui, "undo", e).await,
        }
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Run the session until the scorer quits or the front end goes away.
    ///
    /// Listens on channel events, scorer commands and the next timed
    /// deadline (workflow transition or acknowledgement timeout).
    pub async fn run(
        mut self,
        mut events_rx: mpsc::Receiver<ChannelEvent>,
        mut cmd_rx: mpsc::Receiver<ScorerCommand>,
        ui_tx: mpsc::Sender<UiUpdate>,
    ) -> anyhow::Result<()> {
        info!("Scoring session for {} started", self.match_id);
        self.start(&ui_tx).await;

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => self.process_channel_event(event, &mut events_rx, &ui_tx).await,
                    None => {
                        info!("Channel event stream closed, shutting down");
                        break;
                    }
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(ScorerCommand::Quit) => {
                        info!("Quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd, &ui_tx).await,
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                },
                _ = wait_until(deadline) => self.fire_due(Instant::now(), &ui_tx).await,
            }
            if ui_tx.is_closed() {
                anyhow::bail!("front end went away during session for {}", self.match_id);
            }
        }

        self.shutdown();
        info!("Scoring session for {} ended", self.match_id);
        Ok(())
    }
}

impl Drop for ScoringSession {
    fn drop(&mut self) {
        self.reconnect_allowed.store(false, Ordering::SeqCst);
        self.close_channels();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn notify(ui: &mpsc::Sender<UiUpdate>, notice: Notice) {
    let _ = ui.send(UiUpdate::Notice(notice)).await;
}

async fn fetch_failed(ui: &mpsc::Sender<UiUpdate>, action: &str, e: FetchError) {
    warn!("Could not {action}: {e}");
    let notice = match e {
        FetchError::Rejected { message, .. } => Notice::Rejected(message),
        other => Notice::Retryable(format!("could not {action}: {other}")),
    };
    notify(ui, notice).await;
}
