// Shared fixtures: an in-process scoring server (data service plus
// real-time channels) and a harness that drives a `ScoringSession` against
// it with paused time.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crease_app::messages::{Notice, ScorerCommand, UiUpdate};
use crease_app::scoring::delivery::BallOutcome;
use crease_app::session::ScoringSession;
use crease_core::api::{FetchError, MatchDataService};
use crease_core::config::{
    ChannelConfig, Config, CredentialsConfig, PacingConfig, ServerConfig, SessionSection,
    SubmissionConfig,
};
use crease_core::protocol::{
    BallDto, BallEventPayload, BallUpdatePayload, BatterDto, BowlerDto, ExtraKind, MatchStateDto,
    MatchStatus, PlayerRef, TeamDto, TeamSide, TossRequest, EVENT_BALL_UPDATE,
};
use crease_core::ws_client::{Channel, ChannelConnector, ChannelEvent, ChannelKind, PublishError};

pub const MATCH_ID: &str = "m1";

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            api_base_url: "http://localhost:8080/api".into(),
            ws_url: "ws://localhost:8080/ws".into(),
        },
        channels: ChannelConfig::default(),
        submission: SubmissionConfig::default(),
        pacing: PacingConfig::default(),
        session: SessionSection::default(),
        credentials: CredentialsConfig {
            scorer_id: "scorer-1".into(),
            api_token: None,
        },
    }
}

fn player(id: &str) -> PlayerRef {
    PlayerRef {
        id: id.into(),
        name: id.to_uppercase(),
    }
}

// ---------------------------------------------------------------------------
// Simulated server
// ---------------------------------------------------------------------------

/// Authoritative match state plus the rules the server applies to a
/// published ball.
pub struct Sim {
    pub state: MatchStateDto,
    pub bowlers: HashMap<String, BowlerDto>,
    pub batting_xi: Vec<PlayerRef>,
    pub bowling_xi: Vec<PlayerRef>,
    pub calls: Vec<String>,
    pub fail_fetch: bool,
    pub reject_next: Option<String>,
}

impl Sim {
    /// Innings one under way: a1 facing b1, a2 at the other end.
    pub fn in_progress(total_overs: u32) -> Self {
        let bowler = BowlerDto {
            id: "b1".into(),
            name: "B1".into(),
            ..Default::default()
        };
        let mut bowlers = HashMap::new();
        bowlers.insert("b1".to_string(), bowler.clone());
        Self {
            state: MatchStateDto {
                match_id: MATCH_ID.into(),
                status: MatchStatus::InProgress,
                innings: 1,
                total_overs,
                batting_team: TeamDto {
                    id: "t1".into(),
                    name: "Lions".into(),
                    score: 0,
                    wickets: 0,
                },
                bowling_team: TeamDto {
                    id: "t2".into(),
                    name: "Tigers".into(),
                    score: 0,
                    wickets: 0,
                },
                striker: Some(batter("a1")),
                non_striker: Some(batter("a2")),
                current_bowler: Some(bowler),
                previous_bowler_id: None,
                completed_overs: 0,
                current_over: Vec::new(),
                first_innings_batting: Vec::new(),
                second_innings_batting: Vec::new(),
                first_innings_bowling: Vec::new(),
                second_innings_bowling: Vec::new(),
                target: None,
                result: None,
            },
            bowlers,
            batting_xi: (1..=11).map(|i| player(&format!("a{i}"))).collect(),
            bowling_xi: (1..=11).map(|i| player(&format!("b{i}"))).collect(),
            calls: Vec::new(),
            fail_fetch: false,
            reject_next: None,
        }
    }

    pub fn not_started(total_overs: u32) -> Self {
        let mut sim = Self::in_progress(total_overs);
        sim.state.status = MatchStatus::NotStarted;
        sim.state.striker = None;
        sim.state.non_striker = None;
        sim.state.current_bowler = None;
        sim
    }

    /// Fast-forward to `overs.balls` with dot balls bowled by b1.
    pub fn at(total_overs: u32, completed_overs: u32, balls: u32) -> Self {
        let mut sim = Self::in_progress(total_overs);
        sim.state.completed_overs = completed_overs;
        sim.state.current_over = vec!["0".to_string(); balls as usize];
        if let Some(b) = sim.state.current_bowler.as_mut() {
            b.balls = balls;
            sim.bowlers.insert(b.id.clone(), b.clone());
        }
        if completed_overs > 0 {
            sim.state.previous_bowler_id = Some("b2".into());
        }
        sim
    }

    fn take_rejection(&mut self, endpoint: &str) -> Result<(), FetchError> {
        match self.reject_next.take() {
            Some(message) => Err(FetchError::Rejected {
                endpoint: endpoint.into(),
                message,
            }),
            None => Ok(()),
        }
    }

    /// Apply a published ball and return the broadcast body for it.
    pub fn score(&mut self, payload: &BallEventPayload) -> String {
        let s = &mut self.state;
        let extra = if payload.wide {
            Some(ExtraKind::Wide)
        } else if payload.no_ball {
            Some(ExtraKind::NoBall)
        } else if payload.bye {
            Some(ExtraKind::Bye)
        } else if payload.leg_bye {
            Some(ExtraKind::LegBye)
        } else {
            None
        };
        let penalty = u32::from(payload.wide || payload.no_ball);
        let outcome = BallOutcome {
            runs: payload.runs + penalty,
            extra,
            wicket: payload.wicket,
        };

        s.batting_team.score += outcome.runs;
        if outcome.wicket {
            s.batting_team.wickets += 1;
        }

        if let Some(striker) = s.striker.as_mut() {
            striker.runs += outcome.batter_runs();
            if outcome.faces_ball() {
                striker.balls += 1;
            }
            if outcome.is_four() {
                striker.fours += 1;
            }
            if outcome.is_six() {
                striker.sixes += 1;
            }
        }
        if let Some(bowler) = s.current_bowler.as_mut() {
            bowler.runs += outcome.bowler_conceded();
            if outcome.is_legal() {
                bowler.balls += 1;
            }
            let credited = payload.wicket_type.map_or(true, |t| t.credited_to_bowler());
            if outcome.wicket && credited {
                bowler.wickets += 1;
            }
            self.bowlers.insert(bowler.id.clone(), bowler.clone());
        }

        let dismissed = if outcome.wicket {
            payload
                .run_out_getter_id
                .clone()
                .or_else(|| Some(payload.striker_id.clone()))
        } else {
            None
        };

        if payload.runs % 2 == 1 {
            std::mem::swap(&mut s.striker, &mut s.non_striker);
        }

        let legal_before = s.current_over.iter().filter(|t| !t.contains("Wd") && !t.contains("Nb")).count();
        let over_done = outcome.is_legal() && legal_before + 1 == 6;
        if over_done {
            s.completed_overs += 1;
            s.current_over.clear();
            s.previous_bowler_id = s.current_bowler.as_ref().map(|b| b.id.clone());
            std::mem::swap(&mut s.striker, &mut s.non_striker);
        } else {
            s.current_over.push(outcome.token());
        }

        if let Some(id) = &dismissed {
            for end in [&mut s.striker, &mut s.non_striker] {
                if end.as_ref().is_some_and(|b| &b.id == id) {
                    *end = None;
                }
            }
        }

        let update = BallUpdatePayload {
            match_id: Some(s.match_id.clone()),
            ball: BallDto {
                runs: outcome.runs,
                extra,
                wicket: outcome.wicket,
                wicket_type: payload.wicket_type,
                dismissed_player_id: dismissed,
                dismissal_text: None,
            },
            striker: s.striker.clone(),
            non_striker: s.non_striker.clone(),
            current_bowler: s.current_bowler.clone(),
            batting_team: Some(s.batting_team.clone()),
            bowling_team: Some(s.bowling_team.clone()),
        };
        serde_json::json!({ "eventName": EVENT_BALL_UPDATE, "payload": update }).to_string()
    }
}

pub fn batter(id: &str) -> BatterDto {
    BatterDto {
        id: id.into(),
        name: id.to_uppercase(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Fake data service
// ---------------------------------------------------------------------------

pub struct FakeService {
    pub sim: Arc<Mutex<Sim>>,
}

#[async_trait]
impl MatchDataService for FakeService {
    async fn fetch_match_state(&self, match_id: &str) -> Result<MatchStateDto, FetchError> {
        let mut sim = self.sim.lock().unwrap();
        sim.calls.push(format!("fetch {match_id}"));
        if sim.fail_fetch {
            return Err(FetchError::Status {
                endpoint: format!("matchstate/{match_id}"),
                status: 503,
            });
        }
        Ok(sim.state.clone())
    }

    async fn undo_last_ball(&self, match_id: &str) -> Result<(), FetchError> {
        let mut sim = self.sim.lock().unwrap();
        sim.calls.push(format!("undo {match_id}"));
        sim.take_rejection("undo")
    }

    async fn submit_toss(&self, match_id: &str, toss: &TossRequest) -> Result<(), FetchError> {
        let mut sim = self.sim.lock().unwrap();
        sim.calls
            .push(format!("toss {match_id} {} {:?}", toss.winner_team_id, toss.decision));
        sim.take_rejection("toss")?;
        sim.state.status = MatchStatus::InProgress;
        Ok(())
    }

    async fn select_next_batsman(&self, match_id: &str, player_id: &str) -> Result<(), FetchError> {
        let mut sim = self.sim.lock().unwrap();
        sim.calls.push(format!("batsman {match_id} {player_id}"));
        sim.take_rejection("next-batsman")?;
        let s = &mut sim.state;
        if s.striker.is_none() {
            s.striker = Some(batter(player_id));
        } else if s.non_striker.is_none() {
            s.non_striker = Some(batter(player_id));
        }
        Ok(())
    }

    async fn select_next_bowler(&self, match_id: &str, player_id: &str) -> Result<(), FetchError> {
        let mut sim = self.sim.lock().unwrap();
        sim.calls.push(format!("bowler {match_id} {player_id}"));
        sim.take_rejection("next-bowler")?;
        let bowler = sim.bowlers.get(player_id).cloned().unwrap_or_else(|| BowlerDto {
            id: player_id.into(),
            name: player_id.to_uppercase(),
            ..Default::default()
        });
        sim.state.current_bowler = Some(bowler);
        Ok(())
    }

    async fn start_second_innings(&self, match_id: &str) -> Result<(), FetchError> {
        let mut sim = self.sim.lock().unwrap();
        sim.calls.push(format!("start2 {match_id}"));
        sim.take_rejection("start-second-innings")?;
        let s = &mut sim.state;
        s.status = MatchStatus::InProgress;
        s.innings = 2;
        s.target = Some(s.batting_team.score + 1);
        std::mem::swap(&mut s.batting_team, &mut s.bowling_team);
        s.batting_team.score = 0;
        s.batting_team.wickets = 0;
        s.striker = None;
        s.non_striker = None;
        s.current_bowler = None;
        s.previous_bowler_id = None;
        s.completed_overs = 0;
        s.current_over.clear();
        sim.bowlers.clear();
        Ok(())
    }

    async fn playing_xi(&self, match_id: &str, side: TeamSide) -> Result<Vec<PlayerRef>, FetchError> {
        let mut sim = self.sim.lock().unwrap();
        sim.calls.push(format!("xi {match_id} {side:?}"));
        Ok(match side {
            TeamSide::Batting => sim.batting_xi.clone(),
            TeamSide::Bowling => sim.bowling_xi.clone(),
        })
    }

    async fn batting_available(&self, match_id: &str) -> Result<Vec<PlayerRef>, FetchError> {
        let mut sim = self.sim.lock().unwrap();
        sim.calls.push(format!("available {match_id}"));
        let at_crease: Vec<String> = [&sim.state.striker, &sim.state.non_striker]
            .into_iter()
            .flatten()
            .map(|b| b.id.clone())
            .collect();
        Ok(sim
            .batting_xi
            .iter()
            .filter(|p| !at_crease.contains(&p.id))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Fake channels
// ---------------------------------------------------------------------------

pub struct FakeChannel {
    kind: ChannelKind,
    pub ready: AtomicBool,
    pub closed: AtomicBool,
    pub published: Mutex<Vec<(String, String, Vec<(String, String)>)>>,
    pub subscriptions: Mutex<Vec<String>>,
}

impl FakeChannel {
    fn new(kind: ChannelKind, ready: bool) -> Self {
        Self {
            kind,
            ready: AtomicBool::new(ready),
            closed: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

/// `Box<dyn Channel>` wrapper so the test keeps a handle to each channel.
struct SharedChannel(Arc<FakeChannel>);

impl Channel for SharedChannel {
    fn kind(&self) -> ChannelKind {
        self.0.kind
    }

    fn is_ready(&self) -> bool {
        self.0.ready.load(Ordering::SeqCst) && !self.0.closed.load(Ordering::SeqCst)
    }

    fn publish(&self, destination: &str, body: String, headers: &[(&str, &str)]) -> Result<(), PublishError> {
        if !self.is_ready() {
            return Err(PublishError::NotReady(self.0.kind));
        }
        self.0.published.lock().unwrap().push((
            destination.to_string(),
            body,
            headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        ));
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), PublishError> {
        self.0.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeConnector {
    pub ready_on_open: AtomicBool,
    pub opened: Mutex<Vec<Arc<FakeChannel>>>,
    pub reconnect_flags: Mutex<Vec<Arc<AtomicBool>>>,
    pub events: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            ready_on_open: AtomicBool::new(true),
            opened: Mutex::new(Vec::new()),
            reconnect_flags: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        }
    }

    /// Most recently opened channel of `kind`.
    pub fn latest(&self, kind: ChannelKind) -> Arc<FakeChannel> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.kind == kind)
            .cloned()
            .expect("channel was never opened")
    }

    pub fn open_count(&self, kind: ChannelKind) -> usize {
        self.opened.lock().unwrap().iter().filter(|c| c.kind == kind).count()
    }
}

impl ChannelConnector for FakeConnector {
    fn open(
        &self,
        kind: ChannelKind,
        match_id: &str,
        reconnect_allowed: Arc<AtomicBool>,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Box<dyn Channel> {
        *self.events.lock().unwrap() = Some(events);
        let channel = Arc::new(FakeChannel::new(kind, self.ready_on_open.load(Ordering::SeqCst)));
        if kind == ChannelKind::Live {
            channel
                .subscriptions
                .lock()
                .unwrap()
                .push(crease_core::protocol::broadcast_topic(match_id));
        }
        self.opened.lock().unwrap().push(channel.clone());
        self.reconnect_flags.lock().unwrap().push(reconnect_allowed);
        Box::new(SharedChannel(channel))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub session: ScoringSession,
    pub sim: Arc<Mutex<Sim>>,
    pub connector: Arc<FakeConnector>,
    pub updates: Vec<UiUpdate>,
    ui_tx: mpsc::Sender<UiUpdate>,
    ui_rx: mpsc::Receiver<UiUpdate>,
    events_rx: mpsc::Receiver<ChannelEvent>,
    delivered: usize,
}

impl Harness {
    /// Start a session against `sim` with paused time.
    pub async fn start(sim: Sim) -> Self {
        tokio::time::pause();
        let sim = Arc::new(Mutex::new(sim));
        let connector = Arc::new(FakeConnector::new());
        let service = Arc::new(FakeService { sim: sim.clone() });
        let (session, events_rx) = ScoringSession::new(&test_config(), MATCH_ID, service, connector.clone());
        let (ui_tx, ui_rx) = mpsc::channel(1024);
        let mut harness = Self {
            session,
            sim,
            connector,
            updates: Vec::new(),
            ui_tx,
            ui_rx,
            events_rx,
            delivered: 0,
        };
        harness.session.start(&harness.ui_tx).await;
        harness.drain();
        harness
    }

    fn drain(&mut self) {
        while let Ok(update) = self.ui_rx.try_recv() {
            self.updates.push(update);
        }
    }

    pub async fn cmd(&mut self, cmd: ScorerCommand) {
        self.session.handle_command(cmd, &self.ui_tx).await;
        self.drain();
    }

    pub async fn event(&mut self, event: ChannelEvent) {
        self.session
            .process_channel_event(event, &mut self.events_rx, &self.ui_tx)
            .await;
        self.drain();
    }

    /// Put an event on the session's queue without handling it, as a
    /// channel task would.
    pub fn enqueue(&self, event: ChannelEvent) {
        let events = self.connector.events.lock().unwrap().clone();
        events
            .expect("no channel was opened")
            .try_send(event)
            .expect("event queue full");
    }

    /// Handle everything currently queued.
    pub async fn pump(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.session
                .process_channel_event(event, &mut self.events_rx, &self.ui_tx)
                .await;
        }
        self.drain();
    }

    pub async fn broadcast(&mut self, body: &str) {
        self.session.handle_broadcast(body, &self.ui_tx).await;
        self.drain();
    }

    /// Ball payloads published on any submit channel so far.
    pub fn published(&self) -> Vec<BallEventPayload> {
        self.connector
            .opened
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.kind == ChannelKind::Submit)
            .flat_map(|c| c.published.lock().unwrap().clone())
            .map(|(_, body, _)| serde_json::from_str(&body).unwrap())
            .collect()
    }

    /// Let the server process every ball published since the last call and
    /// feed the resulting broadcasts to the session. Returns how many.
    pub async fn deliver(&mut self) -> usize {
        let pending: Vec<BallEventPayload> = self.published().into_iter().skip(self.delivered).collect();
        self.delivered += pending.len();
        for payload in &pending {
            let body = self.sim.lock().unwrap().score(payload);
            self.broadcast(&body).await;
        }
        pending.len()
    }

    /// Score one delivery and have it confirmed.
    pub async fn ball(&mut self, runs: u32, extra: Option<ExtraKind>) {
        self.cmd(ScorerCommand::Score { runs, extra }).await;
        assert_eq!(self.deliver().await, 1, "ball was not published: {:?}", self.notices());
    }

    pub async fn advance(&mut self, by: Duration) {
        tokio::time::advance(by).await;
        self.session.fire_due(Instant::now(), &self.ui_tx).await;
        self.drain();
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.updates
            .iter()
            .filter_map(|u| match u {
                UiUpdate::Notice(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_notice(&self) -> Option<Notice> {
        self.notices().pop()
    }

    pub fn clear_updates(&mut self) {
        self.updates.clear();
    }

    pub fn sim_state(&self) -> MatchStateDto {
        self.sim.lock().unwrap().state.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.sim.lock().unwrap().calls.clone()
    }
}
