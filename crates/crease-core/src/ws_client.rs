// Reconnecting STOMP-over-WebSocket client, one per real-time channel.
//
// A session holds two independent handles: `Submit` (publish only) and
// `Live` (subscribed to the match broadcast topic). Each handle owns a
// background task that connects, performs the STOMP handshake, exchanges
// heart-beats and reconnects a bounded number of times while the session's
// `reconnect_allowed` flag is set. The handle itself holds no match data;
// everything it observes is reported as `ChannelEvent`s.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::protocol::broadcast_topic;
use crate::stomp::{self, Command, Frame};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Scorer -> server ball events.
    Submit,
    /// Server -> subscribers broadcast for one match.
    Live,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Submit => f.write_str("submit"),
            ChannelKind::Live => f.write_str("live"),
        }
    }
}

/// State changes and inbound messages reported by a channel task.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Handshake finished (and, for `Live`, subscriptions sent).
    Ready { kind: ChannelKind },
    /// The link went down. `will_reconnect` is false when the task has
    /// stopped for good.
    Closed {
        kind: ChannelKind,
        will_reconnect: bool,
    },
    /// Body of a MESSAGE frame.
    Message { kind: ChannelKind, body: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{0} channel is not ready")]
    NotReady(ChannelKind),
    #[error("{0} channel is closed")]
    Closed(ChannelKind),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publishing seam between the session and a real-time connection.
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn is_ready(&self) -> bool;

    /// Queue a SEND frame. Fails fast with `NotReady` before the handshake.
    fn publish(
        &self,
        destination: &str,
        body: String,
        headers: &[(&str, &str)],
    ) -> Result<(), PublishError>;

    /// Record a subscription; it is (re)sent after every handshake.
    fn subscribe(&self, topic: &str) -> Result<(), PublishError>;

    /// Disconnect and stop reconnecting.
    fn close(&self);

    /// The channel has stopped for good and will never become ready again.
    fn is_closed(&self) -> bool;
}

/// Opens channels for a session.
pub trait ChannelConnector: Send + Sync {
    fn open(
        &self,
        kind: ChannelKind,
        match_id: &str,
        reconnect_allowed: Arc<AtomicBool>,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Box<dyn Channel>;
}

/// Everything a channel task needs to (re)connect.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub url: String,
    pub heartbeat: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Extra CONNECT headers (`user-id`, `match-id`).
    pub connect_headers: Vec<(String, String)>,
}

impl ChannelOptions {
    pub fn from_config(config: &Config, kind: ChannelKind, match_id: &str) -> Self {
        let mut connect_headers = vec![(
            "user-id".to_string(),
            config.credentials.scorer_id.clone(),
        )];
        if kind == ChannelKind::Submit {
            connect_headers.push(("match-id".to_string(), match_id.to_string()));
        }
        Self {
            url: config.server.ws_url.clone(),
            heartbeat: config.channels.heartbeat(),
            reconnect_delay: config.channels.reconnect_delay(),
            max_reconnect_attempts: config.channels.max_reconnect_attempts,
            connect_headers,
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionHandle
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Frame),
    Subscribe(String),
    Close,
}

/// Handle to one reconnecting channel. Dropping it closes the channel the
/// same way `close()` does.
pub struct ConnectionHandle {
    kind: ChannelKind,
    ready: watch::Receiver<bool>,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Spawn the channel task and return immediately; readiness is reported
    /// through `events` and `is_ready()`.
    pub fn connect(
        kind: ChannelKind,
        options: ChannelOptions,
        reconnect_allowed: Arc<AtomicBool>,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Self {
        Self::spawn(kind, options, reconnect_allowed, events, connect_ws)
    }

    /// Like `connect`, with the socket opened by `connect` instead of
    /// tokio-tungstenite.
    pub(crate) fn spawn<C, Fut, St, Si>(
        kind: ChannelKind,
        options: ChannelOptions,
        reconnect_allowed: Arc<AtomicBool>,
        events: mpsc::Sender<ChannelEvent>,
        connect: C,
    ) -> Self
    where
        C: FnMut(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(St, Si), WsError>> + Send + 'static,
        St: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
        Si: Sink<Message, Error = WsError> + Unpin + Send + 'static,
    {
        let (link, outbound, ready) = Link::new(kind, options, reconnect_allowed, events);
        let task = tokio::spawn(run_link(link, connect));
        Self {
            kind,
            ready,
            outbound,
            task,
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl Channel for ConnectionHandle {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    fn publish(
        &self,
        destination: &str,
        body: String,
        headers: &[(&str, &str)],
    ) -> Result<(), PublishError> {
        if !self.is_ready() {
            return Err(PublishError::NotReady(self.kind));
        }
        let mut frame = Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json");
        for (k, v) in headers {
            frame = frame.header(*k, *v);
        }
        self.outbound
            .send(Outbound::Frame(frame.with_body(body)))
            .map_err(|_| PublishError::Closed(self.kind))
    }

    fn subscribe(&self, topic: &str) -> Result<(), PublishError> {
        self.outbound
            .send(Outbound::Subscribe(topic.to_string()))
            .map_err(|_| PublishError::Closed(self.kind))
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    fn is_closed(&self) -> bool {
        self.task.is_finished()
    }
}

/// Production connector: STOMP over tokio-tungstenite.
pub struct WsConnector {
    config: Config,
}

impl WsConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ChannelConnector for WsConnector {
    fn open(
        &self,
        kind: ChannelKind,
        match_id: &str,
        reconnect_allowed: Arc<AtomicBool>,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Box<dyn Channel> {
        let options = ChannelOptions::from_config(&self.config, kind, match_id);
        let handle = ConnectionHandle::connect(kind, options, reconnect_allowed, events);
        if kind == ChannelKind::Live {
            // Cannot fail: the task was just spawned and holds the receiver.
            let _ = handle.subscribe(&broadcast_topic(match_id));
        }
        Box::new(handle)
    }
}

// ---------------------------------------------------------------------------
// Channel task
// ---------------------------------------------------------------------------

/// How a single connected stretch ended.
#[derive(Debug, PartialEq)]
pub(crate) enum LinkOutcome {
    /// We closed it (explicit close, handle dropped, or session gone).
    ClosedByUs,
    /// The transport went away or misbehaved.
    Dropped { was_ready: bool },
}

pub(crate) struct Link {
    kind: ChannelKind,
    options: ChannelOptions,
    subscriptions: Vec<String>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::Sender<ChannelEvent>,
    ready: watch::Sender<bool>,
    reconnect_allowed: Arc<AtomicBool>,
}

impl Link {
    pub(crate) fn new(
        kind: ChannelKind,
        options: ChannelOptions,
        reconnect_allowed: Arc<AtomicBool>,
        events: mpsc::Sender<ChannelEvent>,
    ) -> (Self, mpsc::UnboundedSender<Outbound>, watch::Receiver<bool>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);
        let link = Link {
            kind,
            options,
            subscriptions: Vec::new(),
            outbound: out_rx,
            events,
            ready: ready_tx,
            reconnect_allowed,
        };
        (link, out_tx, ready_rx)
    }

    fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
    }

    async fn emit(&self, event: ChannelEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    fn connect_frame(&self) -> Frame {
        let beat = self.options.heartbeat.as_millis();
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host_of(&self.options.url))
            .header("heart-beat", format!("{beat},{beat}"));
        for (k, v) in &self.options.connect_headers {
            frame = frame.header(k.clone(), v.clone());
        }
        frame
    }

    fn subscribe_frame(&self, index: usize, topic: &str) -> Frame {
        Frame::new(Command::Subscribe)
            .header("id", format!("sub-{index}"))
            .header("destination", topic)
            .header("ack", "auto")
    }

    /// Sleep out the reconnect delay. Returns false if a close was requested
    /// meanwhile. Subscriptions requested during the wait are kept.
    async fn wait_before_retry(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.options.reconnect_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.outbound.recv() => match cmd {
                    Some(Outbound::Subscribe(topic)) => self.subscriptions.push(topic),
                    Some(Outbound::Frame(_)) => {
                        warn!("{} channel: dropping frame while reconnecting", self.kind);
                    }
                    Some(Outbound::Close) | None => return false,
                },
            }
        }
    }
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    rest.split(['/', '?']).next().unwrap_or(rest)
}

fn text(s: String) -> Message {
    Message::Text(s.into())
}

/// Open a WebSocket and split it into the halves `drive` pumps.
async fn connect_ws(
    url: String,
) -> Result<
    (
        impl Stream<Item = Result<Message, WsError>> + Unpin + Send,
        impl Sink<Message, Error = WsError> + Unpin + Send,
    ),
    WsError,
> {
    let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (sink, stream) = ws.split();
    Ok((stream, sink))
}

/// Connect, drive and reconnect until closed, out of attempts, or no longer
/// allowed to reconnect.
async fn run_link<C, Fut, St, Si>(mut link: Link, mut connect: C)
where
    C: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(St, Si), WsError>>,
    St: Stream<Item = Result<Message, WsError>> + Unpin,
    Si: Sink<Message, Error = WsError> + Unpin,
{
    let mut attempts: u32 = 0;

    loop {
        let outcome = match connect(link.options.url.clone()).await {
            Ok((stream, sink)) => {
                debug!("{} channel: socket open", link.kind);
                drive(stream, sink, &mut link).await
            }
            Err(e) => {
                warn!("{} channel: connect to {} failed: {e}", link.kind, link.options.url);
                LinkOutcome::Dropped { was_ready: false }
            }
        };
        link.set_ready(false);

        match outcome {
            LinkOutcome::ClosedByUs => {
                info!("{} channel closed", link.kind);
                let _ = link
                    .emit(ChannelEvent::Closed {
                        kind: link.kind,
                        will_reconnect: false,
                    })
                    .await;
                return;
            }
            LinkOutcome::Dropped { was_ready } => {
                if was_ready {
                    attempts = 0;
                }
            }
        }

        let allowed = link.reconnect_allowed.load(Ordering::SeqCst);
        let will_reconnect = allowed && attempts < link.options.max_reconnect_attempts;
        if !link
            .emit(ChannelEvent::Closed {
                kind: link.kind,
                will_reconnect,
            })
            .await
        {
            return;
        }
        if !will_reconnect {
            if allowed {
                warn!(
                    "{} channel: giving up after {} reconnect attempts",
                    link.kind, attempts
                );
            } else {
                info!("{} channel: reconnect not allowed, stopping", link.kind);
            }
            return;
        }

        attempts += 1;
        info!(
            "{} channel: reconnecting in {:?} (attempt {}/{})",
            link.kind, link.options.reconnect_delay, attempts, link.options.max_reconnect_attempts
        );
        if !link.wait_before_retry().await {
            info!("{} channel closed while waiting to reconnect", link.kind);
            return;
        }
        // The flag may have been cleared during the wait.
        if !link.reconnect_allowed.load(Ordering::SeqCst) {
            info!("{} channel: reconnect withdrawn, stopping", link.kind);
            return;
        }
    }
}

/// Run one connected stretch: handshake, subscriptions, message pump and
/// heart-beats. Generic over the transport so tests can drive it with
/// in-memory streams and sinks.
pub(crate) async fn drive<St, Si>(mut stream: St, mut sink: Si, link: &mut Link) -> LinkOutcome
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
    Si: Sink<Message, Error = WsError> + Unpin,
{
    if let Err(e) = sink.send(text(link.connect_frame().encode())).await {
        warn!("{} channel: failed to send CONNECT: {e}", link.kind);
        return LinkOutcome::Dropped { was_ready: false };
    }

    let mut ready = false;
    let mut outgoing_beat: Option<Duration> = None;
    let mut incoming_beat: Option<Duration> = None;
    let mut last_seen = Instant::now();
    let mut last_sent = Instant::now();

    let tick = (link.options.heartbeat / 2).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(body))) => {
                    last_seen = Instant::now();
                    let body = body.as_str();
                    if stomp::is_heartbeat(body) {
                        continue;
                    }
                    let frame = match Frame::parse(body) {
                        Ok(f) => f,
                        Err(e) => {
                            warn!("{} channel: unparseable frame: {e}", link.kind);
                            continue;
                        }
                    };
                    match frame.command {
                        Command::Connected => {
                            let (out, inc) =
                                stomp::negotiate_heartbeat(link.options.heartbeat, frame.get("heart-beat"));
                            outgoing_beat = out;
                            incoming_beat = inc;
                            for (i, topic) in link.subscriptions.iter().enumerate() {
                                let sub = link.subscribe_frame(i, topic).encode();
                                if let Err(e) = sink.send(text(sub)).await {
                                    warn!("{} channel: failed to subscribe to {topic}: {e}", link.kind);
                                    return LinkOutcome::Dropped { was_ready: false };
                                }
                            }
                            last_sent = Instant::now();
                            ready = true;
                            link.set_ready(true);
                            info!(
                                "{} channel ready (heart-beat out={:?} in={:?})",
                                link.kind, outgoing_beat, incoming_beat
                            );
                            if !link.emit(ChannelEvent::Ready { kind: link.kind }).await {
                                return LinkOutcome::ClosedByUs;
                            }
                        }
                        Command::Message => {
                            let event = ChannelEvent::Message {
                                kind: link.kind,
                                body: frame.body,
                            };
                            if !link.emit(event).await {
                                return LinkOutcome::ClosedByUs;
                            }
                        }
                        Command::Error => {
                            warn!(
                                "{} channel: server ERROR frame: {} {}",
                                link.kind,
                                frame.get("message").unwrap_or_default(),
                                frame.body
                            );
                            return LinkOutcome::Dropped { was_ready: ready };
                        }
                        other => {
                            debug!("{} channel: ignoring {other} frame", link.kind);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("{} channel: server closed the socket", link.kind);
                    return LinkOutcome::Dropped { was_ready: ready };
                }
                Some(Ok(_)) => {
                    // Binary, Ping, Pong, Frame: only proof of life.
                    last_seen = Instant::now();
                }
                Some(Err(e)) => {
                    warn!("{} channel: socket error: {e}", link.kind);
                    return LinkOutcome::Dropped { was_ready: ready };
                }
            },

            cmd = link.outbound.recv() => match cmd {
                Some(Outbound::Frame(frame)) => {
                    if !ready {
                        warn!("{} channel: dropping {} frame before handshake", link.kind, frame.command);
                        continue;
                    }
                    if let Err(e) = sink.send(text(frame.encode())).await {
                        warn!("{} channel: send failed: {e}", link.kind);
                        return LinkOutcome::Dropped { was_ready: ready };
                    }
                    last_sent = Instant::now();
                }
                Some(Outbound::Subscribe(topic)) => {
                    let index = link.subscriptions.len();
                    link.subscriptions.push(topic.clone());
                    if ready {
                        let sub = link.subscribe_frame(index, &topic).encode();
                        if let Err(e) = sink.send(text(sub)).await {
                            warn!("{} channel: failed to subscribe to {topic}: {e}", link.kind);
                            return LinkOutcome::Dropped { was_ready: ready };
                        }
                        last_sent = Instant::now();
                    }
                }
                Some(Outbound::Close) | None => {
                    if ready {
                        let _ = sink.send(text(Frame::new(Command::Disconnect).encode())).await;
                    }
                    let _ = sink.close().await;
                    return LinkOutcome::ClosedByUs;
                }
            },

            _ = ticker.tick() => {
                if let Some(out) = outgoing_beat {
                    if last_sent.elapsed() >= out.min(tick) {
                        if let Err(e) = sink.send(text(stomp::HEARTBEAT.to_string())).await {
                            warn!("{} channel: heart-beat send failed: {e}", link.kind);
                            return LinkOutcome::Dropped { was_ready: ready };
                        }
                        last_sent = Instant::now();
                    }
                }
                let silence = last_seen.elapsed();
                let limit = if ready {
                    incoming_beat.map(|d| d * 2)
                } else {
                    Some(link.options.heartbeat * 2)
                };
                if let Some(limit) = limit {
                    if silence > limit {
                        warn!(
                            "{} channel: nothing received for {:?}, dropping link",
                            link.kind, silence
                        );
                        return LinkOutcome::Dropped { was_ready: ready };
                    }
                }
            }
        }
    }
}
