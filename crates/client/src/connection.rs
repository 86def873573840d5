//! WebSocket driver for [`Reconciler`].
//!
//! One background task owns the socket. It reconnects with exponential
//! backoff plus jitter, re-joins the last room after every reconnect and
//! publishes [`Update`]s to the application.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pointroom_protocol::{ClientEvent, ClientFrame, CorrelationId, ServerFrame, StoryId, UserId};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::mirror::Mirror;
use crate::reconciler::{DEFAULT_PENDING_TIMEOUT, Reconciler, Update};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(15),
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt `attempt` (zero-based): doubles each
    /// time up to `max`, plus up to 50% random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let base = self.initial.saturating_mul(factor).min(self.max);
        let spread = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = rand::rng().random_range(0..=spread);
        base + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `ws://host:port/ws`
    pub url: String,
    pub backoff: Backoff,
    pub pending_timeout: Duration,
    /// How often unconfirmed operations are checked for expiry.
    pub expiry_tick: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backoff: Backoff::default(),
            pending_timeout: DEFAULT_PENDING_TIMEOUT,
            expiry_tick: Duration::from_millis(500),
        }
    }
}

enum SessionEnd {
    Dropped,
    Shutdown,
}

/// Handle to a running client. Dropping every clone stops the driver.
#[derive(Clone)]
pub struct RoomClient {
    state: Arc<Mutex<Reconciler>>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

impl RoomClient {
    pub fn spawn(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<Update>, JoinHandle<()>) {
        let state = Arc::new(Mutex::new(Reconciler::new(config.pending_timeout)));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(config, state.clone(), outbound_rx, updates_tx));
        (Self { state, outbound }, updates_rx, task)
    }

    /// Copy of the current local state.
    pub fn mirror(&self) -> Mirror {
        self.state.lock().mirror().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending().len()
    }

    pub fn create_room(
        &self,
        name: &str,
        user_id: Option<UserId>,
        display_name: &str,
    ) -> ClientResult<CorrelationId> {
        let frame = self.state.lock().create_room(
            name.to_string(),
            user_id,
            display_name.to_string(),
            None,
        );
        self.submit(frame)
    }

    pub fn join_room(&self, room: &str, user_id: &str, display_name: &str) -> ClientResult<CorrelationId> {
        let frame = self.state.lock().join_room(
            room,
            user_id.to_string(),
            display_name.to_string(),
        );
        self.submit(frame)
    }

    pub fn leave_room(&self) -> ClientResult<CorrelationId> {
        let frame = self.state.lock().leave_room();
        self.submit(frame)
    }

    pub fn vote(&self, story_id: StoryId, value: &str) -> ClientResult<CorrelationId> {
        self.ensure_running()?;
        let frame = self.state.lock().vote(story_id, value, Instant::now())?;
        self.submit(frame)
    }

    pub fn create_story(&self, title: &str, description: Option<&str>) -> ClientResult<CorrelationId> {
        self.ensure_running()?;
        let frame = self.state.lock().create_story(
            title.to_string(),
            description.map(str::to_string),
            Instant::now(),
        )?;
        self.submit(frame)
    }

    pub fn update_story(
        &self,
        story_id: StoryId,
        title: Option<&str>,
        description: Option<&str>,
    ) -> ClientResult<CorrelationId> {
        self.ensure_running()?;
        let frame = self.state.lock().update_story(
            story_id,
            title.map(str::to_string),
            description.map(str::to_string),
            Instant::now(),
        )?;
        self.submit(frame)
    }

    /// Sends an event without an optimistic local change.
    pub fn send(&self, event: ClientEvent) -> ClientResult<CorrelationId> {
        let frame = self.state.lock().request(event);
        self.submit(frame)
    }

    fn ensure_running(&self) -> ClientResult<()> {
        if self.outbound.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    fn submit(&self, frame: ClientFrame) -> ClientResult<CorrelationId> {
        let correlation_id = frame.correlation_id.ok_or(ClientError::Closed)?;
        self.outbound.send(frame).map_err(|_| ClientError::Closed)?;
        Ok(correlation_id)
    }
}

async fn drive(
    config: ClientConfig,
    state: Arc<Mutex<Reconciler>>,
    mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
    updates: mpsc::UnboundedSender<Update>,
) {
    let mut attempt: u32 = 0;
    loop {
        match connect_async(config.url.as_str()).await {
            Ok((socket, _)) => {
                attempt = 0;
                info!(url = %config.url, "Connected");
                let _ = updates.send(Update::Connected);
                let end = run(socket, &config, &state, &mut outbound, &updates).await;
                let _ = updates.send(Update::Disconnected);
                match end {
                    Ok(SessionEnd::Shutdown) => return,
                    Ok(SessionEnd::Dropped) => info!(url = %config.url, "Connection dropped"),
                    Err(e) => warn!(url = %config.url, %e, "Connection failed"),
                }
            }
            Err(e) => warn!(url = %config.url, attempt, %e, "Connect attempt failed"),
        }

        if outbound.is_closed() {
            return;
        }
        let delay = config.backoff.delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect backoff");
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

async fn run(
    socket: Socket,
    config: &ClientConfig,
    state: &Mutex<Reconciler>,
    outbound: &mut mpsc::UnboundedReceiver<ClientFrame>,
    updates: &mpsc::UnboundedSender<Update>,
) -> ClientResult<SessionEnd> {
    let (mut sink, mut stream) = socket.split();

    let rejoin = state.lock().rejoin_frames();
    if !rejoin.is_empty() {
        // Requests queued while offline are superseded by the snapshot.
        let mut stale = 0;
        while outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "Dropped requests queued while offline");
        }
        for frame in rejoin {
            sink.send(Message::text(frame.to_text()?)).await?;
        }
    }

    let mut ticker = tokio::time::interval(config.expiry_tick);
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match ServerFrame::parse(text.as_str()) {
                    Ok(frame) => {
                        let applied = state.lock().apply(frame);
                        for update in applied {
                            let _ = updates.send(update);
                        }
                    }
                    Err(e) => warn!(%e, "Unreadable server frame"),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Dropped),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            frame = outbound.recv() => match frame {
                Some(frame) => sink.send(Message::text(frame.to_text()?)).await?,
                None => {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
            },
            _ = ticker.tick() => {
                let expired = state.lock().expire(Instant::now());
                for update in expired {
                    let _ = updates.send(update);
                }
            }
        }
    }
}
