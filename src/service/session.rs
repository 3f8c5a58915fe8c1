use crate::{
    config::Settings,
    error::{ConnectError, TransferError},
    network::{
        Connector, DirectoryClient, Envelope, Frame, FrameLink, LinkTasks, ShardSelector,
        TokenProvider, WebSocketConnector,
    },
    service::{
        dispatcher::Dispatcher,
        events::{EventBus, EventReceiver, SessionEvent},
        file_transfer::{TransferCoordinator, TransferReport},
        handshake::{HandshakeOutcome, HandshakeSlot},
        roster::{PeerLink, PeerLinkSlot, Roster, RosterSnapshot},
    },
    utils::ParticipantId,
    RelayshareError, Result,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Authenticating,
    Connecting,
    Connected,
    Closing,
}

/// State owned jointly by the session and its receive pump.
pub(crate) struct Shared {
    pub settings: Settings,
    pub participant_id: ParticipantId,
    pub roster: Roster,
    pub peer_link: PeerLinkSlot,
    pub handshake: HandshakeSlot,
    pub events: EventBus,
    state: RwLock<SessionState>,
    token: RwLock<Option<String>>,
    endpoint: RwLock<Option<String>>,
    instance_name: RwLock<Option<String>>,
    outbound: RwLock<Option<mpsc::Sender<Frame>>>,
}

impl Shared {
    pub(crate) fn new(settings: Settings, participant_id: ParticipantId) -> Self {
        Self {
            settings,
            participant_id,
            roster: Roster::new(),
            peer_link: PeerLinkSlot::new(),
            handshake: HandshakeSlot::new(),
            events: EventBus::default(),
            state: RwLock::new(SessionState::Disconnected),
            token: RwLock::new(None),
            endpoint: RwLock::new(None),
            instance_name: RwLock::new(None),
            outbound: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected && self.outbound.read().is_some()
    }

    pub fn set_state(&self, next: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            debug!("Session state {:?} -> {:?}", previous, next);
            self.events.publish(SessionEvent::StateChanged(next));
        }
    }

    pub fn instance_name(&self) -> Option<String> {
        self.instance_name.read().clone()
    }

    pub fn set_instance_name(&self, name: Option<String>) {
        *self.instance_name.write() = name;
    }

    /// Queues one frame for the relay, waiting while the outbound queue is full.
    pub async fn send_frame(&self, frame: Frame) -> std::result::Result<(), TransferError> {
        let outbound = self
            .outbound
            .read()
            .clone()
            .ok_or(TransferError::NotConnected)?;
        outbound
            .send(frame)
            .await
            .map_err(|_| TransferError::MidStreamDisconnect)
    }

    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let text = envelope.to_text()?;
        debug!("⬆️ Sending {}", envelope.kind());
        self.send_frame(Frame::Text(text)).await?;
        Ok(())
    }

    fn take_outbound(&self) -> Option<mpsc::Sender<Frame>> {
        self.outbound.write().take()
    }

    /// Clears everything tied to a connection and returns to `Disconnected`.
    fn reset(&self, notify: bool) {
        self.take_outbound();
        *self.token.write() = None;
        *self.endpoint.write() = None;
        *self.instance_name.write() = None;
        self.roster.clear();
        self.peer_link.clear();
        self.handshake.resolve(HandshakeOutcome::Cancelled);
        self.set_state(SessionState::Disconnected);

        if notify {
            self.events.publish(SessionEvent::ConnectionStatusChanged {
                peer_id: None,
                accepted: false,
            });
            self.events.publish(SessionEvent::RosterChanged);
            self.events.publish(SessionEvent::InstanceInfo(None));
        }
    }
}

/// Lifecycle ownership. Cancelling `cancel` and bumping `generation` happen
/// together under this lock, and every state change made on behalf of a
/// start or a pump re-checks its token while holding it.
struct Control {
    cancel: CancellationToken,
    generation: u64,
    pump: Option<JoinHandle<()>>,
    link_tasks: Option<LinkTasks>,
}

type SharedControl = Arc<Mutex<Control>>;

/// The client session engine: one relay connection at a time, the receive
/// pump that dispatches inbound traffic, and the operations exposed to the
/// presentation layer.
pub struct SessionEngine {
    shared: Arc<Shared>,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn Connector>,
    selector: ShardSelector,
    control: SharedControl,
    span: tracing::Span,
}

impl SessionEngine {
    pub fn new(
        settings: Settings,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let participant_id = ParticipantId::from_settings(&settings.identity);
        Self::with_participant(settings, participant_id, tokens, connector)
    }

    pub fn with_participant(
        settings: Settings,
        participant_id: ParticipantId,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let selector = ShardSelector::from_settings(&settings.network);
        let span = tracing::info_span!("session", participant = %participant_id);
        Self {
            shared: Arc::new(Shared::new(settings, participant_id)),
            tokens,
            connector,
            selector,
            control: Arc::new(Mutex::new(Control {
                cancel: CancellationToken::new(),
                generation: 0,
                pump: None,
                link_tasks: None,
            })),
            span,
        }
    }

    /// Engine talking to the configured directory over HTTP and to relays
    /// over WebSocket.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let directory =
            DirectoryClient::new(&settings.network.directory_url, settings.request_timeout())?;
        Ok(Self::new(
            settings,
            Arc::new(directory),
            Arc::new(WebSocketConnector),
        ))
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.shared.participant_id
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn session_token(&self) -> Option<String> {
        self.shared.token.read().clone()
    }

    pub fn endpoint(&self) -> Option<String> {
        self.shared.endpoint.read().clone()
    }

    pub fn instance_name(&self) -> Option<String> {
        self.shared.instance_name()
    }

    pub fn roster(&self) -> RosterSnapshot {
        self.shared.roster.snapshot()
    }

    pub fn peer_link(&self) -> PeerLink {
        self.shared.peer_link.get()
    }

    /// Starts a session using the configured retry policy.
    pub async fn start(&self) -> Result<()> {
        let settings = &self.shared.settings;
        self.start_with(settings.network.max_retries, settings.reconnect_delay())
            .await
    }

    /// Authenticates, connects with up to `max_retries` attempts spaced by
    /// `retry_delay`, sends the session handshake and launches the receive
    /// pump. Any previous session or in-flight start is cancelled first.
    pub async fn start_with(&self, max_retries: u32, retry_delay: Duration) -> Result<()> {
        let was_live = self.shared.state() != SessionState::Disconnected;
        let (cancel, generation) = self.shutdown_current("Superseded").await;

        let result = match self.if_live(&cancel, |shared| shared.reset(was_live)) {
            Ok(()) => {
                self.run_start(max_retries, retry_delay, &cancel, generation)
                    .instrument(self.span.clone())
                    .await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(ref e) = result {
            if matches!(e, RelayshareError::Connect(ConnectError::Cancelled)) {
                debug!("Start superseded before it completed");
            } else {
                self.shared.events.publish(SessionEvent::SessionFailed(e.to_string()));
            }
        }
        result
    }

    /// Applies `change` to the shared state only if `cancel` has not been
    /// superseded.
    fn if_live<T>(
        &self,
        cancel: &CancellationToken,
        change: impl FnOnce(&Shared) -> T,
    ) -> std::result::Result<T, ConnectError> {
        let _control = self.control.lock();
        if cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }
        Ok(change(&self.shared))
    }

    async fn run_start(
        &self,
        max_retries: u32,
        retry_delay: Duration,
        cancel: &CancellationToken,
        generation: u64,
    ) -> Result<()> {
        let shared = &self.shared;
        let participant_id = shared.participant_id.clone();
        info!("🔑 Using participant id {}", participant_id);

        self.if_live(cancel, |s| s.set_state(SessionState::Authenticating))?;
        let token = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConnectError::Cancelled.into()),
            result = self.tokens.get_token(&participant_id) => result,
        };
        let token = match token {
            Ok(token) => token,
            Err(e) => {
                error!("❌ Authentication failed: {}", e);
                self.if_live(cancel, |s| s.set_state(SessionState::Disconnected))?;
                return Err(e.into());
            }
        };

        let endpoint = self.selector.select_endpoint(&participant_id);
        self.if_live(cancel, |s| {
            *s.token.write() = Some(token.clone());
            *s.endpoint.write() = Some(endpoint.clone());
            s.set_state(SessionState::Connecting);
        })?;
        info!("✅ Authenticated as {}", participant_id);

        let auth = Envelope::session_auth(participant_id.as_str(), &token).to_text()?;
        let link = match self
            .connect_with_retry(&endpoint, max_retries, retry_delay, cancel)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                self.if_live(cancel, |s| s.reset(false))?;
                error!("❌ {}", e);
                return Err(e.into());
            }
        };

        let FrameLink {
            outbound,
            inbound,
            tasks,
        } = link;

        if let Err(e) = outbound.send(Frame::Text(auth)).await {
            tasks.abort_all();
            self.if_live(cancel, |s| s.reset(false))?;
            return Err(ConnectError::HandshakeFailed(e.to_string()).into());
        }

        let mut control = self.control.lock();
        if cancel.is_cancelled() || control.generation != generation {
            tasks.abort_all();
            return Err(ConnectError::Cancelled.into());
        }

        *shared.outbound.write() = Some(outbound);
        shared.set_state(SessionState::Connected);
        info!("✅ Connected to relay at {}", endpoint);

        let pump = tokio::spawn(
            run_pump(
                shared.clone(),
                self.control.clone(),
                inbound,
                cancel.clone(),
                generation,
            )
            .instrument(self.span.clone()),
        );
        if let Some(stale) = control.pump.replace(pump) {
            stale.abort();
        }
        if let Some(stale) = control.link_tasks.replace(tasks) {
            stale.abort_all();
        }
        Ok(())
    }

    async fn connect_with_retry(
        &self,
        endpoint: &str,
        max_retries: u32,
        retry_delay: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<FrameLink, ConnectError> {
        let attempts = max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            info!(
                "🌐 Connecting to relay at {} (attempt {}/{})",
                endpoint, attempt, attempts
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
                result = self.connector.connect(endpoint) => result,
            };

            match result {
                Ok(link) => return Ok(link),
                Err(e) => {
                    warn!("⚠️ Connection attempt {} failed: {}", attempt, e);
                    last_error = e;
                }
            }

            if attempt < attempts {
                info!("⏳ Waiting {:?} before retry...", retry_delay);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }

        Err(ConnectError::RetriesExhausted {
            attempts,
            last_error,
        })
    }

    /// Asks the relay to link this participant with `peer_id`.
    pub async fn connect_to(&self, peer_id: &str) -> Result<()> {
        if !self.shared.is_connected() {
            warn!("⚠️ Not connected to a relay, cannot send connect request");
            return Err(RelayshareError::NotConnected);
        }

        self.shared.send_envelope(&Envelope::connect(peer_id)).await?;
        self.shared.peer_link.request(peer_id);
        info!("🔗 Connection request sent to {}", peer_id);
        Ok(())
    }

    /// Tells the relay we are leaving, then closes the session.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.shared.is_connected() {
            warn!("⚠️ Not connected, cannot disconnect");
            return Err(RelayshareError::NotConnected);
        }

        if let Err(e) = self.shared.send_envelope(&Envelope::Disconnect).await {
            warn!("⚠️ Failed to send disconnect message: {}", e);
        } else {
            info!("⛔️ Sent disconnect message to relay");
        }

        self.close("Client disconnect").await;
        Ok(())
    }

    /// Closes the connection with a normal-closure reason and clears all
    /// session state.
    pub async fn stop(&self) {
        self.close("Client stop").await;
    }

    pub async fn dispose(self) {
        self.stop().await;
    }

    pub async fn send_file(
        &self,
        target_id: &str,
        bytes: &[u8],
        file_name: &str,
    ) -> std::result::Result<TransferReport, TransferError> {
        TransferCoordinator::new(self.shared.clone())
            .send_file(target_id, bytes, file_name)
            .instrument(self.span.clone())
            .await
    }

    async fn close(&self, reason: &str) {
        let (cancel, _) = self.shutdown_current(reason).await;
        match self.if_live(&cancel, |shared| shared.reset(true)) {
            Ok(()) => info!("✅ Session closed ({})", reason),
            Err(_) => debug!("Close ({}) superseded by a newer start", reason),
        }
    }

    /// Cancels the in-flight start or running pump, sends a close frame and
    /// joins the connection's tasks. Returns the token and generation that
    /// now own the session.
    async fn shutdown_current(&self, reason: &str) -> (CancellationToken, u64) {
        let (cancel, generation, pump, link_tasks, outbound) = {
            let mut control = self.control.lock();
            control.cancel.cancel();
            control.cancel = CancellationToken::new();
            control.generation += 1;
            (
                control.cancel.clone(),
                control.generation,
                control.pump.take(),
                control.link_tasks.take(),
                self.shared.take_outbound(),
            )
        };

        if let Some(outbound) = outbound {
            self.shared.set_state(SessionState::Closing);
            let close = outbound.send(Frame::Close(Some(reason.to_string())));
            if tokio::time::timeout(CLOSE_GRACE, close).await.is_err() {
                debug!("Close frame could not be queued in time");
            }
        }

        if let Some(mut pump) = pump {
            if tokio::time::timeout(CLOSE_GRACE, &mut pump).await.is_err() {
                pump.abort();
            }
        }
        if let Some(tasks) = link_tasks {
            tasks.shutdown(CLOSE_GRACE).await;
        }

        (cancel, generation)
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        let mut control = self.control.lock();
        control.cancel.cancel();
        if let Some(pump) = control.pump.take() {
            pump.abort();
        }
        if let Some(tasks) = control.link_tasks.take() {
            tasks.abort_all();
        }
    }
}

/// Reads inbound frames one at a time until cancelled or the relay closes.
async fn run_pump(
    shared: Arc<Shared>,
    control: SharedControl,
    mut inbound: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
    generation: u64,
) {
    let mut dispatcher = Dispatcher::new(shared.clone());

    let close_reason = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Receive pump cancelled");
                return;
            }
            frame = inbound.recv() => frame,
        };

        match frame {
            Some(Frame::Close(reason)) => break reason,
            None => break None,
            Some(frame) => dispatcher.handle_frame(frame).await,
        }
    };

    info!("ℹ️ Relay closed connection ({})", close_reason.as_deref().unwrap_or("no reason"));
    let control = control.lock();
    if control.generation == generation && !cancel.is_cancelled() {
        shared.reset(true);
    } else {
        debug!("Stale pump exited, session already superseded");
    }
}
