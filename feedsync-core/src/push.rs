//! Server push channel.
//!
//! One websocket per session. The channel dials with the current credential, decodes text
//! frames into [`PushEvent`]s and hands them to an mpsc queue. When the socket drops it
//! schedules a reconnect after a fixed delay, at most `max_reconnect_attempts` times in a
//! row; a successful open resets the count and [`PushChannel::disconnect`] ends the cycle.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::auto_refresh::next_tick;
use crate::config::PushConfig;
use crate::credentials::CredentialProvider;
use crate::error::PushError;
use crate::event::{ClientFrame, PushEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

#[derive(Debug, Clone)]
pub struct PushOptions {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub keepalive: Option<Duration>,
}

impl From<&PushConfig> for PushOptions {
    fn from(config: &PushConfig) -> Self {
        Self {
            url: config.ws_url.clone(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
            keepalive: config.keepalive(),
        }
    }
}

struct Control {
    state: ConnectionState,
    attempts: u32,
    // Bumped by every connect and disconnect; transports and timers of an older
    // generation no longer touch the channel.
    generation: u64,
    transport: Option<oneshot::Sender<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Shared {
    options: PushOptions,
    credentials: Arc<dyn CredentialProvider>,
    events: mpsc::UnboundedSender<PushEvent>,
    state_tx: watch::Sender<ConnectionState>,
    control: Mutex<Control>,
}

#[derive(Clone)]
pub struct PushChannel {
    inner: Arc<Shared>,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl PushChannel {
    pub fn new(
        options: PushOptions,
        credentials: Arc<dyn CredentialProvider>,
        events: mpsc::UnboundedSender<PushEvent>,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Shared {
                options,
                credentials,
                events,
                state_tx,
                control: Mutex::new(Control {
                    state: ConnectionState::Disconnected,
                    attempts: 0,
                    generation: 0,
                    transport: None,
                    reconnect: None,
                }),
            }),
        }
    }

    /// Opens the connection unless one is already open or being established.
    ///
    /// A pending reconnect timer is cancelled, this call supersedes it.
    pub fn connect(&self) -> Result<(), PushError> {
        let token = self
            .inner
            .credentials
            .token()
            .ok_or(PushError::Unauthenticated)?;
        let url = self.endpoint(&token)?;

        let mut control = self.control();
        if control.state != ConnectionState::Disconnected {
            debug!(state = ?control.state, "push channel already active");
            return Ok(());
        }
        if let Some(timer) = control.reconnect.take() {
            timer.abort();
        }
        control.generation += 1;
        let generation = control.generation;
        self.set_state(&mut control, ConnectionState::Connecting);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        control.transport = Some(shutdown_tx);
        tokio::spawn(self.clone().run_transport(generation, url, shutdown_rx));
        Ok(())
    }

    /// Closes the connection and stops reconnecting until the next [`connect`](Self::connect).
    pub fn disconnect(&self) {
        let mut control = self.control();
        if let Some(timer) = control.reconnect.take() {
            timer.abort();
        }
        control.attempts = self.inner.options.max_reconnect_attempts;
        control.generation += 1;
        if let Some(shutdown) = control.transport.take() {
            let _ = shutdown.send(());
        }
        self.set_state(&mut control, ConnectionState::Disconnected);
        info!("push channel disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        self.control().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Automatic reconnects made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.control().attempts
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.control().reconnect.is_some()
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        // Control is only mutated by short non-panicking sections.
        self.inner
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, control: &mut Control, state: ConnectionState) {
        control.state = state;
        self.inner.state_tx.send_replace(state);
    }

    fn endpoint(&self, token: &str) -> Result<Url, PushError> {
        let mut url = Url::parse(&self.inner.options.url)?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    async fn run_transport(
        self,
        generation: u64,
        url: Url,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = &mut shutdown => {
                debug!("push connect abandoned");
                return;
            }
        };

        match connected {
            Ok((socket, _response)) => {
                if self.opened(generation) {
                    self.pump(socket, shutdown).await;
                }
            }
            Err(e) => warn!(error = %e, "push channel connection failed"),
        }
        self.closed(generation);
    }

    fn opened(&self, generation: u64) -> bool {
        let mut control = self.control();
        if control.generation != generation {
            return false;
        }
        control.attempts = 0;
        if let Some(timer) = control.reconnect.take() {
            timer.abort();
        }
        self.set_state(&mut control, ConnectionState::Open);
        info!("push channel open");
        true
    }

    async fn pump(&self, socket: Socket, mut shutdown: oneshot::Receiver<()>) {
        let (mut write, mut read) = socket.split();
        let mut keepalive = self.inner.options.keepalive.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                _ = next_tick(&mut keepalive) => {
                    let ping = match ClientFrame::Ping.to_text() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "could not encode keepalive");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(ping)).await {
                        warn!(error = %e, "keepalive send failed");
                        break;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.deliver(&text),
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "server closed push channel");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "push channel read failed");
                        break;
                    }
                    None => break,
                },
            }
        }
    }

    fn deliver(&self, text: &str) {
        match PushEvent::parse(text) {
            Ok(event) => {
                debug!(kind = event.kind(), "push event received");
                if self.inner.events.send(event).is_err() {
                    debug!("push event receiver dropped");
                }
            }
            Err(e) => warn!(error = %e, frame = %text, "dropping malformed push frame"),
        }
    }

    fn closed(&self, generation: u64) {
        let mut control = self.control();
        if control.generation != generation {
            return;
        }
        control.transport = None;
        self.set_state(&mut control, ConnectionState::Disconnected);

        if control.reconnect.is_some() {
            return;
        }
        if !self.inner.credentials.has_token() {
            info!("no credential, push channel stays disconnected");
            return;
        }
        let max = self.inner.options.max_reconnect_attempts;
        if control.attempts >= max {
            warn!(attempts = control.attempts, "giving up reconnecting push channel");
            return;
        }

        control.attempts += 1;
        let delay = self.inner.options.reconnect_delay;
        info!(
            attempt = control.attempts,
            max,
            delay_ms = delay.as_millis() as u64,
            "scheduling push reconnect"
        );
        let channel = self.clone();
        control.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            channel.fire_reconnect(generation);
        }));
    }

    fn fire_reconnect(&self, generation: u64) {
        {
            let mut control = self.control();
            if control.generation != generation {
                return;
            }
            control.reconnect = None;
        }
        if let Err(e) = self.connect() {
            warn!(error = %e, "push reconnect failed");
        }
    }
}
