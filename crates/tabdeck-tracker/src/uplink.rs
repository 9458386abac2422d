//! WebSocket uplink to the coordinator: connect, snapshot, then stream
//! events until the socket drops, reconnecting with capped exponential
//! backoff. The logical session survives reconnects — only the connection
//! id and seq counter are per-socket.

use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tabdeck_core::commands::Command;
use tabdeck_core::events::TabEvent;
use tabdeck_core::ids::{ConnectionId, InstanceId, RuntimeSessionId, TabId};
use tabdeck_core::protocol::{Body, Envelope};

use crate::browser::{execute_browser_command, BrowserApi};
use crate::error::TrackerError;
use crate::favicon::FaviconCache;
use crate::tracker::TabTracker;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct UplinkConfig {
    pub url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub jitter: f64,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:48125/ws".into(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Exponential backoff with jitter for reconnection attempts.
pub struct ExponentialBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            current: initial,
            initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// Get the next delay and advance the backoff.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay + Duration::from_secs_f64(jitter_amount)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

pub struct Uplink {
    instance_id: InstanceId,
    runtime_session_id: RuntimeSessionId,
    config: UplinkConfig,
}

impl Uplink {
    /// The instance id is the caller's stable installation identity; the
    /// runtime session id is regenerated for every tracker process.
    pub fn new(instance_id: InstanceId, config: UplinkConfig) -> Self {
        Self {
            instance_id,
            runtime_session_id: RuntimeSessionId::new(),
            config,
        }
    }

    pub fn runtime_session_id(&self) -> &RuntimeSessionId {
        &self.runtime_session_id
    }

    /// Drive the uplink until the event source is dropped. Each successful
    /// connection sends `connect`, re-seeds the tracker, sends a snapshot,
    /// then forwards events and serves commands.
    pub async fn run(
        &self,
        api: Arc<dyn BrowserApi>,
        tracker: Arc<Mutex<TabTracker>>,
        favicons: Arc<FaviconCache>,
        mut events: mpsc::Receiver<TabEvent>,
    ) {
        let mut backoff = ExponentialBackoff::new(
            self.config.initial_backoff,
            self.config.max_backoff,
            self.config.backoff_multiplier,
            self.config.jitter,
        );

        loop {
            match connect_async(self.config.url.as_str()).await {
                Ok((stream, _)) => {
                    backoff.reset();
                    match self
                        .serve_connection(stream, api.as_ref(), &tracker, &favicons, &mut events)
                        .await
                    {
                        Ok(true) => tracing::info!("uplink disconnected, will reconnect"),
                        Ok(false) => {
                            tracing::info!("event source closed, uplink stopping");
                            return;
                        }
                        Err(e) => tracing::warn!(error = %e, "uplink connection failed"),
                    }
                }
                Err(e) => {
                    tracing::debug!(url = %self.config.url, error = %e, "coordinator not reachable");
                }
            }

            let delay = backoff.next_delay();
            tracing::debug!(delay_ms = delay.as_millis() as u64, "uplink backing off");
            tokio::time::sleep(delay).await;
        }
    }

    /// Returns Ok(true) to reconnect, Ok(false) to stop for good.
    async fn serve_connection(
        &self,
        stream: WsStream,
        api: &dyn BrowserApi,
        tracker: &Mutex<TabTracker>,
        favicons: &Arc<FaviconCache>,
        events: &mut mpsc::Receiver<TabEvent>,
    ) -> Result<bool, TrackerError> {
        let (mut ws_tx, mut ws_rx) = stream.split();
        let connection_id = ConnectionId::new();
        let mut seq: u64 = 0;

        // Background favicon resolutions land here as (tab id, data url).
        let (fav_tx, mut fav_rx) = mpsc::channel::<(TabId, String)>(32);

        let connect = {
            let tracker = tracker.lock().await;
            tracker.connect_payload()
        };
        self.send(&mut ws_tx, &connection_id, &mut seq, Body::Connect(connect)).await?;

        let targets = {
            let mut tracker = tracker.lock().await;
            let targets = tracker.initialize(api).await?;
            let snapshot = tracker.snapshot();
            drop(tracker);
            self.send(&mut ws_tx, &connection_id, &mut seq, Body::Snapshot(snapshot)).await?;
            targets
        };
        self.prefetch_favicons(targets, favicons, &fav_tx);

        loop {
            tokio::select! {
                incoming = ws_rx.next() => {
                    let message = match incoming {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "uplink socket error");
                            return Ok(true);
                        }
                        None => return Ok(true),
                    };
                    match message {
                        Message::Text(text) => {
                            self.handle_frame(&text, &mut ws_tx, &connection_id, &mut seq, api, tracker, favicons, &fav_tx)
                                .await?;
                        }
                        Message::Ping(data) => {
                            ws_tx.send(Message::Pong(data)).await?;
                        }
                        Message::Close(_) => return Ok(true),
                        _ => {}
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(evt) => {
                            self.send(&mut ws_tx, &connection_id, &mut seq, Body::Event(evt)).await?;
                        }
                        None => return Ok(false),
                    }
                }
                resolved = fav_rx.recv() => {
                    if let Some((tab_id, data_url)) = resolved {
                        let evt = tracker.lock().await.favicon_resolved(tab_id, data_url);
                        if let Some(evt) = evt {
                            self.send(&mut ws_tx, &connection_id, &mut seq, Body::Event(evt)).await?;
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_frame(
        &self,
        text: &str,
        ws_tx: &mut (impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
        connection_id: &ConnectionId,
        seq: &mut u64,
        api: &dyn BrowserApi,
        tracker: &Mutex<TabTracker>,
        favicons: &Arc<FaviconCache>,
        fav_tx: &mpsc::Sender<(TabId, String)>,
    ) -> Result<(), TrackerError> {
        let envelope = match Envelope::decode(text) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed coordinator frame");
                return Ok(());
            }
        };

        match envelope.body {
            Body::Connected(ack) => {
                tracing::info!(server_version = %ack.server_version, "coordinator acknowledged connect");
            }
            Body::Command(Command::Refresh) => {
                let (snapshot, targets) = {
                    let mut tracker = tracker.lock().await;
                    let targets = tracker.refresh(api).await?;
                    (tracker.snapshot(), targets)
                };
                self.send(ws_tx, connection_id, seq, Body::Snapshot(snapshot)).await?;
                self.prefetch_favicons(targets, favicons, fav_tx);
            }
            Body::Command(Command::SetSortStrategy { strategy }) => {
                tracker.lock().await.set_sort_strategy(strategy);
            }
            Body::Command(command) => {
                let outcome = execute_browser_command(api, &command).await;
                if !outcome.success {
                    tracing::warn!(
                        command = command.name(),
                        error = outcome.error.as_deref().unwrap_or("unknown"),
                        "command execution failed"
                    );
                }
            }
            Body::Ping => {
                self.send(ws_tx, connection_id, seq, Body::Pong).await?;
            }
            other => {
                tracing::debug!(kind = other.kind(), "ignoring unexpected coordinator message");
            }
        }
        Ok(())
    }

    fn prefetch_favicons(
        &self,
        targets: Vec<(TabId, String)>,
        favicons: &Arc<FaviconCache>,
        fav_tx: &mpsc::Sender<(TabId, String)>,
    ) {
        for (tab_id, url) in targets {
            let favicons = Arc::clone(favicons);
            let fav_tx = fav_tx.clone();
            tokio::spawn(async move {
                let data_url = favicons.data_url(&url).await;
                let _ = fav_tx.send((tab_id, data_url)).await;
            });
        }
    }

    async fn send(
        &self,
        ws_tx: &mut (impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
        connection_id: &ConnectionId,
        seq: &mut u64,
        body: Body,
    ) -> Result<(), TrackerError> {
        *seq += 1;
        let envelope = Envelope {
            instance_id: self.instance_id.clone(),
            runtime_session_id: self.runtime_session_id.clone(),
            connection_id: connection_id.clone(),
            seq: *seq,
            body,
        };
        match envelope.encode() {
            Ok(json) => {
                ws_tx.send(Message::Text(json)).await?;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to encode envelope");
                Ok(())
            }
        }
    }
}
