//! Per-socket plumbing. Sockets stay dumb: frames are decoded here and
//! forwarded into the coordinator task's mailbox, which is the only place
//! session state is touched — message handling runs to completion there
//! before the next frame is processed, so replicas never see a torn write.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use tabdeck_core::ids::ConnectionId;
use tabdeck_core::protocol::Envelope;
use tabdeck_telemetry::FaultCounters;

use crate::server::CoordMsg;

pub(crate) async fn handle_socket(
    socket: WebSocket,
    coord_tx: mpsc::Sender<CoordMsg>,
    max_send_queue: usize,
    ping_interval: Duration,
    counters: Arc<FaultCounters>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(max_send_queue);

    // Writer task: forward coordinator frames + periodic ws-level ping.
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.tick().await; // consume first immediate tick
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The envelope's connection id identifies this socket for disconnect
    // bookkeeping; remember the first one seen.
    let mut connection_id: Option<ConnectionId> = None;

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            WsMessage::Text(text) => {
                let envelope = match Envelope::decode(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        counters.increment(e.kind());
                        tracing::warn!(error = %e, "dropping undecodable frame");
                        continue;
                    }
                };
                if connection_id.is_none() {
                    connection_id = Some(envelope.connection_id.clone());
                }
                if coord_tx
                    .send(CoordMsg::Inbound {
                        envelope,
                        outbound: outbound_tx.clone(),
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            // axum answers pings automatically; pongs carry no state we track.
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            _ => {}
        }
    }

    writer.abort();
    if let Some(connection_id) = connection_id {
        let _ = coord_tx.send(CoordMsg::Disconnect { connection_id }).await;
    }
    tracing::debug!("socket closed");
}
