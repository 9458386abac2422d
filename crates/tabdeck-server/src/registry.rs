//! Authoritative per-session replicas. The registry is a plain value owned
//! by the coordinator task — every mutation arrives through that single
//! task's mailbox, so no locking is needed and none is used.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use tabdeck_core::commands::Command;
use tabdeck_core::errors::ProtocolError;
use tabdeck_core::events::TabEvent;
use tabdeck_core::ids::{ConnectionId, SessionKey, TabId};
use tabdeck_core::protocol::{
    Body, ConnectPayload, ConnectedPayload, Envelope, SnapshotPayload, PROTOCOL_VERSION,
};
use tabdeck_core::strategy::SortStrategy;
use tabdeck_core::tabs::{
    BrowserTab, BrowserWindow, OtherDeviceTab, RecentlyClosedTab, TabAugmentation,
};
use tabdeck_core::time::epoch_ms;
use tabdeck_telemetry::FaultCounters;

const RECENTLY_CLOSED_KEEP: usize = 10;

/// One live socket belonging to a session. A session may hold several
/// during a reconnect race.
pub struct ConnectionState {
    pub sender: mpsc::Sender<String>,
    pub connected_at: i64,
    pub last_seq: u64,
    server_seq: u64,
}

/// Coordinator-owned replica of one logical browser session. Lives from the
/// first `connect` until the staleness sweep collects it; zero live
/// connections means temporarily disconnected, not destroyed.
pub struct Session {
    pub session_key: SessionKey,
    pub browser_type: String,
    pub extension_version: String,
    pub sort_strategy: SortStrategy,
    pub has_snapshot: bool,
    pub last_snapshot_seq: u64,
    pub tabs: Vec<BrowserTab>,
    pub windows: Vec<BrowserWindow>,
    pub augmentation: HashMap<TabId, TabAugmentation>,
    pub recently_closed: Vec<RecentlyClosedTab>,
    pub other_devices: Vec<OtherDeviceTab>,
    pub connections: HashMap<ConnectionId, ConnectionState>,
    pub active_tab: Option<TabId>,
    pub created_at: i64,
    pub last_activity: i64,
}

impl Session {
    fn new(session_key: SessionKey, connect: &ConnectPayload) -> Self {
        let now = epoch_ms();
        Self {
            session_key,
            browser_type: connect.browser_type.clone(),
            extension_version: connect.extension_version.clone(),
            sort_strategy: connect.sort_strategy,
            has_snapshot: false,
            last_snapshot_seq: 0,
            tabs: Vec::new(),
            windows: Vec::new(),
            augmentation: HashMap::new(),
            recently_closed: Vec::new(),
            other_devices: Vec::new(),
            connections: HashMap::new(),
            active_tab: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.has_snapshot && !self.connections.is_empty()
    }
}

/// What a handled message did to visible state. Drives the display builder:
/// `Rebuild` re-merges everything, `ConnectionsChanged` only re-checks the
/// active-session count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutation {
    Rebuild,
    ConnectionsChanged,
    None,
}

pub struct SessionRegistry {
    sessions: HashMap<SessionKey, Session>,
    /// Reverse lookup from socket to session, maintained alongside
    /// `Session::connections`.
    connections: HashMap<ConnectionId, SessionKey>,
    counters: Arc<FaultCounters>,
}

impl SessionRegistry {
    pub fn new(counters: Arc<FaultCounters>) -> Self {
        Self {
            sessions: HashMap::new(),
            connections: HashMap::new(),
            counters,
        }
    }

    /// Decode-and-dispatch entry point for everything a socket delivers.
    /// Protocol errors are counted and dropped; this never returns an error
    /// to the socket loop.
    pub fn handle_envelope(
        &mut self,
        envelope: Envelope,
        outbound: &mpsc::Sender<String>,
    ) -> Mutation {
        let session_key = envelope.session_key();
        let connection_id = envelope.connection_id.clone();
        let seq = envelope.seq;

        let result = match envelope.body {
            Body::Connect(connect) => {
                return self.handle_connect(session_key, connection_id, outbound.clone(), &connect);
            }
            Body::Snapshot(snapshot) => self.handle_snapshot(&session_key, &connection_id, seq, snapshot),
            Body::Event(event) => self.handle_event(&session_key, &connection_id, seq, &event),
            Body::Ping => self.handle_ping(&session_key, &connection_id, seq),
            Body::Pong => self.touch(&session_key, &connection_id, seq).map(|_| Mutation::None),
            // Only the coordinator emits these; an extension sending one is
            // misbehaving.
            Body::Connected(_) => Err(ProtocolError::UnexpectedPayload { kind: "connected" }),
            Body::Command(_) => Err(ProtocolError::UnexpectedPayload { kind: "command" }),
        };

        match result {
            Ok(mutation) => mutation,
            Err(e) => {
                self.counters.increment(e.kind());
                if e.is_expected() {
                    tracing::debug!(session = %session_key, error = %e, "dropping message");
                } else {
                    tracing::warn!(session = %session_key, error = %e, "dropping message");
                }
                Mutation::None
            }
        }
    }

    /// Get-or-create plus connection registration. This is the reconnection
    /// path too: existing tab data is NOT cleared here — stale state keeps
    /// the UI populated through the reconnect gap until a fresh snapshot
    /// replaces it.
    pub fn handle_connect(
        &mut self,
        session_key: SessionKey,
        connection_id: ConnectionId,
        sender: mpsc::Sender<String>,
        connect: &ConnectPayload,
    ) -> Mutation {
        let now = epoch_ms();
        let session = self
            .sessions
            .entry(session_key.clone())
            .or_insert_with(|| Session::new(session_key.clone(), connect));

        session.browser_type = connect.browser_type.clone();
        session.extension_version = connect.extension_version.clone();
        session.sort_strategy = connect.sort_strategy;
        session.last_activity = now;
        session.connections.insert(
            connection_id.clone(),
            ConnectionState {
                sender,
                connected_at: now,
                last_seq: 0,
                server_seq: 0,
            },
        );
        self.connections.insert(connection_id.clone(), session_key.clone());

        tracing::info!(
            session = %session_key,
            connections = session.connections.len(),
            browser = %session.browser_type,
            "session connected"
        );

        self.reply(&session_key, &connection_id, Body::Connected(ConnectedPayload {
            ok: true,
            server_version: PROTOCOL_VERSION.to_owned(),
        }));

        Mutation::ConnectionsChanged
    }

    /// Wholesale replacement of the session's collections.
    pub fn handle_snapshot(
        &mut self,
        session_key: &SessionKey,
        connection_id: &ConnectionId,
        seq: u64,
        snapshot: SnapshotPayload,
    ) -> Result<Mutation, ProtocolError> {
        self.touch(session_key, connection_id, seq)?;
        let session = self.session_mut(session_key)?;

        session.tabs = snapshot.session_tabs;
        session.windows = snapshot.session_windows;
        session.augmentation = snapshot.augmentation;
        session.recently_closed = snapshot.recently_closed;
        session.other_devices = snapshot.other_devices;
        session.active_tab = session.tabs.iter().find(|t| t.active).map(|t| t.id);
        session.has_snapshot = true;
        session.last_snapshot_seq = seq;
        let tab_count = session.tabs.len();

        self.counters.increment("snapshots_applied");
        tracing::debug!(session = %session_key, tabs = tab_count, "snapshot applied");
        Ok(Mutation::Rebuild)
    }

    /// Apply one event to the replica. Events arriving before any snapshot
    /// are the connect race and are silently dropped.
    pub fn handle_event(
        &mut self,
        session_key: &SessionKey,
        connection_id: &ConnectionId,
        seq: u64,
        event: &TabEvent,
    ) -> Result<Mutation, ProtocolError> {
        self.touch(session_key, connection_id, seq)?;
        let session = self.session_mut(session_key)?;
        if !session.has_snapshot {
            return Err(ProtocolError::BeforeSnapshot(session_key.to_string()));
        }

        let now = epoch_ms();
        match event {
            TabEvent::TabActivated { tab_id, window_id } => {
                if let Some(previous) = session.active_tab.take() {
                    if previous != *tab_id {
                        session.augmentation.entry(previous).or_default().last_deactivated =
                            Some(now);
                    }
                }
                session.augmentation.entry(*tab_id).or_default().last_activated = Some(now);
                session.active_tab = Some(*tab_id);
                for tab in &mut session.tabs {
                    if tab.window_id == *window_id {
                        tab.active = tab.id == *tab_id;
                    }
                }
            }
            TabEvent::TabCreated { tab } => {
                session.augmentation.entry(tab.id).or_default();
                match session.tabs.iter_mut().find(|t| t.id == tab.id) {
                    Some(existing) => *existing = tab.clone(),
                    None => session.tabs.push(tab.clone()),
                }
            }
            TabEvent::TabRemoved { tab_id, .. } => {
                if let Some(pos) = session.tabs.iter().position(|t| t.id == *tab_id) {
                    let tab = session.tabs.remove(pos);
                    session.recently_closed.insert(
                        0,
                        RecentlyClosedTab {
                            title: tab.title,
                            url: tab.url,
                            closed_at: now,
                        },
                    );
                    session.recently_closed.truncate(RECENTLY_CLOSED_KEEP);
                }
                session.augmentation.remove(tab_id);
                if session.active_tab == Some(*tab_id) {
                    session.active_tab = None;
                }
            }
            TabEvent::TabUpdated { tab_id, changes } => {
                if let Some(tab) = session.tabs.iter_mut().find(|t| t.id == *tab_id) {
                    if let Some(url) = &changes.url {
                        tab.url = Some(url.clone());
                    }
                    if let Some(title) = &changes.title {
                        tab.title = Some(title.clone());
                    }
                    if let Some(fav) = &changes.fav_icon_url {
                        tab.fav_icon_url = Some(fav.clone());
                    }
                    if let Some(pinned) = changes.pinned {
                        tab.pinned = pinned;
                    }
                }
            }
            TabEvent::WindowFocused { window_id } => {
                for window in &mut session.windows {
                    window.focused = window.id == *window_id;
                }
            }
            TabEvent::WindowCreated { window } => {
                match session.windows.iter_mut().find(|w| w.id == window.id) {
                    Some(existing) => *existing = window.clone(),
                    None => session.windows.push(window.clone()),
                }
            }
            TabEvent::WindowRemoved { window_id } => {
                session.windows.retain(|w| w.id != *window_id);
            }
            TabEvent::AugmentationUpdated { tab_id, augmentation } => {
                session.augmentation.insert(*tab_id, augmentation.clone());
            }
        }

        self.counters.increment("events_applied");
        Ok(Mutation::Rebuild)
    }

    fn handle_ping(
        &mut self,
        session_key: &SessionKey,
        connection_id: &ConnectionId,
        seq: u64,
    ) -> Result<Mutation, ProtocolError> {
        self.touch(session_key, connection_id, seq)?;
        self.reply(session_key, connection_id, Body::Pong);
        Ok(Mutation::None)
    }

    /// Remove the connection; the session itself is retained and keeps its
    /// last-known tab data for when the browser comes back.
    pub fn handle_disconnect(&mut self, connection_id: &ConnectionId) -> Mutation {
        let Some(session_key) = self.connections.remove(connection_id) else {
            return Mutation::None;
        };
        if let Some(session) = self.sessions.get_mut(&session_key) {
            session.connections.remove(connection_id);
            session.last_activity = epoch_ms();
            tracing::info!(
                session = %session_key,
                remaining = session.connections.len(),
                "connection closed, session retained"
            );
        }
        Mutation::ConnectionsChanged
    }

    /// Fan a command out to every live connection for the session. Safe to
    /// deliver more than once: commands are idempotent at the browser API.
    pub fn send_command(
        &mut self,
        session_key: &SessionKey,
        command: Command,
    ) -> Result<usize, ProtocolError> {
        let session = self.session_mut(session_key)?;
        let mut delivered = 0;
        for (connection_id, state) in session.connections.iter_mut() {
            state.server_seq += 1;
            let envelope = Envelope {
                instance_id: session_key.instance_id().clone(),
                runtime_session_id: session_key.runtime_session_id().clone(),
                connection_id: connection_id.clone(),
                seq: state.server_seq,
                body: Body::Command(command.clone()),
            };
            match envelope.encode() {
                Ok(json) => {
                    if state.sender.try_send(json).is_ok() {
                        delivered += 1;
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to encode command"),
            }
        }
        self.counters.increment("commands_sent");
        tracing::debug!(session = %session_key, command = command.name(), delivered, "command fanned out");
        Ok(delivered)
    }

    /// Sessions eligible for display: a snapshot applied and at least one
    /// live connection.
    pub fn active_sessions(&self) -> Vec<&Session> {
        self.sessions.values().filter(|s| s.is_active()).collect()
    }

    /// Delete zero-connection sessions whose last activity is older than
    /// the threshold. The only reclamation mechanism there is.
    pub fn cleanup_stale_sessions(&mut self, max_age_ms: i64) -> usize {
        let cutoff = epoch_ms() - max_age_ms;
        let stale: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.connections.is_empty() && s.last_activity < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.sessions.remove(key);
            tracing::info!(session = %key, "stale session removed");
        }
        stale.len()
    }

    pub fn session(&self, session_key: &SessionKey) -> Option<&Session> {
        self.sessions.get(session_key)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn session_mut(&mut self, session_key: &SessionKey) -> Result<&mut Session, ProtocolError> {
        self.sessions
            .get_mut(session_key)
            .ok_or_else(|| ProtocolError::UnknownSession(session_key.to_string()))
    }

    /// Record liveness and freshness for the connection that sent a message.
    fn touch(
        &mut self,
        session_key: &SessionKey,
        connection_id: &ConnectionId,
        seq: u64,
    ) -> Result<(), ProtocolError> {
        let session = self.session_mut(session_key)?;
        session.last_activity = epoch_ms();
        if let Some(state) = session.connections.get_mut(connection_id) {
            state.last_seq = state.last_seq.max(seq);
        }
        Ok(())
    }

    fn reply(&mut self, session_key: &SessionKey, connection_id: &ConnectionId, body: Body) {
        let Some(session) = self.sessions.get_mut(session_key) else {
            return;
        };
        let Some(state) = session.connections.get_mut(connection_id) else {
            return;
        };
        state.server_seq += 1;
        let envelope = Envelope {
            instance_id: session_key.instance_id().clone(),
            runtime_session_id: session_key.runtime_session_id().clone(),
            connection_id: connection_id.clone(),
            seq: state.server_seq,
            body,
        };
        match envelope.encode() {
            Ok(json) => {
                let _ = state.sender.try_send(json);
            }
            Err(e) => tracing::error!(error = %e, "failed to encode reply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabdeck_core::events::TabChanges;
    use tabdeck_core::ids::{InstanceId, RuntimeSessionId};

    fn key(instance: &str) -> SessionKey {
        SessionKey::new(
            InstanceId::from_raw(instance),
            RuntimeSessionId::from_raw("run_1"),
        )
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(FaultCounters::new()))
    }

    fn connect_payload() -> ConnectPayload {
        ConnectPayload {
            browser_type: "chrome".into(),
            extension_version: "1.0.0".into(),
            sort_strategy: SortStrategy::LastActivated,
        }
    }

    fn snapshot_with_tabs(tabs: Vec<BrowserTab>) -> SnapshotPayload {
        SnapshotPayload {
            session_tabs: tabs,
            ..Default::default()
        }
    }

    fn tab(id: TabId) -> BrowserTab {
        BrowserTab {
            id,
            window_id: 1,
            ..Default::default()
        }
    }

    fn connect(reg: &mut SessionRegistry, k: &SessionKey, conn: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(16);
        reg.handle_connect(k.clone(), ConnectionId::from_raw(conn), tx, &connect_payload());
        rx
    }

    #[test]
    fn connect_creates_session_and_acknowledges() {
        let mut reg = registry();
        let k = key("inst_a");
        let mut rx = connect(&mut reg, &k, "conn_1");

        assert_eq!(reg.session_count(), 1);
        let session = reg.session(&k).unwrap();
        assert!(!session.has_snapshot);
        assert_eq!(session.connections.len(), 1);

        let ack = rx.try_recv().unwrap();
        let envelope = Envelope::decode(&ack).unwrap();
        match envelope.body {
            Body::Connected(p) => assert!(p.ok),
            other => panic!("expected connected, got {}", other.kind()),
        }
    }

    #[test]
    fn reconnect_is_idempotent_one_session_two_connections() {
        let mut reg = registry();
        let k = key("inst_a");
        let _rx1 = connect(&mut reg, &k, "conn_1");
        let _rx2 = connect(&mut reg, &k, "conn_2");

        assert_eq!(reg.session_count(), 1);
        assert_eq!(reg.session(&k).unwrap().connections.len(), 2);
    }

    #[test]
    fn reconnect_does_not_clear_tab_data() {
        let mut reg = registry();
        let k = key("inst_a");
        let _rx1 = connect(&mut reg, &k, "conn_1");
        reg.handle_snapshot(&k, &ConnectionId::from_raw("conn_1"), 1, snapshot_with_tabs(vec![tab(1)]))
            .unwrap();
        reg.handle_disconnect(&ConnectionId::from_raw("conn_1"));

        // Stale data survives the gap...
        assert_eq!(reg.session(&k).unwrap().tabs.len(), 1);

        // ...and the reconnect itself still doesn't clear it.
        let _rx2 = connect(&mut reg, &k, "conn_2");
        assert_eq!(reg.session(&k).unwrap().tabs.len(), 1);
        assert!(reg.session(&k).unwrap().has_snapshot);
    }

    #[test]
    fn event_before_snapshot_is_dropped_without_mutation() {
        let mut reg = registry();
        let k = key("inst_a");
        let conn = ConnectionId::from_raw("conn_1");
        let _rx = connect(&mut reg, &k, "conn_1");

        let err = reg
            .handle_event(&k, &conn, 2, &TabEvent::TabCreated { tab: tab(1) })
            .unwrap_err();
        assert!(err.is_expected());
        assert!(reg.session(&k).unwrap().tabs.is_empty());
        assert!(reg.session(&k).unwrap().augmentation.is_empty());
    }

    #[test]
    fn event_for_unknown_session_is_an_error() {
        let mut reg = registry();
        let err = reg
            .handle_event(
                &key("inst_ghost"),
                &ConnectionId::from_raw("conn_x"),
                1,
                &TabEvent::WindowFocused { window_id: 1 },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_session");
    }

    #[test]
    fn snapshot_replaces_wholesale() {
        let mut reg = registry();
        let k = key("inst_a");
        let conn = ConnectionId::from_raw("conn_1");
        let _rx = connect(&mut reg, &k, "conn_1");

        reg.handle_snapshot(&k, &conn, 1, snapshot_with_tabs(vec![tab(1), tab(2)])).unwrap();
        reg.handle_snapshot(&k, &conn, 2, snapshot_with_tabs(vec![tab(9)])).unwrap();

        let session = reg.session(&k).unwrap();
        assert_eq!(session.tabs.len(), 1);
        assert_eq!(session.tabs[0].id, 9);
        assert_eq!(session.last_snapshot_seq, 2);
    }

    #[test]
    fn duplicate_tab_created_updates_in_place() {
        let mut reg = registry();
        let k = key("inst_a");
        let conn = ConnectionId::from_raw("conn_1");
        let _rx = connect(&mut reg, &k, "conn_1");
        reg.handle_snapshot(&k, &conn, 1, snapshot_with_tabs(vec![])).unwrap();

        reg.handle_event(&k, &conn, 2, &TabEvent::TabCreated { tab: tab(5) }).unwrap();
        let mut updated = tab(5);
        updated.title = Some("again".into());
        reg.handle_event(&k, &conn, 3, &TabEvent::TabCreated { tab: updated }).unwrap();

        let session = reg.session(&k).unwrap();
        assert_eq!(session.tabs.len(), 1);
        assert_eq!(session.tabs[0].title.as_deref(), Some("again"));
    }

    #[test]
    fn tab_removed_deletes_tab_and_augmentation_atomically() {
        let mut reg = registry();
        let k = key("inst_a");
        let conn = ConnectionId::from_raw("conn_1");
        let _rx = connect(&mut reg, &k, "conn_1");
        reg.handle_snapshot(&k, &conn, 1, snapshot_with_tabs(vec![tab(5)])).unwrap();

        reg.handle_event(&k, &conn, 2, &TabEvent::TabActivated { tab_id: 5, window_id: 1 })
            .unwrap();
        assert_eq!(reg.session(&k).unwrap().active_tab, Some(5));

        reg.handle_event(&k, &conn, 3, &TabEvent::TabRemoved { tab_id: 5, window_id: 1 })
            .unwrap();

        let session = reg.session(&k).unwrap();
        assert!(session.tabs.is_empty());
        assert!(!session.augmentation.contains_key(&5));
        assert_eq!(session.active_tab, None);
        assert_eq!(session.recently_closed.len(), 1);
    }

    #[test]
    fn activation_bookkeeping_stamps_previous_tab() {
        let mut reg = registry();
        let k = key("inst_a");
        let conn = ConnectionId::from_raw("conn_1");
        let _rx = connect(&mut reg, &k, "conn_1");
        reg.handle_snapshot(&k, &conn, 1, snapshot_with_tabs(vec![tab(1), tab(2)])).unwrap();

        reg.handle_event(&k, &conn, 2, &TabEvent::TabActivated { tab_id: 1, window_id: 1 })
            .unwrap();
        reg.handle_event(&k, &conn, 3, &TabEvent::TabActivated { tab_id: 2, window_id: 1 })
            .unwrap();

        let session = reg.session(&k).unwrap();
        assert!(session.augmentation[&1].last_deactivated.is_some());
        assert!(session.augmentation[&2].last_activated.is_some());
        assert!(session.augmentation[&2].last_deactivated.is_none());
    }

    #[test]
    fn tab_updated_applies_changed_fields_only() {
        let mut reg = registry();
        let k = key("inst_a");
        let conn = ConnectionId::from_raw("conn_1");
        let _rx = connect(&mut reg, &k, "conn_1");
        let mut t = tab(3);
        t.url = Some("https://old".into());
        reg.handle_snapshot(&k, &conn, 1, snapshot_with_tabs(vec![t])).unwrap();

        reg.handle_event(
            &k,
            &conn,
            2,
            &TabEvent::TabUpdated {
                tab_id: 3,
                changes: TabChanges {
                    title: Some("new title".into()),
                    ..Default::default()
                },
            },
        )
        .unwrap();

        let session = reg.session(&k).unwrap();
        assert_eq!(session.tabs[0].title.as_deref(), Some("new title"));
        assert_eq!(session.tabs[0].url.as_deref(), Some("https://old"));
    }

    #[test]
    fn disconnect_retains_session() {
        let mut reg = registry();
        let k = key("inst_a");
        let _rx = connect(&mut reg, &k, "conn_1");

        let mutation = reg.handle_disconnect(&ConnectionId::from_raw("conn_1"));
        assert_eq!(mutation, Mutation::ConnectionsChanged);
        assert_eq!(reg.session_count(), 1);
        assert!(reg.session(&k).unwrap().connections.is_empty());
    }

    #[test]
    fn disconnect_of_unknown_connection_is_a_noop() {
        let mut reg = registry();
        assert_eq!(
            reg.handle_disconnect(&ConnectionId::from_raw("conn_never")),
            Mutation::None
        );
    }

    #[test]
    fn active_sessions_requires_snapshot_and_connection() {
        let mut reg = registry();
        let k = key("inst_a");
        let conn = ConnectionId::from_raw("conn_1");
        let _rx = connect(&mut reg, &k, "conn_1");
        assert!(reg.active_sessions().is_empty());

        reg.handle_snapshot(&k, &conn, 1, snapshot_with_tabs(vec![tab(1)])).unwrap();
        assert_eq!(reg.active_sessions().len(), 1);

        reg.handle_disconnect(&conn);
        assert!(reg.active_sessions().is_empty());
    }

    #[test]
    fn command_fans_out_to_all_live_connections() {
        let mut reg = registry();
        let k = key("inst_a");
        let mut rx1 = connect(&mut reg, &k, "conn_1");
        let mut rx2 = connect(&mut reg, &k, "conn_2");
        // Drain the connected acks.
        rx1.try_recv().unwrap();
        rx2.try_recv().unwrap();

        let delivered = reg
            .send_command(&k, Command::ActivateTab { tab_id: 42, window_id: 1 })
            .unwrap();
        assert_eq!(delivered, 2);

        for rx in [&mut rx1, &mut rx2] {
            let envelope = Envelope::decode(&rx.try_recv().unwrap()).unwrap();
            match envelope.body.as_command() {
                Some(Command::ActivateTab { tab_id, .. }) => assert_eq!(*tab_id, 42),
                other => panic!("expected activateTab, got {other:?}"),
            }
        }
    }

    #[test]
    fn command_to_unknown_session_errors() {
        let mut reg = registry();
        let err = reg
            .send_command(&key("inst_ghost"), Command::Refresh)
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_session");
    }

    #[test]
    fn cleanup_removes_only_old_disconnected_sessions() {
        let mut reg = registry();
        let gone = key("inst_gone");
        let connected = key("inst_live");
        let _rx1 = connect(&mut reg, &gone, "conn_1");
        let _rx2 = connect(&mut reg, &connected, "conn_2");
        reg.handle_disconnect(&ConnectionId::from_raw("conn_1"));

        // Not old enough yet.
        assert_eq!(reg.cleanup_stale_sessions(60_000), 0);

        // Force the disconnected session's clock back.
        reg.sessions.get_mut(&gone).unwrap().last_activity = 0;
        assert_eq!(reg.cleanup_stale_sessions(60_000), 1);
        assert!(reg.session(&gone).is_none());
        assert!(reg.session(&connected).is_some());
    }

    #[test]
    fn ping_envelope_gets_a_pong() {
        let mut reg = registry();
        let k = key("inst_a");
        let mut rx = connect(&mut reg, &k, "conn_1");
        rx.try_recv().unwrap(); // connected ack

        let (outbound, _keep) = mpsc::channel(4);
        let envelope = Envelope {
            instance_id: k.instance_id().clone(),
            runtime_session_id: k.runtime_session_id().clone(),
            connection_id: ConnectionId::from_raw("conn_1"),
            seq: 2,
            body: Body::Ping,
        };
        let mutation = reg.handle_envelope(envelope, &outbound);
        assert_eq!(mutation, Mutation::None);

        let pong = Envelope::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(pong.body, Body::Pong);
    }

    #[test]
    fn inbound_command_is_a_protocol_error() {
        let counters = Arc::new(FaultCounters::new());
        let mut reg = SessionRegistry::new(Arc::clone(&counters));
        let k = key("inst_a");
        let _rx = connect(&mut reg, &k, "conn_1");

        let (outbound, _keep) = mpsc::channel(4);
        let envelope = Envelope {
            instance_id: k.instance_id().clone(),
            runtime_session_id: k.runtime_session_id().clone(),
            connection_id: ConnectionId::from_raw("conn_1"),
            seq: 2,
            body: Body::Command(Command::Refresh),
        };
        assert_eq!(reg.handle_envelope(envelope, &outbound), Mutation::None);
        assert_eq!(counters.get("unexpected_payload"), 1);
    }
}
