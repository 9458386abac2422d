//! Owns the single coordinator-wide "ready to render" list. Every rebuild
//! replaces it wholesale, publishes it to subscribers, and hands it to the
//! debounced persistence writer.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use tabdeck_core::strategy::SortStrategy;
use tabdeck_core::tabs::DisplayTab;
use tabdeck_core::time::epoch_ms;
use tabdeck_engine::{merge_sessions, MergedView, SessionSlice};

use crate::registry::Session;

const PUBLISH_CAPACITY: usize = 16;

/// What presentation surfaces receive. `active_session_count == 0` is the
/// "no browsers connected" state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySnapshot {
    #[serde(flatten)]
    pub view: MergedView,
    pub active_session_count: usize,
    pub strategy: SortStrategy,
    pub generated_at: i64,
}

pub struct DisplayBuilder {
    strategy: SortStrategy,
    current: DisplaySnapshot,
    publish_tx: broadcast::Sender<DisplaySnapshot>,
    persist_tx: Option<mpsc::Sender<Vec<DisplayTab>>>,
}

impl DisplayBuilder {
    pub fn new(strategy: SortStrategy, persist_tx: Option<mpsc::Sender<Vec<DisplayTab>>>) -> Self {
        let (publish_tx, _) = broadcast::channel(PUBLISH_CAPACITY);
        Self {
            strategy,
            current: DisplaySnapshot {
                strategy,
                ..Default::default()
            },
            publish_tx,
            persist_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisplaySnapshot> {
        self.publish_tx.subscribe()
    }

    /// Clonable handle for subscribing after the builder moves into the
    /// coordinator task.
    pub fn publisher(&self) -> broadcast::Sender<DisplaySnapshot> {
        self.publish_tx.clone()
    }

    pub fn current(&self) -> &DisplaySnapshot {
        &self.current
    }

    pub fn strategy(&self) -> SortStrategy {
        self.strategy
    }

    /// Merge all active sessions and replace the published list.
    pub fn rebuild(&mut self, sessions: &[&Session]) {
        let slices: Vec<SessionSlice<'_>> = sessions
            .iter()
            .map(|s| SessionSlice {
                instance_id: s.session_key.instance_id(),
                browser_type: &s.browser_type,
                tabs: &s.tabs,
                augmentation: &s.augmentation,
                recently_closed: &s.recently_closed,
                other_devices: &s.other_devices,
            })
            .collect();

        let view = merge_sessions(&slices, self.strategy);
        self.current = DisplaySnapshot {
            view,
            active_session_count: sessions.len(),
            strategy: self.strategy,
            generated_at: epoch_ms(),
        };

        if let Some(persist) = &self.persist_tx {
            // Fire-and-forget write-behind; the writer coalesces bursts.
            let _ = persist.try_send(self.current.view.tabs.clone());
        }
        // No subscribers yet is fine.
        let _ = self.publish_tx.send(self.current.clone());

        tracing::debug!(
            tabs = self.current.view.tabs.len(),
            sessions = sessions.len(),
            strategy = %self.strategy,
            "display rebuilt"
        );
    }

    /// Re-check the active-session count after connections changed; only
    /// republish when it actually moved (data itself did not change).
    pub fn connections_changed(&mut self, sessions: &[&Session]) {
        if sessions.len() != self.current.active_session_count {
            self.rebuild(sessions);
        }
    }

    /// Runtime strategy switch: re-merges already-cached session state,
    /// no network round trip involved.
    pub fn set_strategy(&mut self, strategy: SortStrategy, sessions: &[&Session]) {
        self.strategy = strategy;
        self.rebuild(sessions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tabdeck_core::ids::{ConnectionId, InstanceId, RuntimeSessionId, SessionKey};
    use tabdeck_core::protocol::{ConnectPayload, SnapshotPayload};
    use tabdeck_core::tabs::{BrowserTab, TabAugmentation};
    use tabdeck_telemetry::FaultCounters;

    use crate::registry::SessionRegistry;

    fn seeded_registry(entries: &[(&str, Vec<(i64, i64)>)]) -> SessionRegistry {
        // entries: (instance, [(tab_id, last_activated)])
        let mut reg = SessionRegistry::new(Arc::new(FaultCounters::new()));
        for (i, (instance, tabs)) in entries.iter().enumerate() {
            let key = SessionKey::new(
                InstanceId::from_raw(*instance),
                RuntimeSessionId::from_raw("run_1"),
            );
            let conn = ConnectionId::from_raw(format!("conn_{i}"));
            let (tx, _rx) = tokio::sync::mpsc::channel(16);
            reg.handle_connect(key.clone(), conn.clone(), tx, &ConnectPayload::default());

            let mut augmentation = HashMap::new();
            let session_tabs = tabs
                .iter()
                .map(|(id, at)| {
                    augmentation.insert(
                        *id,
                        TabAugmentation {
                            last_activated: Some(*at),
                            ..Default::default()
                        },
                    );
                    BrowserTab {
                        id: *id,
                        window_id: 1,
                        ..Default::default()
                    }
                })
                .collect();
            reg.handle_snapshot(
                &key,
                &conn,
                1,
                SnapshotPayload {
                    session_tabs,
                    augmentation,
                    ..Default::default()
                },
            )
            .unwrap();
        }
        reg
    }

    #[test]
    fn rebuild_merges_sessions_in_mru_order() {
        let reg = seeded_registry(&[
            ("inst_aaaaaaaa", vec![(10, 500), (11, 100)]),
            ("inst_bbbbbbbb", vec![(5, 300)]),
        ]);
        let mut builder = DisplayBuilder::new(SortStrategy::LastActivated, None);

        builder.rebuild(&reg.active_sessions());

        let ids: Vec<&str> = builder.current().view.tabs.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["inst_aaa:10", "inst_bbb:5", "inst_aaa:11"]);
        assert_eq!(builder.current().active_session_count, 2);
    }

    #[test]
    fn rebuild_publishes_to_subscribers() {
        let reg = seeded_registry(&[("inst_aaaaaaaa", vec![(1, 100)])]);
        let mut builder = DisplayBuilder::new(SortStrategy::LastActivated, None);
        let mut rx = builder.subscribe();

        builder.rebuild(&reg.active_sessions());

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.view.tabs.len(), 1);
    }

    #[test]
    fn rebuild_hands_list_to_persistence() {
        let reg = seeded_registry(&[("inst_aaaaaaaa", vec![(1, 100)])]);
        let (persist_tx, mut persist_rx) = mpsc::channel(4);
        let mut builder = DisplayBuilder::new(SortStrategy::LastActivated, Some(persist_tx));

        builder.rebuild(&reg.active_sessions());

        let tabs = persist_rx.try_recv().unwrap();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0].id, "inst_aaa:1");
    }

    #[test]
    fn strategy_switch_reorders_cached_state() {
        let reg = seeded_registry(&[("inst_aaaaaaaa", vec![(1, 100), (2, 300)])]);
        let mut builder = DisplayBuilder::new(SortStrategy::LastActivated, None);
        builder.rebuild(&reg.active_sessions());
        assert_eq!(builder.current().view.tabs[0].tab_id, 2);

        // lastDeactivated: nothing was ever deactivated, so input order wins.
        builder.set_strategy(SortStrategy::LastDeactivated, &reg.active_sessions());
        assert_eq!(builder.strategy(), SortStrategy::LastDeactivated);
        assert_eq!(builder.current().view.tabs[0].tab_id, 1);
    }

    #[test]
    fn no_sessions_publishes_empty_list() {
        let mut builder = DisplayBuilder::new(SortStrategy::LastActivated, None);
        builder.rebuild(&[]);
        assert!(builder.current().view.tabs.is_empty());
        assert_eq!(builder.current().active_session_count, 0);
    }

    #[test]
    fn connections_changed_only_republishes_on_count_change() {
        let reg = seeded_registry(&[("inst_aaaaaaaa", vec![(1, 100)])]);
        let mut builder = DisplayBuilder::new(SortStrategy::LastActivated, None);
        builder.rebuild(&reg.active_sessions());

        let mut rx = builder.subscribe();
        // Same count: nothing new published.
        builder.connections_changed(&reg.active_sessions());
        assert!(rx.try_recv().is_err());

        // Count dropped to zero: republished.
        builder.connections_changed(&[]);
        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.active_session_count, 0);
    }
}
