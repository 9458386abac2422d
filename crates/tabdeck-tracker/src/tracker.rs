//! Local replica of one browser instance's tabs and windows, plus the
//! activation bookkeeping that produces the MRU signal the sort engine
//! consumes. This is the only state in the system that never needs a
//! network round trip.

use std::collections::HashMap;

use tabdeck_core::events::{TabChanges, TabEvent};
use tabdeck_core::ids::{TabId, WindowId};
use tabdeck_core::protocol::{ConnectPayload, SnapshotPayload};
use tabdeck_core::strategy::SortStrategy;
use tabdeck_core::tabs::{
    BrowserTab, BrowserWindow, OtherDeviceTab, RecentlyClosedTab, TabAugmentation,
};
use tabdeck_core::time::epoch_ms;

use crate::browser::BrowserApi;
use crate::error::TrackerError;

const RECENTLY_CLOSED_KEEP: usize = 10;

pub struct TabTracker {
    browser_type: String,
    extension_version: String,
    sort_strategy: SortStrategy,
    tabs: Vec<BrowserTab>,
    windows: Vec<BrowserWindow>,
    augmentation: HashMap<TabId, TabAugmentation>,
    recently_closed: Vec<RecentlyClosedTab>,
    other_devices: Vec<OtherDeviceTab>,
    active_tab: Option<TabId>,
}

impl TabTracker {
    pub fn new(browser_type: impl Into<String>, extension_version: impl Into<String>) -> Self {
        Self {
            browser_type: browser_type.into(),
            extension_version: extension_version.into(),
            sort_strategy: SortStrategy::default(),
            tabs: Vec::new(),
            windows: Vec::new(),
            augmentation: HashMap::new(),
            recently_closed: Vec::new(),
            other_devices: Vec::new(),
            active_tab: None,
        }
    }

    /// Seed local state from the browser. Augmentation starts from the
    /// browser-native `lastAccessed` MRU signal, and the currently focused
    /// tab is stamped with a fresh `lastActivated` so it sorts first before
    /// any user interaction. Returns the favicon URLs to prefetch in the
    /// background; fetching never blocks the snapshot.
    pub async fn initialize(
        &mut self,
        api: &dyn BrowserApi,
    ) -> Result<Vec<(TabId, String)>, TrackerError> {
        let tabs = api.query_tabs().await?;
        let windows = api.query_windows().await?;
        let recently_closed = api.query_recently_closed().await.unwrap_or_default();
        let other_devices = api.query_other_devices().await.unwrap_or_default();

        self.augmentation.clear();
        self.active_tab = None;

        let now = epoch_ms();
        let focused_window = windows.iter().find(|w| w.focused).map(|w| w.id);
        let mut favicon_targets = Vec::new();

        for tab in &tabs {
            let mut aug = TabAugmentation {
                last_activated: tab.last_accessed,
                ..Default::default()
            };
            if tab.active && Some(tab.window_id) == focused_window {
                aug.last_activated = Some(now);
                self.active_tab = Some(tab.id);
            }
            self.augmentation.insert(tab.id, aug);

            if let Some(url) = &tab.fav_icon_url {
                favicon_targets.push((tab.id, url.clone()));
            }
        }

        self.tabs = tabs;
        self.windows = windows;
        self.recently_closed = recently_closed;
        self.other_devices = other_devices;

        tracing::info!(
            tabs = self.tabs.len(),
            windows = self.windows.len(),
            "tracker initialized"
        );
        Ok(favicon_targets)
    }

    /// Clear and re-seed; used after a coordinator-requested resync.
    pub async fn refresh(
        &mut self,
        api: &dyn BrowserApi,
    ) -> Result<Vec<(TabId, String)>, TrackerError> {
        self.tabs.clear();
        self.windows.clear();
        self.recently_closed.clear();
        self.other_devices.clear();
        self.initialize(api).await
    }

    /// Full-state payload for the coordinator.
    pub fn snapshot(&self) -> SnapshotPayload {
        SnapshotPayload {
            session_tabs: self.tabs.clone(),
            session_windows: self.windows.clone(),
            augmentation: self.augmentation.clone(),
            recently_closed: self.recently_closed.clone(),
            other_devices: self.other_devices.clone(),
        }
    }

    pub fn connect_payload(&self) -> ConnectPayload {
        ConnectPayload {
            browser_type: self.browser_type.clone(),
            extension_version: self.extension_version.clone(),
            sort_strategy: self.sort_strategy,
        }
    }

    /// MRU bookkeeping: stamp the newly focused tab's `lastActivated`, and
    /// the previously focused tab's `lastDeactivated`.
    pub fn on_activated(&mut self, tab_id: TabId, window_id: WindowId) -> TabEvent {
        let now = epoch_ms();

        if let Some(previous) = self.active_tab.take() {
            if previous != tab_id {
                self.augmentation.entry(previous).or_default().last_deactivated = Some(now);
            }
        }
        self.augmentation.entry(tab_id).or_default().last_activated = Some(now);
        self.active_tab = Some(tab_id);

        for tab in &mut self.tabs {
            if tab.window_id == window_id {
                tab.active = tab.id == tab_id;
            }
        }

        TabEvent::TabActivated { tab_id, window_id }
    }

    /// Upsert: a duplicate create for a known id updates in place.
    pub fn on_created(&mut self, tab: BrowserTab) -> TabEvent {
        self.augmentation.entry(tab.id).or_default();
        match self.tabs.iter_mut().find(|t| t.id == tab.id) {
            Some(existing) => *existing = tab.clone(),
            None => self.tabs.push(tab.clone()),
        }
        TabEvent::TabCreated { tab }
    }

    /// Delete the tab and its augmentation entry atomically; remember it in
    /// the recently-closed list.
    pub fn on_removed(&mut self, tab_id: TabId, window_id: WindowId) -> TabEvent {
        if let Some(pos) = self.tabs.iter().position(|t| t.id == tab_id) {
            let tab = self.tabs.remove(pos);
            self.recently_closed.insert(
                0,
                RecentlyClosedTab {
                    title: tab.title,
                    url: tab.url,
                    closed_at: epoch_ms(),
                },
            );
            self.recently_closed.truncate(RECENTLY_CLOSED_KEEP);
        }
        self.augmentation.remove(&tab_id);
        if self.active_tab == Some(tab_id) {
            self.active_tab = None;
        }
        TabEvent::TabRemoved { tab_id, window_id }
    }

    /// Apply a filtered change set. Pure loading-state churn arrives as an
    /// empty change set and is suppressed (no event emitted).
    pub fn on_updated(&mut self, tab_id: TabId, changes: TabChanges) -> Option<TabEvent> {
        if changes.is_empty() {
            return None;
        }
        let tab = self.tabs.iter_mut().find(|t| t.id == tab_id)?;
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
        Some(TabEvent::TabUpdated { tab_id, changes })
    }

    pub fn on_window_focused(&mut self, window_id: WindowId) -> TabEvent {
        for window in &mut self.windows {
            window.focused = window.id == window_id;
        }
        TabEvent::WindowFocused { window_id }
    }

    pub fn on_window_created(&mut self, window: BrowserWindow) -> TabEvent {
        match self.windows.iter_mut().find(|w| w.id == window.id) {
            Some(existing) => *existing = window.clone(),
            None => self.windows.push(window.clone()),
        }
        TabEvent::WindowCreated { window }
    }

    pub fn on_window_removed(&mut self, window_id: WindowId) -> TabEvent {
        self.windows.retain(|w| w.id != window_id);
        TabEvent::WindowRemoved { window_id }
    }

    /// Background favicon arrival. None when the tab closed in the meantime.
    pub fn favicon_resolved(&mut self, tab_id: TabId, data_url: String) -> Option<TabEvent> {
        if !self.tabs.iter().any(|t| t.id == tab_id) {
            return None;
        }
        let aug = self.augmentation.entry(tab_id).or_default();
        aug.favicon_data_url = Some(data_url);
        Some(TabEvent::AugmentationUpdated {
            tab_id,
            augmentation: aug.clone(),
        })
    }

    pub fn set_sort_strategy(&mut self, strategy: SortStrategy) {
        self.sort_strategy = strategy;
    }

    pub fn sort_strategy(&self) -> SortStrategy {
        self.sort_strategy
    }

    pub fn tabs(&self) -> &[BrowserTab] {
        &self.tabs
    }

    pub fn augmentation(&self) -> &HashMap<TabId, TabAugmentation> {
        &self.augmentation
    }

    pub fn active_tab(&self) -> Option<TabId> {
        self.active_tab
    }
}
