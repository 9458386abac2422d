//! Seam to the native browser. Everything the tracker knows about tabs comes
//! in through this trait; everything the coordinator asks for goes back out
//! through it.

use async_trait::async_trait;

use tabdeck_core::commands::{Command, CommandOutcome};
use tabdeck_core::ids::{TabId, WindowId};
use tabdeck_core::tabs::{BrowserTab, BrowserWindow, OtherDeviceTab, RecentlyClosedTab};

use crate::error::TrackerError;

#[async_trait]
pub trait BrowserApi: Send + Sync {
    async fn query_tabs(&self) -> Result<Vec<BrowserTab>, TrackerError>;
    async fn query_windows(&self) -> Result<Vec<BrowserWindow>, TrackerError>;
    async fn activate_tab(&self, tab_id: TabId, window_id: WindowId) -> Result<(), TrackerError>;
    async fn close_tab(&self, tab_id: TabId) -> Result<(), TrackerError>;
    async fn move_tab(
        &self,
        tab_id: TabId,
        new_index: u32,
        target_window_id: Option<WindowId>,
    ) -> Result<(), TrackerError>;
    async fn create_window(&self, urls: &[String]) -> Result<(), TrackerError>;

    /// Session-restore data. Browsers without a sessions API report nothing.
    async fn query_recently_closed(&self) -> Result<Vec<RecentlyClosedTab>, TrackerError> {
        Ok(Vec::new())
    }
    async fn query_other_devices(&self) -> Result<Vec<OtherDeviceTab>, TrackerError> {
        Ok(Vec::new())
    }
}

/// Execute a coordinator command against the browser. API failures are
/// converted into a structured outcome here — this boundary never throws.
/// `refresh` and `setSortStrategy` are tracker-level commands and are a
/// no-op at the browser.
pub async fn execute_browser_command(api: &dyn BrowserApi, command: &Command) -> CommandOutcome {
    let result = match command {
        Command::ActivateTab { tab_id, window_id } => api.activate_tab(*tab_id, *window_id).await,
        Command::CloseTab { tab_id } => api.close_tab(*tab_id).await,
        Command::ReorderTab {
            tab_id,
            new_index,
            target_window_id,
        } => api.move_tab(*tab_id, *new_index, *target_window_id).await,
        Command::CreateWindow { urls } => api.create_window(urls).await,
        Command::Refresh | Command::SetSortStrategy { .. } => Ok(()),
    };

    match result {
        Ok(()) => CommandOutcome::ok(),
        Err(e) => {
            tracing::warn!(command = command.name(), error = %e, "browser command failed");
            CommandOutcome::failed(e.to_string())
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Canned browser for tests: serves fixed tabs/windows, records calls,
    /// optionally fails every mutation.
    #[derive(Default)]
    pub struct FakeBrowser {
        pub tabs: Vec<BrowserTab>,
        pub windows: Vec<BrowserWindow>,
        pub fail_mutations: AtomicBool,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeBrowser {
        pub fn with_tabs(tabs: Vec<BrowserTab>, windows: Vec<BrowserWindow>) -> Self {
            Self {
                tabs,
                windows,
                ..Default::default()
            }
        }

        fn record(&self, call: impl Into<String>) -> Result<(), TrackerError> {
            self.calls.lock().unwrap().push(call.into());
            if self.fail_mutations.load(Ordering::Relaxed) {
                Err(TrackerError::Browser("tab gone".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl BrowserApi for FakeBrowser {
        async fn query_tabs(&self) -> Result<Vec<BrowserTab>, TrackerError> {
            Ok(self.tabs.clone())
        }
        async fn query_windows(&self) -> Result<Vec<BrowserWindow>, TrackerError> {
            Ok(self.windows.clone())
        }
        async fn activate_tab(&self, tab_id: TabId, window_id: WindowId) -> Result<(), TrackerError> {
            self.record(format!("activate {tab_id} in {window_id}"))
        }
        async fn close_tab(&self, tab_id: TabId) -> Result<(), TrackerError> {
            self.record(format!("close {tab_id}"))
        }
        async fn move_tab(
            &self,
            tab_id: TabId,
            new_index: u32,
            _target_window_id: Option<WindowId>,
        ) -> Result<(), TrackerError> {
            self.record(format!("move {tab_id} to {new_index}"))
        }
        async fn create_window(&self, urls: &[String]) -> Result<(), TrackerError> {
            self.record(format!("create window with {} urls", urls.len()))
        }
    }
}
