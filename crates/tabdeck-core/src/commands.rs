use serde::{Deserialize, Serialize};

use crate::ids::{TabId, WindowId};
use crate::strategy::SortStrategy;

/// Commands routed from the coordinator back to the originating browser.
/// All of these are idempotent at the browser-API level, which is what makes
/// fanning a command out to every live connection of a session safe.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    ActivateTab { tab_id: TabId, window_id: WindowId },

    #[serde(rename_all = "camelCase")]
    CloseTab { tab_id: TabId },

    #[serde(rename_all = "camelCase")]
    ReorderTab {
        tab_id: TabId,
        new_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_window_id: Option<WindowId>,
    },

    CreateWindow { urls: Vec<String> },

    /// Ask the tracker to clear local state and re-seed from the browser,
    /// followed by a fresh snapshot.
    Refresh,

    #[serde(rename_all = "camelCase")]
    SetSortStrategy { strategy: SortStrategy },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ActivateTab { .. } => "activateTab",
            Self::CloseTab { .. } => "closeTab",
            Self::ReorderTab { .. } => "reorderTab",
            Self::CreateWindow { .. } => "createWindow",
            Self::Refresh => "refresh",
            Self::SetSortStrategy { .. } => "setSortStrategy",
        }
    }
}

/// Structured result of executing a command against the browser API.
/// Upstream API failures are reported this way, never thrown across the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tag_on_wire() {
        let cmd = Command::ActivateTab {
            tab_id: 42,
            window_id: 7,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command\":\"activateTab\""));
        assert!(json.contains("\"tabId\":42"));
        assert!(json.contains("\"windowId\":7"));
    }

    #[test]
    fn reorder_omits_absent_target_window() {
        let cmd = Command::ReorderTab {
            tab_id: 1,
            new_index: 3,
            target_window_id: None,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(!json.contains("targetWindowId"));
    }

    #[test]
    fn command_serde_roundtrip() {
        let commands = vec![
            Command::CloseTab { tab_id: 5 },
            Command::CreateWindow {
                urls: vec!["https://example.com".into()],
            },
            Command::Refresh,
            Command::SetSortStrategy {
                strategy: SortStrategy::WindowGrouped,
            },
        ];
        for cmd in &commands {
            let json = serde_json::to_string(cmd).unwrap();
            let parsed: Command = serde_json::from_str(&json).unwrap();
            assert_eq!(&parsed, cmd);
        }
    }

    #[test]
    fn outcome_constructors() {
        assert!(CommandOutcome::ok().success);
        let failed = CommandOutcome::failed("no such tab");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("no such tab"));
    }
}
