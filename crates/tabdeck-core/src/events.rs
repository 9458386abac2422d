use serde::{Deserialize, Serialize};

use crate::ids::{TabId, WindowId};
use crate::tabs::{BrowserTab, BrowserWindow, TabAugmentation};

/// Tab and window change events. The single source of truth for "what
/// changed": the tracker detects these from native browser callbacks and
/// emits them over the wire; the registry re-applies them to its replica.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum TabEvent {
    #[serde(rename = "tab.activated", rename_all = "camelCase")]
    TabActivated { tab_id: TabId, window_id: WindowId },

    #[serde(rename = "tab.created")]
    TabCreated { tab: BrowserTab },

    #[serde(rename = "tab.removed", rename_all = "camelCase")]
    TabRemoved { tab_id: TabId, window_id: WindowId },

    /// Only emitted when url, title, favicon, or pinned state changed;
    /// pure loading-state churn is suppressed at the tracker.
    #[serde(rename = "tab.updated", rename_all = "camelCase")]
    TabUpdated { tab_id: TabId, changes: TabChanges },

    #[serde(rename = "window.focused", rename_all = "camelCase")]
    WindowFocused { window_id: WindowId },

    #[serde(rename = "window.created")]
    WindowCreated { window: BrowserWindow },

    #[serde(rename = "window.removed", rename_all = "camelCase")]
    WindowRemoved { window_id: WindowId },

    /// Asynchronous favicon arrival after the tab itself was announced.
    #[serde(rename = "augmentation.updated", rename_all = "camelCase")]
    AugmentationUpdated {
        tab_id: TabId,
        augmentation: TabAugmentation,
    },
}

impl TabEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TabActivated { .. } => "tab.activated",
            Self::TabCreated { .. } => "tab.created",
            Self::TabRemoved { .. } => "tab.removed",
            Self::TabUpdated { .. } => "tab.updated",
            Self::WindowFocused { .. } => "window.focused",
            Self::WindowCreated { .. } => "window.created",
            Self::WindowRemoved { .. } => "window.removed",
            Self::AugmentationUpdated { .. } => "augmentation.updated",
        }
    }
}

/// Changed-field subset carried by `tab.updated`. Absent fields are
/// unchanged; an all-absent value never leaves the tracker.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
}

impl TabChanges {
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.title.is_none() && self.fav_icon_url.is_none() && self.pinned.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tag_on_wire() {
        let evt = TabEvent::TabActivated {
            tab_id: 42,
            window_id: 1,
        };
        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains("\"event\":\"tab.activated\""));
        assert!(json.contains("\"tabId\":42"));
    }

    #[test]
    fn event_serde_roundtrip() {
        let events = vec![
            TabEvent::TabCreated {
                tab: BrowserTab {
                    id: 1,
                    window_id: 1,
                    ..Default::default()
                },
            },
            TabEvent::TabRemoved {
                tab_id: 1,
                window_id: 1,
            },
            TabEvent::TabUpdated {
                tab_id: 2,
                changes: TabChanges {
                    title: Some("Docs".into()),
                    ..Default::default()
                },
            },
            TabEvent::WindowFocused { window_id: 9 },
            TabEvent::AugmentationUpdated {
                tab_id: 3,
                augmentation: TabAugmentation {
                    favicon_data_url: Some("data:image/png;base64,AA".into()),
                    ..Default::default()
                },
            },
        ];
        for evt in &events {
            let json = serde_json::to_string(evt).unwrap();
            let parsed: TabEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(&parsed, evt);
        }
    }

    #[test]
    fn unknown_event_name_fails_decoding() {
        let err = serde_json::from_str::<TabEvent>(r#"{"event":"tab.exploded","tabId":1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn tab_changes_empty_detection() {
        assert!(TabChanges::default().is_empty());
        let changes = TabChanges {
            pinned: Some(true),
            ..Default::default()
        };
        assert!(!changes.is_empty());
    }
}
