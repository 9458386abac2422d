use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tabdeck_core::ids::{display_tab_id, InstanceId, TabId};
use tabdeck_core::strategy::SortStrategy;
use tabdeck_core::tabs::{
    BrowserTab, DisplayTab, OtherDeviceTab, RecentlyClosedTab, TabAugmentation,
};

use crate::sort::{signals_for, sort_keyed};

pub const RECENTLY_CLOSED_CAP: usize = 10;
pub const OTHER_DEVICES_CAP: usize = 5;

/// One session's contribution to a merge pass. Borrowed straight out of the
/// registry's replica; the merge never mutates it.
#[derive(Clone, Copy)]
pub struct SessionSlice<'a> {
    pub instance_id: &'a InstanceId,
    pub browser_type: &'a str,
    pub tabs: &'a [BrowserTab],
    pub augmentation: &'a HashMap<TabId, TabAugmentation>,
    pub recently_closed: &'a [RecentlyClosedTab],
    pub other_devices: &'a [OtherDeviceTab],
}

/// Presentation-ready merge result. Recently-closed and other-device entries
/// are trailing sections, never interleaved into the MRU order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedView {
    pub tabs: Vec<DisplayTab>,
    pub recently_closed: Vec<RecentlyClosedTab>,
    pub other_devices: Vec<OtherDeviceTab>,
}

#[derive(Clone, Copy)]
struct MergedTab<'a> {
    instance_id: &'a InstanceId,
    browser_type: &'a str,
    tab: &'a BrowserTab,
    aug: Option<&'a TabAugmentation>,
}

/// Merge any number of sessions into a single ordered display list.
///
/// Every tab is keyed by `(instance_id, native tab id)` — an ordered,
/// collision-free key — so the single-session sort runs unmodified over the
/// merged set, and each entry is re-tagged with its display identity after
/// sorting.
pub fn merge_sessions(sessions: &[SessionSlice<'_>], strategy: SortStrategy) -> MergedView {
    let mut items: Vec<MergedTab<'_>> = Vec::new();
    for session in sessions {
        for tab in session.tabs {
            items.push(MergedTab {
                instance_id: session.instance_id,
                browser_type: session.browser_type,
                tab,
                aug: session.augmentation.get(&tab.id),
            });
        }
    }

    let sorted = sort_keyed(
        &items,
        |m| signals_for(m.tab, m.aug, m.instance_id.as_str()),
        strategy,
    );

    let tabs = sorted.into_iter().map(to_display_tab).collect();

    let mut recently_closed: Vec<RecentlyClosedTab> = Vec::new();
    let mut other_devices: Vec<OtherDeviceTab> = Vec::new();
    for session in sessions {
        recently_closed.extend_from_slice(session.recently_closed);
        other_devices.extend_from_slice(session.other_devices);
    }
    recently_closed.truncate(RECENTLY_CLOSED_CAP);
    other_devices.truncate(OTHER_DEVICES_CAP);

    MergedView {
        tabs,
        recently_closed,
        other_devices,
    }
}

fn to_display_tab(m: MergedTab<'_>) -> DisplayTab {
    let favicon = m
        .aug
        .and_then(|a| a.favicon_data_url.clone())
        .or_else(|| m.tab.fav_icon_url.clone());
    DisplayTab {
        id: display_tab_id(m.instance_id, m.tab.id),
        tab_id: m.tab.id,
        window_id: m.tab.window_id,
        title: m.tab.title.clone(),
        url: m.tab.url.clone(),
        favicon,
        browser_type: m.browser_type.to_owned(),
        pinned: m.tab.pinned,
        active: m.tab.active,
        last_activated: m
            .aug
            .and_then(|a| a.last_activated)
            .or(m.tab.last_accessed),
        last_accessed: m.tab.last_accessed,
    }
}
