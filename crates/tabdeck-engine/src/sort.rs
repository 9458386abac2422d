use std::cmp::Reverse;
use std::collections::HashMap;

use tabdeck_core::ids::{TabId, WindowId};
use tabdeck_core::strategy::SortStrategy;
use tabdeck_core::tabs::{BrowserTab, TabAugmentation};

/// Grouping key for a window. The scope disambiguates identical native
/// window ids coming from different browser instances; single-session
/// callers use an empty scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub scope: String,
    pub window_id: WindowId,
}

/// Resolved timing signals for one tab. Building these up front is what
/// lets every strategy run on merged multi-session input without caring
/// about native-id collisions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortSignals {
    /// Augmentation `lastActivated`, falling back to the browser-native
    /// `lastAccessed`, falling back to 0.
    pub last_activated: i64,
    /// Augmentation `lastDeactivated`; absent means the tab never left the
    /// foreground and sorts last under that strategy.
    pub last_deactivated: Option<i64>,
    /// Browser-native `lastAccessed`, 0 when the browser never reported one.
    pub last_accessed: i64,
    pub window: WindowKey,
}

/// Build signals for a tab given its augmentation entry (if any).
pub fn signals_for(tab: &BrowserTab, aug: Option<&TabAugmentation>, scope: &str) -> SortSignals {
    SortSignals {
        last_activated: aug
            .and_then(|a| a.last_activated)
            .or(tab.last_accessed)
            .unwrap_or(0),
        last_deactivated: aug.and_then(|a| a.last_deactivated),
        last_accessed: tab.last_accessed.unwrap_or(0),
        window: WindowKey {
            scope: scope.to_owned(),
            window_id: tab.window_id,
        },
    }
}

/// Sort any collection given a signal extractor. Inputs are never mutated;
/// all sorts are stable, so ties keep their input-relative order.
pub fn sort_keyed<T, F>(items: &[T], signals: F, strategy: SortStrategy) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> SortSignals,
{
    let mut keyed: Vec<(SortSignals, T)> = items.iter().map(|t| (signals(t), t.clone())).collect();

    match strategy {
        SortStrategy::LastActivated => {
            keyed.sort_by_key(|(s, _)| Reverse(s.last_activated));
        }
        SortStrategy::LastAccessed => {
            keyed.sort_by_key(|(s, _)| Reverse(s.last_accessed));
        }
        SortStrategy::LastDeactivated => {
            keyed.sort_by_key(|(s, _)| Reverse(s.last_deactivated.unwrap_or(0)));
        }
        SortStrategy::WindowGrouped => {
            return sort_window_grouped(keyed);
        }
    }

    keyed.into_iter().map(|(_, t)| t).collect()
}

/// Partition by window, order windows by the maximum `lastActivated` among
/// their tabs (most-recently-active window first), sort within each window
/// by `lastActivated` descending.
fn sort_window_grouped<T>(keyed: Vec<(SortSignals, T)>) -> Vec<T> {
    let mut order: Vec<WindowKey> = Vec::new();
    let mut groups: HashMap<WindowKey, Vec<(SortSignals, T)>> = HashMap::new();

    for (signals, item) in keyed {
        let window = signals.window.clone();
        if !groups.contains_key(&window) {
            order.push(window.clone());
        }
        groups.entry(window).or_default().push((signals, item));
    }

    let window_max: HashMap<WindowKey, i64> = groups
        .iter()
        .map(|(w, tabs)| {
            let max = tabs.iter().map(|(s, _)| s.last_activated).max().unwrap_or(0);
            (w.clone(), max)
        })
        .collect();

    // Stable, so windows tied on max keep first-seen order.
    order.sort_by_key(|w| Reverse(window_max[w]));

    let mut result = Vec::new();
    for window in order {
        let mut tabs = groups.remove(&window).unwrap_or_default();
        tabs.sort_by_key(|(s, _)| Reverse(s.last_activated));
        result.extend(tabs.into_iter().map(|(_, t)| t));
    }
    result
}

/// Single-session convenience entry point: sort one browser instance's tabs
/// using its own augmentation map.
pub fn apply_sort_strategy(
    tabs: &[BrowserTab],
    augmentation: &HashMap<TabId, TabAugmentation>,
    strategy: SortStrategy,
) -> Vec<BrowserTab> {
    sort_keyed(
        tabs,
        |tab| signals_for(tab, augmentation.get(&tab.id), ""),
        strategy,
    )
}
