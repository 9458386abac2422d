//! Pure sort/merge engine. No state, no clocks: callers pass tab
//! collections and augmentation in, an ordered sequence comes out.

pub mod merge;
pub mod sort;

pub use merge::{merge_sessions, MergedView, SessionSlice, OTHER_DEVICES_CAP, RECENTLY_CLOSED_CAP};
pub use sort::{apply_sort_strategy, sort_keyed, SortSignals, WindowKey};
