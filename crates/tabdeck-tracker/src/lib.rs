pub mod browser;
pub mod error;
pub mod favicon;
pub mod tracker;
pub mod uplink;

pub use browser::{execute_browser_command, BrowserApi};
pub use error::TrackerError;
pub use favicon::{FaviconCache, PLACEHOLDER_ICON};
pub use tracker::TabTracker;
pub use uplink::{Uplink, UplinkConfig};
