#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("browser API error: {0}")]
    Browser(String),

    #[error("favicon fetch failed: {0}")]
    Favicon(String),

    #[error("uplink error: {0}")]
    Uplink(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TrackerError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TrackerError::Uplink(e.to_string())
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        TrackerError::Favicon(e.to_string())
    }
}
