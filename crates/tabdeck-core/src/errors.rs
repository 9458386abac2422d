/// Typed protocol-level failures. Everything here is a log-and-drop: the
/// coordinator never tears a connection down or exits for bad input, it
/// counts the fault and keeps serving.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("unexpected payload for {kind} message")]
    UnexpectedPayload { kind: &'static str },

    #[error("no session for key {0}")]
    UnknownSession(String),

    #[error("event before snapshot for {0}")]
    BeforeSnapshot(String),
}

impl ProtocolError {
    pub fn decode(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }

    pub fn encode(e: serde_json::Error) -> Self {
        Self::Encode(e.to_string())
    }

    /// Short classification string for fault counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::UnexpectedPayload { .. } => "unexpected_payload",
            Self::UnknownSession(_) => "unknown_session",
            Self::BeforeSnapshot(_) => "before_snapshot",
        }
    }

    /// Expected during normal operation (the connect race), logged at debug
    /// rather than warn.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::BeforeSnapshot(_))
    }
}
