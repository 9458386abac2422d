//! Wire envelope and payload variants. Pure (de)serialization plus the
//! type-narrowing accessors every consumer uses defensively: a payload that
//! fails its accessor is a protocol error to be dropped, never a panic.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::commands::Command;
use crate::errors::ProtocolError;
use crate::events::TabEvent;
use crate::ids::{ConnectionId, InstanceId, RuntimeSessionId, SessionKey, TabId};
use crate::strategy::SortStrategy;
use crate::tabs::{BrowserTab, BrowserWindow, OtherDeviceTab, RecentlyClosedTab, TabAugmentation};

/// Version the coordinator reports in its `connected` acknowledgement.
pub const PROTOCOL_VERSION: &str = "1";

/// The unit of transport. `seq` increases monotonically per connection and
/// is used for freshness tracking, not ordering enforcement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub instance_id: InstanceId,
    pub runtime_session_id: RuntimeSessionId,
    pub connection_id: ConnectionId,
    pub seq: u64,
    #[serde(flatten)]
    pub body: Body,
}

impl Envelope {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::decode)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::encode)
    }

    /// Logical session identity, independent of the physical socket.
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.instance_id.clone(), self.runtime_session_id.clone())
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}

/// Message type plus its payload variant. An unrecognized `type` string
/// fails decoding, which callers treat as a protocol error.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Body {
    Connect(ConnectPayload),
    Connected(ConnectedPayload),
    Snapshot(SnapshotPayload),
    Event(TabEvent),
    Command(Command),
    Ping,
    Pong,
}

impl Body {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Connected(_) => "connected",
            Self::Snapshot(_) => "snapshot",
            Self::Event(_) => "event",
            Self::Command(_) => "command",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    pub fn as_connect(&self) -> Option<&ConnectPayload> {
        match self {
            Self::Connect(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_snapshot(&self) -> Option<&SnapshotPayload> {
        match self {
            Self::Snapshot(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&TabEvent> {
        match self {
            Self::Event(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_command(&self) -> Option<&Command> {
        match self {
            Self::Command(c) => Some(c),
            _ => None,
        }
    }
}

/// Sent once per socket, before anything else. The only message type the
/// coordinator accepts without a pre-existing session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload {
    pub browser_type: String,
    pub extension_version: String,
    #[serde(default)]
    pub sort_strategy: SortStrategy,
}

/// Coordinator's acknowledgement of a `connect`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub ok: bool,
    pub server_version: String,
}

/// Full-state replacement, sent right after connect (or on resync). The
/// baseline the registry then incrementally updates via events.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    pub session_tabs: Vec<BrowserTab>,
    pub session_windows: Vec<BrowserWindow>,
    #[serde(default)]
    pub augmentation: HashMap<TabId, TabAugmentation>,
    #[serde(default)]
    pub recently_closed: Vec<RecentlyClosedTab>,
    #[serde(default)]
    pub other_devices: Vec<OtherDeviceTab>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(body: Body) -> Envelope {
        Envelope {
            instance_id: InstanceId::from_raw("inst_abc12345"),
            runtime_session_id: RuntimeSessionId::from_raw("run_def"),
            connection_id: ConnectionId::from_raw("conn_ghi"),
            seq: 1,
            body,
        }
    }

    #[test]
    fn connect_envelope_roundtrip() {
        let env = envelope(Body::Connect(ConnectPayload {
            browser_type: "chrome".into(),
            extension_version: "1.2.0".into(),
            sort_strategy: SortStrategy::LastActivated,
        }));
        let json = env.encode().unwrap();
        assert!(json.contains("\"type\":\"connect\""));
        assert!(json.contains("\"instanceId\":\"inst_abc12345\""));
        assert!(json.contains("\"browserType\":\"chrome\""));
        let parsed = Envelope::decode(&json).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn ping_has_no_payload() {
        let env = envelope(Body::Ping);
        let json = env.encode().unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(!json.contains("payload"));
        let parsed = Envelope::decode(&json).unwrap();
        assert_eq!(parsed.body, Body::Ping);
    }

    #[test]
    fn snapshot_roundtrip_with_augmentation_keys() {
        let mut augmentation = HashMap::new();
        augmentation.insert(
            42,
            TabAugmentation {
                last_activated: Some(999),
                ..Default::default()
            },
        );
        let env = envelope(Body::Snapshot(SnapshotPayload {
            session_tabs: vec![BrowserTab {
                id: 42,
                window_id: 1,
                ..Default::default()
            }],
            session_windows: vec![BrowserWindow {
                id: 1,
                focused: true,
                ..Default::default()
            }],
            augmentation,
            recently_closed: vec![],
            other_devices: vec![],
        }));
        let json = env.encode().unwrap();
        let parsed = Envelope::decode(&json).unwrap();
        let snap = parsed.body.as_snapshot().unwrap();
        assert_eq!(snap.session_tabs.len(), 1);
        assert_eq!(snap.augmentation.get(&42).unwrap().last_activated, Some(999));
    }

    #[test]
    fn unknown_type_is_a_decode_error() {
        let json = r#"{"instanceId":"a","runtimeSessionId":"b","connectionId":"c","seq":1,"type":"teleport","payload":{}}"#;
        let err = Envelope::decode(json).unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert_eq!(Envelope::decode("{not json").unwrap_err().kind(), "decode");
    }

    #[test]
    fn accessors_narrow_by_type() {
        let env = envelope(Body::Event(TabEvent::WindowFocused { window_id: 3 }));
        assert!(env.body.as_event().is_some());
        assert!(env.body.as_connect().is_none());
        assert!(env.body.as_snapshot().is_none());
        assert!(env.body.as_command().is_none());
    }

    #[test]
    fn session_key_from_envelope() {
        let env = envelope(Body::Ping);
        assert_eq!(env.session_key().to_string(), "inst_abc12345:run_def");
    }

    #[test]
    fn connect_defaults_sort_strategy_when_absent() {
        let json = r#"{"instanceId":"a","runtimeSessionId":"b","connectionId":"c","seq":0,"type":"connect","payload":{"browserType":"firefox","extensionVersion":"0.9"}}"#;
        let env = Envelope::decode(json).unwrap();
        let connect = env.body.as_connect().unwrap();
        assert_eq!(connect.sort_strategy, SortStrategy::LastActivated);
    }
}
