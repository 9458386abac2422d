use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(InstanceId, "inst");
branded_id!(RuntimeSessionId, "run");
branded_id!(ConnectionId, "conn");

impl InstanceId {
    /// Short prefix used to build cross-session display ids.
    pub fn short_prefix(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

/// Identity of one logical browser session, independent of socket reconnects.
/// The runtime session id changes each time the extension background process
/// restarts; the instance id survives restarts.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SessionKey {
    instance_id: InstanceId,
    runtime_session_id: RuntimeSessionId,
}

impl SessionKey {
    pub fn new(instance_id: InstanceId, runtime_session_id: RuntimeSessionId) -> Self {
        Self {
            instance_id,
            runtime_session_id,
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn runtime_session_id(&self) -> &RuntimeSessionId {
        &self.runtime_session_id
    }

    pub fn short_prefix(&self) -> &str {
        self.instance_id.short_prefix()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance_id, self.runtime_session_id)
    }
}

/// Browser-native numeric tab id. Unique only within one browser instance.
pub type TabId = i64;
/// Browser-native numeric window id. Unique only within one browser instance.
pub type WindowId = i64;

/// Cross-session-unique display id: `shortInstancePrefix:tabId`.
pub fn display_tab_id(instance_id: &InstanceId, tab_id: TabId) -> String {
    format!("{}:{}", instance_id.short_prefix(), tab_id)
}
