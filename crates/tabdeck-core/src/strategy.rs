use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Ordering strategy for the merged tab list.
///
/// Deserialization never fails: unrecognized strategy names fall back to
/// `LastActivated` so a newer extension cannot wedge an older coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SortStrategy {
    #[default]
    LastActivated,
    WindowGrouped,
    LastAccessed,
    LastDeactivated,
}

impl SortStrategy {
    pub fn parse(s: &str) -> Self {
        match s {
            "lastActivated" => Self::LastActivated,
            "windowGrouped" => Self::WindowGrouped,
            "lastAccessed" => Self::LastAccessed,
            "lastDeactivated" => Self::LastDeactivated,
            _ => Self::default(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastActivated => "lastActivated",
            Self::WindowGrouped => "windowGrouped",
            Self::LastAccessed => "lastAccessed",
            Self::LastDeactivated => "lastDeactivated",
        }
    }
}

impl FromStr for SortStrategy {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl std::fmt::Display for SortStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SortStrategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SortStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}
