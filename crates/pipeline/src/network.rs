//! School network type (`rede`) and its normalization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Administrative network of a school after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Public,
    Private,
}

impl NetworkType {
    pub const ALL: [NetworkType; 2] = [NetworkType::Public, NetworkType::Private];

    /// Normalize a raw network value.
    ///
    /// State, municipal and federal networks collapse to `Public`. Already
    /// normalized values are accepted so that persisted tables can be read
    /// back. Returns `None` for anything unrecognized.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "estadual" | "municipal" | "federal" | "state" | "publica" | "pública" | "public" => {
                Some(Self::Public)
            }
            "privada" | "private" => Some(Self::Private),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s).ok_or_else(|| format!("unrecognized network type `{s}`"))
    }
}
