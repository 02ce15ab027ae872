//! ---
//! hearth_section: "07-cluster-coordination"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Leadership resource keys and roles."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

const CONTROL_PLANE: &str = "control-plane";
const APP_PREFIX: &str = "app:";

/// Leadership domain: the node's control plane or one app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub enum ResourceKey {
    ControlPlane,
    App(String),
}

impl ResourceKey {
    pub fn app(name: impl Into<String>) -> Self {
        ResourceKey::App(name.into())
    }

    /// App name for `app:<name>` keys.
    pub fn app_name(&self) -> Option<&str> {
        match self {
            ResourceKey::App(name) => Some(name),
            ResourceKey::ControlPlane => None,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::ControlPlane => f.write_str(CONTROL_PLANE),
            ResourceKey::App(name) => write!(f, "{APP_PREFIX}{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid resource key `{0}`")]
pub struct ParseResourceKeyError(pub String);

impl FromStr for ResourceKey {
    type Err = ParseResourceKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == CONTROL_PLANE {
            return Ok(ResourceKey::ControlPlane);
        }
        match s.strip_prefix(APP_PREFIX) {
            Some(name) if !name.is_empty() => Ok(ResourceKey::App(name.to_string())),
            _ => Err(ParseResourceKeyError(s.to_string())),
        }
    }
}

/// Role this node holds for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leader,
    Follower,
    #[default]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Leader => "leader",
            Role::Follower => "follower",
            Role::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
