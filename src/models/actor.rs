use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Dispatcher,
    Courier,
    Customer,
}

impl Role {
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Admin | Role::Dispatcher)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Dispatcher => "dispatcher",
            Role::Courier => "courier",
            Role::Customer => "customer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

/// Legacy spellings still issued by the identity store are accepted as exact
/// aliases; no substring matching.
impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" | "administrator" | "administrador" => Ok(Role::Admin),
            "dispatcher" | "operator" | "despachador" => Ok(Role::Dispatcher),
            "courier" | "driver" | "repartidor" => Ok(Role::Courier),
            "customer" | "client" | "cliente" => Ok(Role::Customer),
            _ => Err(UnknownRole(raw.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity of the caller, as handed over by the authentication layer.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn is_elevated(&self) -> bool {
        self.role.is_elevated()
    }

    pub fn may_act_for(&self, owner: Uuid) -> bool {
        self.id == owner || self.is_elevated()
    }
}
