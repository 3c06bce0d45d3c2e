//! Persisted form of the site and user registry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub owner: String,
    /// Users granted access besides the owner
    #[serde(default)]
    pub users: Vec<String>,
}

impl Site {
    pub fn is_authorized(&self, user: &str) -> bool {
        self.owner == user || self.users.iter().any(|u| u == user)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(rename = "pass")]
    pub password: String,
    #[serde(rename = "isAdmin", default)]
    pub is_admin: bool,
}

/// Whole registry file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryData {
    /// Legacy shared key; callers presenting it act as an admin
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default)]
    pub sites: BTreeMap<String, Site>,
    #[serde(default)]
    pub users: BTreeMap<String, User>,
}

impl RegistryData {
    /// No users and no API key: every caller is let in.
    pub fn is_open(&self) -> bool {
        self.users.is_empty() && self.api_key.is_empty()
    }
}
