//! Session token table
//!
//! The device binds each command name to a numeric token for the lifetime of
//! a session. The table is filled during initialization by issuing one token
//! request per name and is read-only afterwards.

use std::collections::HashMap;

/// Sentinel returned for names the device has not assigned a token to
pub const UNKNOWN_TOKEN: u32 = 0xFFFF_FFFF;

/// Command names resolved to tokens during session initialization
pub const TOKEN_NAMES: [&str; 15] = [
    "Connect",
    "Disconnect",
    "UserId",
    "SystemDate",
    "ImageData",
    "Start",
    "Stop",
    "Mode",
    "PollingOnly",
    "StopRequest",
    "SystemState",
    "DeviceId",
    "Erasor",
    "Version",
    "ModeList",
];

/// Mapping from command name to session token
#[derive(Debug, Default, Clone)]
pub struct TokenTable {
    tokens: HashMap<String, u32>,
}

impl TokenTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the token the device assigned to `name`
    pub fn insert(&mut self, name: String, token: u32) {
        self.tokens.insert(name, token);
    }

    /// Look up the token for `name`, or [`UNKNOWN_TOKEN`] when unresolved
    pub fn get(&self, name: &str) -> u32 {
        self.tokens.get(name).copied().unwrap_or(UNKNOWN_TOKEN)
    }

    /// Whether `name` has a resolved token
    pub fn contains(&self, name: &str) -> bool {
        self.tokens.contains_key(name)
    }

    /// Number of resolved tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens have been resolved yet
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
