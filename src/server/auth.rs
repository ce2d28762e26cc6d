// Copyright 2024-2025 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Access keys and session tokens for the server.
//!
//! `auth.json` at the destination root maps access keys to accounts:
//!
//! ```json
//! { "keys": { "<access-key>": { "userid": "alice", "allow": ["10.0.0.0/8"] } } }
//! ```
//!
//! A client logs in with its access key and gets a token, which it sends
//! with later requests. Tokens expire after a period without use.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use ipnet::IpNet;
use serde::Deserialize;
use tracing::{debug, info};

use crate::jsonio::read_json;
use crate::manifest::is_valid_name;
use crate::{Error, Result};

/// Length of the random part of a session token.
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Deserialize)]
struct AuthFile {
    #[serde(default)]
    keys: HashMap<String, KeyEntry>,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    userid: String,
    /// Networks or addresses this key may be used from; empty means anywhere.
    #[serde(default)]
    allow: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub userid: String,
    allow: Vec<IpNet>,
}

impl Account {
    fn allows(&self, addr: IpAddr) -> bool {
        self.allow.is_empty() || self.allow.iter().any(|net| net.contains(&addr))
    }
}

/// Parse a CIDR network, or a bare address meaning just that host.
fn parse_net(s: &str) -> Option<IpNet> {
    s.parse::<IpNet>()
        .ok()
        .or_else(|| s.parse::<IpAddr>().ok().map(IpNet::from))
}

/// Accounts keyed by access key.
#[derive(Debug, Default)]
pub struct AuthDb {
    keys: HashMap<String, Account>,
}

impl AuthDb {
    /// Read the access key database, if the file exists.
    pub fn load(path: &Path) -> Result<Option<AuthDb>> {
        let Some(file) = read_json::<AuthFile>(path)? else {
            return Ok(None);
        };
        let mut keys = HashMap::new();
        for (key, entry) in file.keys {
            if !is_valid_name(&entry.userid) {
                return Err(Error::InvalidUserId { name: entry.userid });
            }
            let mut allow = Vec::new();
            for net in &entry.allow {
                allow.push(parse_net(net).ok_or_else(|| {
                    Error::BadRequest(format!("Invalid network {net:?} in {path:?}"))
                })?);
            }
            keys.insert(
                key,
                Account {
                    userid: entry.userid,
                    allow,
                },
            );
        }
        info!(accounts = keys.len(), "Loaded access keys");
        Ok(Some(AuthDb { keys }))
    }

    /// The account for a key presented from an address.
    pub fn account(&self, access_key: &str, addr: IpAddr) -> Option<&Account> {
        self.keys
            .get(access_key)
            .filter(|account| account.allows(addr))
    }
}

#[derive(Debug)]
struct SessionEntry {
    user: Option<String>,
    addr: IpAddr,
    last_used: Instant,
}

/// Live session tokens.
#[derive(Debug, Default)]
pub struct Sessions {
    tokens: HashMap<String, SessionEntry>,
}

impl Sessions {
    /// Start a session for a user, returning a new random token.
    pub fn login(&mut self, user: &str, addr: IpAddr, now: Instant) -> String {
        let token = hex::encode(rand::random::<[u8; TOKEN_BYTES]>());
        self.tokens.insert(
            token.clone(),
            SessionEntry {
                user: Some(user.to_owned()),
                addr,
                last_used: now,
            },
        );
        debug!(user, %addr, "New session");
        token
    }

    /// The session of clients at an address when no access keys are
    /// configured.
    pub fn anonymous(&mut self, addr: IpAddr, now: Instant) -> String {
        let token = format!("anon:{addr}");
        self.tokens
            .entry(token.clone())
            .and_modify(|entry| entry.last_used = now)
            .or_insert(SessionEntry {
                user: None,
                addr,
                last_used: now,
            });
        token
    }

    /// The user of a token used from an address, refreshing its idle time.
    ///
    /// Returns None if the token is unknown or was issued to another
    /// address.
    pub fn authenticate(&mut self, token: &str, addr: IpAddr, now: Instant) -> Option<Option<String>> {
        let entry = self.tokens.get_mut(token)?;
        if entry.addr != addr {
            return None;
        }
        entry.last_used = now;
        Some(entry.user.clone())
    }

    pub fn logout(&mut self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Forget sessions idle for longer than `ttl`, returning their tokens.
    pub fn expire(&mut self, ttl: Duration, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .tokens
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_used) > ttl)
            .map(|(token, _)| token.clone())
            .collect();
        for token in &expired {
            self.tokens.remove(token);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired idle sessions");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
