//! Per-node locks.
//!
//! A lock is either persistent, recorded as properties of the node and
//! committed with the transaction, or ephemeral, held only in the shared
//! [`LockStore`](lock_store::LockStore) and undone if the transaction that
//! placed it rolls back.

pub mod clock;
pub mod lock_service;
pub mod lock_state;
pub mod lock_store;

use crate::error::LockError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockType {
    /// Only the owner may modify the node.
    WriteLock,
    /// Nobody may modify the node, the owner included.
    ReadOnlyLock,
    /// The node itself may not be moved or deleted by others; its children stay open.
    NodeLock,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::WriteLock => "WRITE_LOCK",
            LockType::ReadOnlyLock => "READ_ONLY_LOCK",
            LockType::NodeLock => "NODE_LOCK",
        }
    }
}

impl Default for LockType {
    fn default() -> Self {
        LockType::WriteLock
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockType {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WRITE_LOCK" => Ok(LockType::WriteLock),
            "READ_ONLY_LOCK" => Ok(LockType::ReadOnlyLock),
            "NODE_LOCK" => Ok(LockType::NodeLock),
            _ => Err(LockError::InvalidArgument(format!("unknown lock type {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifetime {
    Persistent,
    Ephemeral,
}

impl Lifetime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifetime::Persistent => "PERSISTENT",
            Lifetime::Ephemeral => "EPHEMERAL",
        }
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Lifetime::Persistent
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifetime {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERSISTENT" => Ok(Lifetime::Persistent),
            "EPHEMERAL" => Ok(Lifetime::Ephemeral),
            _ => Err(LockError::InvalidArgument(format!("unknown lifetime {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockStatus {
    NoLock,
    /// Held by somebody else and not expired.
    Locked,
    /// Held by the asking user and not expired.
    LockOwner,
    LockExpired,
}

/// Status of a lock held by `owner` as seen by `user` at `now`.
pub fn lock_status(
    user: &str,
    owner: Option<&str>,
    expires: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> LockStatus {
    match owner {
        None => LockStatus::NoLock,
        Some(_) if expires.map_or(false, |expires| expires <= now) => LockStatus::LockExpired,
        Some(owner) if owner == user => LockStatus::LockOwner,
        Some(_) => LockStatus::Locked,
    }
}
