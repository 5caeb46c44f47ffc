use crate::Result;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Longest time-to-expire accepted for an ephemeral lock, in seconds.
pub const MAX_EPHEMERAL_LOCK_SECONDS: u32 = 2 * 86400;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    pub sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockServiceOptions {
    /// Ephemeral requests whose time-to-expire exceeds this are stored persistently.
    /// `None` stores every ephemeral request persistently.
    pub ephemeral_expiry_threshold: Option<u32>,
    pub max_ephemeral_lock_seconds: u32,
}

impl Default for LockServiceOptions {
    fn default() -> Self {
        LockServiceOptions {
            ephemeral_expiry_threshold: Some(MAX_EPHEMERAL_LOCK_SECONDS),
            max_ephemeral_lock_seconds: MAX_EPHEMERAL_LOCK_SECONDS,
        }
    }
}

impl LockServiceOptions {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<LockServiceOptions> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
