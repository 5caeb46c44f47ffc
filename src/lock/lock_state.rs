use crate::lock::{lock_status, Lifetime, LockStatus, LockType};
use crate::node::{
    Aspect, NodeRecord, NodeRef, PROP_EXPIRY_DATE, PROP_LOCK_LIFETIME, PROP_LOCK_OWNER,
    PROP_LOCK_TYPE,
};
use chrono::{DateTime, Utc};

/// One lock on one node. Never mutated: a refresh replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockState {
    pub node_ref: NodeRef,
    pub lock_type: LockType,
    pub owner: String,
    pub lifetime: Lifetime,
    pub expires: Option<DateTime<Utc>>,
    pub additional_info: Option<String>,
}

impl LockState {
    pub fn new(
        node_ref: NodeRef,
        lock_type: LockType,
        owner: impl Into<String>,
        lifetime: Lifetime,
        expires: Option<DateTime<Utc>>,
        additional_info: Option<String>,
    ) -> LockState {
        LockState {
            node_ref,
            lock_type,
            owner: owner.into(),
            lifetime,
            expires,
            additional_info,
        }
    }

    /// Rebuild a persistent lock from the lock properties of `record`.
    ///
    /// A missing lifetime reads as persistent and a missing type as a write lock.
    pub fn from_record(record: &NodeRecord) -> Option<LockState> {
        if !record.has_aspect(Aspect::Lockable) {
            return None;
        }
        let owner = record.text(PROP_LOCK_OWNER)?;
        let lock_type = record
            .text(PROP_LOCK_TYPE)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let lifetime = record
            .text(PROP_LOCK_LIFETIME)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        Some(LockState::new(
            record.node_ref.clone(),
            lock_type,
            owner,
            lifetime,
            record.date(PROP_EXPIRY_DATE),
            None,
        ))
    }

    /// Write this lock into the lock properties of `record`.
    pub fn apply_to(&self, record: &mut NodeRecord) {
        record.aspects.insert(Aspect::Lockable);
        let props = &mut record.properties;
        props.insert(PROP_LOCK_OWNER.to_string(), self.owner.clone().into());
        props.insert(PROP_LOCK_TYPE.to_string(), self.lock_type.as_str().into());
        props.insert(PROP_LOCK_LIFETIME.to_string(), self.lifetime.as_str().into());
        match self.expires {
            Some(expires) => props.insert(PROP_EXPIRY_DATE.to_string(), expires.into()),
            None => props.remove(PROP_EXPIRY_DATE),
        };
    }

    /// Drop the lockable aspect and every lock property from `record`.
    pub fn clear_from(record: &mut NodeRecord) {
        record.aspects.remove(&Aspect::Lockable);
        for name in [
            PROP_LOCK_OWNER,
            PROP_LOCK_TYPE,
            PROP_LOCK_LIFETIME,
            PROP_EXPIRY_DATE,
        ]
        .iter()
        {
            record.properties.remove(*name);
        }
    }

    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map_or(false, |expires| expires <= now)
    }

    pub fn status_for(&self, user: &str, now: DateTime<Utc>) -> LockStatus {
        lock_status(user, Some(&self.owner), self.expires, now)
    }
}
