//! Repository nodes: identities, records and the transactional store behind them.

pub mod node_service;
pub mod node_store;
pub mod policy;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const PROP_NAME: &str = "name";
pub const PROP_CREATOR: &str = "creator";
pub const PROP_OWNER: &str = "owner";
pub const PROP_LOCK_OWNER: &str = "lockOwner";
pub const PROP_LOCK_TYPE: &str = "lockType";
pub const PROP_LOCK_LIFETIME: &str = "lockLifetime";
pub const PROP_EXPIRY_DATE: &str = "expiryDate";
pub const PROP_WORKING_COPY_OWNER: &str = "workingCopyOwner";
pub const PROP_WORKING_COPY_LABEL: &str = "workingCopyLabel";
/// Link from a checked-out node to its working copy.
pub const PROP_WORKING_COPY_LINK: &str = "workingCopyLink";
/// Link from a working copy back to the node it was checked out from.
pub const PROP_CHECKED_OUT_FROM: &str = "checkedOutFrom";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreRef {
    pub protocol: String,
    pub identifier: String,
}

impl StoreRef {
    pub fn new(protocol: impl Into<String>, identifier: impl Into<String>) -> StoreRef {
        StoreRef {
            protocol: protocol.into(),
            identifier: identifier.into(),
        }
    }

    pub fn workspace(identifier: impl Into<String>) -> StoreRef {
        StoreRef::new("workspace", identifier)
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.identifier)
    }
}

/// Globally unique node identity, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub store: StoreRef,
    pub id: String,
}

impl NodeRef {
    pub fn new(store: StoreRef, id: impl Into<String>) -> NodeRef {
        NodeRef {
            store,
            id: id.into(),
        }
    }

    /// A fresh node identity in `store`.
    pub fn generate(store: StoreRef) -> NodeRef {
        let id: u128 = rand::thread_rng().gen();
        NodeRef::new(store, format!("{:032x}", id))
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Aspect {
    Lockable,
    CheckedOut,
    WorkingCopy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    Text(String),
    Date(DateTime<Utc>),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            PropertyValue::Date(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            PropertyValue::Date(d) => Some(*d),
            PropertyValue::Text(_) => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(d: DateTime<Utc>) -> Self {
        PropertyValue::Date(d)
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_ref: NodeRef,
    pub parent: Option<NodeRef>,
    pub aspects: BTreeSet<Aspect>,
    pub properties: Properties,
    /// Bumped on every committed change.
    pub version: u64,
}

impl NodeRecord {
    pub fn new(node_ref: NodeRef, parent: Option<NodeRef>, name: &str) -> NodeRecord {
        let mut properties = Properties::new();
        properties.insert(PROP_NAME.to_string(), name.into());
        NodeRecord {
            node_ref,
            parent,
            aspects: BTreeSet::new(),
            properties,
            version: 0,
        }
    }

    #[inline]
    pub fn has_aspect(&self, aspect: Aspect) -> bool {
        self.aspects.contains(&aspect)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(PropertyValue::as_text)
    }

    pub fn date(&self, name: &str) -> Option<DateTime<Utc>> {
        self.properties.get(name).and_then(PropertyValue::as_date)
    }

    pub fn name(&self) -> &str {
        self.text(PROP_NAME).unwrap_or_default()
    }
}
