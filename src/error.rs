use crate::node::NodeRef;
use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCause {
    NotOwner,
    CheckedOut,
}

impl fmt::Display for ReleaseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseCause::NotOwner => write!(f, "the current user is not the lock owner"),
            ReleaseCause::CheckedOut => write!(f, "the node is checked out"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("{0}")]
    IOError(#[from] io::Error),

    #[error("{0}")]
    Serde(#[from] serde_json::Error),

    #[error("unable to lock {node}: already locked by {owner}")]
    UnableToAcquireLock { node: NodeRef, owner: String },

    #[error("unable to unlock {node}: {cause}")]
    UnableToReleaseLock { node: NodeRef, cause: ReleaseCause },

    #[error("node {0} is locked")]
    NodeLocked(NodeRef),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("node {0} does not exist")]
    InvalidNodeRef(NodeRef),

    #[error("node {0} was modified by a concurrent transaction")]
    ConcurrencyFailure(NodeRef),

    #[error("check out/check in failed: {0}")]
    CheckOutCheckIn(String),

    #[error("{0}")]
    Custom(String),
}

impl PartialEq for LockError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::IOError(_), Self::IOError(_)) | (Self::Serde(_), Self::Serde(_)) => true,
            (
                Self::UnableToAcquireLock { node: n1, owner: o1 },
                Self::UnableToAcquireLock { node: n2, owner: o2 },
            ) => n1 == n2 && o1 == o2,
            (
                Self::UnableToReleaseLock { node: n1, cause: c1 },
                Self::UnableToReleaseLock { node: n2, cause: c2 },
            ) => n1 == n2 && c1 == c2,
            (Self::NodeLocked(n1), Self::NodeLocked(n2))
            | (Self::InvalidNodeRef(n1), Self::InvalidNodeRef(n2))
            | (Self::ConcurrencyFailure(n1), Self::ConcurrencyFailure(n2)) => n1 == n2,
            (Self::InvalidArgument(s1), Self::InvalidArgument(s2))
            | (Self::CheckOutCheckIn(s1), Self::CheckOutCheckIn(s2))
            | (Self::Custom(s1), Self::Custom(s2)) => s1.eq(s2),
            _ => false,
        }
    }
}
