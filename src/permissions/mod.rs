//! Dynamic authorities: roles granted per node at evaluation time.

use crate::coci::CheckOutCheckInService;
use crate::lock::lock_service::LockService;
use crate::lock::LockStatus;
use crate::node::node_service::NodeService;
use crate::node::NodeRef;
use crate::transactions::transaction::Transaction;
use crate::Result;
use std::sync::{Arc, RwLock};

pub const ROLE_LOCK_OWNER: &str = "ROLE_LOCK_OWNER";
pub const ROLE_OWNER: &str = "ROLE_OWNER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    Lock,
    Unlock,
    CheckOut,
    CheckIn,
    CancelCheckOut,
}

const LOCK_OWNER_PERMISSIONS: [Permission; 5] = [
    Permission::Lock,
    Permission::Unlock,
    Permission::CheckOut,
    Permission::CheckIn,
    Permission::CancelCheckOut,
];

const OWNER_PERMISSIONS: [Permission; 7] = [
    Permission::Read,
    Permission::Write,
    Permission::Lock,
    Permission::Unlock,
    Permission::CheckOut,
    Permission::CheckIn,
    Permission::CancelCheckOut,
];

pub trait DynamicAuthority: Send + Sync {
    fn authority(&self) -> &'static str;

    /// Permissions this authority confers when held.
    fn grants(&self) -> &[Permission];

    fn has_authority(&self, txn: &mut Transaction, node_ref: &NodeRef, user: &str) -> Result<bool>;
}

/// Held by the owner of the lock on a node, and by the owner of the lock on
/// the original of a working copy.
pub struct LockOwnerDynamicAuthority {
    lock_service: Arc<LockService>,
    check_out: Arc<dyn CheckOutCheckInService>,
}

impl LockOwnerDynamicAuthority {
    pub fn new(
        lock_service: Arc<LockService>,
        check_out: Arc<dyn CheckOutCheckInService>,
    ) -> LockOwnerDynamicAuthority {
        LockOwnerDynamicAuthority {
            lock_service,
            check_out,
        }
    }
}

impl DynamicAuthority for LockOwnerDynamicAuthority {
    fn authority(&self) -> &'static str {
        ROLE_LOCK_OWNER
    }

    fn grants(&self) -> &[Permission] {
        &LOCK_OWNER_PERMISSIONS
    }

    fn has_authority(&self, txn: &mut Transaction, node_ref: &NodeRef, user: &str) -> Result<bool> {
        txn.with_elevated_privileges(|txn| {
            if !txn.exists(node_ref) {
                return Ok(false);
            }
            if self.lock_service.get_lock_status_for(txn, node_ref, user) == LockStatus::LockOwner {
                return Ok(true);
            }
            if !self.check_out.is_working_copy(txn, node_ref) {
                return Ok(false);
            }
            Ok(self
                .check_out
                .get_checked_out(txn, node_ref)
                .and_then(|original| self.lock_service.get_lock_state(txn, &original))
                .map_or(false, |state| state.owner == user))
        })
    }
}

/// Held by the content owner of a node.
pub struct OwnerDynamicAuthority {
    node_service: Arc<NodeService>,
}

impl OwnerDynamicAuthority {
    pub fn new(node_service: Arc<NodeService>) -> OwnerDynamicAuthority {
        OwnerDynamicAuthority { node_service }
    }
}

impl DynamicAuthority for OwnerDynamicAuthority {
    fn authority(&self) -> &'static str {
        ROLE_OWNER
    }

    fn grants(&self) -> &[Permission] {
        &OWNER_PERMISSIONS
    }

    fn has_authority(&self, txn: &mut Transaction, node_ref: &NodeRef, user: &str) -> Result<bool> {
        if !txn.exists(node_ref) {
            return Ok(false);
        }
        Ok(self.node_service.owner(txn, node_ref)?.as_deref() == Some(user))
    }
}

/// Answers permission questions from the registered dynamic authorities.
#[derive(Default)]
pub struct PermissionEvaluator {
    authorities: RwLock<Vec<Arc<dyn DynamicAuthority>>>,
}

impl PermissionEvaluator {
    pub fn new() -> PermissionEvaluator {
        PermissionEvaluator::default()
    }

    pub fn register(&self, authority: Arc<dyn DynamicAuthority>) {
        self.authorities.write().unwrap().push(authority);
    }

    /// The authorities `user` holds on `node_ref`.
    pub fn authorities_for(&self, txn: &mut Transaction, node_ref: &NodeRef, user: &str) -> Result<Vec<&'static str>> {
        let authorities = self.authorities.read().unwrap().clone();
        let mut held = Vec::new();
        for authority in authorities {
            if authority.has_authority(txn, node_ref, user)? {
                held.push(authority.authority());
            }
        }
        Ok(held)
    }

    pub fn has_permission(
        &self,
        txn: &mut Transaction,
        node_ref: &NodeRef,
        user: &str,
        permission: Permission,
    ) -> Result<bool> {
        let authorities = self.authorities.read().unwrap().clone();
        for authority in authorities {
            if authority.grants().contains(&permission) && authority.has_authority(txn, node_ref, user)? {
                trace!("{} holds {} on {}", user, authority.authority(), node_ref);
                return Ok(true);
            }
        }
        Ok(false)
    }
}
