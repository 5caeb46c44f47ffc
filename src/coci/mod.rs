//! Check-out / check-in of nodes through working copies.

use crate::error::LockError;
use crate::lock::lock_service::LockService;
use crate::lock::{LockStatus, LockType};
use crate::node::node_service::NodeService;
use crate::node::{
    Aspect, NodeRecord, NodeRef, PropertyValue, PROP_CHECKED_OUT_FROM, PROP_CREATOR,
    PROP_EXPIRY_DATE, PROP_LOCK_LIFETIME, PROP_LOCK_OWNER, PROP_LOCK_TYPE, PROP_NAME, PROP_OWNER,
    PROP_WORKING_COPY_LABEL, PROP_WORKING_COPY_LINK, PROP_WORKING_COPY_OWNER,
};
use crate::transactions::transaction::Transaction;
use crate::Result;
use std::sync::Arc;

const WORKING_COPY_LABEL: &str = "Working Copy";

/// Properties that belong to a node's identity or its lock and never
/// travel between a node and its working copy.
const SYSTEM_PROPERTIES: [&str; 11] = [
    PROP_NAME,
    PROP_CREATOR,
    PROP_OWNER,
    PROP_LOCK_OWNER,
    PROP_LOCK_TYPE,
    PROP_LOCK_LIFETIME,
    PROP_EXPIRY_DATE,
    PROP_WORKING_COPY_OWNER,
    PROP_WORKING_COPY_LABEL,
    PROP_WORKING_COPY_LINK,
    PROP_CHECKED_OUT_FROM,
];

/// Read side of check-out state, consumed by the lock service.
pub trait CheckOutCheckInService: Send + Sync {
    fn is_checked_out(&self, txn: &Transaction, node_ref: &NodeRef) -> bool;

    fn is_working_copy(&self, txn: &Transaction, node_ref: &NodeRef) -> bool;

    /// The node `working_copy` was checked out from.
    fn get_checked_out(&self, txn: &Transaction, working_copy: &NodeRef) -> Option<NodeRef>;

    fn get_working_copy(&self, txn: &Transaction, node_ref: &NodeRef) -> Option<NodeRef>;
}

/// Reads check-out state from the aspects and link properties of the nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckedOutAspect;

fn linked(record: &NodeRecord, aspect: Aspect, link: &str) -> Option<NodeRef> {
    if !record.has_aspect(aspect) {
        return None;
    }
    match record.text(link) {
        Some(id) => Some(NodeRef::new(record.node_ref.store.clone(), id)),
        None => {
            warn!("{} has aspect {:?} but no {}", record.node_ref, aspect, link);
            None
        }
    }
}

impl CheckOutCheckInService for CheckedOutAspect {
    fn is_checked_out(&self, txn: &Transaction, node_ref: &NodeRef) -> bool {
        txn.get_node(node_ref)
            .map_or(false, |r| r.has_aspect(Aspect::CheckedOut))
    }

    fn is_working_copy(&self, txn: &Transaction, node_ref: &NodeRef) -> bool {
        txn.get_node(node_ref)
            .map_or(false, |r| r.has_aspect(Aspect::WorkingCopy))
    }

    fn get_checked_out(&self, txn: &Transaction, working_copy: &NodeRef) -> Option<NodeRef> {
        txn.get_node(working_copy)
            .and_then(|r| linked(&r, Aspect::WorkingCopy, PROP_CHECKED_OUT_FROM))
    }

    fn get_working_copy(&self, txn: &Transaction, node_ref: &NodeRef) -> Option<NodeRef> {
        txn.get_node(node_ref)
            .and_then(|r| linked(&r, Aspect::CheckedOut, PROP_WORKING_COPY_LINK))
    }
}

/// Creates and retires working copies, holding a read-only lock on the
/// original while it is checked out.
pub struct NodeCheckOutCheckIn {
    node_service: Arc<NodeService>,
    lock_service: Arc<LockService>,
    state: CheckedOutAspect,
}

impl NodeCheckOutCheckIn {
    pub fn new(node_service: Arc<NodeService>, lock_service: Arc<LockService>) -> NodeCheckOutCheckIn {
        NodeCheckOutCheckIn {
            node_service,
            lock_service,
            state: CheckedOutAspect,
        }
    }

    /// Check `node_ref` out into a sibling working copy owned by the current user.
    pub fn checkout(&self, txn: &mut Transaction, node_ref: &NodeRef) -> Result<NodeRef> {
        let record = self.node_service.get_node(txn, node_ref)?;
        if record.has_aspect(Aspect::CheckedOut) {
            return Err(LockError::CheckOutCheckIn(format!("{} is already checked out", node_ref)));
        }
        if record.has_aspect(Aspect::WorkingCopy) {
            return Err(LockError::CheckOutCheckIn(format!(
                "{} is a working copy",
                node_ref
            )));
        }
        match self.lock_service.get_lock_status(txn, node_ref) {
            LockStatus::Locked | LockStatus::LockOwner => {
                return Err(LockError::NodeLocked(node_ref.clone()))
            }
            LockStatus::NoLock | LockStatus::LockExpired => {}
        }
        let parent = record.parent.as_ref().ok_or_else(|| {
            LockError::CheckOutCheckIn(format!("{} has no parent to hold a working copy", node_ref))
        })?;

        let name = format!("{} ({})", record.name(), WORKING_COPY_LABEL);
        let working_copy = self.node_service.create_node(txn, parent, &name)?;
        self.copy_properties(txn, &record, &working_copy)?;
        let user = txn.user().to_string();
        let wc_props: [(&str, PropertyValue); 3] = [
            (PROP_WORKING_COPY_OWNER, user.as_str().into()),
            (PROP_WORKING_COPY_LABEL, WORKING_COPY_LABEL.into()),
            (PROP_CHECKED_OUT_FROM, node_ref.id.as_str().into()),
        ];
        for (prop, value) in wc_props.iter() {
            self.node_service
                .set_property(txn, &working_copy, prop, value.clone())?;
        }
        self.node_service
            .add_aspect(txn, &working_copy, Aspect::WorkingCopy)?;

        self.node_service.set_property(
            txn,
            node_ref,
            PROP_WORKING_COPY_LINK,
            working_copy.id.as_str().into(),
        )?;
        self.node_service
            .add_aspect(txn, node_ref, Aspect::CheckedOut)?;
        self.lock_service
            .lock(txn, node_ref, LockType::ReadOnlyLock)?;

        info!("{} checked out {} as {}", user, node_ref, working_copy);
        Ok(working_copy)
    }

    /// Write the working copy back to its original. The working copy is
    /// deleted unless `keep_checked_out`, in which case the original stays
    /// locked. Returns the original.
    pub fn check_in(
        &self,
        txn: &mut Transaction,
        working_copy: &NodeRef,
        keep_checked_out: bool,
    ) -> Result<NodeRef> {
        let original = self.original_of(txn, working_copy)?;
        self.lock_service
            .unlock_with(txn, &original, false, true)?;
        let wc_record = self.node_service.get_node(txn, working_copy)?;
        self.copy_properties(txn, &wc_record, &original)?;

        if keep_checked_out {
            self.lock_service
                .lock(txn, &original, LockType::ReadOnlyLock)?;
        } else {
            self.retire(txn, &original, working_copy)?;
        }
        info!("{} checked in {} to {}", txn.user(), working_copy, original);
        Ok(original)
    }

    /// Drop the working copy without touching the original. Returns the original.
    pub fn cancel_checkout(&self, txn: &mut Transaction, working_copy: &NodeRef) -> Result<NodeRef> {
        let original = self.original_of(txn, working_copy)?;
        self.lock_service
            .unlock_with(txn, &original, false, true)?;
        self.retire(txn, &original, working_copy)?;
        info!("{} cancelled checkout of {}", txn.user(), original);
        Ok(original)
    }

    fn original_of(&self, txn: &Transaction, working_copy: &NodeRef) -> Result<NodeRef> {
        self.node_service.get_node(txn, working_copy)?;
        self.state
            .get_checked_out(txn, working_copy)
            .ok_or_else(|| LockError::CheckOutCheckIn(format!("{} is not a working copy", working_copy)))
    }

    fn retire(&self, txn: &mut Transaction, original: &NodeRef, working_copy: &NodeRef) -> Result<()> {
        self.node_service
            .remove_property(txn, original, PROP_WORKING_COPY_LINK)?;
        self.node_service
            .remove_aspect(txn, original, Aspect::CheckedOut)?;
        self.node_service.delete_node(txn, working_copy)
    }

    fn copy_properties(&self, txn: &mut Transaction, from: &NodeRecord, to: &NodeRef) -> Result<()> {
        for (name, value) in from.properties.iter() {
            if !SYSTEM_PROPERTIES.contains(&name.as_str()) {
                self.node_service
                    .set_property(txn, to, name, value.clone())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::coci::{CheckOutCheckInService, CheckedOutAspect, NodeCheckOutCheckIn};
    use crate::error::{LockError, ReleaseCause};
    use crate::lock::lock_service::LockService;
    use crate::lock::lock_store::LockStore;
    use crate::lock::{LockStatus, LockType};
    use crate::node::node_service::NodeService;
    use crate::node::node_store::NodeStore;
    use crate::node::{NodeRef, StoreRef};
    use std::sync::Arc;

    struct Fixture {
        store: Arc<NodeStore>,
        node_service: Arc<NodeService>,
        lock_service: Arc<LockService>,
        coci: NodeCheckOutCheckIn,
        node: NodeRef,
    }

    fn fixture() -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(NodeStore::in_memory());
        let node_service = Arc::new(NodeService::new());
        let lock_service = Arc::new(LockService::new(Arc::new(LockStore::new())));
        lock_service.bind_node_policies(&node_service);
        let coci = NodeCheckOutCheckIn::new(node_service.clone(), lock_service.clone());

        let mut txn = NodeStore::begin(&store, "alice");
        let root = node_service
            .create_root(&mut txn, StoreRef::workspace("test"), "root")
            .unwrap();
        let node = node_service.create_node(&mut txn, &root, "doc.txt").unwrap();
        node_service
            .set_property(&mut txn, &node, "title", "draft".into())
            .unwrap();
        txn.commit().unwrap();
        Fixture {
            store,
            node_service,
            lock_service,
            coci,
            node,
        }
    }

    #[test]
    fn test_checkout_and_check_in() {
        let f = fixture();
        let mut txn = NodeStore::begin(&f.store, "alice");
        let wc = f.coci.checkout(&mut txn, &f.node).unwrap();
        assert_eq!(
            f.node_service.get_node(&txn, &wc).unwrap().name(),
            "doc.txt (Working Copy)"
        );
        assert!(CheckedOutAspect.is_checked_out(&txn, &f.node));
        assert!(CheckedOutAspect.is_working_copy(&txn, &wc));
        assert_eq!(CheckedOutAspect.get_working_copy(&txn, &f.node), Some(wc.clone()));
        assert_eq!(CheckedOutAspect.get_checked_out(&txn, &wc), Some(f.node.clone()));
        assert_eq!(
            f.lock_service.get_lock_type(&txn, &f.node),
            Some(LockType::ReadOnlyLock)
        );
        assert_eq!(
            f.lock_service.get_lock_status(&txn, &f.node),
            LockStatus::LockOwner
        );

        // the owner may neither edit nor unlock the original directly
        assert_eq!(
            f.node_service
                .set_property(&mut txn, &f.node, "title", "x".into()),
            Err(LockError::NodeLocked(f.node.clone()))
        );
        assert_eq!(
            f.lock_service.unlock(&mut txn, &f.node),
            Err(LockError::UnableToReleaseLock {
                node: f.node.clone(),
                cause: ReleaseCause::CheckedOut
            })
        );

        f.node_service
            .set_property(&mut txn, &wc, "title", "final".into())
            .unwrap();
        let original = f.coci.check_in(&mut txn, &wc, false).unwrap();
        assert_eq!(original, f.node);
        assert!(!f.node_service.exists(&txn, &wc));
        assert!(!CheckedOutAspect.is_checked_out(&txn, &f.node));
        assert_eq!(f.lock_service.get_lock_status(&txn, &f.node), LockStatus::NoLock);
        assert_eq!(
            f.node_service.get_property(&txn, &f.node, "title").unwrap(),
            Some("final".into())
        );
        txn.commit().unwrap();
    }

    #[test]
    fn test_keep_checked_out() {
        let f = fixture();
        let mut txn = NodeStore::begin(&f.store, "alice");
        let wc = f.coci.checkout(&mut txn, &f.node).unwrap();
        f.coci.check_in(&mut txn, &wc, true).unwrap();
        assert!(f.node_service.exists(&txn, &wc));
        assert!(CheckedOutAspect.is_checked_out(&txn, &f.node));
        assert!(f.lock_service.is_locked_and_read_only(&txn, &f.node));
    }

    #[test]
    fn test_cancel_checkout() {
        let f = fixture();
        let mut txn = NodeStore::begin(&f.store, "alice");
        let wc = f.coci.checkout(&mut txn, &f.node).unwrap();
        f.node_service
            .set_property(&mut txn, &wc, "title", "discarded".into())
            .unwrap();
        txn.commit().unwrap();

        let mut txn = NodeStore::begin(&f.store, "bob");
        assert_eq!(
            f.coci.cancel_checkout(&mut txn, &wc),
            Err(LockError::UnableToReleaseLock {
                node: f.node.clone(),
                cause: ReleaseCause::NotOwner
            })
        );
        drop(txn);

        let mut txn = NodeStore::begin(&f.store, "alice");
        f.coci.cancel_checkout(&mut txn, &wc).unwrap();
        assert!(!f.node_service.exists(&txn, &wc));
        assert_eq!(
            f.node_service.get_property(&txn, &f.node, "title").unwrap(),
            Some("draft".into())
        );
        assert!(!f.lock_service.is_locked(&txn, &f.node));
    }

    #[test]
    fn test_checkout_refused() {
        let f = fixture();
        let mut txn = NodeStore::begin(&f.store, "alice");
        let wc = f.coci.checkout(&mut txn, &f.node).unwrap();
        assert!(matches!(
            f.coci.checkout(&mut txn, &f.node),
            Err(LockError::CheckOutCheckIn(_))
        ));
        assert!(matches!(
            f.coci.checkout(&mut txn, &wc),
            Err(LockError::CheckOutCheckIn(_))
        ));
        assert!(matches!(
            f.coci.check_in(&mut txn, &f.node, false),
            Err(LockError::CheckOutCheckIn(_))
        ));
        txn.commit().unwrap();

        let mut txn = NodeStore::begin(&f.store, "bob");
        let root = f.node_service.get_node(&txn, &f.node).unwrap().parent.unwrap();
        let other = f.node_service.create_node(&mut txn, &root, "other").unwrap();
        f.lock_service
            .lock(&mut txn, &other, LockType::WriteLock)
            .unwrap();
        txn.commit().unwrap();

        let mut txn = NodeStore::begin(&f.store, "alice");
        assert_eq!(
            f.coci.checkout(&mut txn, &other),
            Err(LockError::NodeLocked(other.clone()))
        );
    }
}
