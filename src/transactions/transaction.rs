use crate::node::node_store::NodeStore;
use crate::node::{NodeRecord, NodeRef, StoreRef};
use crate::options::WriteOptions;
use crate::transactions::{TransactionID, TransactionListener, SYSTEM_USER_NAME};
use crate::Result;
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Unit of work over a `NodeStore`.
///
/// Isolation level: Read committed. Writes are buffered in the transaction
/// and become visible to others only on `commit`; the transaction itself
/// always reads its own writes. Dropping an uncommitted transaction rolls it
/// back.
pub struct Transaction {
    txn_id: TransactionID,
    store: Arc<NodeStore>,
    write_options: WriteOptions,

    user: String,
    run_as: Option<String>,
    locks_suspended: bool,

    /// `None` marks a removed node.
    table: BTreeMap<NodeRef, Option<NodeRecord>>,
    /// Committed version of every node this transaction has looked at,
    /// captured on first sight.
    observed: RefCell<HashMap<NodeRef, Option<u64>>>,

    listeners: Vec<(TypeId, Box<dyn TransactionListener>)>,
    completed: bool,
}

impl Transaction {
    pub(crate) fn new(
        txn_id: TransactionID,
        store: Arc<NodeStore>,
        user: String,
        write_options: WriteOptions,
    ) -> Transaction {
        Transaction {
            txn_id,
            store,
            write_options,
            user,
            run_as: None,
            locks_suspended: false,
            table: BTreeMap::new(),
            observed: RefCell::new(HashMap::new()),
            listeners: Vec::new(),
            completed: false,
        }
    }

    #[inline]
    pub fn txn_id(&self) -> TransactionID {
        self.txn_id
    }

    #[inline]
    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    /// The effective identity: the run-as user if one is set.
    pub fn user(&self) -> &str {
        self.run_as.as_deref().unwrap_or(&self.user)
    }

    pub fn authenticated_user(&self) -> &str {
        &self.user
    }

    pub fn is_system(&self) -> bool {
        self.user() == SYSTEM_USER_NAME
    }

    /// Run `f` with `user` as the effective identity.
    pub fn run_as<R>(&mut self, user: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.run_as.replace(user.to_string());
        let result = f(self);
        self.run_as = previous;
        result
    }

    pub fn with_elevated_privileges<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.run_as(SYSTEM_USER_NAME, f)
    }

    pub fn suspend_locks(&mut self) {
        self.locks_suspended = true;
    }

    pub fn enable_locks(&mut self) {
        self.locks_suspended = false;
    }

    #[inline]
    pub fn locks_suspended(&self) -> bool {
        self.locks_suspended
    }

    pub fn get_node(&self, node_ref: &NodeRef) -> Option<NodeRecord> {
        if let Some(staged) = self.table.get(node_ref) {
            return staged.clone();
        }
        let record = self.store.get(node_ref);
        self.observed
            .borrow_mut()
            .entry(node_ref.clone())
            .or_insert_with(|| record.as_ref().map(|r| r.version));
        record
    }

    pub fn exists(&self, node_ref: &NodeRef) -> bool {
        self.get_node(node_ref).is_some()
    }

    pub fn put_node(&mut self, record: NodeRecord) {
        self.observe(&record.node_ref);
        self.table.insert(record.node_ref.clone(), Some(record));
    }

    pub fn remove_node(&mut self, node_ref: &NodeRef) {
        self.observe(node_ref);
        self.table.insert(node_ref.clone(), None);
    }

    fn observe(&self, node_ref: &NodeRef) {
        if !self.table.contains_key(node_ref) && !self.observed.borrow().contains_key(node_ref) {
            let version = self.store.version(node_ref);
            self.observed.borrow_mut().insert(node_ref.clone(), version);
        }
    }

    /// Records visible to this transaction that satisfy `predicate`.
    pub fn select(&self, predicate: impl Fn(&NodeRecord) -> bool) -> Vec<NodeRecord> {
        let mut records: Vec<NodeRecord> = self
            .store
            .select(|r| !self.table.contains_key(&r.node_ref) && predicate(r));
        records.extend(
            self.table
                .values()
                .filter_map(|staged| staged.as_ref())
                .filter(|r| predicate(*r))
                .cloned(),
        );
        records
    }

    pub fn children(&self, parent: &NodeRef) -> Vec<NodeRef> {
        self.select(|r| r.parent.as_ref() == Some(parent))
            .into_iter()
            .map(|r| r.node_ref)
            .collect()
    }

    pub fn records_in_store(&self, store: &StoreRef) -> Vec<NodeRecord> {
        self.select(|r| &r.node_ref.store == store)
    }

    /// Get the listener of type `L`, binding a new one built by `init` on first use.
    pub fn bind_listener<L, F>(&mut self, init: F) -> &mut L
    where
        L: TransactionListener,
        F: FnOnce() -> L,
    {
        let type_id = TypeId::of::<L>();
        let idx = match self.listeners.iter().position(|(id, _)| *id == type_id) {
            Some(idx) => idx,
            None => {
                self.listeners.push((type_id, Box::new(init())));
                self.listeners.len() - 1
            }
        };
        self.listeners[idx]
            .1
            .as_any_mut()
            .downcast_mut::<L>()
            .expect("listener is keyed by its own TypeId")
    }

    pub fn commit(mut self) -> Result<()> {
        self.completed = true;
        let table = std::mem::take(&mut self.table);
        let observed = std::mem::take(self.observed.get_mut());
        match self
            .store
            .write_batch(self.txn_id, &self.write_options, table, &observed)
        {
            Ok(()) => {
                debug!("transaction {} committed", self.txn_id);
                for (_, listener) in self.listeners.iter_mut() {
                    listener.after_commit();
                }
                Ok(())
            }
            Err(e) => {
                warn!("transaction {} failed to commit: {}", self.txn_id, e);
                self.run_rollback_listeners();
                Err(e)
            }
        }
    }

    pub fn rollback(mut self) {
        self.completed = true;
        self.table.clear();
        debug!("transaction {} rolled back", self.txn_id);
        self.run_rollback_listeners();
    }

    fn run_rollback_listeners(&mut self) {
        for (_, listener) in self.listeners.iter_mut() {
            listener.after_rollback();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.completed {
            debug!("transaction {} dropped without commit", self.txn_id);
            self.run_rollback_listeners();
        }
    }
}
