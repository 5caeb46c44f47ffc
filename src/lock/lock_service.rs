use crate::coci::{CheckOutCheckInService, CheckedOutAspect};
use crate::error::{LockError, ReleaseCause};
use crate::lock::clock::{Clock, SystemClock};
use crate::lock::lock_state::LockState;
use crate::lock::lock_store::LockStore;
use crate::lock::{Lifetime, LockStatus, LockType};
use crate::node::node_service::NodeService;
use crate::node::policy::{NodeEvent, NodePolicy};
use crate::node::{NodeRecord, NodeRef, StoreRef};
use crate::options::LockServiceOptions;
use crate::transactions::transaction::Transaction;
use crate::transactions::TransactionListener;
use crate::Result;
use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Arguments of a lock call beyond the node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockRequest {
    pub lock_type: LockType,
    /// Seconds until the lock expires; 0 never expires.
    pub time_to_expire: u32,
    pub lifetime: Lifetime,
    /// Kept for ephemeral locks only.
    pub additional_info: Option<String>,
    pub lock_children: bool,
}

impl LockRequest {
    pub fn new(lock_type: LockType) -> LockRequest {
        LockRequest {
            lock_type,
            ..LockRequest::default()
        }
    }

    pub fn time_to_expire(mut self, secs: u32) -> Self {
        self.time_to_expire = secs;
        self
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn additional_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    pub fn lock_children(mut self, lock_children: bool) -> Self {
        self.lock_children = lock_children;
        self
    }
}

/// Hooks run before a lock or unlock of an existing node; an error vetoes it.
pub trait LockPolicy: Send + Sync {
    fn before_lock(&self, _txn: &Transaction, _node_ref: &NodeRef, _lock_type: LockType) -> Result<()> {
        Ok(())
    }

    fn before_unlock(&self, _txn: &Transaction, _node_ref: &NodeRef) -> Result<()> {
        Ok(())
    }
}

/// Lock store entries to put back if the transaction rolls back.
struct EphemeralLockUndo {
    lock_store: Arc<LockStore>,
    before: HashMap<NodeRef, Option<LockState>>,
}

impl TransactionListener for EphemeralLockUndo {
    fn after_rollback(&mut self) {
        debug!("restore {} ephemeral locks after rollback", self.before.len());
        for (node_ref, state) in self.before.drain() {
            match state {
                Some(state) => self.lock_store.put(node_ref, state),
                None => self.lock_store.remove(&node_ref),
            }
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct LockService {
    lock_store: Arc<LockStore>,
    check_out: Arc<dyn CheckOutCheckInService>,
    clock: Arc<dyn Clock>,
    options: ArcSwap<LockServiceOptions>,
    lock_policies: RwLock<Vec<Arc<dyn LockPolicy>>>,
}

impl LockService {
    pub fn new(lock_store: Arc<LockStore>) -> LockService {
        LockService::with_options(lock_store, LockServiceOptions::default())
    }

    pub fn with_options(lock_store: Arc<LockStore>, options: LockServiceOptions) -> LockService {
        LockService {
            lock_store,
            check_out: Arc::new(CheckedOutAspect),
            clock: Arc::new(SystemClock),
            options: ArcSwap::from_pointee(options),
            lock_policies: RwLock::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_check_out_service(mut self, check_out: Arc<dyn CheckOutCheckInService>) -> Self {
        self.check_out = check_out;
        self
    }

    /// Guard structural mutations made through `node_service` with this service's locks.
    pub fn bind_node_policies(self: &Arc<Self>, node_service: &NodeService) {
        node_service.bind_all_policies(self.clone());
    }

    pub fn register_lock_policy(&self, policy: Arc<dyn LockPolicy>) {
        self.lock_policies.write().unwrap().push(policy);
    }

    #[inline]
    pub fn lock_store(&self) -> &Arc<LockStore> {
        &self.lock_store
    }

    pub fn set_ephemeral_expiry_threshold(&self, threshold: Option<u32>) {
        let mut options = self.options.load_full().as_ref().clone();
        options.ephemeral_expiry_threshold = threshold;
        self.options.store(Arc::new(options));
    }

    pub fn ephemeral_expiry_threshold(&self) -> Option<u32> {
        self.options.load().ephemeral_expiry_threshold
    }

    /// Lock `node_ref` persistently, without expiry.
    pub fn lock(&self, txn: &mut Transaction, node_ref: &NodeRef, lock_type: LockType) -> Result<()> {
        self.lock_with(txn, node_ref, &LockRequest::new(lock_type))
    }

    pub fn lock_with(&self, txn: &mut Transaction, node_ref: &NodeRef, request: &LockRequest) -> Result<()> {
        self.lock_node(txn, node_ref, request)?;
        if request.lock_children {
            for child in txn.children(node_ref) {
                self.lock_with(txn, &child, request)?;
            }
        }
        Ok(())
    }

    pub fn lock_many(
        &self,
        txn: &mut Transaction,
        node_refs: &[NodeRef],
        lock_type: LockType,
        time_to_expire: u32,
    ) -> Result<()> {
        let request = LockRequest::new(lock_type).time_to_expire(time_to_expire);
        for node_ref in node_refs {
            self.lock_with(txn, node_ref, &request)?;
        }
        Ok(())
    }

    fn lock_node(&self, txn: &mut Transaction, node_ref: &NodeRef, request: &LockRequest) -> Result<()> {
        let mut record = txn
            .get_node(node_ref)
            .ok_or_else(|| LockError::InvalidNodeRef(node_ref.clone()))?;
        self.invoke_before_lock(txn, node_ref, request.lock_type)?;

        let options = self.options.load_full();
        validate(request, &options)?;
        let lifetime = effective_lifetime(request, &options);
        let additional_info = match lifetime {
            Lifetime::Ephemeral => request.additional_info.clone(),
            Lifetime::Persistent => {
                if request.additional_info.is_some() {
                    warn!(
                        "{} is locked persistently, its additional info is dropped",
                        node_ref
                    );
                }
                None
            }
        };

        let user = txn.user().to_string();
        let now = self.clock.now();
        if let Some(current) = self.resolve(node_ref, Some(&record), now) {
            if current.status_for(&user, now) == LockStatus::Locked {
                return Err(LockError::UnableToAcquireLock {
                    node: node_ref.clone(),
                    owner: current.owner,
                });
            }
        }

        let state = LockState::new(
            node_ref.clone(),
            request.lock_type,
            user,
            lifetime,
            make_expiry(now, request.time_to_expire),
            additional_info,
        );
        debug!(
            "{} takes {} on {} ({}, expires {:?})",
            state.owner, state.lock_type, node_ref, state.lifetime, state.expires
        );
        match lifetime {
            Lifetime::Persistent => {
                state.apply_to(&mut record);
                txn.put_node(record);
                if self.lock_store.get(node_ref).is_some() {
                    self.remove_ephemeral(txn, node_ref, true);
                }
            }
            Lifetime::Ephemeral => {
                if LockState::from_record(&record).is_some() {
                    LockState::clear_from(&mut record);
                    txn.put_node(record);
                }
                self.put_ephemeral(txn, state);
            }
        }
        Ok(())
    }

    pub fn unlock(&self, txn: &mut Transaction, node_ref: &NodeRef) -> Result<()> {
        self.unlock_with(txn, node_ref, false, false)
    }

    /// `allow_checked_out` lets check-in and cancel-checkout release the
    /// lock they placed on the checked-out node. It covers `node_ref` only;
    /// checked-out children still refuse.
    pub fn unlock_with(
        &self,
        txn: &mut Transaction,
        node_ref: &NodeRef,
        unlock_children: bool,
        allow_checked_out: bool,
    ) -> Result<()> {
        self.unlock_node(txn, node_ref, allow_checked_out)?;
        if unlock_children {
            for child in txn.children(node_ref) {
                self.unlock_with(txn, &child, true, false)?;
            }
        }
        Ok(())
    }

    pub fn unlock_many(&self, txn: &mut Transaction, node_refs: &[NodeRef]) -> Result<()> {
        for node_ref in node_refs {
            self.unlock(txn, node_ref)?;
        }
        Ok(())
    }

    fn unlock_node(&self, txn: &mut Transaction, node_ref: &NodeRef, allow_checked_out: bool) -> Result<()> {
        let record = txn.get_node(node_ref);
        if record.is_some() {
            self.invoke_before_unlock(txn, node_ref)?;
        }

        let now = self.clock.now();
        let state = match self.resolve(node_ref, record.as_ref(), now) {
            Some(state) => state,
            None => return Ok(()),
        };

        if !allow_checked_out && self.check_out.is_checked_out(txn, node_ref) {
            return Err(LockError::UnableToReleaseLock {
                node: node_ref.clone(),
                cause: ReleaseCause::CheckedOut,
            });
        }
        if state.status_for(txn.user(), now) == LockStatus::Locked && !txn.is_system() {
            return Err(LockError::UnableToReleaseLock {
                node: node_ref.clone(),
                cause: ReleaseCause::NotOwner,
            });
        }

        debug!("{} releases {} on {}", txn.user(), state.lock_type, node_ref);
        match state.lifetime {
            Lifetime::Persistent => {
                if let Some(mut record) = record {
                    LockState::clear_from(&mut record);
                    txn.put_node(record);
                }
                if self.lock_store.get(node_ref).is_some() {
                    self.remove_ephemeral(txn, node_ref, false);
                }
            }
            Lifetime::Ephemeral => self.remove_ephemeral(txn, node_ref, false),
        }
        Ok(())
    }

    pub fn get_lock_status(&self, txn: &Transaction, node_ref: &NodeRef) -> LockStatus {
        self.get_lock_status_for(txn, node_ref, txn.user())
    }

    pub fn get_lock_status_for(&self, txn: &Transaction, node_ref: &NodeRef, user: &str) -> LockStatus {
        let now = self.clock.now();
        match self.resolve(node_ref, txn.get_node(node_ref).as_ref(), now) {
            Some(state) => state.status_for(user, now),
            None => LockStatus::NoLock,
        }
    }

    /// The stored type, expired or not.
    pub fn get_lock_type(&self, txn: &Transaction, node_ref: &NodeRef) -> Option<LockType> {
        self.get_lock_state(txn, node_ref).map(|state| state.lock_type)
    }

    pub fn get_additional_info(&self, txn: &Transaction, node_ref: &NodeRef) -> Option<String> {
        self.get_lock_state(txn, node_ref)
            .filter(|state| state.lifetime == Lifetime::Ephemeral)
            .and_then(|state| state.additional_info)
    }

    pub fn get_lock_state(&self, txn: &Transaction, node_ref: &NodeRef) -> Option<LockState> {
        self.resolve(node_ref, txn.get_node(node_ref).as_ref(), self.clock.now())
    }

    /// Nodes of `store` holding an unexpired persistent lock, of `lock_type` if given.
    pub fn get_locks(&self, txn: &Transaction, store: &StoreRef, lock_type: Option<LockType>) -> Vec<NodeRef> {
        let now = self.clock.now();
        let mut locked: Vec<NodeRef> = txn
            .records_in_store(store)
            .iter()
            .filter_map(LockState::from_record)
            .filter(|state| !state.is_expired(now))
            .filter(|state| lock_type.map_or(true, |t| state.lock_type == t))
            .map(|state| state.node_ref)
            .collect();
        locked.sort();
        locked
    }

    pub fn is_locked(&self, txn: &Transaction, node_ref: &NodeRef) -> bool {
        matches!(
            self.get_lock_status(txn, node_ref),
            LockStatus::Locked | LockStatus::LockOwner
        )
    }

    pub fn is_locked_and_read_only(&self, txn: &Transaction, node_ref: &NodeRef) -> bool {
        match self.get_lock_status(txn, node_ref) {
            LockStatus::NoLock | LockStatus::LockExpired => false,
            LockStatus::LockOwner => self.get_lock_type(txn, node_ref) != Some(LockType::WriteLock),
            LockStatus::Locked => true,
        }
    }

    /// Fail with `NodeLocked` if the current user may not modify `node_ref`.
    pub fn check_for_lock(&self, txn: &Transaction, node_ref: &NodeRef) -> Result<()> {
        if txn.is_system() || txn.locks_suspended() {
            return Ok(());
        }
        let state = match self.get_lock_state(txn, node_ref) {
            Some(state) => state,
            None => return Ok(()),
        };
        let blocked = match state.status_for(txn.user(), self.clock.now()) {
            LockStatus::Locked => true,
            LockStatus::LockOwner => state.lock_type == LockType::ReadOnlyLock,
            LockStatus::NoLock | LockStatus::LockExpired => false,
        };
        if blocked {
            return Err(LockError::NodeLocked(node_ref.clone()));
        }
        Ok(())
    }

    /// An unexpired ephemeral lock wins; then the persistent lock on the
    /// record; an expired ephemeral lock is reported only if nothing else is.
    fn resolve(&self, node_ref: &NodeRef, record: Option<&NodeRecord>, now: DateTime<Utc>) -> Option<LockState> {
        match self.lock_store.get(node_ref) {
            Some(state) if !state.is_expired(now) => Some(state),
            ephemeral => record.and_then(LockState::from_record).or(ephemeral),
        }
    }

    fn put_ephemeral(&self, txn: &mut Transaction, state: LockState) {
        self.remember_ephemeral(txn, &state.node_ref, true);
        self.lock_store.put(state.node_ref.clone(), state);
    }

    /// `by_lock` marks a removal made while placing a lock.
    fn remove_ephemeral(&self, txn: &mut Transaction, node_ref: &NodeRef, by_lock: bool) {
        self.remember_ephemeral(txn, node_ref, by_lock);
        self.lock_store.remove(node_ref);
    }

    /// A lock call records the state it replaces, the latest call winning,
    /// so rollback undoes only the last lock placed on a node. Unlocks and
    /// deletes record a state only if nothing was recorded yet.
    fn remember_ephemeral(&self, txn: &mut Transaction, node_ref: &NodeRef, by_lock: bool) {
        let previous = self.lock_store.get(node_ref);
        let lock_store = self.lock_store.clone();
        let before = &mut txn
            .bind_listener(|| EphemeralLockUndo {
                lock_store,
                before: HashMap::new(),
            })
            .before;
        if by_lock {
            before.insert(node_ref.clone(), previous);
        } else {
            before.entry(node_ref.clone()).or_insert(previous);
        }
    }

    fn invoke_before_lock(&self, txn: &Transaction, node_ref: &NodeRef, lock_type: LockType) -> Result<()> {
        let policies = self.lock_policies.read().unwrap().clone();
        for policy in policies {
            policy.before_lock(txn, node_ref, lock_type)?;
        }
        Ok(())
    }

    fn invoke_before_unlock(&self, txn: &Transaction, node_ref: &NodeRef) -> Result<()> {
        let policies = self.lock_policies.read().unwrap().clone();
        for policy in policies {
            policy.before_unlock(txn, node_ref)?;
        }
        Ok(())
    }
}

impl NodePolicy for LockService {
    fn handle(&self, txn: &mut Transaction, event: &NodeEvent<'_>) -> Result<()> {
        match *event {
            // children of a node lock stay open to everybody
            NodeEvent::CreateChild { parent, .. } => match self.get_lock_type(txn, parent) {
                Some(LockType::WriteLock) | Some(LockType::ReadOnlyLock) => {
                    self.check_for_lock(txn, parent)
                }
                Some(LockType::NodeLock) | None => Ok(()),
            },
            NodeEvent::UpdateNode(node_ref) | NodeEvent::MoveNode { node: node_ref, .. } => {
                self.check_for_lock(txn, node_ref)
            }
            NodeEvent::DeleteNode(node_ref) => {
                if !self.check_out.is_checked_out(txn, node_ref) {
                    self.check_for_lock(txn, node_ref)?;
                }
                if self.lock_store.get(node_ref).is_some() {
                    self.remove_ephemeral(txn, node_ref, false);
                }
                Ok(())
            }
        }
    }
}

fn validate(request: &LockRequest, options: &LockServiceOptions) -> Result<()> {
    match request.lifetime {
        Lifetime::Persistent if request.additional_info.is_some() => Err(LockError::InvalidArgument(
            "additional info is only kept for ephemeral locks".to_string(),
        )),
        Lifetime::Ephemeral if request.time_to_expire > options.max_ephemeral_lock_seconds => {
            Err(LockError::InvalidArgument(format!(
                "ephemeral lock for {} seconds exceeds the maximum of {} seconds",
                request.time_to_expire, options.max_ephemeral_lock_seconds
            )))
        }
        _ => Ok(()),
    }
}

fn effective_lifetime(request: &LockRequest, options: &LockServiceOptions) -> Lifetime {
    match (request.lifetime, options.ephemeral_expiry_threshold) {
        (Lifetime::Ephemeral, Some(threshold)) if request.time_to_expire <= threshold => {
            Lifetime::Ephemeral
        }
        _ => Lifetime::Persistent,
    }
}

fn make_expiry(now: DateTime<Utc>, time_to_expire: u32) -> Option<DateTime<Utc>> {
    match time_to_expire {
        0 => None,
        secs => Some(now + Duration::seconds(secs as i64)),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{LockError, ReleaseCause};
    use crate::lock::clock::ManualClock;
    use crate::lock::lock_service::{LockPolicy, LockRequest, LockService};
    use crate::lock::lock_store::LockStore;
    use crate::lock::{Lifetime, LockStatus, LockType};
    use crate::node::node_service::NodeService;
    use crate::node::node_store::NodeStore;
    use crate::node::{Aspect, NodeRef, StoreRef};
    use crate::transactions::transaction::Transaction;
    use crate::Result;
    use std::sync::Arc;

    struct Fixture {
        store: Arc<NodeStore>,
        node_service: NodeService,
        lock_service: Arc<LockService>,
        clock: Arc<ManualClock>,
        root: NodeRef,
        node: NodeRef,
    }

    fn fixture() -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(NodeStore::in_memory());
        let clock = Arc::new(ManualClock::default());
        let lock_service =
            Arc::new(LockService::new(Arc::new(LockStore::new())).with_clock(clock.clone()));
        let node_service = NodeService::new();
        lock_service.bind_node_policies(&node_service);

        let mut txn = NodeStore::begin(&store, "admin");
        let root = node_service
            .create_root(&mut txn, StoreRef::workspace("test"), "root")
            .unwrap();
        let node = node_service.create_node(&mut txn, &root, "node").unwrap();
        txn.commit().unwrap();
        Fixture {
            store,
            node_service,
            lock_service,
            clock,
            root,
            node,
        }
    }

    impl Fixture {
        fn begin(&self, user: &str) -> Transaction {
            NodeStore::begin(&self.store, user)
        }
    }

    #[test]
    fn test_persistent_lock() {
        let f = fixture();
        let mut txn = f.begin("alice");
        assert_eq!(f.lock_service.get_lock_status(&txn, &f.node), LockStatus::NoLock);
        f.lock_service
            .lock(&mut txn, &f.node, LockType::WriteLock)
            .unwrap();
        assert_eq!(f.lock_service.get_lock_status(&txn, &f.node), LockStatus::LockOwner);
        assert!(f.lock_service.lock_store().get(&f.node).is_none());

        // not visible to others until committed
        let other = f.begin("bob");
        assert_eq!(f.lock_service.get_lock_status(&other, &f.node), LockStatus::NoLock);
        drop(other);
        txn.commit().unwrap();

        let record = f.store.get(&f.node).unwrap();
        assert!(record.has_aspect(Aspect::Lockable));

        let mut txn = f.begin("bob");
        assert_eq!(f.lock_service.get_lock_status(&txn, &f.node), LockStatus::Locked);
        assert!(f.lock_service.is_locked(&txn, &f.node));
        assert_eq!(
            f.lock_service.lock(&mut txn, &f.node, LockType::WriteLock),
            Err(LockError::UnableToAcquireLock {
                node: f.node.clone(),
                owner: "alice".to_string()
            })
        );
        assert_eq!(
            f.lock_service.unlock(&mut txn, &f.node),
            Err(LockError::UnableToReleaseLock {
                node: f.node.clone(),
                cause: ReleaseCause::NotOwner
            })
        );
    }

    #[test]
    fn test_relock_changes_type() {
        let f = fixture();
        let mut txn = f.begin("alice");
        f.lock_service
            .lock(&mut txn, &f.node, LockType::WriteLock)
            .unwrap();
        f.lock_service
            .lock(&mut txn, &f.node, LockType::ReadOnlyLock)
            .unwrap();
        assert_eq!(
            f.lock_service.get_lock_type(&txn, &f.node),
            Some(LockType::ReadOnlyLock)
        );
        assert!(f.lock_service.is_locked_and_read_only(&txn, &f.node));
    }

    #[test]
    fn test_ephemeral_lock() {
        let f = fixture();
        let mut txn = f.begin("alice");
        let request = LockRequest::new(LockType::WriteLock)
            .time_to_expire(60)
            .lifetime(Lifetime::Ephemeral)
            .additional_info("some extra data");
        f.lock_service.lock_with(&mut txn, &f.node, &request).unwrap();

        let state = f.lock_service.get_lock_state(&txn, &f.node).unwrap();
        assert_eq!(state.lifetime, Lifetime::Ephemeral);
        assert_eq!(state.owner, "alice");
        assert!(state.expires.is_some());
        assert_eq!(
            f.lock_service.get_additional_info(&txn, &f.node),
            Some("some extra data".to_string())
        );
        // nothing on the node itself
        assert!(!txn.get_node(&f.node).unwrap().has_aspect(Aspect::Lockable));

        // visible to other transactions at once
        let other = f.begin("bob");
        assert_eq!(f.lock_service.get_lock_status(&other, &f.node), LockStatus::Locked);
        drop(other);

        txn.commit().unwrap();
        assert!(f.lock_service.lock_store().get(&f.node).is_some());
    }

    #[test]
    fn test_expiry_and_steal() {
        let f = fixture();
        let mut txn = f.begin("alice");
        let request = LockRequest::new(LockType::WriteLock)
            .time_to_expire(1)
            .lifetime(Lifetime::Ephemeral);
        f.lock_service.lock_with(&mut txn, &f.node, &request).unwrap();
        txn.commit().unwrap();

        f.clock.advance_secs(2);
        let mut txn = f.begin("bob");
        assert_eq!(
            f.lock_service.get_lock_status(&txn, &f.node),
            LockStatus::LockExpired
        );
        assert_eq!(
            f.lock_service
                .get_lock_status_for(&txn, &f.node, "alice"),
            LockStatus::LockExpired
        );
        assert!(!f.lock_service.is_locked(&txn, &f.node));
        assert_eq!(f.lock_service.get_lock_type(&txn, &f.node), Some(LockType::WriteLock));

        f.lock_service
            .lock(&mut txn, &f.node, LockType::ReadOnlyLock)
            .unwrap();
        let state = f.lock_service.get_lock_state(&txn, &f.node).unwrap();
        assert_eq!(state.owner, "bob");
        assert_eq!(state.lifetime, Lifetime::Persistent);
        // the stale ephemeral entry is gone
        assert!(f.lock_service.lock_store().get(&f.node).is_none());
    }

    #[test]
    fn test_persistent_lock_rejects_additional_info() {
        let f = fixture();
        let mut txn = f.begin("alice");
        let request = LockRequest::new(LockType::NodeLock)
            .lifetime(Lifetime::Persistent)
            .additional_info("x");
        assert!(matches!(
            f.lock_service.lock_with(&mut txn, &f.node, &request),
            Err(LockError::InvalidArgument(_))
        ));
        assert_eq!(f.lock_service.get_lock_status(&txn, &f.node), LockStatus::NoLock);
    }

    #[test]
    fn test_ephemeral_expiry_threshold() {
        let f = fixture();
        let check = |requested: Lifetime, secs: u32, expected: Lifetime| {
            let mut txn = f.begin("alice");
            let request = LockRequest::new(LockType::WriteLock)
                .time_to_expire(secs)
                .lifetime(requested);
            f.lock_service.lock_with(&mut txn, &f.node, &request).unwrap();
            let lifetime = f.lock_service.get_lock_state(&txn, &f.node).unwrap().lifetime;
            f.lock_service.unlock(&mut txn, &f.node).unwrap();
            txn.commit().unwrap();
            assert_eq!(lifetime, expected, "{:?} for {}s", requested, secs);
        };

        f.lock_service.set_ephemeral_expiry_threshold(Some(300));
        check(Lifetime::Ephemeral, 0, Lifetime::Ephemeral);
        check(Lifetime::Ephemeral, 150, Lifetime::Ephemeral);
        check(Lifetime::Ephemeral, 300, Lifetime::Ephemeral);
        check(Lifetime::Ephemeral, 301, Lifetime::Persistent);
        check(Lifetime::Persistent, 150, Lifetime::Persistent);

        f.lock_service.set_ephemeral_expiry_threshold(None);
        assert_eq!(f.lock_service.ephemeral_expiry_threshold(), None);
        check(Lifetime::Ephemeral, 0, Lifetime::Persistent);
        check(Lifetime::Ephemeral, 301, Lifetime::Persistent);

        let mut txn = f.begin("alice");
        let request = LockRequest::new(LockType::WriteLock)
            .time_to_expire(3 * 86400)
            .lifetime(Lifetime::Ephemeral);
        assert!(matches!(
            f.lock_service.lock_with(&mut txn, &f.node, &request),
            Err(LockError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_lock_and_unlock_children() {
        let f = fixture();
        let mut txn = f.begin("alice");
        let child = f.node_service.create_node(&mut txn, &f.node, "child").unwrap();
        let grandchild = f.node_service.create_node(&mut txn, &child, "gc").unwrap();

        let request = LockRequest::new(LockType::NodeLock).lock_children(true);
        f.lock_service.lock_with(&mut txn, &f.root, &request).unwrap();
        for n in [&f.root, &f.node, &child, &grandchild].iter() {
            assert_eq!(f.lock_service.get_lock_status(&txn, n), LockStatus::LockOwner);
        }
        assert_eq!(
            f.lock_service
                .get_locks(&txn, &StoreRef::workspace("test"), Some(LockType::NodeLock))
                .len(),
            4
        );

        f.lock_service
            .unlock_with(&mut txn, &f.node, true, false)
            .unwrap();
        assert_eq!(f.lock_service.get_lock_status(&txn, &f.root), LockStatus::LockOwner);
        for n in [&f.node, &child, &grandchild].iter() {
            assert_eq!(f.lock_service.get_lock_status(&txn, n), LockStatus::NoLock);
        }
    }

    #[test]
    fn test_lock_many() {
        let f = fixture();
        let mut txn = f.begin("alice");
        let nodes = vec![f.root.clone(), f.node.clone()];
        f.lock_service
            .lock_many(&mut txn, &nodes, LockType::WriteLock, 0)
            .unwrap();
        assert!(nodes.iter().all(|n| f.lock_service.is_locked(&txn, n)));
        f.lock_service.unlock_many(&mut txn, &nodes).unwrap();
        assert!(nodes.iter().all(|n| !f.lock_service.is_locked(&txn, n)));
    }

    #[test]
    fn test_get_locks() {
        let f = fixture();
        let store_ref = StoreRef::workspace("test");
        let mut txn = f.begin("alice");
        f.lock_service
            .lock(&mut txn, &f.root, LockType::WriteLock)
            .unwrap();
        f.lock_service
            .lock_with(
                &mut txn,
                &f.node,
                &LockRequest::new(LockType::ReadOnlyLock).time_to_expire(10),
            )
            .unwrap();
        txn.commit().unwrap();

        let txn = f.begin("bob");
        assert_eq!(f.lock_service.get_locks(&txn, &store_ref, None).len(), 2);
        assert_eq!(
            f.lock_service
                .get_locks(&txn, &store_ref, Some(LockType::WriteLock)),
            vec![f.root.clone()]
        );
        assert!(f
            .lock_service
            .get_locks(&txn, &StoreRef::workspace("other"), None)
            .is_empty());

        f.clock.advance_secs(11);
        assert_eq!(
            f.lock_service.get_locks(&txn, &store_ref, None),
            vec![f.root.clone()]
        );
    }

    #[test]
    fn test_unlock_missing_or_unlocked() {
        let f = fixture();
        let mut txn = f.begin("alice");
        f.lock_service.unlock(&mut txn, &f.node).unwrap();
        f.lock_service.unlock(&mut txn, &f.node).unwrap();
        let ghost = NodeRef::generate(StoreRef::workspace("test"));
        f.lock_service.unlock(&mut txn, &ghost).unwrap();
        assert_eq!(
            f.lock_service.lock(&mut txn, &ghost, LockType::WriteLock),
            Err(LockError::InvalidNodeRef(ghost.clone()))
        );
    }

    #[test]
    fn test_system_user_may_unlock() {
        let f = fixture();
        let mut txn = f.begin("alice");
        f.lock_service
            .lock(&mut txn, &f.node, LockType::WriteLock)
            .unwrap();
        txn.commit().unwrap();

        let mut txn = f.begin("admin");
        let lock_service = f.lock_service.clone();
        let node = f.node.clone();
        txn.with_elevated_privileges(|txn| lock_service.unlock(txn, &node))
            .unwrap();
        assert_eq!(f.lock_service.get_lock_status(&txn, &f.node), LockStatus::NoLock);
    }

    struct Veto;

    impl LockPolicy for Veto {
        fn before_lock(&self, _txn: &Transaction, node_ref: &NodeRef, lock_type: LockType) -> Result<()> {
            match lock_type {
                LockType::NodeLock => Err(LockError::Custom(format!("no node locks on {}", node_ref))),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn test_lock_policy() {
        let f = fixture();
        f.lock_service.register_lock_policy(Arc::new(Veto));
        let mut txn = f.begin("alice");
        assert!(matches!(
            f.lock_service.lock(&mut txn, &f.node, LockType::NodeLock),
            Err(LockError::Custom(_))
        ));
        f.lock_service
            .lock(&mut txn, &f.node, LockType::WriteLock)
            .unwrap();
    }

    #[test]
    fn test_suspend_locks() {
        let f = fixture();
        let mut txn = f.begin("alice");
        f.lock_service
            .lock(&mut txn, &f.node, LockType::ReadOnlyLock)
            .unwrap();
        assert_eq!(
            f.node_service
                .set_property(&mut txn, &f.node, "title", "x".into()),
            Err(LockError::NodeLocked(f.node.clone()))
        );
        txn.suspend_locks();
        f.node_service
            .set_property(&mut txn, &f.node, "title", "x".into())
            .unwrap();
        txn.enable_locks();
        assert!(f.lock_service.check_for_lock(&txn, &f.node).is_err());
    }
}
