use crate::lock::lock_state::LockState;
use crate::node::NodeRef;
use dashmap::DashMap;

/// Process-wide table of ephemeral locks.
///
/// Entries are replaced whole, so a reader never sees a partly written
/// `LockState`. Nothing orders operations on different nodes.
pub struct LockStore {
    lock_map: DashMap<NodeRef, LockState>,
}

impl Default for LockStore {
    fn default() -> Self {
        LockStore {
            lock_map: DashMap::with_capacity(16),
        }
    }
}

impl LockStore {
    pub fn new() -> LockStore {
        LockStore::default()
    }

    pub fn get(&self, node_ref: &NodeRef) -> Option<LockState> {
        self.lock_map.get(node_ref).map(|entry| entry.value().clone())
    }

    pub fn put(&self, node_ref: NodeRef, lock_state: LockState) {
        self.lock_map.insert(node_ref, lock_state);
    }

    pub fn remove(&self, node_ref: &NodeRef) {
        self.lock_map.remove(node_ref);
    }

    /// Drop every entry, expired or not.
    pub fn clear(&self) {
        self.lock_map.clear();
    }

    pub fn len(&self) -> usize {
        self.lock_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::lock::lock_state::LockState;
    use crate::lock::lock_store::LockStore;
    use crate::lock::{Lifetime, LockType};
    use crate::node::{NodeRef, StoreRef};
    use std::sync::Arc;

    fn state(node: &NodeRef, owner: &str) -> LockState {
        LockState::new(
            node.clone(),
            LockType::WriteLock,
            owner,
            Lifetime::Ephemeral,
            None,
            Some(format!("{} was here", owner)),
        )
    }

    #[test]
    fn test_put_get_remove() {
        let store = LockStore::new();
        let node = NodeRef::generate(StoreRef::workspace("test"));
        assert!(store.get(&node).is_none());
        store.remove(&node);

        store.put(node.clone(), state(&node, "alice"));
        store.put(node.clone(), state(&node, "bob"));
        assert_eq!(store.get(&node).unwrap().owner, "bob");
        assert_eq!(store.len(), 1);

        store.remove(&node);
        assert!(store.is_empty());

        store.put(node.clone(), state(&node, "alice"));
        store.clear();
        assert!(store.get(&node).is_none());
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let store = Arc::new(LockStore::new());
        let nodes: Arc<Vec<NodeRef>> = Arc::new(
            (0..64)
                .map(|_| NodeRef::generate(StoreRef::workspace("test")))
                .collect(),
        );

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                let nodes = nodes.clone();
                std::thread::spawn(move || {
                    let owner = format!("user{}", t);
                    for _ in 0..100 {
                        for node in nodes.iter() {
                            store.put(node.clone(), state(node, &owner));
                            let read = store.get(node).unwrap();
                            // whole entries only: owner and info always agree
                            assert_eq!(
                                read.additional_info,
                                Some(format!("{} was here", read.owner))
                            );
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 64);
    }
}
