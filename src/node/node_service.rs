use crate::error::LockError;
use crate::node::policy::{EventKind, NodeEvent, NodePolicy, PolicyRegistry};
use crate::node::{
    Aspect, NodeRecord, NodeRef, PropertyValue, StoreRef, PROP_CREATOR, PROP_OWNER,
};
use crate::transactions::transaction::Transaction;
use crate::Result;
use std::sync::Arc;

/// Node operations that run the bound policies before mutating.
#[derive(Default)]
pub struct NodeService {
    policies: PolicyRegistry,
}

impl NodeService {
    pub fn new() -> NodeService {
        NodeService::default()
    }

    pub fn bind_policy(&self, kind: EventKind, policy: Arc<dyn NodePolicy>) {
        self.policies.bind(kind, policy);
    }

    pub fn bind_all_policies(&self, policy: Arc<dyn NodePolicy>) {
        self.policies.bind_all(policy);
    }

    pub fn get_node(&self, txn: &Transaction, node: &NodeRef) -> Result<NodeRecord> {
        txn.get_node(node)
            .ok_or_else(|| LockError::InvalidNodeRef(node.clone()))
    }

    #[inline]
    pub fn exists(&self, txn: &Transaction, node: &NodeRef) -> bool {
        txn.exists(node)
    }

    pub fn create_root(&self, txn: &mut Transaction, store: StoreRef, name: &str) -> Result<NodeRef> {
        let node = NodeRef::generate(store);
        let record = self.new_record(txn, node.clone(), None, name);
        txn.put_node(record);
        Ok(node)
    }

    pub fn create_node(&self, txn: &mut Transaction, parent: &NodeRef, name: &str) -> Result<NodeRef> {
        self.get_node(txn, parent)?;
        let node = NodeRef::generate(parent.store.clone());
        self.policies.invoke(
            txn,
            &NodeEvent::CreateChild {
                parent,
                child: &node,
            },
        )?;
        let record = self.new_record(txn, node.clone(), Some(parent.clone()), name);
        txn.put_node(record);
        Ok(node)
    }

    fn new_record(
        &self,
        txn: &Transaction,
        node: NodeRef,
        parent: Option<NodeRef>,
        name: &str,
    ) -> NodeRecord {
        let mut record = NodeRecord::new(node, parent, name);
        record
            .properties
            .insert(PROP_CREATOR.to_string(), txn.user().into());
        record
    }

    pub fn move_node(&self, txn: &mut Transaction, node: &NodeRef, new_parent: &NodeRef) -> Result<()> {
        let mut record = self.get_node(txn, node)?;
        self.get_node(txn, new_parent)?;
        if new_parent == node || self.is_ancestor(txn, node, new_parent) {
            return Err(LockError::InvalidArgument(format!(
                "cannot move {} beneath itself",
                node
            )));
        }
        self.policies
            .invoke(txn, &NodeEvent::MoveNode { node, new_parent })?;
        record.parent = Some(new_parent.clone());
        txn.put_node(record);
        Ok(())
    }

    fn is_ancestor(&self, txn: &Transaction, ancestor: &NodeRef, node: &NodeRef) -> bool {
        let mut current = txn.get_node(node).and_then(|r| r.parent);
        while let Some(parent) = current {
            if &parent == ancestor {
                return true;
            }
            current = txn.get_node(&parent).and_then(|r| r.parent);
        }
        false
    }

    /// Delete `node` and everything beneath it.
    pub fn delete_node(&self, txn: &mut Transaction, node: &NodeRef) -> Result<()> {
        self.get_node(txn, node)?;
        self.policies.invoke(txn, &NodeEvent::DeleteNode(node))?;
        for child in txn.children(node) {
            self.delete_node(txn, &child)?;
        }
        txn.remove_node(node);
        Ok(())
    }

    pub fn get_property(
        &self,
        txn: &Transaction,
        node: &NodeRef,
        name: &str,
    ) -> Result<Option<PropertyValue>> {
        Ok(self.get_node(txn, node)?.properties.get(name).cloned())
    }

    pub fn set_property(
        &self,
        txn: &mut Transaction,
        node: &NodeRef,
        name: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.update(txn, node, |record| {
            record.properties.insert(name.to_string(), value);
        })
    }

    pub fn remove_property(&self, txn: &mut Transaction, node: &NodeRef, name: &str) -> Result<()> {
        self.update(txn, node, |record| {
            record.properties.remove(name);
        })
    }

    pub fn has_aspect(&self, txn: &Transaction, node: &NodeRef, aspect: Aspect) -> Result<bool> {
        Ok(self.get_node(txn, node)?.has_aspect(aspect))
    }

    pub fn add_aspect(&self, txn: &mut Transaction, node: &NodeRef, aspect: Aspect) -> Result<()> {
        self.update(txn, node, |record| {
            record.aspects.insert(aspect);
        })
    }

    pub fn remove_aspect(&self, txn: &mut Transaction, node: &NodeRef, aspect: Aspect) -> Result<()> {
        self.update(txn, node, |record| {
            record.aspects.remove(&aspect);
        })
    }

    pub fn children(&self, txn: &Transaction, node: &NodeRef) -> Vec<NodeRef> {
        txn.children(node)
    }

    /// The content owner: the owner property, else the creator.
    pub fn owner(&self, txn: &Transaction, node: &NodeRef) -> Result<Option<String>> {
        let record = self.get_node(txn, node)?;
        Ok(record
            .text(PROP_OWNER)
            .or_else(|| record.text(PROP_CREATOR))
            .map(str::to_string))
    }

    fn update(
        &self,
        txn: &mut Transaction,
        node: &NodeRef,
        f: impl FnOnce(&mut NodeRecord),
    ) -> Result<()> {
        self.get_node(txn, node)?;
        self.policies.invoke(txn, &NodeEvent::UpdateNode(node))?;
        // a policy may have touched the record
        let mut record = self.get_node(txn, node)?;
        f(&mut record);
        txn.put_node(record);
        Ok(())
    }
}
