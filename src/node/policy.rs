use crate::node::NodeRef;
use crate::transactions::transaction::Transaction;
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CreateChild,
    UpdateNode,
    DeleteNode,
    MoveNode,
}

/// A structural or property mutation about to be applied by the node service.
#[derive(Debug, Clone, Copy)]
pub enum NodeEvent<'a> {
    CreateChild {
        parent: &'a NodeRef,
        child: &'a NodeRef,
    },
    UpdateNode(&'a NodeRef),
    DeleteNode(&'a NodeRef),
    MoveNode {
        node: &'a NodeRef,
        new_parent: &'a NodeRef,
    },
}

impl NodeEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            NodeEvent::CreateChild { .. } => EventKind::CreateChild,
            NodeEvent::UpdateNode(_) => EventKind::UpdateNode,
            NodeEvent::DeleteNode(_) => EventKind::DeleteNode,
            NodeEvent::MoveNode { .. } => EventKind::MoveNode,
        }
    }
}

/// Behaviour run before a node mutation; an error vetoes the mutation.
pub trait NodePolicy: Send + Sync {
    fn handle(&self, txn: &mut Transaction, event: &NodeEvent<'_>) -> Result<()>;
}

#[derive(Default)]
pub struct PolicyRegistry {
    policies: RwLock<HashMap<EventKind, Vec<Arc<dyn NodePolicy>>>>,
}

impl PolicyRegistry {
    pub fn bind(&self, kind: EventKind, policy: Arc<dyn NodePolicy>) {
        let mut policies = self.policies.write().unwrap();
        policies.entry(kind).or_insert_with(Vec::new).push(policy);
    }

    pub fn bind_all(&self, policy: Arc<dyn NodePolicy>) {
        for kind in [
            EventKind::CreateChild,
            EventKind::UpdateNode,
            EventKind::DeleteNode,
            EventKind::MoveNode,
        ]
        .iter()
        {
            self.bind(*kind, policy.clone());
        }
    }

    pub fn invoke(&self, txn: &mut Transaction, event: &NodeEvent<'_>) -> Result<()> {
        // clone out so a policy may bind further policies
        let bound: Vec<Arc<dyn NodePolicy>> = {
            let policies = self.policies.read().unwrap();
            policies.get(&event.kind()).cloned().unwrap_or_default()
        };
        for policy in bound {
            policy.handle(txn, event)?;
        }
        Ok(())
    }
}
