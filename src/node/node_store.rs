use crate::error::LockError;
use crate::node::{NodeRecord, NodeRef};
use crate::options::WriteOptions;
use crate::transactions::transaction::Transaction;
use crate::transactions::TransactionID;
use crate::wal::simple_wal::SimpleWriteAheadLog;
use crate::wal::{CommitBatch, NodeChange, WAL};
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub type NodeTable = BTreeMap<NodeRef, NodeRecord>;

/// Durable home of node records and their properties.
///
/// Committed records live in memory; every commit is appended to the
/// write-ahead log first, and the log is replayed on `open`. A store made by
/// `in_memory` has no log.
pub struct NodeStore {
    wal: Option<Mutex<SimpleWriteAheadLog>>,
    table: RwLock<NodeTable>,
    next_txn_id: AtomicU64,
}

impl NodeStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<NodeStore> {
        let mut table = NodeTable::new();
        let wal = SimpleWriteAheadLog::open_and_load_logs(db_path.as_ref(), &mut table)?;
        Ok(NodeStore {
            wal: Some(Mutex::new(wal)),
            table: RwLock::new(table),
            next_txn_id: AtomicU64::new(1),
        })
    }

    pub fn in_memory() -> NodeStore {
        NodeStore {
            wal: None,
            table: RwLock::new(NodeTable::new()),
            next_txn_id: AtomicU64::new(1),
        }
    }

    pub fn begin(db: &Arc<Self>, user: impl Into<String>) -> Transaction {
        Self::begin_with_options(db, user, WriteOptions::default())
    }

    pub fn begin_with_options(
        db: &Arc<Self>,
        user: impl Into<String>,
        write_options: WriteOptions,
    ) -> Transaction {
        let txn_id = db.next_txn_id.fetch_add(1, Ordering::Relaxed);
        Transaction::new(txn_id, db.clone(), user.into(), write_options)
    }

    pub fn get(&self, node_ref: &NodeRef) -> Option<NodeRecord> {
        let table = self.table.read().unwrap();
        table.get(node_ref).cloned()
    }

    pub fn version(&self, node_ref: &NodeRef) -> Option<u64> {
        let table = self.table.read().unwrap();
        table.get(node_ref).map(|r| r.version)
    }

    pub fn select(&self, predicate: impl Fn(&NodeRecord) -> bool) -> Vec<NodeRecord> {
        let table = self.table.read().unwrap();
        table.values().filter(|r| predicate(*r)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply the staged changes of a transaction atomically.
    ///
    /// Fails with `ConcurrencyFailure` when a node written here was committed
    /// by someone else after this transaction first saw it.
    pub(crate) fn write_batch(
        &self,
        txn_id: TransactionID,
        write_options: &WriteOptions,
        staged: BTreeMap<NodeRef, Option<NodeRecord>>,
        observed: &HashMap<NodeRef, Option<u64>>,
    ) -> Result<()> {
        if staged.is_empty() {
            return Ok(());
        }

        let mut table = self.table.write().unwrap();
        let mut changes = Vec::with_capacity(staged.len());
        for (node_ref, record) in staged {
            let current = table.get(&node_ref).map(|r| r.version);
            let seen = observed.get(&node_ref).copied().flatten();
            if current != seen {
                return Err(LockError::ConcurrencyFailure(node_ref));
            }
            match record {
                Some(mut record) => {
                    record.version = seen.map_or(1, |v| v + 1);
                    changes.push(NodeChange::Put(record));
                }
                None if current.is_some() => changes.push(NodeChange::Remove(node_ref)),
                None => {}
            }
        }

        let batch = CommitBatch { txn_id, changes };
        if let Some(wal) = &self.wal {
            let mut wal_guard = wal.lock().unwrap();
            wal_guard.append(write_options, &batch)?;
        }
        for change in batch.changes {
            change.apply(&mut table);
        }
        Ok(())
    }

    /// Rewrite the log as a single snapshot of the committed records.
    pub fn checkpoint(&self) -> Result<()> {
        let table = self.table.read().unwrap();
        if let Some(wal) = &self.wal {
            let mut wal_guard = wal.lock().unwrap();
            wal_guard.checkpoint(&table)?;
            info!("checkpointed {} nodes", table.len());
        }
        Ok(())
    }
}
