use crate::node::node_store::NodeTable;
use crate::node::{NodeRecord, NodeRef};
use crate::options::WriteOptions;
use crate::transactions::TransactionID;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub mod simple_wal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeChange {
    Put(NodeRecord),
    Remove(NodeRef),
}

impl NodeChange {
    pub fn apply(self, table: &mut NodeTable) {
        match self {
            NodeChange::Put(record) => {
                table.insert(record.node_ref.clone(), record);
            }
            NodeChange::Remove(node_ref) => {
                table.remove(&node_ref);
            }
        }
    }
}

/// All changes of one committed transaction. Replayed as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitBatch {
    pub txn_id: TransactionID,
    pub changes: Vec<NodeChange>,
}

pub trait WAL: Sized + Send {
    /// Open the logs at `db_path` and load them into `table`
    fn open_and_load_logs(db_path: &Path, table: &mut NodeTable) -> Result<Self>;
    fn load_log(file: &File, table: &mut NodeTable) -> Result<()>;

    /// Append a committed batch to the mutable log
    fn append(&mut self, write_options: &WriteOptions, batch: &CommitBatch) -> Result<()>;

    /// Replace the checkpoint log with `table` and truncate the mutable log
    fn checkpoint(&mut self, table: &NodeTable) -> Result<()>;
}

struct WALInner {
    log_path: PathBuf,
    log0: BufWriter<File>,
    log1: BufWriter<File>,
}

impl WALInner {
    fn open_logs(db_path: &Path) -> Result<WALInner> {
        let log_path = log_path(db_path);
        fs::create_dir_all(&log_path)?;

        let checkpoint_log = checkpoint_log_file(log_path.as_ref());
        let mut_log = mut_log_file(log_path.as_ref());

        let log0 = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&checkpoint_log)?;

        let log1 = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&mut_log)?;

        Ok(WALInner {
            log_path,
            log0: BufWriter::new(log0),
            log1: BufWriter::new(log1),
        })
    }

    fn clear_checkpoint_log(&mut self) -> Result<()> {
        self.log0.get_mut().set_len(0)?;
        self.log0.get_mut().sync_data()?;
        Ok(())
    }

    fn clear_mut_log(&mut self) -> Result<()> {
        self.log1.get_mut().set_len(0)?;
        self.log1.get_mut().sync_data()?;
        Ok(())
    }
}

fn log_path(db_path: &Path) -> PathBuf {
    db_path.join("log")
}

fn checkpoint_log_file(dir: &Path) -> PathBuf {
    dir.join("0.log")
}

fn mut_log_file(dir: &Path) -> PathBuf {
    dir.join("1.log")
}
