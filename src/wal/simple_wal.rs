//! ```text
//! +-------------------+
//! | batch1 length     | u32
//! +-------------------+
//! | batch1            | JSON `CommitBatch`, variant length
//! +-------------------+
//! | batch2 length     |
//! +-------------------+
//! | batch2            |
//! +-------------------+
//! | ...               |
//! +-------------------+
//! ```
//! A torn trailing batch is dropped on load, so a transaction is either
//! fully replayed or not at all.
use crate::ioutils::{read_bytes_exact, read_u32, BufReaderWithPos};
use crate::node::node_store::NodeTable;
use crate::options::WriteOptions;
use crate::transactions::TRANSACTION_NULL;
use crate::wal::{CommitBatch, NodeChange, WALInner, WAL};
use crate::Result;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

pub struct SimpleWriteAheadLog {
    inner: WALInner,
}

impl WAL for SimpleWriteAheadLog {
    fn open_and_load_logs(db_path: &Path, table: &mut NodeTable) -> Result<SimpleWriteAheadLog> {
        let wal = SimpleWriteAheadLog {
            inner: WALInner::open_logs(db_path)?,
        };
        Self::load_log(wal.inner.log0.get_ref(), table)?;
        Self::load_log(wal.inner.log1.get_ref(), table)?;
        info!(
            "loaded {} nodes from {}",
            table.len(),
            wal.inner.log_path.display()
        );
        Ok(wal)
    }

    fn load_log(file: &File, table: &mut NodeTable) -> Result<()> {
        let mut reader = BufReaderWithPos::new(file)?;
        reader.seek(SeekFrom::Start(0))?;
        // end of the last complete batch
        let mut valid_end = 0;
        while let Ok(batch_length) = read_u32(&mut reader) {
            let bytes = match read_bytes_exact(&mut reader, batch_length as u64) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("drop torn batch at end of log: {}", e);
                    break;
                }
            };
            let batch: CommitBatch = serde_json::from_slice(&bytes)?;
            for change in batch.changes {
                change.apply(table);
            }
            valid_end = reader.pos();
        }
        let mut file = reader.into_inner();
        let file_len = file.metadata()?.len();
        if valid_end < file_len {
            warn!("truncate log from {} to {} bytes", file_len, valid_end);
            file.set_len(valid_end)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn append(&mut self, write_options: &WriteOptions, batch: &CommitBatch) -> Result<()> {
        write_batch(&mut self.inner.log1, batch)?;
        self.inner.log1.flush()?;
        if write_options.sync {
            self.inner.log1.get_mut().sync_data()?;
        }
        Ok(())
    }

    fn checkpoint(&mut self, table: &NodeTable) -> Result<()> {
        let batch = CommitBatch {
            txn_id: TRANSACTION_NULL,
            changes: table.values().cloned().map(NodeChange::Put).collect(),
        };
        self.inner.clear_checkpoint_log()?;
        write_batch(&mut self.inner.log0, &batch)?;
        self.inner.log0.flush()?;
        self.inner.log0.get_mut().sync_data()?;
        // the checkpoint already holds every batch of the mutable log
        self.inner.clear_mut_log()
    }
}

fn write_batch(writer: &mut BufWriter<File>, batch: &CommitBatch) -> Result<()> {
    let bytes = serde_json::to_vec(batch)?;
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;
    Ok(())
}
