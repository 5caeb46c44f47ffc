#[macro_use]
extern crate log;

pub use lock::lock_service::{LockPolicy, LockRequest, LockService};
pub use lock::{Lifetime, LockStatus, LockType};
pub use node::node_service::NodeService;
pub use node::node_store::NodeStore;
pub use node::{NodeRef, StoreRef};
pub use transactions::transaction::Transaction;

pub mod coci;
pub mod error;
mod ioutils;
pub mod lock;
pub mod node;
pub mod options;
pub mod permissions;
pub mod transactions;
mod wal;

pub type Result<T> = std::result::Result<T, error::LockError>;
