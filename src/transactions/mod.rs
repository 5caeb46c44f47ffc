use std::any::Any;

pub mod transaction;

pub type TransactionID = u64;
pub const TRANSACTION_NULL: TransactionID = 0;

/// Identity that bypasses lock checks.
pub const SYSTEM_USER_NAME: &str = "System";

/// Callbacks run once a transaction completes. At most one listener of each
/// concrete type is bound to a transaction.
pub trait TransactionListener: Any + Send {
    fn after_commit(&mut self) {}
    fn after_rollback(&mut self) {}
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
