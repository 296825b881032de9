pub mod index;
pub mod memory;

pub use index::{ExecutionStore, RedbExecutionStore};
pub use memory::InMemoryExecutionStore;
