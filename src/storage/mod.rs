//! Storage backends for fragments
//!
//! All fragment state goes through the `FragmentStore` trait. `SqliteStore`
//! is the persistent backend; `MemoryStore` backs tests and single-process
//! embedding.

pub mod keys;
mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{Batch, Command, FragmentStore, OpenStore, StoreError, StoreResult};
