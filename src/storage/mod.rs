//! Local Storage Module
//!
//! Node-local key-value persistence used by the persistent consistency path
//! (datums and raft meta) and by the login-attempt tracker.
//!
//! ## Core Concepts
//! - **KvStorage**: byte-oriented key-value trait with prefix listing.
//! - **Snapshots**: the whole store is written as one bincode file and reloaded
//!   at boot; writes in between live in memory.

pub mod memory;


use crate::error::Result;

pub use memory::MemoryKvStorage;

pub trait KvStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;

    fn all_keys(&self) -> Vec<String> {
        self.keys_with_prefix("")
    }

    /// Persist the current contents.
    fn do_snapshot(&self) -> Result<()>;

    /// Replace the current contents with the last snapshot, if one exists.
    /// Returns the number of entries loaded.
    fn snapshot_load(&self) -> Result<usize>;
}
