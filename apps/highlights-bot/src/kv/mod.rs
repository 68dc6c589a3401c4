//! Key-value store adapter.
//!
//! The store guarantees atomicity for a single key only. Anything that touches
//! more than one key (key rotation, refunds) is an ordered sequence of
//! single-key operations and must be safe under interleaving.

mod key;
mod store;

pub use key::{KeyPart, KvKey};
pub use store::{KvEntry, KvStore, StoreError, get_json, list_json, memory, postgres, set_json};
