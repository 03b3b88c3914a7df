//! The data service.
//!
//! The capability-scoped handle model and the request dispatcher. A root
//! context owns the connection to the block store and a capability bitset;
//! child contexts are derived handles with monotonically reduced
//! capabilities, addressed on the wire by a small child-index offset.
//! Every request is authorized against the receiving handle's bitset
//! before it touches the store.

pub mod api;
pub mod context;
pub mod engine;
pub mod store;

pub use api::{DataApiError, DataClient};
pub use context::{ChildArena, MAX_CHILD_CONTEXTS, RootContext, derive_child_caps};
pub use engine::Engine;
pub use store::{BlockStore, MemoryStore, StoreError};
