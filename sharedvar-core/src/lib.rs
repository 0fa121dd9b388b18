//! sharedvar core - named shared variables stored in a remote key-value store
//!
//! Every process holds its own [`SharedVariable`] handle on a key. Handles
//! reconcile through timestamped records (last writer wins) and announce
//! themselves in a shared comm graph so other nodes can discover them.

pub mod backend;
pub mod comm_graph;
pub mod declaration;
pub mod error;
pub mod lock;
pub mod record;
pub mod store;
pub mod variable;

pub use backend::{Backend, BackendBuilder};
pub use comm_graph::{CommGraph, CommGraphEntry, CommGraphRegistry, EndpointKind, COMM_GRAPH_KEY};
pub use declaration::{SharedVariableModule, VariableDeclaration};
pub use error::{Result, VarError};
pub use lock::etcd::EtcdLockService;
pub use lock::memory::MemoryLockService;
pub use lock::redis::RedisLockService;
pub use lock::{DynLockService, LockGuard, LockLease, LockOptions, LockService};
pub use record::{next_timestamp, Scope, VariableRecord, VariableType};
pub use store::etcd::EtcdStore;
pub use store::memory::MemoryStore;
pub use store::redis::RedisStore;
pub use store::{DynStore, RegisterStore};
pub use variable::{SetOutcome, SharedVariable, SpinOutcome, VariableOptions};
