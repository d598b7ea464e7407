#![warn(missing_docs)]

//! Otaru metadata subsystem: the transactional inode database.
//!
//! File and directory records live in an in-memory node map guarded by a
//! single transaction boundary. Durability is write-ahead: every committed
//! transaction is appended to a tx log, and `sync` persists a full state
//! snapshot; startup restores the latest snapshot and replays the log tail.

pub mod db;
pub mod error;
pub mod fsck;
pub mod node;
pub mod ops;
pub mod snapshot;
pub mod state;
pub mod transaction;
pub mod txlog;
pub mod types;

pub use db::{DbHandler, DbStats, InodeDb};
pub use error::{MetaError, MetaResult};
pub use node::{DirNode, FileNode, Node};
pub use ops::DbOperation;
pub use snapshot::{MemSnapshotIo, SnapshotIo};
pub use state::{DbStateData, LockTable};
pub use transaction::DbTransaction;
pub use txlog::{MemTxLogIo, TxLogIo};
pub use types::{
    NodeId, NodeLock, NodeType, Ticket, Timestamp, TxId, ALLOCATE_NEW_NODE_ID, ANY_VERSION,
    NO_TICKET,
};
