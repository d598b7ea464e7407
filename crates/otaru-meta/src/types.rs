//! Core identifier types for the inode DB.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of an inode node. The root directory is always 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// The root directory node ID.
    pub const ROOT: NodeId = NodeId(1);

    /// Creates a NodeId from a raw u64 value.
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    /// Returns the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel passed to `lock_node` to reserve a fresh node ID.
pub const ALLOCATE_NEW_NODE_ID: NodeId = NodeId(0);

/// Monotonically increasing transaction identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl TxId {
    /// Returns the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Sentinel TxID meaning "no particular version" — for the tx-log GC it
/// signals that nothing can be safely discarded yet.
pub const ANY_VERSION: TxId = TxId(0);

/// Exclusive-lock ticket. Zero denotes a shared (read) lock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket(pub u64);

/// The shared-lock ticket value.
pub const NO_TICKET: Ticket = Ticket(0);

/// Lock token for one node: the node ID plus a ticket.
///
/// `NO_TICKET` denotes shared access; any non-zero ticket is the node's
/// single live exclusive writer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLock {
    /// The locked node.
    pub id: NodeId,
    /// The held ticket; `NO_TICKET` for shared locks.
    pub ticket: Ticket,
}

impl NodeLock {
    /// Shared lock on `id`.
    pub fn shared(id: NodeId) -> Self {
        Self {
            id,
            ticket: NO_TICKET,
        }
    }

    /// True if this lock carries an exclusive ticket.
    pub fn has_ticket(&self) -> bool {
        self.ticket != NO_TICKET
    }
}

/// Kind of an inode node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Regular file.
    File,
    /// Directory.
    Dir,
}

/// A point in time with second and nanosecond precision.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub secs: u64,
    /// Nanoseconds within the second.
    pub nanos: u32,
}

impl Timestamp {
    /// Returns the current time.
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before epoch");
        Self {
            secs: now.as_secs(),
            nanos: now.subsec_nanos(),
        }
    }

    /// The Unix epoch.
    pub fn zero() -> Self {
        Self { secs: 0, nanos: 0 }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.secs
            .cmp(&other.secs)
            .then(self.nanos.cmp(&other.nanos))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
