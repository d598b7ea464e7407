//! The inode DB state and the node lock table.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};
use crate::node::Node;
use crate::types::{NodeId, NodeLock, Ticket, TxId, NO_TICKET};

/// Serializable DB state: the node map, the high-water node ID, and the
/// version (TxID of the last applied transaction).
///
/// This is what a snapshot persists. The lock table is runtime-only state
/// and lives separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStateData {
    /// All nodes keyed by ID.
    pub nodes: BTreeMap<NodeId, Node>,
    /// Highest node ID handed out so far.
    pub last_id: NodeId,
    /// TxID of the last transaction reflected in `nodes`.
    pub version: TxId,
}

impl Default for DbStateData {
    fn default() -> Self {
        Self::new()
    }
}

impl DbStateData {
    /// Creates an empty, version-zero state.
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            last_id: NodeId::new(0),
            version: TxId(0),
        }
    }

    /// Inserts a freshly created node, bumping the ID high-water mark.
    pub fn add_new_node(&mut self, node: Node) -> MetaResult<()> {
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(MetaError::NodeAlreadyExists { id });
        }
        self.nodes.insert(id, node);
        if id > self.last_id {
            self.last_id = id;
        }
        Ok(())
    }
}

/// Runtime table of exclusive node locks.
///
/// A node has at most one live ticket. Shared access is not tracked;
/// `NO_TICKET` lock tokens simply assert that no writer is in the way.
#[derive(Debug, Default)]
pub struct LockTable {
    held: HashMap<NodeId, Ticket>,
    last_ticket: u64,
}

impl LockTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh exclusive ticket for `id`, or fails if one is live.
    pub fn acquire(&mut self, id: NodeId) -> MetaResult<NodeLock> {
        if self.held.contains_key(&id) {
            return Err(MetaError::LockContended { id });
        }
        self.last_ticket += 1;
        let ticket = Ticket(self.last_ticket);
        self.held.insert(id, ticket);
        Ok(NodeLock { id, ticket })
    }

    /// Releases a held ticket. The presented lock must match exactly.
    pub fn release(&mut self, nlock: NodeLock) -> MetaResult<()> {
        if !nlock.has_ticket() {
            // shared locks are untracked; releasing one is a no-op
            return Ok(());
        }
        match self.held.get(&nlock.id) {
            Some(&held) if held == nlock.ticket => {
                self.held.remove(&nlock.id);
                Ok(())
            }
            Some(_) => Err(MetaError::LockMismatch { id: nlock.id }),
            None => Err(MetaError::LockMismatch { id: nlock.id }),
        }
    }

    /// Validates an op's lock token.
    ///
    /// With `require_ticket`, the op needs the node's live exclusive
    /// ticket. Without it, any token passes as long as no *other* holder
    /// has the node exclusively locked.
    pub fn check(&self, nlock: NodeLock, require_ticket: bool) -> MetaResult<()> {
        if require_ticket {
            if !nlock.has_ticket() {
                return Err(MetaError::LockRequired { id: nlock.id });
            }
            return match self.held.get(&nlock.id) {
                Some(&held) if held == nlock.ticket => Ok(()),
                _ => Err(MetaError::LockMismatch { id: nlock.id }),
            };
        }

        match self.held.get(&nlock.id) {
            None => Ok(()),
            Some(&held) if held == nlock.ticket => Ok(()),
            Some(_) => Err(MetaError::LockContended { id: nlock.id }),
        }
    }

    /// True if `id` has a live exclusive ticket.
    pub fn is_locked(&self, id: NodeId) -> bool {
        self.held.contains_key(&id)
    }

    /// Number of live exclusive locks.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// True if no exclusive locks are live.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// The most recently issued ticket value.
    pub fn last_ticket(&self) -> Ticket {
        Ticket(self.last_ticket)
    }
}

/// Convenience: the shared lock token used by ops that only assert
/// "no writer in the way".
pub fn shared_lock(id: NodeId) -> NodeLock {
    NodeLock {
        id,
        ticket: NO_TICKET,
    }
}
