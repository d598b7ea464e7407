//! Inode DB transactions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ops::DbOperation;
use crate::types::TxId;

/// An ordered batch of operations applied atomically.
///
/// The TxID is assigned by the handler at commit time; a transaction
/// submitted by a caller carries `TxId(0)` until then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbTransaction {
    /// Assigned transaction ID.
    pub txid: TxId,
    /// Operations, applied in order.
    pub ops: Vec<DbOperation>,
}

impl DbTransaction {
    /// Creates an unassigned transaction from a list of ops.
    pub fn new(ops: Vec<DbOperation>) -> Self {
        Self { txid: TxId(0), ops }
    }
}

impl fmt::Display for DbTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.ops) {
            Ok(ops_json) => write!(f, "{{TxID: {}, Ops: {}}}", self.txid, ops_json),
            Err(_) => write!(f, "{{TxID: {}, Ops: *ENC_ERR*}}", self.txid),
        }
    }
}
