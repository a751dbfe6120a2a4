//! Core error types for unlift-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! the failure modes of the IR data model and its builders.

use crate::id::{BlockId, FuncId, StmtId};
use thiserror::Error;

/// Core errors produced by the unlift-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A block index was not found in the procedure CFG.
    #[error("block not found: BlockId({id})", id = id.0)]
    BlockNotFound { id: BlockId },

    /// A statement index was not found in the statement arena.
    #[error("statement not found: StmtId({id})", id = id.0)]
    StmtNotFound { id: StmtId },

    /// A function ID was not found in the program registry.
    #[error("function not found: FuncId({id})", id = id.0)]
    FunctionNotFound { id: FuncId },

    /// An edge failed validation.
    #[error("invalid edge: {reason}")]
    InvalidEdge { reason: String },
}
