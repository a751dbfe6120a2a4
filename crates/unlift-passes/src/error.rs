//! Error types for the SSA clean-up passes.

use thiserror::Error;
use unlift_core::{CoreError, StmtId};

#[derive(Debug, Error)]
pub enum PassError {
    /// The statement a call pass was pointed at is not a call.
    #[error("statement StmtId({id}) is not a call", id = id.0)]
    NotACall { id: StmtId },

    /// A call pass needed a signature the call does not carry.
    #[error("call StmtId({id}) has no signature", id = id.0)]
    MissingSignature { id: StmtId },

    #[error(transparent)]
    Core(#[from] CoreError),
}
