//! Basic blocks and their RTL sequences.

use serde::{Deserialize, Serialize};

use crate::id::StmtId;

/// The kind of a basic block, determined by its terminating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Falls through to the next block.
    Fall,
    /// Ends in an unconditional jump.
    Oneway,
    /// Ends in a conditional branch.
    Twoway,
    /// Ends in an n-way switch.
    Nway,
    /// Ends in a return.
    Ret,
    /// Ends in a direct call.
    Call,
    /// Ends in a computed jump.
    CompJump,
    /// Ends in a computed call.
    CompCall,
}

/// One register-transfer list: the statements lifted from a single
/// machine instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rtl {
    pub addr: u64,
    pub stmts: Vec<StmtId>,
}

/// A basic block: an ordered sequence of RTLs.
///
/// Pass-through blocks may be empty; an empty block must have exactly one
/// successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub kind: BlockKind,
    pub addr: u64,
    pub rtls: Vec<Rtl>,
}

impl BasicBlock {
    pub fn new(kind: BlockKind, addr: u64) -> Self {
        BasicBlock {
            kind,
            addr,
            rtls: Vec::new(),
        }
    }

    /// True when the block contains no statements at all.
    pub fn is_empty(&self) -> bool {
        self.rtls.iter().all(|rtl| rtl.stmts.is_empty())
    }

    pub fn first_stmt(&self) -> Option<StmtId> {
        self.rtls
            .iter()
            .find_map(|rtl| rtl.stmts.first().copied())
    }

    pub fn last_stmt(&self) -> Option<StmtId> {
        self.rtls
            .iter()
            .rev()
            .find_map(|rtl| rtl.stmts.last().copied())
    }

    /// All statement ids in block order.
    pub fn stmt_ids(&self) -> impl Iterator<Item = StmtId> + '_ {
        self.rtls.iter().flat_map(|rtl| rtl.stmts.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_has_no_statements() {
        let mut bb = BasicBlock::new(BlockKind::Fall, 0x1000);
        assert!(bb.is_empty());
        assert_eq!(bb.first_stmt(), None);
        assert_eq!(bb.last_stmt(), None);

        // An empty RTL does not make the block non-empty.
        bb.rtls.push(Rtl {
            addr: 0x1000,
            stmts: vec![],
        });
        assert!(bb.is_empty());
    }

    #[test]
    fn first_and_last_skip_empty_rtls() {
        let mut bb = BasicBlock::new(BlockKind::Twoway, 0x1000);
        bb.rtls.push(Rtl {
            addr: 0x1000,
            stmts: vec![],
        });
        bb.rtls.push(Rtl {
            addr: 0x1004,
            stmts: vec![StmtId(3), StmtId(4)],
        });
        bb.rtls.push(Rtl {
            addr: 0x1008,
            stmts: vec![StmtId(5)],
        });

        assert_eq!(bb.first_stmt(), Some(StmtId(3)));
        assert_eq!(bb.last_stmt(), Some(StmtId(5)));
        let all: Vec<StmtId> = bb.stmt_ids().collect();
        assert_eq!(all, vec![StmtId(3), StmtId(4), StmtId(5)]);
    }
}
