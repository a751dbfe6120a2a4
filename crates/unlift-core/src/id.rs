//! Stable ID newtypes for IR entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that an `ExpId` cannot be accidentally used where a `StmtId` is
//! expected. `BlockId` maps to a petgraph `NodeIndex<u32>` in the procedure
//! CFG.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Interned expression identifier. Index into an [`crate::exp::ExpArena`].
///
/// Because expressions are interned, `ExpId` equality is structural
/// equality, and the derived ordering is a total order over expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExpId(pub u32);

/// Statement identifier. Index into a procedure's statement arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StmtId(pub u32);

/// Basic block identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Function identity within the program's function registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncId(pub u32);

/// Global-variable identity within the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

// Display implementations -- just print the inner value.

impl fmt::Display for ExpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridge between BlockId and petgraph's NodeIndex<u32>.

impl From<NodeIndex<u32>> for BlockId {
    fn from(idx: NodeIndex<u32>) -> Self {
        BlockId(idx.index() as u32)
    }
}

impl From<BlockId> for NodeIndex<u32> {
    fn from(id: BlockId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(42);
        let block_id = BlockId::from(idx);
        assert_eq!(block_id.0, 42);

        let back: NodeIndex<u32> = block_id.into();
        assert_eq!(back.index(), 42);
    }

    #[test]
    fn id_display() {
        assert_eq!(format!("{}", ExpId(7)), "7");
        assert_eq!(format!("{}", StmtId(99)), "99");
        assert_eq!(format!("{}", BlockId(3)), "3");
        assert_eq!(format!("{}", FuncId(0)), "0");
    }

    #[test]
    fn exp_id_ordering_is_total() {
        let mut ids = vec![ExpId(3), ExpId(1), ExpId(2)];
        ids.sort();
        assert_eq!(ids, vec![ExpId(1), ExpId(2), ExpId(3)]);
    }

    #[test]
    fn serde_roundtrip() {
        let stmt = StmtId(42);
        let json = serde_json::to_string(&stmt).unwrap();
        let back: StmtId = serde_json::from_str(&json).unwrap();
        assert_eq!(stmt, back);
    }
}
