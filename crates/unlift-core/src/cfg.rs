//! The procedure-level control-flow graph.
//!
//! [`ProcCfg`] wraps a petgraph `StableGraph` of [`BasicBlock`]s. Edges
//! carry a slot index that preserves successor ordering: slot 0 is the
//! THEN branch and slot 1 the ELSE branch of a two-way block, and case
//! arms keep their switch-table order with the default arm last. All
//! mutations go through `ProcCfg` methods so that slot consistency is
//! validated at insertion time.

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::block::{BasicBlock, BlockKind};
use crate::error::CoreError;
use crate::id::BlockId;

/// Successor slot of the THEN branch of a two-way block.
pub const BTHEN: u16 = 0;
/// Successor slot of the ELSE branch of a two-way block.
pub const BELSE: u16 = 1;

/// A control-flow edge, ordered by `slot` among the edges leaving one
/// block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgEdge {
    pub slot: u16,
}

/// The procedure CFG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcCfg {
    graph: StableGraph<BasicBlock, CfgEdge, Directed, u32>,
    entry: Option<BlockId>,
}

impl ProcCfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, kind: BlockKind, addr: u64) -> BlockId {
        self.graph.add_node(BasicBlock::new(kind, addr)).into()
    }

    pub fn block(&self, id: BlockId) -> Result<&BasicBlock, CoreError> {
        self.graph
            .node_weight(id.into())
            .ok_or(CoreError::BlockNotFound { id })
    }

    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut BasicBlock, CoreError> {
        self.graph
            .node_weight_mut(id.into())
            .ok_or(CoreError::BlockNotFound { id })
    }

    /// Adds a successor edge at the given slot. Rejects duplicate slots
    /// on the same source block.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId, slot: u16) -> Result<(), CoreError> {
        self.block(from)?;
        self.block(to)?;
        if self
            .graph
            .edges(from.into())
            .any(|e| e.weight().slot == slot)
        {
            return Err(CoreError::InvalidEdge {
                reason: format!("block {} already has a successor at slot {}", from, slot),
            });
        }
        self.graph.add_edge(from.into(), to.into(), CfgEdge { slot });
        Ok(())
    }

    pub fn set_entry(&mut self, entry: BlockId) -> Result<(), CoreError> {
        self.block(entry)?;
        self.entry = Some(entry);
        Ok(())
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    /// The return block, if any. Deterministic: the lowest-indexed block
    /// of kind `Ret`.
    pub fn find_ret_block(&self) -> Option<BlockId> {
        self.block_ids()
            .find(|&id| self.graph[NodeIndex::from(id)].kind == BlockKind::Ret)
    }

    /// Block ids in index order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.graph.node_indices().map(BlockId::from)
    }

    pub fn num_blocks(&self) -> usize {
        self.graph.node_count()
    }

    /// Successors ordered by slot.
    pub fn successors(&self, id: BlockId) -> SmallVec<[BlockId; 2]> {
        let mut edges: SmallVec<[(u16, BlockId); 2]> = self
            .graph
            .edges(id.into())
            .map(|e| (e.weight().slot, BlockId::from(e.target())))
            .collect();
        edges.sort_by_key(|&(slot, _)| slot);
        edges.into_iter().map(|(_, b)| b).collect()
    }

    /// The successor at a given slot.
    pub fn successor(&self, id: BlockId, slot: u16) -> Option<BlockId> {
        self.graph
            .edges(id.into())
            .find(|e| e.weight().slot == slot)
            .map(|e| BlockId::from(e.target()))
    }

    pub fn num_successors(&self, id: BlockId) -> usize {
        self.graph.edges(id.into()).count()
    }

    /// Predecessors in ascending block order (deterministic).
    pub fn predecessors(&self, id: BlockId) -> SmallVec<[BlockId; 2]> {
        let mut preds: SmallVec<[BlockId; 2]> = self
            .graph
            .neighbors_directed(id.into(), Direction::Incoming)
            .map(BlockId::from)
            .collect();
        preds.sort();
        preds
    }

    pub fn set_block_kind(&mut self, id: BlockId, kind: BlockKind) -> Result<(), CoreError> {
        self.block_mut(id)?.kind = kind;
        Ok(())
    }
}
