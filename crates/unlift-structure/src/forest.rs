//! The statement-AST forest: the per-statement projection of the block
//! CFG that structuring decisions are made on.
//!
//! Nodes live in a dense arena addressed by [`StmtNodeId`]; successor and
//! predecessor lists are index vectors. The forest is rebuilt once per
//! structuring run and carries no decoration itself -- see
//! [`crate::analyzer::ControlFlowAnalyzer`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use unlift_core::{BlockId, Procedure, StmtId};

/// Dense index of a node in the statement forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StmtNodeId(pub u32);

impl fmt::Display for StmtNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One statement node. Successors are ordered: slot 0 is THEN and slot 1
/// ELSE for branches; case arms keep their switch-table order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StmtNode {
    pub stmt: StmtId,
    pub block: BlockId,
    succs: SmallVec<[StmtNodeId; 2]>,
    preds: SmallVec<[StmtNodeId; 2]>,
}

/// The statement forest for one procedure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StmtForest {
    nodes: Vec<StmtNode>,
    by_stmt: HashMap<StmtId, StmtNodeId>,
}

impl StmtForest {
    /// Builds the forest: one node per statement, sequential edges within
    /// each block, and inter-block edges from each block's last statement
    /// to the first statement of every successor (resolved through empty
    /// pass-through blocks).
    pub fn build(proc: &Procedure) -> StmtForest {
        let mut forest = StmtForest::default();

        // Wire up successors within a block.
        for block in proc.cfg.block_ids() {
            let Ok(bb) = proc.cfg.block(block) else {
                continue;
            };
            let mut prev: Option<StmtNodeId> = None;
            for stmt in bb.stmt_ids() {
                let node = forest.add_node(stmt, block);
                if let Some(p) = prev {
                    forest.link(p, node);
                }
                prev = Some(node);
            }
        }

        // Wire up successors between blocks. Successor order must be
        // preserved so THEN stays at slot 0.
        for block in proc.cfg.block_ids() {
            let Ok(bb) = proc.cfg.block(block) else {
                continue;
            };
            let Some(last) = bb.last_stmt() else {
                continue;
            };
            for succ_block in proc.cfg.successors(block) {
                let Some(first) = resolve_first_stmt(proc, succ_block) else {
                    continue;
                };
                let from = forest.by_stmt[&last];
                let to = forest.by_stmt[&first];
                forest.link(from, to);
            }
        }

        forest
    }

    fn add_node(&mut self, stmt: StmtId, block: BlockId) -> StmtNodeId {
        let id = StmtNodeId(self.nodes.len() as u32);
        self.nodes.push(StmtNode {
            stmt,
            block,
            succs: SmallVec::new(),
            preds: SmallVec::new(),
        });
        self.by_stmt.insert(stmt, id);
        id
    }

    fn link(&mut self, from: StmtNodeId, to: StmtNodeId) {
        self.nodes[from.0 as usize].succs.push(to);
        self.nodes[to.0 as usize].preds.push(from);
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = StmtNodeId> {
        (0..self.nodes.len() as u32).map(StmtNodeId)
    }

    pub fn node_of(&self, stmt: StmtId) -> Option<StmtNodeId> {
        self.by_stmt.get(&stmt).copied()
    }

    pub fn stmt_of(&self, node: StmtNodeId) -> StmtId {
        self.nodes[node.0 as usize].stmt
    }

    pub fn block_of(&self, node: StmtNodeId) -> BlockId {
        self.nodes[node.0 as usize].block
    }

    pub fn succs(&self, node: StmtNodeId) -> &[StmtNodeId] {
        &self.nodes[node.0 as usize].succs
    }

    pub fn preds(&self, node: StmtNodeId) -> &[StmtNodeId] {
        &self.nodes[node.0 as usize].preds
    }

    pub fn num_succs(&self, node: StmtNodeId) -> usize {
        self.nodes[node.0 as usize].succs.len()
    }

    pub fn succ(&self, node: StmtNodeId, i: usize) -> StmtNodeId {
        self.nodes[node.0 as usize].succs[i]
    }

    /// The forest node of the first statement reachable from the CFG
    /// entry, walking through empty blocks.
    pub fn entry_node(&self, proc: &Procedure) -> Option<StmtNodeId> {
        let mut block = proc.cfg.entry()?;
        let mut visited = HashSet::new();
        loop {
            let bb = proc.cfg.block(block).ok()?;
            if let Some(first) = bb.first_stmt() {
                return self.node_of(first);
            }
            if !visited.insert(block) {
                return None;
            }
            block = proc.cfg.successor(block, 0)?;
        }
    }

    /// The forest node of the return block's last statement.
    pub fn exit_node(&self, proc: &Procedure) -> Option<StmtNodeId> {
        let ret = proc.cfg.find_ret_block()?;
        let last = proc.cfg.block(ret).ok()?.last_stmt()?;
        self.node_of(last)
    }
}

/// First statement of `block`, walking empty pass-through blocks. A cycle
/// of empty blocks (or an empty block with fan-out) drops the edge.
fn resolve_first_stmt(proc: &Procedure, start: BlockId) -> Option<StmtId> {
    let mut visited = HashSet::new();
    let mut block = start;
    loop {
        let bb = proc.cfg.block(block).ok()?;
        if !bb.is_empty() {
            return bb.first_stmt();
        }
        if !visited.insert(block) {
            debug!(block = %block, "cycle of empty blocks; dropping edge");
            return None;
        }
        if proc.cfg.num_successors(block) != 1 {
            debug!(
                block = %block,
                "empty block without unique successor; dropping edge"
            );
            return None;
        }
        block = proc.cfg.successor(block, 0)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unlift_core::{
        Assign, BlockKind, Branch, ExpArena, ReturnStmt, StmtKind, Ty, BELSE, BTHEN,
    };

    fn assign(exps: &mut ExpArena, reg: i64, val: i64) -> StmtKind {
        let lhs = exps.reg(reg);
        let rhs = exps.int_const(val);
        StmtKind::Assign(Assign {
            ty: Ty::int(32),
            lhs,
            rhs,
        })
    }

    #[test]
    fn sequential_edges_within_block() {
        let mut exps = ExpArena::new();
        let mut proc = Procedure::new("seq");
        let bb = proc.cfg.add_block(BlockKind::Ret, 0x1000);
        proc.cfg.set_entry(bb).unwrap();

        let s1 = proc.append_stmt(bb, assign(&mut exps, 24, 1)).unwrap();
        let s2 = proc.append_stmt(bb, assign(&mut exps, 25, 2)).unwrap();
        let s3 = proc
            .append_stmt(bb, StmtKind::Return(ReturnStmt::default()))
            .unwrap();

        let forest = StmtForest::build(&proc);
        assert_eq!(forest.num_nodes(), 3);

        let n1 = forest.node_of(s1).unwrap();
        let n2 = forest.node_of(s2).unwrap();
        let n3 = forest.node_of(s3).unwrap();
        assert_eq!(forest.succs(n1), &[n2]);
        assert_eq!(forest.succs(n2), &[n3]);
        assert_eq!(forest.preds(n3), &[n2]);
        assert_eq!(forest.entry_node(&proc), Some(n1));
        assert_eq!(forest.exit_node(&proc), Some(n3));
    }

    #[test]
    fn branch_edges_keep_then_else_order() {
        let mut exps = ExpArena::new();
        let mut proc = Procedure::new("branch");
        let a = proc.cfg.add_block(BlockKind::Twoway, 0x1000);
        let t = proc.cfg.add_block(BlockKind::Fall, 0x1010);
        let e = proc.cfg.add_block(BlockKind::Ret, 0x1020);
        proc.cfg.set_entry(a).unwrap();
        proc.cfg.add_edge(a, t, BTHEN).unwrap();
        proc.cfg.add_edge(a, e, BELSE).unwrap();
        proc.cfg.add_edge(t, e, 0).unwrap();

        let r24 = exps.reg(24);
        let zero = exps.int_const(0);
        let cond = exps.binary(unlift_core::Oper::Equals, r24, zero);
        let br = proc
            .append_stmt(a, StmtKind::Branch(Branch { cond }))
            .unwrap();
        let st = proc.append_stmt(t, assign(&mut exps, 24, 1)).unwrap();
        let se = proc
            .append_stmt(e, StmtKind::Return(ReturnStmt::default()))
            .unwrap();

        let forest = StmtForest::build(&proc);
        let nb = forest.node_of(br).unwrap();
        let nt = forest.node_of(st).unwrap();
        let ne = forest.node_of(se).unwrap();
        assert_eq!(forest.succs(nb), &[nt, ne]);
    }

    #[test]
    fn empty_blocks_are_walked_through() {
        let mut exps = ExpArena::new();
        let mut proc = Procedure::new("passthrough");
        let a = proc.cfg.add_block(BlockKind::Fall, 0x1000);
        let empty = proc.cfg.add_block(BlockKind::Fall, 0x1010);
        let b = proc.cfg.add_block(BlockKind::Ret, 0x1020);
        proc.cfg.set_entry(a).unwrap();
        proc.cfg.add_edge(a, empty, 0).unwrap();
        proc.cfg.add_edge(empty, b, 0).unwrap();

        let s1 = proc.append_stmt(a, assign(&mut exps, 24, 1)).unwrap();
        let s2 = proc
            .append_stmt(b, StmtKind::Return(ReturnStmt::default()))
            .unwrap();

        let forest = StmtForest::build(&proc);
        let n1 = forest.node_of(s1).unwrap();
        let n2 = forest.node_of(s2).unwrap();
        assert_eq!(forest.succs(n1), &[n2]);
    }

    #[test]
    fn empty_block_cycle_drops_edge() {
        let mut exps = ExpArena::new();
        let mut proc = Procedure::new("cycle");
        let a = proc.cfg.add_block(BlockKind::Fall, 0x1000);
        let e1 = proc.cfg.add_block(BlockKind::Fall, 0x1010);
        let e2 = proc.cfg.add_block(BlockKind::Fall, 0x1020);
        proc.cfg.set_entry(a).unwrap();
        proc.cfg.add_edge(a, e1, 0).unwrap();
        proc.cfg.add_edge(e1, e2, 0).unwrap();
        proc.cfg.add_edge(e2, e1, 0).unwrap();

        let s1 = proc.append_stmt(a, assign(&mut exps, 24, 1)).unwrap();

        let forest = StmtForest::build(&proc);
        let n1 = forest.node_of(s1).unwrap();
        assert!(forest.succs(n1).is_empty());
    }

    #[test]
    fn entry_walks_empty_entry_block() {
        let mut proc = Procedure::new("empty_entry");
        let a = proc.cfg.add_block(BlockKind::Fall, 0x1000);
        let b = proc.cfg.add_block(BlockKind::Ret, 0x1010);
        proc.cfg.set_entry(a).unwrap();
        proc.cfg.add_edge(a, b, 0).unwrap();

        let s = proc
            .append_stmt(b, StmtKind::Return(ReturnStmt::default()))
            .unwrap();

        let forest = StmtForest::build(&proc);
        assert_eq!(forest.entry_node(&proc), forest.node_of(s));
    }
}
