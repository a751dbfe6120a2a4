//! Control-flow structure analysis.
//!
//! Tags every statement node with its structural role: loop headers with
//! their latch, kind and follow; conditional headers with their kind and
//! follow; and the remaining irreducible control as unstructured jumps
//! into or out of loops and switch bodies. The decoration is everything a
//! code emitter needs to print loops and conditionals without `goto`
//! wherever the graph allows it.
//!
//! The graph must be reducible for loop detection to be exact. All
//! traversals are iterative; procedure bodies can reach tens of thousands
//! of statements and must not exhaust the program stack.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use unlift_core::Procedure;

use crate::forest::{StmtForest, StmtNodeId};

/// Structural class of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructType {
    /// Header of a loop only.
    Loop,
    /// Header of a conditional only (if-then-else or switch).
    Cond,
    /// Header of a loop and a conditional.
    LoopCond,
    /// Sequential statement (default).
    Seq,
}

/// Classification of conditional headers that turned out to be
/// unstructured jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnstructType {
    Structured,
    JumpInOutLoop,
    JumpIntoCase,
}

/// The kind of a loop header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopType {
    /// Header of a while loop.
    PreTested,
    /// Header of a do..while loop.
    PostTested,
    /// Header of an endless loop.
    Endless,
}

/// The kind of a conditional header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CondType {
    /// Conditional with only a then clause.
    IfThen,
    /// Conditional with a then and an else clause.
    IfThenElse,
    /// Conditional with only an else clause.
    IfElse,
    /// N-way conditional header (case statement).
    Case,
}

/// Depth-first traversal flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TravType {
    /// Initial value.
    Untraversed,
    /// DFS loop stamping pass.
    DfsLoopNum,
    /// DFS reverse loop stamping pass.
    DfsRevLoopNum,
    /// DFS case head tagging traversal.
    DfsCase,
    /// DFS post dominator ordering.
    DfsPostDom,
}

/// Everything the analyzer knows about one statement node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Position within the forward post-order list (-1 = unreachable).
    pub post_order_index: i32,
    /// Position within the post-dominator ordering (-1 = does not reach
    /// the return).
    pub rev_post_order_index: i32,

    /// Forward DFS interval stamps.
    pub pre_order_id: i32,
    pub post_order_id: i32,
    /// Reverse-successor DFS interval stamps.
    pub rev_pre_order_id: i32,
    pub rev_post_order_id: i32,

    pub trav: TravType,

    pub struct_type: StructType,
    pub unstruct_type: UnstructType,
    pub cond_type: Option<CondType>,
    pub loop_type: Option<LoopType>,

    pub imm_pdom: Option<StmtNodeId>,
    /// Head of the most nested enclosing loop.
    pub loop_head: Option<StmtNodeId>,
    /// Head of the most nested enclosing case.
    pub case_head: Option<StmtNodeId>,
    pub cond_follow: Option<StmtNodeId>,
    pub loop_follow: Option<StmtNodeId>,
    /// Latching node, on loop headers.
    pub latch: Option<StmtNodeId>,
}

impl Default for NodeInfo {
    fn default() -> Self {
        NodeInfo {
            post_order_index: -1,
            rev_post_order_index: -1,
            pre_order_id: 0,
            post_order_id: 0,
            rev_pre_order_id: 0,
            rev_post_order_id: 0,
            trav: TravType::Untraversed,
            struct_type: StructType::Seq,
            unstruct_type: UnstructType::Structured,
            cond_type: None,
            loop_type: None,
            imm_pdom: None,
            loop_head: None,
            case_head: None,
            cond_follow: None,
            loop_follow: None,
            latch: None,
        }
    }
}

/// Iteration cap for the immediate-post-dominator meet.
const MEET_GIVEUP: u32 = 10_000;
/// Iteration cap for the ipdom refinement fixpoint.
const REFINE_GIVEUP: u32 = 100;

/// The control-flow structure analyzer.
///
/// Owns the decoration for one structuring run; everything is cleared and
/// recomputed by [`ControlFlowAnalyzer::structure_cfg`], so running it
/// twice over the same forest yields identical decorations.
#[derive(Debug, Default)]
pub struct ControlFlowAnalyzer {
    info: Vec<NodeInfo>,
    /// Post-order of a DFS from the entry node.
    post_ordering: Vec<StmtNodeId>,
    /// Post-order of a predecessor DFS from the exit node. Not simply the
    /// reverse of `post_ordering`: nodes that never reach the return
    /// (infinite loops, no-return calls) are absent.
    rev_post_ordering: Vec<StmtNodeId>,
}

impl ControlFlowAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Structures the control flow of `proc`'s statement forest.
    ///
    /// A procedure without a reachable return is left undecorated; the
    /// caller degrades to `goto`-style output.
    pub fn structure_cfg(&mut self, proc: &Procedure, forest: &StmtForest) {
        self.info = vec![NodeInfo::default(); forest.num_nodes()];
        self.post_ordering.clear();
        self.rev_post_ordering.clear();

        if proc.cfg.find_ret_block().is_none() {
            debug!(proc = %proc.name, "no return block; leaving CFG unstructured");
            return;
        }

        let Some(entry) = forest.entry_node(proc) else {
            debug!(proc = %proc.name, "no entry statement; leaving CFG unstructured");
            return;
        };
        let Some(exit) = forest.exit_node(proc) else {
            debug!(proc = %proc.name, "no exit statement; leaving CFG unstructured");
            return;
        };

        self.set_time_stamps(forest, entry, exit);
        self.update_immed_pdom(forest);

        self.struct_conds(proc, forest);
        self.struct_loops(proc, forest);
        self.check_conds(proc, forest);

        self.untraverse();
    }

    // -- Decoration accessors ----------------------------------------------

    pub fn decorations(&self) -> &[NodeInfo] {
        &self.info
    }

    pub fn node_info(&self, node: StmtNodeId) -> &NodeInfo {
        &self.info[node.0 as usize]
    }

    pub fn struct_type(&self, node: StmtNodeId) -> StructType {
        self.node_info(node).struct_type
    }

    pub fn unstruct_type(&self, node: StmtNodeId) -> UnstructType {
        self.node_info(node).unstruct_type
    }

    pub fn cond_type(&self, node: StmtNodeId) -> Option<CondType> {
        self.node_info(node).cond_type
    }

    pub fn loop_type(&self, node: StmtNodeId) -> Option<LoopType> {
        self.node_info(node).loop_type
    }

    pub fn trav_type(&self, node: StmtNodeId) -> TravType {
        self.node_info(node).trav
    }

    pub fn imm_pdom(&self, node: StmtNodeId) -> Option<StmtNodeId> {
        self.node_info(node).imm_pdom
    }

    pub fn loop_head(&self, node: StmtNodeId) -> Option<StmtNodeId> {
        self.node_info(node).loop_head
    }

    pub fn case_head(&self, node: StmtNodeId) -> Option<StmtNodeId> {
        self.node_info(node).case_head
    }

    pub fn latch_node(&self, node: StmtNodeId) -> Option<StmtNodeId> {
        self.node_info(node).latch
    }

    pub fn loop_follow(&self, node: StmtNodeId) -> Option<StmtNodeId> {
        self.node_info(node).loop_follow
    }

    pub fn cond_follow(&self, node: StmtNodeId) -> Option<StmtNodeId> {
        self.node_info(node).cond_follow
    }

    /// True when `node` is the latch of its enclosing loop.
    pub fn is_latch_node(&self, node: StmtNodeId) -> bool {
        match self.loop_head(node) {
            Some(head) => self.latch_node(head) == Some(node),
            None => false,
        }
    }

    /// True when `node` is one of the case arms (not the default) of its
    /// enclosing switch.
    pub fn is_case_option(&self, forest: &StmtForest, node: StmtNodeId) -> bool {
        let Some(head) = self.case_head(node) else {
            return false;
        };
        let arms = forest.num_succs(head).saturating_sub(1);
        (0..arms).any(|i| forest.succ(head, i) == node)
    }

    /// Establishes whether `source` has a back edge to `dest`.
    pub fn is_back_edge(&self, source: StmtNodeId, dest: StmtNodeId) -> bool {
        dest == source || self.is_ancestor_of(dest, source)
    }

    /// True when `node` is an ancestor of `other` in either the forward
    /// or the reverse DFS tree.
    pub fn is_ancestor_of(&self, node: StmtNodeId, other: StmtNodeId) -> bool {
        let a = self.node_info(node);
        let b = self.node_info(other);
        (a.pre_order_id < b.pre_order_id && a.post_order_id > b.post_order_id)
            || (a.rev_pre_order_id < b.rev_pre_order_id
                && a.rev_post_order_id > b.rev_post_order_id)
    }

    /// True when any successor edge of `node` is a back edge.
    pub fn has_back_edge(&self, forest: &StmtForest, node: StmtNodeId) -> bool {
        forest
            .succs(node)
            .iter()
            .any(|&succ| self.is_back_edge(node, succ))
    }

    pub fn post_ordering(&self) -> &[StmtNodeId] {
        &self.post_ordering
    }

    pub fn rev_post_ordering(&self) -> &[StmtNodeId] {
        &self.rev_post_ordering
    }

    // -- Internal helpers --------------------------------------------------

    fn info_mut(&mut self, node: StmtNodeId) -> &mut NodeInfo {
        &mut self.info[node.0 as usize]
    }

    fn post_ord(&self, node: StmtNodeId) -> i32 {
        self.node_info(node).post_order_index
    }

    fn rev_ord(&self, node: StmtNodeId) -> i32 {
        self.node_info(node).rev_post_order_index
    }

    fn is_branch(&self, proc: &Procedure, forest: &StmtForest, node: StmtNodeId) -> bool {
        proc.stmt(forest.stmt_of(node))
            .map(|s| s.is_branch())
            .unwrap_or(false)
    }

    fn is_case_stmt(&self, proc: &Procedure, forest: &StmtForest, node: StmtNodeId) -> bool {
        proc.stmt(forest.stmt_of(node))
            .map(|s| s.is_case())
            .unwrap_or(false)
    }

    /// Indexes the loop membership map; nodes without a forward ordering
    /// position are never members.
    fn in_loop(&self, loop_nodes: &[bool], node: StmtNodeId) -> bool {
        let idx = self.post_ord(node);
        idx >= 0 && loop_nodes.get(idx as usize).copied().unwrap_or(false)
    }

    // -- DFS stamping ------------------------------------------------------

    fn set_time_stamps(&mut self, forest: &StmtForest, entry: StmtNodeId, exit: StmtNodeId) {
        // Forward interval stamps and the forward post-ordering.
        let mut time = 1;
        self.update_loop_stamps(forest, entry, &mut time);

        // Reverse-successor interval stamps.
        time = 1;
        self.update_rev_loop_stamps(forest, entry, &mut time);

        // The post-dominator ordering, bottom-up from the exit.
        self.update_rev_order(forest, exit);
    }

    /// Forward DFS: pre/post interval stamps plus the post-order list.
    /// Iterative; each frame remembers how many successors it has handed
    /// out so far.
    fn update_loop_stamps(&mut self, forest: &StmtForest, entry: StmtNodeId, time: &mut i32) {
        let mut stack: Vec<(StmtNodeId, usize)> = Vec::new();

        self.info_mut(entry).trav = TravType::DfsLoopNum;
        self.info_mut(entry).pre_order_id = *time;
        stack.push((entry, 0));

        while let Some(&(node, next)) = stack.last() {
            let succs = forest.succs(node);
            if next < succs.len() {
                stack.last_mut().unwrap().1 += 1;
                let succ = succs[next];
                if self.node_info(succ).trav != TravType::DfsLoopNum {
                    *time += 1;
                    self.info_mut(succ).trav = TravType::DfsLoopNum;
                    self.info_mut(succ).pre_order_id = *time;
                    stack.push((succ, 0));
                }
            } else {
                stack.pop();
                *time += 1;
                self.info_mut(node).post_order_id = *time;
                self.info_mut(node).post_order_index = self.post_ordering.len() as i32;
                self.post_ordering.push(node);
            }
        }
    }

    /// Same walk with successors visited in reverse order, producing the
    /// second interval pair.
    fn update_rev_loop_stamps(&mut self, forest: &StmtForest, entry: StmtNodeId, time: &mut i32) {
        let mut stack: Vec<(StmtNodeId, usize)> = Vec::new();

        self.info_mut(entry).trav = TravType::DfsRevLoopNum;
        self.info_mut(entry).rev_pre_order_id = *time;
        stack.push((entry, 0));

        while let Some(&(node, taken)) = stack.last() {
            let succs = forest.succs(node);
            if taken < succs.len() {
                stack.last_mut().unwrap().1 += 1;
                let succ = succs[succs.len() - 1 - taken];
                if self.node_info(succ).trav != TravType::DfsRevLoopNum {
                    *time += 1;
                    self.info_mut(succ).trav = TravType::DfsRevLoopNum;
                    self.info_mut(succ).rev_pre_order_id = *time;
                    stack.push((succ, 0));
                }
            } else {
                stack.pop();
                *time += 1;
                self.info_mut(node).rev_post_order_id = *time;
            }
        }
    }

    /// Predecessor DFS from the exit node, producing the bottom-up
    /// iteration order for the post-dominator computation.
    fn update_rev_order(&mut self, forest: &StmtForest, exit: StmtNodeId) {
        let mut stack: Vec<(StmtNodeId, usize)> = Vec::new();

        self.info_mut(exit).trav = TravType::DfsPostDom;
        stack.push((exit, 0));

        while let Some(&(node, next)) = stack.last() {
            let preds = forest.preds(node);
            if next < preds.len() {
                stack.last_mut().unwrap().1 += 1;
                let pred = preds[next];
                if self.node_info(pred).trav != TravType::DfsPostDom {
                    self.info_mut(pred).trav = TravType::DfsPostDom;
                    stack.push((pred, 0));
                }
            } else {
                stack.pop();
                self.info_mut(node).rev_post_order_index = self.rev_post_ordering.len() as i32;
                self.rev_post_ordering.push(node);
            }
        }
    }

    // -- Immediate post-dominators -----------------------------------------

    /// Finds the immediate post dominator of each node.
    ///
    /// Hecht-Ullman style iterative scheme specialized for reducible
    /// graphs: one bottom-up pass over the post-dominator ordering, then
    /// the forward refinement iterated to a fixpoint, then the same
    /// refinement again with back edges meeting against the successor's
    /// post dominator.
    fn update_immed_pdom(&mut self, forest: &StmtForest) {
        // Bottom-up over the post-dominator ordering.
        for i in (0..self.rev_post_ordering.len()).rev() {
            let node = self.rev_post_ordering[i];
            for &succ in forest.succs(node) {
                if self.rev_ord(succ) > self.rev_ord(node) {
                    let met = self.find_common_pdom(self.imm_pdom(node), Some(succ));
                    self.info_mut(node).imm_pdom = met;
                }
            }
        }

        // Forward refinement over nodes with fan-out, to fixpoint.
        let ordering = self.post_ordering.clone();
        let mut round = 0;
        loop {
            let mut changed = false;
            for &node in &ordering {
                if forest.num_succs(node) <= 1 {
                    continue;
                }
                for &succ in forest.succs(node) {
                    let met = self.find_common_pdom(self.imm_pdom(node), Some(succ));
                    if met != self.imm_pdom(node) {
                        self.info_mut(node).imm_pdom = met;
                        changed = true;
                    }
                }
            }
            round += 1;
            if !changed || round >= REFINE_GIVEUP {
                if round >= REFINE_GIVEUP {
                    warn!("post-dominator refinement did not converge");
                }
                break;
            }
        }

        // Loop-aware refinement: a back edge meets against the successor's
        // post dominator when that lies earlier in the ordering.
        round = 0;
        loop {
            let mut changed = false;
            for &node in &ordering {
                if forest.num_succs(node) <= 1 {
                    continue;
                }
                for &succ in forest.succs(node) {
                    let loop_aware = self.is_back_edge(node, succ)
                        && match (self.imm_pdom(succ), self.imm_pdom(node)) {
                            (Some(sp), Some(np)) => self.post_ord(sp) < self.post_ord(np),
                            _ => false,
                        };
                    let met = if loop_aware {
                        self.find_common_pdom(self.imm_pdom(succ), self.imm_pdom(node))
                    } else {
                        self.find_common_pdom(self.imm_pdom(node), Some(succ))
                    };
                    if met != self.imm_pdom(node) {
                        self.info_mut(node).imm_pdom = met;
                        changed = true;
                    }
                }
            }
            round += 1;
            if !changed || round >= REFINE_GIVEUP {
                if round >= REFINE_GIVEUP {
                    warn!("loop-aware post-dominator refinement did not converge");
                }
                break;
            }
        }
    }

    /// The common post dominator of two candidates: walk both up the
    /// currently-known `imm_pdom` chain until they coincide.
    fn find_common_pdom(
        &self,
        curr: Option<StmtNodeId>,
        succ: Option<StmtNodeId>,
    ) -> Option<StmtNodeId> {
        let Some(first) = curr else {
            return succ;
        };
        let Some(second) = succ else {
            return Some(first);
        };
        if self.rev_ord(first) == self.rev_ord(second) {
            return Some(first); // ordering hasn't been done
        }

        let old_curr = first;
        let mut curr = Some(first);
        let mut succ = Some(second);
        let mut giveup = 0;

        while giveup < MEET_GIVEUP {
            let (Some(c), Some(s)) = (curr, succ) else {
                break;
            };
            if c == s {
                break;
            }
            if self.rev_ord(c) > self.rev_ord(s) {
                succ = self.imm_pdom(s);
            } else {
                curr = self.imm_pdom(c);
            }
            giveup += 1;
        }

        if giveup >= MEET_GIVEUP {
            debug!("post-dominator meet hit iteration cap; keeping previous");
            return Some(old_curr); // no change
        }

        curr
    }

    // -- Conditional structuring -------------------------------------------

    /// Structures all conditional headers (nodes with more than one
    /// out-edge).
    fn struct_conds(&mut self, proc: &Procedure, forest: &StmtForest) {
        for node in self.post_ordering.clone() {
            if forest.num_succs(node) <= 1 {
                // not an if/case condition
                continue;
            }

            // A two-way header with a back edge leading from it has no
            // follow.
            if self.has_back_edge(forest, node) && self.is_branch(proc, forest, node) {
                self.set_struct_type(proc, forest, node, StructType::Cond);
                continue;
            }

            // The follow of a conditional is its immediate post dominator.
            self.info_mut(node).cond_follow = self.imm_pdom(node);
            self.set_struct_type(proc, forest, node, StructType::Cond);

            // An n-way header tags the nodes within the body of the
            // switch subgraph.
            if self.cond_type(node) == Some(CondType::Case) {
                let follow = self.cond_follow(node);
                self.set_case_head(proc, forest, node, node, follow);
            }
        }
    }

    /// Sets the structural class; for conditional headers this also
    /// derives which kind of conditional it is from which successor the
    /// follow landed on.
    fn set_struct_type(
        &mut self,
        proc: &Procedure,
        forest: &StmtForest,
        node: StmtNodeId,
        struct_type: StructType,
    ) {
        if struct_type == StructType::Cond {
            let cond_type = if self.is_case_stmt(proc, forest, node) {
                CondType::Case
            } else {
                let follow = self.cond_follow(node);
                let then_succ = forest.succs(node).first().copied();
                let else_succ = forest.succs(node).get(1).copied();
                if follow.is_some() && follow == else_succ {
                    CondType::IfThen
                } else if follow.is_some() && follow == then_succ {
                    CondType::IfElse
                } else {
                    CondType::IfThenElse
                }
            };
            self.info_mut(node).cond_type = Some(cond_type);
        }

        self.info_mut(node).struct_type = struct_type;
    }

    /// Tags the body of a switch with its case header: a DFS that skips
    /// back edges, already-tagged regions and the follow. A nested case
    /// header's body is already tagged, so the walk continues at its
    /// follow instead.
    fn set_case_head(
        &mut self,
        proc: &Procedure,
        forest: &StmtForest,
        start: StmtNodeId,
        head: StmtNodeId,
        follow: Option<StmtNodeId>,
    ) {
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if node != start && self.trav_type(node) == TravType::DfsCase {
                continue;
            }
            debug_assert!(node == head || self.case_head(node).is_none());

            self.info_mut(node).trav = TravType::DfsCase;

            // The case header under investigation is not its own member.
            if node != head {
                self.info_mut(node).case_head = Some(head);
            }

            if self.is_case_stmt(proc, forest, node) && node != head {
                // Nested case header: its members are already tagged, so
                // skip straight to its follow.
                if let Some(nested_follow) = self.cond_follow(node) {
                    if self.trav_type(nested_follow) != TravType::DfsCase
                        && Some(nested_follow) != follow
                    {
                        stack.push(nested_follow);
                    }
                }
            } else {
                for &succ in forest.succs(node).iter().rev() {
                    if !self.is_back_edge(node, succ)
                        && self.trav_type(succ) != TravType::DfsCase
                        && Some(succ) != follow
                    {
                        stack.push(succ);
                    }
                }
            }
        }
    }

    // -- Loop structuring --------------------------------------------------

    /// Tags each node with the header of its most nested enclosing loop,
    /// and each loop header with its latch, kind and follow.
    fn struct_loops(&mut self, proc: &Procedure, forest: &StmtForest) {
        for i in (0..self.post_ordering.len()).rev() {
            let node = self.post_ordering[i];

            // The latch of this header, if it is one: a predecessor with
            // a back edge to it, the same case and loop head, not itself
            // the latch of an enclosing loop, and the lowest ordering of
            // all candidates.
            let mut latch: Option<StmtNodeId> = None;
            for &pred in forest.preds(node) {
                if self.case_head(pred) == self.case_head(node)
                    && self.loop_head(pred) == self.loop_head(node)
                    && latch.map_or(true, |l| self.post_ord(l) > self.post_ord(pred))
                    && !self
                        .loop_head(pred)
                        .is_some_and(|h| self.latch_node(h) == Some(pred))
                    && self.is_back_edge(pred, node)
                {
                    latch = Some(pred);
                }
            }

            let Some(latch) = latch else {
                continue;
            };

            let mut loop_nodes = vec![false; self.post_ordering.len()];

            self.info_mut(node).latch = Some(latch);

            // The latch may already have been structured as a conditional
            // header; unless the loop is a single block it reverts to a
            // sequential node.
            if latch != node && self.struct_type(latch) == StructType::Cond {
                self.set_struct_type(proc, forest, latch, StructType::Seq);
            }

            self.set_struct_type(proc, forest, node, StructType::Loop);

            self.tag_nodes_in_loop(node, latch, &mut loop_nodes);
            self.determine_loop_type(proc, forest, node, &loop_nodes);
            self.find_loop_follow(proc, forest, node, &loop_nodes);
        }
    }

    /// Membership of `node` in the loop induced by (header, latch): the
    /// latch itself, or a node whose interval lies between the header's
    /// and the latch's in either DFS.
    fn is_node_in_loop(
        &self,
        node: StmtNodeId,
        header: StmtNodeId,
        latch: StmtNodeId,
    ) -> bool {
        let h = self.node_info(header);
        let n = self.node_info(node);
        let l = self.node_info(latch);

        node == latch
            || (h.pre_order_id < n.pre_order_id
                && n.post_order_id < h.post_order_id
                && n.pre_order_id < l.pre_order_id
                && l.post_order_id < n.post_order_id)
            || (h.rev_pre_order_id < n.rev_pre_order_id
                && n.rev_post_order_id < h.rev_post_order_id
                && n.rev_pre_order_id < l.rev_pre_order_id
                && l.rev_post_order_id < n.rev_post_order_id)
    }

    /// Walks the ordering between header and latch and tags the members.
    fn tag_nodes_in_loop(&mut self, header: StmtNodeId, latch: StmtNodeId, loop_nodes: &mut [bool]) {
        let start = self.post_ord(header) - 1;
        let end = self.post_ord(latch);
        let mut i = start;
        while i >= end && i >= 0 {
            let node = self.post_ordering[i as usize];
            if self.is_node_in_loop(node, header, latch) {
                loop_nodes[i as usize] = true;
                self.info_mut(node).loop_head = Some(header);
            }
            i -= 1;
        }
    }

    /// Deduces the loop kind from the shapes of the header and latch.
    fn determine_loop_type(
        &mut self,
        proc: &Procedure,
        forest: &StmtForest,
        header: StmtNodeId,
        loop_nodes: &[bool],
    ) {
        let Some(latch) = self.latch_node(header) else {
            debug!(header = %header, "loop header without latch; skipping");
            return;
        };

        if self.is_branch(proc, forest, latch) {
            // A two-way latch means a post-tested loop.
            self.set_loop_type(proc, forest, header, LoopType::PostTested);

            // A two-way header spanning more than one block is also a
            // conditional header.
            if self.is_branch(proc, forest, header) && header != latch {
                self.set_struct_type(proc, forest, header, StructType::LoopCond);
            }
        } else if self.is_branch(proc, forest, header) {
            // The header can have no back edges leading from it, so it
            // has a conditional follow; if that lies inside the loop the
            // loop has no natural exit.
            let follow_inside = self
                .cond_follow(header)
                .is_some_and(|f| self.in_loop(loop_nodes, f));
            if follow_inside {
                self.set_loop_type(proc, forest, header, LoopType::Endless);
                self.set_struct_type(proc, forest, header, StructType::LoopCond);
            } else {
                self.set_loop_type(proc, forest, header, LoopType::PreTested);
            }
        } else {
            // One-way header and latch.
            self.set_loop_type(proc, forest, header, LoopType::Endless);
        }
    }

    /// Sets the loop kind; pre-tested loops and single-block post-tested
    /// loops revert the header's class to a plain loop.
    fn set_loop_type(
        &mut self,
        proc: &Procedure,
        forest: &StmtForest,
        header: StmtNodeId,
        loop_type: LoopType,
    ) {
        self.info_mut(header).loop_type = Some(loop_type);

        if loop_type == LoopType::PreTested
            || (loop_type == LoopType::PostTested && Some(header) == self.latch_node(header))
        {
            self.set_struct_type(proc, forest, header, StructType::Loop);
        }
    }

    /// Determines the node control flows to when the loop exits.
    fn find_loop_follow(
        &mut self,
        proc: &Procedure,
        forest: &StmtForest,
        header: StmtNodeId,
        loop_nodes: &[bool],
    ) {
        debug_assert!(matches!(
            self.struct_type(header),
            StructType::Loop | StructType::LoopCond
        ));
        let Some(loop_type) = self.loop_type(header) else {
            debug!(header = %header, "loop header without kind; skipping");
            return;
        };
        let Some(latch) = self.latch_node(header) else {
            return;
        };

        match loop_type {
            LoopType::PreTested => {
                if forest.num_succs(header) < 2 {
                    debug!(header = %header, "pre-tested header lost a branch edge");
                    return;
                }
                // Whichever branch of the header leaves the loop is the
                // follow.
                let then_succ = forest.succ(header, 0);
                let follow = if self.in_loop(loop_nodes, then_succ) {
                    forest.succ(header, 1)
                } else {
                    then_succ
                };
                self.info_mut(header).loop_follow = Some(follow);
            }
            LoopType::PostTested => {
                if forest.num_succs(latch) < 2 {
                    debug!(header = %header, "post-tested latch lost a branch edge");
                    return;
                }
                // The end of the latch's non-back edge.
                let follow = if forest.succ(latch, 1) == header {
                    forest.succ(latch, 0)
                } else {
                    forest.succ(latch, 1)
                };
                self.info_mut(header).loop_follow = Some(follow);
            }
            LoopType::Endless => {
                // The follow of an endless loop is the target of the
                // highest-ordered conditional inside the loop whose own
                // follow escapes it.
                let mut follow: Option<StmtNodeId> = None;
                let mut i = self.post_ord(header) - 1;
                while i > self.post_ord(latch) {
                    let desc = self.post_ordering[i as usize];

                    if self.struct_type(desc) == StructType::Cond
                        && self.cond_follow(desc).is_some()
                        && self.loop_head(desc) == Some(header)
                    {
                        let desc_follow = self.cond_follow(desc).unwrap();
                        if self.in_loop(loop_nodes, desc_follow) {
                            if self.post_ord(desc) > self.post_ord(desc_follow) {
                                // The conditional converges lower in the
                                // same loop; jump the scan there.
                                i = self.post_ord(desc_follow);
                            } else {
                                // A backward jump to somewhere earlier in
                                // this loop; everything below is nested
                                // deeper.
                                break;
                            }
                        } else {
                            // The child (if any) of this conditional that
                            // is outside the loop is a candidate follow.
                            let mut cand = Some(forest.succ(desc, 0));
                            if self.in_loop(loop_nodes, forest.succ(desc, 0)) {
                                if !self.in_loop(loop_nodes, forest.succ(desc, 1)) {
                                    cand = Some(forest.succ(desc, 1));
                                } else {
                                    cand = None;
                                }
                            }
                            if let Some(c) = cand {
                                if follow.map_or(true, |f| self.post_ord(c) > self.post_ord(f)) {
                                    follow = Some(c);
                                }
                            }
                        }
                    }
                    i -= 1;
                }

                if let Some(f) = follow {
                    self.info_mut(header).loop_follow = Some(f);
                }
            }
        }
    }

    // -- Unstructured-jump classification ----------------------------------

    /// Detects conditionals that are really the head of a jump into or
    /// out of a loop, or into a case body. Only forward jumps matter;
    /// backward jumps always emit nicely.
    fn check_conds(&mut self, proc: &Procedure, forest: &StmtForest) {
        for node in self.post_ordering.clone() {
            let st = self.struct_type(node);
            let is_cond_header = matches!(st, StructType::Cond | StructType::LoopCond);

            if is_cond_header
                && self.cond_follow(node).is_some()
                && self.cond_type(node) != Some(CondType::Case)
            {
                let my_loop_head = if st == StructType::LoopCond {
                    Some(node)
                } else {
                    self.loop_head(node)
                };
                let follow = self.cond_follow(node).unwrap();
                let foll_loop_head = self.loop_head(follow);
                let then_node = forest.succ(node, 0);
                let else_node = forest.succ(node, 1);

                if my_loop_head != foll_loop_head {
                    if my_loop_head.is_some() {
                        // A jump out of the loop (break or return); the
                        // jumping edge is the branch without a loop head.
                        if self.loop_head(then_node).is_some() {
                            self.info_mut(node).unstruct_type = UnstructType::JumpInOutLoop;
                            self.info_mut(node).cond_type = Some(CondType::IfElse);
                        } else if self.loop_head(else_node).is_some() {
                            self.info_mut(node).unstruct_type = UnstructType::JumpInOutLoop;
                            self.info_mut(node).cond_type = Some(CondType::IfThen);
                        } else {
                            // Reachable when the membership scan skipped a
                            // node; leave the header structured.
                            debug!(
                                node = %node,
                                "conditional leaves a loop but neither branch is tagged"
                            );
                        }
                    }

                    if self.unstruct_type(node) == UnstructType::Structured {
                        if let Some(flh) = foll_loop_head {
                            // A jump into a loop body.
                            if self.is_back_edge(then_node, flh) {
                                self.info_mut(node).unstruct_type = UnstructType::JumpInOutLoop;
                                self.info_mut(node).cond_type = Some(CondType::IfElse);
                            } else if self.is_back_edge(else_node, flh) {
                                self.info_mut(node).unstruct_type = UnstructType::JumpInOutLoop;
                                self.info_mut(node).cond_type = Some(CondType::IfThen);
                            }
                        }
                    }
                }

                // A jump into a case body: one of the children lies in a
                // different switch than the header.
                if self.unstruct_type(node) == UnstructType::Structured
                    && (self.case_head(node) != self.case_head(then_node)
                        || self.case_head(node) != self.case_head(else_node))
                {
                    let my_case_head = self.case_head(node);
                    let then_case_head = self.case_head(then_node);
                    let else_case_head = self.case_head(else_node);

                    let my_follow = my_case_head.and_then(|h| self.cond_follow(h));
                    if then_case_head == my_case_head
                        && (my_case_head.is_none() || else_case_head != my_follow)
                    {
                        self.info_mut(node).unstruct_type = UnstructType::JumpIntoCase;
                        self.info_mut(node).cond_type = Some(CondType::IfElse);
                    } else if else_case_head == my_case_head
                        && (my_case_head.is_none() || then_case_head != my_follow)
                    {
                        self.info_mut(node).unstruct_type = UnstructType::JumpIntoCase;
                        self.info_mut(node).cond_type = Some(CondType::IfThen);
                    }
                }
            }

            // Two-way headers without a follow (sources of a back edge)
            // that were not structured as latches take the non-back-edge
            // child as their follow.
            if self.struct_type(node) == StructType::Cond
                && self.cond_follow(node).is_none()
                && self.cond_type(node) != Some(CondType::Case)
                && self.unstruct_type(node) == UnstructType::Structured
                && self.has_back_edge(forest, node)
            {
                if self.is_back_edge(node, forest.succ(node, 0)) {
                    self.info_mut(node).cond_type = Some(CondType::IfThen);
                    self.info_mut(node).cond_follow = Some(forest.succ(node, 1));
                } else {
                    self.info_mut(node).cond_type = Some(CondType::IfElse);
                    self.info_mut(node).cond_follow = Some(forest.succ(node, 0));
                }
            }
        }
    }

    fn untraverse(&mut self) {
        for info in &mut self.info {
            info.trav = TravType::Untraversed;
        }
    }
}
