//! Shared CFG-building helpers for the structuring tests.

use unlift_core::{
    Assign, BlockId, BlockKind, Branch, CaseStmt, ExpArena, Oper, Procedure, ReturnStmt, StmtId,
    StmtKind, SwitchInfo, Ty, BELSE, BTHEN,
};
use unlift_structure::{ControlFlowAnalyzer, StmtForest, StmtNodeId};

pub struct Builder {
    pub proc: Procedure,
    pub exps: ExpArena,
    next_addr: u64,
}

#[allow(dead_code)]
impl Builder {
    pub fn new(name: &str) -> Self {
        Builder {
            proc: Procedure::new(name),
            exps: ExpArena::new(),
            next_addr: 0x1000,
        }
    }

    pub fn block(&mut self, kind: BlockKind) -> BlockId {
        let addr = self.next_addr;
        self.next_addr += 0x10;
        self.proc.cfg.add_block(kind, addr)
    }

    pub fn entry(&mut self, bb: BlockId) {
        self.proc.cfg.set_entry(bb).unwrap();
    }

    /// `r<reg> := <val>` appended to `bb`.
    pub fn assign(&mut self, bb: BlockId, reg: i64, val: i64) -> StmtId {
        let lhs = self.exps.reg(reg);
        let rhs = self.exps.int_const(val);
        self.proc
            .append_stmt(
                bb,
                StmtKind::Assign(Assign {
                    ty: Ty::int(32),
                    lhs,
                    rhs,
                }),
            )
            .unwrap()
    }

    /// `BRANCH if r<reg> = 0` appended to `bb`.
    pub fn branch(&mut self, bb: BlockId, reg: i64) -> StmtId {
        let r = self.exps.reg(reg);
        let zero = self.exps.int_const(0);
        let cond = self.exps.binary(Oper::Equals, r, zero);
        self.proc
            .append_stmt(bb, StmtKind::Branch(Branch { cond }))
            .unwrap()
    }

    pub fn ret(&mut self, bb: BlockId) -> StmtId {
        self.proc
            .append_stmt(bb, StmtKind::Return(ReturnStmt::default()))
            .unwrap()
    }

    pub fn case(&mut self, bb: BlockId, info: SwitchInfo) -> StmtId {
        self.proc
            .append_stmt(
                bb,
                StmtKind::Case(CaseStmt {
                    switch_info: Some(info),
                }),
            )
            .unwrap()
    }

    pub fn edge(&mut self, from: BlockId, to: BlockId, slot: u16) {
        self.proc.cfg.add_edge(from, to, slot).unwrap();
    }

    pub fn then_else(&mut self, from: BlockId, then_to: BlockId, else_to: BlockId) {
        self.edge(from, then_to, BTHEN);
        self.edge(from, else_to, BELSE);
    }

    pub fn analyze(&self) -> (StmtForest, ControlFlowAnalyzer) {
        let forest = StmtForest::build(&self.proc);
        let mut analyzer = ControlFlowAnalyzer::new();
        analyzer.structure_cfg(&self.proc, &forest);
        (forest, analyzer)
    }

    pub fn node(&self, forest: &StmtForest, stmt: StmtId) -> StmtNodeId {
        forest.node_of(stmt).unwrap()
    }
}
