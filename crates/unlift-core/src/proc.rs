//! Procedures: a CFG plus the statement arena it indexes into.

use serde::{Deserialize, Serialize};

use crate::cfg::ProcCfg;
use crate::error::CoreError;
use crate::exp::ExpArena;
use crate::id::{BlockId, ExpId, FuncId, StmtId};
use crate::oper::Oper;
use crate::stmt::{Statement, StmtKind};

/// A decompiled procedure. Statements are owned by the arena and
/// referenced from basic-block RTLs by [`StmtId`]; sequence numbers are
/// assigned per procedure and stable across passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub cfg: ProcCfg,
    stmts: Vec<Statement>,
    /// Callees discovered so far (updated by call promotion).
    pub callees: Vec<FuncId>,
    next_number: i32,
}

impl Procedure {
    pub fn new(name: &str) -> Self {
        Procedure {
            name: name.to_owned(),
            cfg: ProcCfg::new(),
            stmts: Vec::new(),
            callees: Vec::new(),
            next_number: 1,
        }
    }

    /// Appends a statement to the last RTL of `block` (creating one if
    /// the block has none) and assigns the next sequence number.
    pub fn append_stmt(&mut self, block: BlockId, kind: StmtKind) -> Result<StmtId, CoreError> {
        let number = self.next_number;
        self.next_number += 1;

        let id = StmtId(self.stmts.len() as u32);
        let bb = self.cfg.block_mut(block)?;
        if bb.rtls.is_empty() {
            let addr = bb.addr;
            bb.rtls.push(crate::block::Rtl {
                addr,
                stmts: Vec::new(),
            });
        }
        bb.rtls.last_mut().unwrap().stmts.push(id);

        self.stmts.push(Statement {
            number,
            block,
            kind,
        });
        Ok(id)
    }

    pub fn stmt(&self, id: StmtId) -> Result<&Statement, CoreError> {
        self.stmts
            .get(id.0 as usize)
            .ok_or(CoreError::StmtNotFound { id })
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> Result<&mut Statement, CoreError> {
        self.stmts
            .get_mut(id.0 as usize)
            .ok_or(CoreError::StmtNotFound { id })
    }

    pub fn num_stmts(&self) -> usize {
        self.stmts.len()
    }

    pub fn stmt_ids(&self) -> impl Iterator<Item = StmtId> {
        (0..self.stmts.len() as u32).map(StmtId)
    }

    pub fn statements(&self) -> impl Iterator<Item = (StmtId, &Statement)> {
        self.stmts
            .iter()
            .enumerate()
            .map(|(i, s)| (StmtId(i as u32), s))
    }

    /// Ids of all φ-assignments, in arena order.
    pub fn phi_ids(&self) -> Vec<StmtId> {
        self.statements()
            .filter(|(_, s)| s.is_phi())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn add_callee(&mut self, callee: FuncId) {
        if !self.callees.contains(&callee) {
            self.callees.push(callee);
        }
    }

    /// The parameter predicate: true when `loc` can never be a parameter
    /// (program counter, flag locations, temporaries).
    pub fn filter_params(&self, exps: &ExpArena, loc: ExpId) -> bool {
        let oper = exps.oper(loc);
        oper == Oper::Pc || oper == Oper::Temp || oper.is_main_flag() || exps.is_flags(loc)
    }

    /// True when `loc` participates in SSA renaming. Memory locations do
    /// not; localisation falls back to the unsubscripted location for
    /// them.
    pub fn can_rename(&self, exps: &ExpArena, loc: ExpId) -> bool {
        matches!(
            exps.oper(loc),
            Oper::RegOf | Oper::Local | Oper::Param | Oper::Temp
        ) || exps.oper(loc).is_main_flag()
    }

    /// Replaces the kind of an existing statement, keeping its number and
    /// block.
    pub fn replace_stmt_kind(&mut self, id: StmtId, kind: StmtKind) -> Result<(), CoreError> {
        self.stmt_mut(id)?.kind = kind;
        Ok(())
    }
}
