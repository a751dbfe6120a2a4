//! Statement variants and their collectors.
//!
//! Statements are a tagged variant (`StmtKind`) rather than a class
//! hierarchy; the few sites that need type discrimination pattern-match or
//! use the `is_*` predicates. Every statement carries its per-procedure
//! sequence number and a back-pointer to its enclosing basic block.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::exp::ExpArena;
use crate::id::{BlockId, ExpId, FuncId, StmtId};
use crate::program::{Program, Signature};
use crate::ty::Ty;

/// An ordinary assignment (also the element type of call argument lists).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assign {
    pub ty: Ty,
    pub lhs: ExpId,
    pub rhs: ExpId,
}

/// An assignment with no right-hand side; defines the location implicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplicitDef {
    pub ty: Ty,
    pub lhs: ExpId,
}

/// One φ operand: the referenced expression and its defining statement
/// (`None` = implicit initial definition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiOperand {
    pub exp: ExpId,
    pub def: Option<StmtId>,
}

/// A φ-assignment. The operand map has one entry per predecessor block;
/// every operand expression equals the LHS up to the subscript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiAssign {
    pub ty: Ty,
    pub lhs: ExpId,
    pub operands: IndexMap<BlockId, PhiOperand>,
}

impl PhiAssign {
    /// Inserts or updates the operand for a predecessor block.
    pub fn put_at(&mut self, block: BlockId, exp: ExpId, def: Option<StmtId>) {
        self.operands.insert(block, PhiOperand { exp, def });
    }

    pub fn def_at(&self, block: BlockId) -> Option<&PhiOperand> {
        self.operands.get(&block)
    }
}

/// A two-way conditional branch. Successor 0 is THEN, successor 1 is ELSE
/// (slots live on the CFG edges).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub cond: ExpId,
}

/// How a switch finds its target: table of absolute addresses (`A`),
/// offsets (`O`), relative entries (`R`), hashed (`H`), or Fortran-style
/// (`F`) where the arm key itself is read from the table slot rather than
/// computed as `lower_bound + arm_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchStyle {
    A,
    O,
    R,
    H,
    F,
}

/// Decoded switch descriptor for an n-way branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchInfo {
    pub switch_exp: ExpId,
    pub style: SwitchStyle,
    pub table_addr: u64,
    pub lower_bound: i64,
    pub upper_bound: i64,
    pub num_cases: usize,
}

/// An n-way branch (switch). Case arms keep their switch-table order on
/// the CFG edges, default last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseStmt {
    pub switch_info: Option<SwitchInfo>,
}

/// Ordered reaching-definition collector for a call: left-hand location to
/// the subscripted reference that reaches the call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefCollector {
    defs: IndexMap<ExpId, ExpId>,
    initialised: bool,
}

impl DefCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn insert(&mut self, loc: ExpId, reaching: ExpId) {
        self.defs.insert(loc, reaching);
        self.initialised = true;
    }

    pub fn find_def_for(&self, loc: ExpId) -> Option<ExpId> {
        self.defs.get(&loc).copied()
    }

    pub fn exists_on_left(&self, loc: ExpId) -> bool {
        self.defs.contains_key(&loc)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ExpId, ExpId)> + '_ {
        self.defs.iter().map(|(&l, &r)| (l, r))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Ordered set of locations live at a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseCollector {
    uses: IndexSet<ExpId>,
}

impl UseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, loc: ExpId) {
        self.uses.insert(loc);
    }

    pub fn exists(&self, loc: ExpId) -> bool {
        self.uses.contains(&loc)
    }

    pub fn iter(&self) -> impl Iterator<Item = ExpId> + '_ {
        self.uses.iter().copied()
    }
}

/// A call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStmt {
    /// Destination expression; may remain symbolic for computed calls.
    pub dest: Option<ExpId>,
    /// Resolved callee, if known.
    pub callee: Option<FuncId>,
    /// True for computed (indirect) calls.
    pub computed: bool,
    /// Actual arguments; each element is an assignment `param := actual`.
    pub args: Vec<Assign>,
    /// Locations the callee defines (implicit assignments).
    pub defines: Vec<ImplicitDef>,
    /// Definitions reaching this call.
    pub def_col: DefCollector,
    /// Locations live at this call.
    pub use_col: UseCollector,
    /// Pinned signature (cloned from the callee; modified by ellipsis
    /// expansion).
    pub signature: Option<Signature>,
    /// The callee's return statement once decompiled.
    pub callee_return: Option<StmtId>,
}

impl CallStmt {
    pub fn computed(dest: ExpId) -> Self {
        CallStmt {
            dest: Some(dest),
            callee: None,
            computed: true,
            args: Vec::new(),
            defines: Vec::new(),
            def_col: DefCollector::new(),
            use_col: UseCollector::new(),
            signature: None,
            callee_return: None,
        }
    }

    pub fn direct(dest: ExpId, callee: FuncId) -> Self {
        CallStmt {
            dest: Some(dest),
            callee: Some(callee),
            computed: false,
            args: Vec::new(),
            defines: Vec::new(),
            def_col: DefCollector::new(),
            use_col: UseCollector::new(),
            signature: None,
            callee_return: None,
        }
    }

    /// A childless call has an unknown callee or one that is still
    /// early-recursive; it is defined to potentially define everything.
    pub fn is_childless(&self, prog: &Program) -> bool {
        let Some(callee) = self.callee.and_then(|id| prog.function(id)) else {
            return true;
        };
        if callee.is_library() {
            return false;
        }
        if callee.early_recursive {
            return true;
        }
        self.callee_return.is_none()
    }

    /// Locations defined by this call; a childless call additionally
    /// defines the catch-all terminal.
    pub fn defined_locations(&self, prog: &Program, exps: &mut ExpArena) -> Vec<ExpId> {
        let mut out: Vec<ExpId> = self.defines.iter().map(|d| d.lhs).collect();
        if self.is_childless(prog) {
            out.push(exps.terminal(crate::oper::Oper::DefineAll));
        }
        out
    }

    pub fn defines_loc(&self, loc: ExpId) -> bool {
        self.defines.iter().any(|d| d.lhs == loc)
    }

    pub fn remove_define(&mut self, loc: ExpId) -> bool {
        let before = self.defines.len();
        self.defines.retain(|d| d.lhs != loc);
        before != self.defines.len()
    }

    /// Drops later duplicates of the same argument LHS.
    pub fn eliminate_duplicate_args(&mut self) {
        let mut seen: IndexSet<ExpId> = IndexSet::new();
        self.args.retain(|a| seen.insert(a.lhs));
    }

    /// True for a call through a constant memory slot (`m[K]()`).
    pub fn is_call_to_mem_offset(&self, exps: &ExpArena) -> bool {
        match self.dest {
            Some(d) => exps.is_mem_of(d) && exps.is_int_const(exps.arg(d, 0)),
            None => false,
        }
    }
}

/// A return; carries the returned assignments for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnStmt {
    pub returns: Vec<Assign>,
}

/// An unconditional jump (possibly computed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GotoStmt {
    pub dest: Option<ExpId>,
}

/// The statement variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StmtKind {
    Assign(Assign),
    Phi(PhiAssign),
    Implicit(ImplicitDef),
    Branch(Branch),
    Call(Box<CallStmt>),
    Case(CaseStmt),
    Return(ReturnStmt),
    Goto(GotoStmt),
}

/// A statement: sequence number, enclosing block, and the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub number: i32,
    pub block: BlockId,
    pub kind: StmtKind,
}

impl Statement {
    pub fn is_assign(&self) -> bool {
        matches!(self.kind, StmtKind::Assign(_))
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, StmtKind::Phi(_))
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self.kind, StmtKind::Implicit(_))
    }

    /// Assign, φ-assign or implicit assign.
    pub fn is_assignment(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Assign(_) | StmtKind::Phi(_) | StmtKind::Implicit(_)
        )
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind, StmtKind::Branch(_))
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, StmtKind::Call(_))
    }

    pub fn is_case(&self) -> bool {
        matches!(self.kind, StmtKind::Case(_))
    }

    pub fn is_return(&self) -> bool {
        matches!(self.kind, StmtKind::Return(_))
    }

    pub fn is_goto(&self) -> bool {
        matches!(self.kind, StmtKind::Goto(_))
    }

    /// The defined location for assignment-like statements.
    pub fn lhs(&self) -> Option<ExpId> {
        match &self.kind {
            StmtKind::Assign(a) => Some(a.lhs),
            StmtKind::Phi(p) => Some(p.lhs),
            StmtKind::Implicit(i) => Some(i.lhs),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&CallStmt> {
        match &self.kind {
            StmtKind::Call(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_call_mut(&mut self) -> Option<&mut CallStmt> {
        match &mut self.kind {
            StmtKind::Call(c) => Some(c),
            _ => None,
        }
    }

    pub fn branch_cond(&self) -> Option<ExpId> {
        match &self.kind {
            StmtKind::Branch(b) => Some(b.cond),
            _ => None,
        }
    }

    pub fn switch_info(&self) -> Option<&SwitchInfo> {
        match &self.kind {
            StmtKind::Case(c) => c.switch_info.as_ref(),
            _ => None,
        }
    }

    /// Replaces every occurrence of `pattern` in the statement's
    /// expressions (including defined locations and φ operands) with
    /// `replacement`. Returns whether anything changed.
    pub fn search_and_replace(
        &mut self,
        exps: &mut ExpArena,
        pattern: ExpId,
        replacement: ExpId,
    ) -> bool {
        let mut changed = false;
        let mut visit = |e: &mut ExpId| {
            let (new, ch) = exps.replace(*e, pattern, replacement);
            *e = new;
            changed |= ch;
        };

        match &mut self.kind {
            StmtKind::Assign(a) => {
                visit(&mut a.lhs);
                visit(&mut a.rhs);
            }
            StmtKind::Implicit(i) => visit(&mut i.lhs),
            StmtKind::Phi(p) => {
                visit(&mut p.lhs);
                for operand in p.operands.values_mut() {
                    visit(&mut operand.exp);
                }
            }
            StmtKind::Branch(b) => visit(&mut b.cond),
            StmtKind::Call(c) => {
                if let Some(dest) = &mut c.dest {
                    visit(dest);
                }
                for arg in &mut c.args {
                    visit(&mut arg.lhs);
                    visit(&mut arg.rhs);
                }
                for def in &mut c.defines {
                    visit(&mut def.lhs);
                }
            }
            StmtKind::Case(c) => {
                if let Some(info) = &mut c.switch_info {
                    visit(&mut info.switch_exp);
                }
            }
            StmtKind::Return(r) => {
                for ret in &mut r.returns {
                    visit(&mut ret.rhs);
                }
            }
            StmtKind::Goto(g) => {
                if let Some(dest) = &mut g.dest {
                    visit(dest);
                }
            }
        }

        changed
    }

    /// Renders the statement for diagnostics and the dot dump.
    pub fn display<'a>(
        &'a self,
        exps: &'a ExpArena,
        prog: Option<&'a Program>,
    ) -> StmtDisplay<'a> {
        StmtDisplay {
            stmt: self,
            exps,
            prog,
        }
    }
}

/// Concise statement rendering.
pub struct StmtDisplay<'a> {
    stmt: &'a Statement,
    exps: &'a ExpArena,
    prog: Option<&'a Program>,
}

impl fmt::Display for StmtDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exps = self.exps;
        match &self.stmt.kind {
            StmtKind::Assign(a) => {
                write!(f, "{} := {}", exps.display(a.lhs), exps.display(a.rhs))
            }
            StmtKind::Implicit(i) => write!(f, "{} := -", exps.display(i.lhs)),
            StmtKind::Phi(p) => {
                write!(f, "{} := phi{{", exps.display(p.lhs))?;
                for (i, operand) in p.operands.values().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    match operand.def {
                        Some(def) => write!(f, "{}", def.0)?,
                        None => write!(f, "-")?,
                    }
                }
                write!(f, "}}")
            }
            StmtKind::Branch(b) => write!(f, "BRANCH if {}", exps.display(b.cond)),
            StmtKind::Call(c) => {
                write!(f, "CALL ")?;
                let name = c
                    .callee
                    .and_then(|id| self.prog.and_then(|p| p.function(id)))
                    .map(|func| func.name.as_str());
                match (name, c.dest) {
                    (Some(name), _) => write!(f, "{}", name)?,
                    (None, Some(dest)) => write!(f, "{}", exps.display(dest))?,
                    (None, None) => write!(f, "/* no dest */")?,
                }
                write!(f, "(")?;
                for (i, arg) in c.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", exps.display(arg.rhs))?;
                }
                write!(f, ")")
            }
            StmtKind::Case(c) => {
                write!(f, "CASE ")?;
                if let Some(info) = &c.switch_info {
                    write!(f, "{}", exps.display(info.switch_exp))?;
                }
                Ok(())
            }
            StmtKind::Return(r) => {
                write!(f, "RET ")?;
                for (i, ret) in r.returns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", exps.display(ret.rhs))?;
                }
                Ok(())
            }
            StmtKind::Goto(g) => match g.dest {
                Some(dest) => write!(f, "GOTO {}", exps.display(dest)),
                None => write!(f, "GOTO ?"),
            },
        }
    }
}
