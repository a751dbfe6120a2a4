pub mod block;
pub mod cfg;
pub mod error;
pub mod exp;
pub mod id;
pub mod oper;
pub mod proc;
pub mod program;
pub mod stmt;
pub mod ty;

// Re-export commonly used types
pub use block::{BasicBlock, BlockKind, Rtl};
pub use cfg::{CfgEdge, ProcCfg, BELSE, BTHEN};
pub use error::CoreError;
pub use exp::{ExpArena, ExpDisplay, ExpNode, ExpValue};
pub use id::{BlockId, ExpId, FuncId, GlobalId, StmtId};
pub use oper::Oper;
pub use proc::Procedure;
pub use program::{
    BinaryImage, Function, FunctionKind, Global, MemImage, Program, SigParam, Signature,
};
pub use stmt::{
    Assign, Branch, CallStmt, CaseStmt, DefCollector, GotoStmt, ImplicitDef, PhiAssign,
    PhiOperand, ReturnStmt, Statement, StmtDisplay, StmtKind, SwitchInfo, SwitchStyle,
    UseCollector,
};
pub use ty::{Sign, Ty};
