pub mod analyzer;
pub mod dot;
pub mod forest;

// Re-export commonly used types
pub use analyzer::{
    CondType, ControlFlowAnalyzer, LoopType, NodeInfo, StructType, TravType, UnstructType,
};
pub use dot::write_stmt_cfg_dot;
pub use forest::{StmtForest, StmtNode, StmtNodeId};
