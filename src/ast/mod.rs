// ABOUTME: AST node definitions shared by the parser, resolver and evaluator

pub mod expr;
pub mod stmt;

pub use expr::{Expr, ExprKind, LiteralValue, NodeId};
pub use stmt::{ClassDecl, FunctionBody, LoopFlowKind, Stmt, StmtKind};

/// Hands out strictly increasing node ids during a single parse. Mirrors the
/// original's use of raw expression-pointer identity as a hash key: an id
/// here plays exactly the same role and nothing else.
#[derive(Debug, Default)]
pub struct NodeIdGen(u32);

impl NodeIdGen {
    pub fn new() -> Self {
        NodeIdGen(0)
    }

    pub fn next(&mut self) -> NodeId {
        let id = NodeId(self.0);
        self.0 += 1;
        id
    }
}
