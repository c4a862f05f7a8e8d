//! Statement and expression model
//!
//! This module provides the typed trees the rewriting pipeline operates on:
//! - `expr`: expression arena, field literals and the referrers index
//! - `stmt`: SELECT / CREATE TABLE statements and join-chain validation

pub mod expr;
pub mod stmt;

// Re-export main types for convenience
pub use expr::{
    ArithmeticOp, BinaryOp, CompoundOp, Expr, ExprArena, ExprId, FieldLiteral, FunctionArgs,
};
pub use stmt::{
    validate_join_chain, ColumnDefinition, CreateStmt, JoinOp, OrderByElement, RowFormat,
    SelectStmt, SelectionItem, Statement, StatementTree, TableRef, TableRefKind,
};
