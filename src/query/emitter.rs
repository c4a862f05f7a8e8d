//! SQL emission
//!
//! This module renders statement and expression trees back to SQL text.
//! Emission is a pure function of the tree: operators are parenthesized by
//! precedence, the join chain is written in chain order, and emitting the
//! same tree twice yields the same text.
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::query::SqlEmitter;
//!
//! let sql = SqlEmitter::emit(&rewritten_tree);
//! ```

use crate::ast::{
    ArithmeticOp, CompoundOp, CreateStmt, Expr, ExprArena, ExprId, FunctionArgs, SelectStmt,
    Statement, StatementTree, TableRef, TableRefKind,
};
use std::fmt::Write;

/// Binding strength of an expression, higher binds tighter
fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Compound {
            op: CompoundOp::Or, ..
        } => 1,
        Expr::Compound {
            op: CompoundOp::And,
            ..
        } => 2,
        Expr::Binary { .. } => 3,
        Expr::Arithmetic {
            op: ArithmeticOp::Add | ArithmeticOp::Subtract,
            ..
        } => 4,
        Expr::Arithmetic { .. } => 5,
        Expr::Literal(_) | Expr::Field(_) | Expr::Function { .. } => 6,
    }
}

/// SQL emitter over one expression arena
#[derive(Debug, Clone, Copy)]
pub struct SqlEmitter<'a> {
    arena: &'a ExprArena,
}

impl<'a> SqlEmitter<'a> {
    /// Create an emitter for expressions of `arena`
    pub fn new(arena: &'a ExprArena) -> Self {
        Self { arena }
    }

    /// Render a whole statement tree
    pub fn emit(tree: &StatementTree) -> String {
        let emitter = SqlEmitter::new(&tree.arena);
        match &tree.statement {
            Statement::Select(select) => emitter.select(select),
            Statement::Create(create) => emitter.create(create),
        }
    }

    /// Render an expression
    pub fn expr(&self, id: ExprId) -> String {
        let mut out = String::new();
        self.write_expr(&mut out, id);
        out
    }

    fn write_expr(&self, out: &mut String, id: ExprId) {
        let expr = self.arena.get(id);
        let level = precedence(expr);
        match expr {
            Expr::Literal(value) => {
                let _ = write!(out, "{}", value);
            }
            Expr::Field(field) => out.push_str(&field.qualified_name()),
            Expr::Arithmetic { op, children } => {
                for (position, child) in children.iter().enumerate() {
                    if position > 0 {
                        let _ = write!(out, " {} ", op);
                    }
                    self.write_operand(out, *child, level, position > 0);
                }
            }
            Expr::Binary { op, left, right } => {
                self.write_operand(out, *left, level, false);
                let _ = write!(out, " {} ", op);
                self.write_operand(out, *right, level, true);
            }
            Expr::Compound { op, left, right } => {
                self.write_operand(out, *left, level, false);
                let _ = write!(out, " {} ", op);
                self.write_operand(out, *right, level, true);
            }
            Expr::Function { name, args } => {
                out.push_str(name);
                out.push('(');
                match args {
                    FunctionArgs::Star => out.push('*'),
                    FunctionArgs::List(args) => {
                        for (position, arg) in args.iter().enumerate() {
                            if position > 0 {
                                out.push_str(", ");
                            }
                            self.write_expr(out, *arg);
                        }
                    }
                }
                out.push(')');
            }
        }
    }

    /// Operands binding looser than their parent, or as loose on the right
    /// side, are parenthesized so the tree shape survives re-parsing
    fn write_operand(&self, out: &mut String, id: ExprId, parent: u8, right_side: bool) {
        let level = precedence(self.arena.get(id));
        if level < parent || (right_side && level == parent) {
            out.push('(');
            self.write_expr(out, id);
            out.push(')');
        } else {
            self.write_expr(out, id);
        }
    }

    fn write_list(&self, out: &mut String, ids: impl IntoIterator<Item = ExprId>) {
        for (position, id) in ids.into_iter().enumerate() {
            if position > 0 {
                out.push_str(", ");
            }
            self.write_expr(out, id);
        }
    }

    fn write_table_ref(&self, out: &mut String, table_ref: &TableRef) {
        match &table_ref.kind {
            TableRefKind::Base { name, alias } => {
                out.push_str(name);
                if let Some(alias) = alias {
                    out.push(' ');
                    out.push_str(alias);
                }
            }
            TableRefKind::InlineView { alias, stmt } => {
                out.push('(');
                self.write_select(out, stmt);
                out.push_str(") ");
                out.push_str(alias);
            }
        }
    }

    /// Render a SELECT statement
    pub fn select(&self, stmt: &SelectStmt) -> String {
        let mut out = String::new();
        self.write_select(&mut out, stmt);
        out
    }

    fn write_select(&self, out: &mut String, stmt: &SelectStmt) {
        out.push_str("SELECT ");
        for (position, item) in stmt.select_list.iter().enumerate() {
            if position > 0 {
                out.push_str(", ");
            }
            self.write_expr(out, item.expr);
            if let Some(alias) = &item.alias {
                out.push_str(" AS ");
                out.push_str(alias);
            }
        }

        out.push_str(" FROM ");
        // chain order; each join applies to the whole prefix, outer joins
        // are validated to name their predecessor
        for table_ref in &stmt.table_refs {
            if table_ref.left.is_some() {
                let _ = write!(out, " {} ", table_ref.join);
            }
            self.write_table_ref(out, table_ref);
            if let Some(on_clause) = table_ref.on_clause {
                out.push_str(" ON ");
                self.write_expr(out, on_clause);
            }
        }

        if let Some(where_clause) = stmt.where_clause {
            out.push_str(" WHERE ");
            self.write_expr(out, where_clause);
        }
        if !stmt.grouping_exprs.is_empty() {
            out.push_str(" GROUP BY ");
            self.write_list(out, stmt.grouping_exprs.iter().copied());
        }
        if let Some(having) = stmt.having {
            out.push_str(" HAVING ");
            self.write_expr(out, having);
        }
        if !stmt.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            for (position, element) in stmt.order_by.iter().enumerate() {
                if position > 0 {
                    out.push_str(", ");
                }
                self.write_expr(out, element.expr);
                if !element.ascending {
                    out.push_str(" DESC");
                }
            }
        }
        if let Some(limit) = stmt.limit {
            let _ = write!(out, " LIMIT {}", limit);
        }
    }

    /// Render a CREATE TABLE statement
    pub fn create(&self, stmt: &CreateStmt) -> String {
        let mut out = String::new();
        let _ = write!(out, "CREATE TABLE {} (", stmt.table_name);
        for (position, column) in stmt.columns.iter().enumerate() {
            if position > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{} {}", column.name, column.data_type);
            if column.sensitive {
                out.push_str(" COMMENT 'sensitive'");
            }
        }
        out.push(')');
        if let Some(format) = &stmt.row_format {
            let _ = write!(
                out,
                " ROW FORMAT DELIMITED FIELDS TERMINATED BY '{}'",
                format.field_delimiter.replace('\'', "''")
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        BinaryOp, ColumnDefinition, FieldLiteral, JoinOp, OrderByElement, RowFormat,
        SelectionItem,
    };
    use crate::query::QueryParser;
    use crate::types::{DataType, Value};
    use proptest::prelude::*;

    fn field(arena: &mut ExprArena, table: &str, column: &str) -> ExprId {
        arena.push(Expr::Field(FieldLiteral::new(Some(table), column)))
    }

    fn arith(arena: &mut ExprArena, op: ArithmeticOp, l: ExprId, r: ExprId) -> ExprId {
        arena.push(Expr::Arithmetic {
            op,
            children: vec![l, r],
        })
    }

    #[test]
    fn test_precedence_parentheses() {
        let mut arena = ExprArena::new();
        let a = field(&mut arena, "T1", "a");
        let b = field(&mut arena, "T1", "b");
        let c = field(&mut arena, "T1", "c");
        let sum = arith(&mut arena, ArithmeticOp::Add, a, b);
        let product = arith(&mut arena, ArithmeticOp::Multiply, sum, c);
        let diff = arith(&mut arena, ArithmeticOp::Subtract, a, sum);
        let flat = arith(&mut arena, ArithmeticOp::Add, sum, c);

        let emitter = SqlEmitter::new(&arena);
        assert_eq!(emitter.expr(product), "(T1.a + T1.b) * T1.c");
        assert_eq!(emitter.expr(diff), "T1.a - (T1.a + T1.b)");
        assert_eq!(emitter.expr(flat), "T1.a + T1.b + T1.c");
    }

    #[test]
    fn test_or_inside_and() {
        let mut arena = ExprArena::new();
        let a = field(&mut arena, "T1", "a");
        let one = arena.push(Expr::Literal(Value::Int(1)));
        let eq = arena.push(Expr::Binary {
            op: BinaryOp::Eq,
            left: a,
            right: one,
        });
        let or = arena.push(Expr::Compound {
            op: CompoundOp::Or,
            left: eq,
            right: eq,
        });
        let and = arena.push(Expr::Compound {
            op: CompoundOp::And,
            left: or,
            right: eq,
        });
        assert_eq!(
            SqlEmitter::new(&arena).expr(and),
            "(T1.a = 1 OR T1.a = 1) AND T1.a = 1"
        );
    }

    #[test]
    fn test_select_with_join_chain_and_view() {
        let mut arena = ExprArena::new();
        let inner_a = field(&mut arena, "T1", "a");
        let inner = SelectStmt::new(
            vec![SelectionItem::aliased(inner_a, "x")],
            vec![TableRef::base("T1", None)],
        )
        .unwrap();

        let vx = field(&mut arena, "v", "x");
        let t2_id = field(&mut arena, "t2", "id");
        let on = arena.push(Expr::Binary {
            op: BinaryOp::Eq,
            left: vx,
            right: t2_id,
        });
        let count = arena.push(Expr::Function {
            name: "count".to_string(),
            args: FunctionArgs::Star,
        });
        let mut outer = SelectStmt::new(
            vec![SelectionItem::new(vx), SelectionItem::aliased(count, "n")],
            vec![
                TableRef::view("v", inner),
                TableRef::base("T2", Some("t2")).joined(JoinOp::LeftOuter, 0, on),
            ],
        )
        .unwrap();
        outer.grouping_exprs.push(vx);
        outer.order_by.push(OrderByElement {
            expr: vx,
            ascending: false,
        });
        outer.limit = Some(5);

        let tree = StatementTree {
            arena,
            statement: Statement::Select(outer),
        };
        let sql = SqlEmitter::emit(&tree);
        assert_eq!(
            sql,
            "SELECT v.x, count(*) AS n FROM (SELECT T1.a AS x FROM T1) v \
             LEFT OUTER JOIN T2 t2 ON v.x = t2.id GROUP BY v.x ORDER BY v.x DESC LIMIT 5"
        );
        assert_eq!(sql, SqlEmitter::emit(&tree));
    }

    #[test]
    fn test_create_with_row_format() {
        let arena = ExprArena::new();
        let stmt = CreateStmt {
            table_name: "T".to_string(),
            columns: vec![
                ColumnDefinition::new("id", DataType::Int, false),
                ColumnDefinition::new("salary_enc", DataType::Decimal(1000), true),
            ],
            row_format: Some(RowFormat {
                field_delimiter: "|".to_string(),
            }),
        };
        assert_eq!(
            SqlEmitter::new(&arena).create(&stmt),
            "CREATE TABLE T (id INT, salary_enc DECIMAL(1000, 0) COMMENT 'sensitive') \
             ROW FORMAT DELIMITED FIELDS TERMINATED BY '|'"
        );
    }

    /// Shape of a generated predicate tree
    #[derive(Debug, Clone)]
    enum Shape {
        Column(u8),
        Int(i32),
        Arith(ArithmeticOp, Box<Shape>, Box<Shape>),
    }

    #[derive(Debug, Clone)]
    enum Pred {
        Cmp(BinaryOp, Shape, Shape),
        Both(CompoundOp, Box<Pred>, Box<Pred>),
    }

    fn shape() -> impl Strategy<Value = Shape> {
        let leaf = prop_oneof![
            (0u8..3).prop_map(Shape::Column),
            (-1000i32..1000).prop_map(Shape::Int),
        ];
        leaf.prop_recursive(3, 16, 2, |inner| {
            (
                prop_oneof![
                    Just(ArithmeticOp::Add),
                    Just(ArithmeticOp::Subtract),
                    Just(ArithmeticOp::Multiply),
                    Just(ArithmeticOp::Divide),
                ],
                inner.clone(),
                inner,
            )
                .prop_map(|(op, l, r)| Shape::Arith(op, Box::new(l), Box::new(r)))
        })
    }

    fn pred() -> impl Strategy<Value = Pred> {
        let cmp = (
            prop_oneof![
                Just(BinaryOp::Eq),
                Just(BinaryOp::NotEq),
                Just(BinaryOp::Lt),
                Just(BinaryOp::GtEq),
            ],
            shape(),
            shape(),
        )
            .prop_map(|(op, l, r)| Pred::Cmp(op, l, r));
        cmp.prop_recursive(2, 8, 2, |inner| {
            (
                prop_oneof![Just(CompoundOp::And), Just(CompoundOp::Or)],
                inner.clone(),
                inner,
            )
                .prop_map(|(op, l, r)| Pred::Both(op, Box::new(l), Box::new(r)))
        })
    }

    fn build_shape(arena: &mut ExprArena, shape: &Shape) -> ExprId {
        match shape {
            Shape::Column(c) => field(arena, "T1", ["a", "b", "c"][*c as usize]),
            Shape::Int(v) => arena.push(Expr::Literal(Value::Int(*v as i64))),
            Shape::Arith(op, l, r) => {
                let l = build_shape(arena, l);
                let r = build_shape(arena, r);
                arith(arena, *op, l, r)
            }
        }
    }

    fn build_pred(arena: &mut ExprArena, pred: &Pred) -> ExprId {
        match pred {
            Pred::Cmp(op, l, r) => {
                let left = build_shape(arena, l);
                let right = build_shape(arena, r);
                arena.push(Expr::Binary {
                    op: *op,
                    left,
                    right,
                })
            }
            Pred::Both(op, l, r) => {
                let left = build_pred(arena, l);
                let right = build_pred(arena, r);
                arena.push(Expr::Compound {
                    op: *op,
                    left,
                    right,
                })
            }
        }
    }

    proptest! {
        #[test]
        fn test_emission_is_deterministic_and_reparses(p in pred()) {
            let mut arena = ExprArena::new();
            let a = field(&mut arena, "T1", "a");
            let predicate = build_pred(&mut arena, &p);
            let mut stmt = SelectStmt::new(
                vec![SelectionItem::new(a)],
                vec![TableRef::base("T1", None)],
            ).unwrap();
            stmt.where_clause = Some(predicate);
            let tree = StatementTree { arena, statement: Statement::Select(stmt) };

            let first = SqlEmitter::emit(&tree);
            prop_assert_eq!(&first, &SqlEmitter::emit(&tree));

            let reparsed = QueryParser::new().parse(&first).unwrap();
            prop_assert_eq!(SqlEmitter::emit(&reparsed), first);
        }
    }
}
