//! SQL query parser
//!
//! This module lowers SQL text into the statement model using the sqlparser
//! library. It accepts the subset the rewriting engine understands:
//! - `SELECT` with aliases, one join chain (`JOIN`, `INNER JOIN`,
//!   `LEFT [OUTER] JOIN`, `RIGHT [OUTER] JOIN` with `ON`), derived tables,
//!   `WHERE`, `GROUP BY`, `HAVING`, `ORDER BY` and `LIMIT`
//! - `CREATE TABLE`, where `COMMENT 'sensitive'` marks an encrypted column
//!
//! Anything else is reported as [`Error::Parse`].
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::query::QueryParser;
//!
//! let parser = QueryParser::new();
//! let tree = parser.parse("SELECT count(*) FROM orders WHERE amount > 10")?;
//! ```

use crate::ast::{
    ArithmeticOp, BinaryOp, ColumnDefinition, CompoundOp, CreateStmt, Expr, ExprArena, ExprId,
    FieldLiteral, FunctionArgs, JoinOp, OrderByElement, RowFormat, SelectStmt, SelectionItem,
    Statement, StatementTree, TableRef,
};
use crate::error::{Error, Result};
use crate::types::{DataType, Value};
use sqlparser::ast::{
    self as sql, BinaryOperator, ColumnOption, FunctionArg, FunctionArgExpr, FunctionArguments,
    GroupByExpr, HiveDelimiter, HiveRowFormat, JoinConstraint, JoinOperator, LimitClause,
    ObjectName, ObjectNamePart, OrderByKind, SelectItem, SetExpr, TableFactor, UnaryOperator,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// SQL query parser
///
/// This struct lowers SQL text into [`StatementTree`]s.
#[derive(Debug)]
pub struct QueryParser {
    /// SQL dialect to use for parsing (GenericDialect doesn't implement Clone)
    dialect: GenericDialect,
}

impl QueryParser {
    /// Create a new query parser
    pub fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }

    /// Parse a SQL string into a sqlparser statement
    ///
    /// # Arguments
    /// * `query` - SQL string holding exactly one statement
    pub fn parse_statement(&self, query: &str) -> Result<sql::Statement> {
        let ast = Parser::parse_sql(&self.dialect, query)
            .map_err(|e| Error::Parse(format!("failed to parse SQL: {}", e)))?;

        let mut statements = ast.into_iter();
        match (statements.next(), statements.next()) {
            (Some(statement), None) => Ok(statement),
            _ => Err(Error::Parse("expected exactly one SQL statement".to_string())),
        }
    }

    /// Parse a SQL string into a statement tree
    ///
    /// # Arguments
    /// * `query` - SQL string
    ///
    /// # Returns
    /// `Ok(StatementTree)` with unresolved column references, `Err(Error::Parse)`
    /// for syntax errors and unsupported constructs
    pub fn parse(&self, query: &str) -> Result<StatementTree> {
        let statement = self.parse_statement(query)?;
        let mut lowering = Lowering::default();
        let statement = match &statement {
            sql::Statement::Query(query) => Statement::Select(lowering.query(query)?),
            sql::Statement::CreateTable(create) => Statement::Create(lowering.create(create)?),
            other => {
                return Err(Error::Parse(format!(
                    "unsupported statement: {}",
                    first_words(&other.to_string())
                )))
            }
        };
        Ok(StatementTree {
            arena: lowering.arena,
            statement,
        })
    }
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}

fn first_words(text: &str) -> String {
    text.split_whitespace().take(3).collect::<Vec<_>>().join(" ")
}

fn unsupported(what: impl std::fmt::Display) -> Error {
    Error::Parse(format!("unsupported {}", what))
}

/// Single-part object name
fn object_name(name: &ObjectName) -> Result<String> {
    match name.0.as_slice() {
        [ObjectNamePart::Identifier(ident)] => Ok(ident.value.clone()),
        _ => Err(unsupported(format!("qualified name `{}`", name))),
    }
}

/// Column type from its SQL spelling
fn data_type(data_type: &sql::DataType) -> Result<DataType> {
    let text = data_type.to_string().to_ascii_uppercase();
    let parsed = match text.as_str() {
        "INT" | "INTEGER" => DataType::Int,
        "BIGINT" => DataType::BigInt,
        "FLOAT" | "REAL" => DataType::Float,
        "DOUBLE" | "DOUBLE PRECISION" => DataType::Double,
        "TEXT" | "STRING" => DataType::String,
        "BOOLEAN" | "BOOL" => DataType::Boolean,
        other => match other
            .strip_prefix("VARCHAR(")
            .and_then(|rest| rest.strip_suffix(')'))
            .and_then(|len| len.trim().parse().ok())
        {
            Some(len) => DataType::Varchar(len),
            None => return Err(unsupported(format!("column type {}", text))),
        },
    };
    Ok(parsed)
}

/// Integer or float constant from its SQL spelling
fn number(text: &str) -> Result<Value> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Value::Int(v));
    }
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| Error::Parse(format!("invalid number `{}`", text)))
}

/// Lowers sqlparser trees into one arena
#[derive(Debug, Default)]
struct Lowering {
    arena: ExprArena,
}

impl Lowering {
    fn query(&mut self, query: &sql::Query) -> Result<SelectStmt> {
        if query.with.is_some() {
            return Err(unsupported("WITH clause"));
        }
        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select,
            SetExpr::Query(inner) => return self.query(inner),
            other => return Err(unsupported(format!("query body {}", first_words(&other.to_string())))),
        };
        let mut stmt = self.select(select)?;

        if let Some(order_by) = &query.order_by {
            match &order_by.kind {
                OrderByKind::Expressions(exprs) => {
                    for element in exprs {
                        stmt.order_by.push(OrderByElement {
                            expr: self.expr(&element.expr)?,
                            ascending: !matches!(element.options.asc, Some(false)),
                        });
                    }
                }
                OrderByKind::All(_) => return Err(unsupported("ORDER BY ALL")),
            }
        }

        if let Some(limit_clause) = &query.limit_clause {
            match limit_clause {
                LimitClause::LimitOffset {
                    limit,
                    offset,
                    limit_by,
                } => {
                    if offset.is_some() || !limit_by.is_empty() {
                        return Err(unsupported("OFFSET / LIMIT BY"));
                    }
                    if let Some(limit) = limit {
                        stmt.limit = Some(self.limit(limit)?);
                    }
                }
                LimitClause::OffsetCommaLimit { .. } => return Err(unsupported("LIMIT offset, count")),
            }
        }
        Ok(stmt)
    }

    fn limit(&self, expr: &sql::Expr) -> Result<u64> {
        match expr {
            sql::Expr::Value(v) => match &v.value {
                sql::Value::Number(text, _) => text
                    .parse()
                    .map_err(|_| Error::Parse(format!("invalid LIMIT `{}`", text))),
                other => Err(Error::Parse(format!("invalid LIMIT `{}`", other))),
            },
            other => Err(Error::Parse(format!("invalid LIMIT `{}`", other))),
        }
    }

    fn select(&mut self, select: &sql::Select) -> Result<SelectStmt> {
        if select.distinct.is_some() {
            return Err(unsupported("SELECT DISTINCT"));
        }

        let table_refs = match select.from.as_slice() {
            [from] => self.join_chain(from)?,
            [] => return Err(Error::Parse("missing FROM clause".to_string())),
            _ => return Err(unsupported("comma join, use JOIN ... ON")),
        };

        let mut select_list = Vec::with_capacity(select.projection.len());
        for item in &select.projection {
            let item = match item {
                SelectItem::UnnamedExpr(expr) => SelectionItem::new(self.expr(expr)?),
                SelectItem::ExprWithAlias { expr, alias } => {
                    SelectionItem::aliased(self.expr(expr)?, &alias.value)
                }
                other => return Err(unsupported(format!("select item `{}`", other))),
            };
            select_list.push(item);
        }

        let where_clause = select.selection.as_ref().map(|e| self.expr(e)).transpose()?;

        let grouping_exprs = match &select.group_by {
            GroupByExpr::Expressions(exprs, modifiers) if modifiers.is_empty() => exprs
                .iter()
                .map(|e| self.expr(e))
                .collect::<Result<Vec<_>>>()?,
            other => return Err(unsupported(format!("grouping `{}`", other))),
        };

        let having = select.having.as_ref().map(|e| self.expr(e)).transpose()?;

        Ok(SelectStmt {
            select_list,
            table_refs,
            where_clause,
            grouping_exprs,
            having,
            order_by: Vec::new(),
            limit: None,
        })
    }

    fn join_chain(&mut self, from: &sql::TableWithJoins) -> Result<Vec<TableRef>> {
        let mut refs = vec![self.table_factor(&from.relation)?];
        for join in &from.joins {
            let (op, constraint) = match &join.join_operator {
                JoinOperator::Join(c) | JoinOperator::Inner(c) => (JoinOp::Inner, c),
                JoinOperator::Left(c) | JoinOperator::LeftOuter(c) => (JoinOp::LeftOuter, c),
                JoinOperator::Right(c) | JoinOperator::RightOuter(c) => (JoinOp::RightOuter, c),
                other => return Err(unsupported(format!("join operator {:?}", other))),
            };
            let on_clause = match constraint {
                JoinConstraint::On(expr) => self.expr(expr)?,
                _ => return Err(unsupported("join without ON clause")),
            };
            let left = refs.len() - 1;
            let table = self.table_factor(&join.relation)?;
            refs.push(table.joined(op, left, on_clause));
        }
        Ok(refs)
    }

    fn table_factor(&mut self, factor: &TableFactor) -> Result<TableRef> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let name = object_name(name)?;
                Ok(TableRef::base(
                    &name,
                    alias.as_ref().map(|a| a.name.value.as_str()),
                ))
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let alias = alias
                    .as_ref()
                    .ok_or_else(|| Error::Parse("derived table requires an alias".to_string()))?;
                let stmt = self.query(subquery)?;
                Ok(TableRef::view(&alias.name.value, stmt))
            }
            other => Err(unsupported(format!("table reference `{}`", other))),
        }
    }

    fn push(&mut self, expr: Expr) -> ExprId {
        self.arena.push(expr)
    }

    fn expr(&mut self, expr: &sql::Expr) -> Result<ExprId> {
        match expr {
            sql::Expr::Identifier(ident) => {
                Ok(self.push(Expr::Field(FieldLiteral::new(None, &ident.value))))
            }
            sql::Expr::CompoundIdentifier(idents) => match idents.as_slice() {
                [table, column] => Ok(self.push(Expr::Field(FieldLiteral::new(
                    Some(&table.value),
                    &column.value,
                )))),
                _ => Err(unsupported(format!("column reference `{}`", expr))),
            },
            sql::Expr::Value(v) => {
                let value = match &v.value {
                    sql::Value::Number(text, _) => number(text)?,
                    sql::Value::SingleQuotedString(s) => Value::String(s.clone()),
                    sql::Value::Null => Value::Null,
                    other => return Err(unsupported(format!("literal `{}`", other))),
                };
                Ok(self.push(Expr::Literal(value)))
            }
            sql::Expr::UnaryOp { op, expr: inner } => match (op, inner.as_ref()) {
                (UnaryOperator::Minus, sql::Expr::Value(v)) => match &v.value {
                    sql::Value::Number(text, _) => {
                        let value = number(&format!("-{}", text))?;
                        Ok(self.push(Expr::Literal(value)))
                    }
                    _ => Err(unsupported(format!("expression `{}`", expr))),
                },
                (UnaryOperator::Plus, _) => self.expr(inner),
                _ => Err(unsupported(format!("expression `{}`", expr))),
            },
            sql::Expr::Nested(inner) => self.expr(inner),
            sql::Expr::BinaryOp { left, op, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                let node = match op {
                    BinaryOperator::Plus => arithmetic(ArithmeticOp::Add, left, right),
                    BinaryOperator::Minus => arithmetic(ArithmeticOp::Subtract, left, right),
                    BinaryOperator::Multiply => arithmetic(ArithmeticOp::Multiply, left, right),
                    BinaryOperator::Divide => arithmetic(ArithmeticOp::Divide, left, right),
                    BinaryOperator::Modulo => arithmetic(ArithmeticOp::Modulo, left, right),
                    BinaryOperator::Eq => comparison(BinaryOp::Eq, left, right),
                    BinaryOperator::NotEq => comparison(BinaryOp::NotEq, left, right),
                    BinaryOperator::Lt => comparison(BinaryOp::Lt, left, right),
                    BinaryOperator::LtEq => comparison(BinaryOp::LtEq, left, right),
                    BinaryOperator::Gt => comparison(BinaryOp::Gt, left, right),
                    BinaryOperator::GtEq => comparison(BinaryOp::GtEq, left, right),
                    BinaryOperator::And => compound(CompoundOp::And, left, right),
                    BinaryOperator::Or => compound(CompoundOp::Or, left, right),
                    other => return Err(unsupported(format!("operator `{}`", other))),
                };
                Ok(self.push(node))
            }
            sql::Expr::Between {
                expr: inner,
                negated,
                low,
                high,
            } => {
                let value = self.expr(inner)?;
                let low = self.expr(low)?;
                let high = self.expr(high)?;
                let (lower_op, upper_op, joiner) = if *negated {
                    (BinaryOp::Lt, BinaryOp::Gt, CompoundOp::Or)
                } else {
                    (BinaryOp::GtEq, BinaryOp::LtEq, CompoundOp::And)
                };
                let lower = self.push(comparison(lower_op, value, low));
                let upper = self.push(comparison(upper_op, value, high));
                Ok(self.push(compound(joiner, lower, upper)))
            }
            sql::Expr::Function(function) => self.function(function),
            other => Err(unsupported(format!("expression `{}`", other))),
        }
    }

    fn function(&mut self, function: &sql::Function) -> Result<ExprId> {
        if function.over.is_some() || function.filter.is_some() {
            return Err(unsupported(format!("window or filtered call `{}`", function)));
        }
        let name = object_name(&function.name)?;
        let list = match &function.args {
            FunctionArguments::List(list) if list.duplicate_treatment.is_none() => list,
            FunctionArguments::None => {
                return Ok(self.push(Expr::Function {
                    name,
                    args: FunctionArgs::List(Vec::new()),
                }))
            }
            _ => return Err(unsupported(format!("call `{}`", function))),
        };

        let args = match list.args.as_slice() {
            [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => FunctionArgs::Star,
            args => {
                let mut ids = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => ids.push(self.expr(e)?),
                        other => return Err(unsupported(format!("argument `{}`", other))),
                    }
                }
                FunctionArgs::List(ids)
            }
        };
        Ok(self.push(Expr::Function { name, args }))
    }

    fn create(&mut self, create: &sql::CreateTable) -> Result<CreateStmt> {
        let table_name = object_name(&create.name)?;
        let mut columns = Vec::with_capacity(create.columns.len());
        for column in &create.columns {
            let sensitive = column.options.iter().any(|option| {
                matches!(&option.option, ColumnOption::Comment(c) if c.eq_ignore_ascii_case("sensitive"))
            });
            columns.push(ColumnDefinition::new(
                &column.name.value,
                data_type(&column.data_type)?,
                sensitive,
            ));
        }
        let row_format = match &create.hive_formats {
            Some(formats) => row_format(formats)?,
            None => None,
        };
        Ok(CreateStmt {
            table_name,
            columns,
            row_format,
        })
    }
}

/// Field delimiter of a `ROW FORMAT DELIMITED` clause
///
/// Storage formats, SERDE rows and delimiters other than the field
/// terminator are rejected.
fn row_format(formats: &sql::HiveFormat) -> Result<Option<RowFormat>> {
    if formats.storage.is_some() || formats.location.is_some() {
        return Err(unsupported("table storage clause"));
    }
    if formats.serde_properties.is_some() {
        return Err(unsupported("SERDEPROPERTIES"));
    }
    let delimiters = match &formats.row_format {
        None => return Ok(None),
        Some(HiveRowFormat::DELIMITED { delimiters }) => delimiters,
        Some(HiveRowFormat::SERDE { class }) => {
            return Err(unsupported(format!("ROW FORMAT SERDE '{}'", class)))
        }
    };

    let mut field_delimiter = None;
    for delimiter in delimiters {
        match delimiter.delimiter {
            HiveDelimiter::FieldsTerminatedBy if field_delimiter.is_none() => {
                field_delimiter = Some(delimiter.char.value.clone());
            }
            _ => return Err(unsupported(format!("row delimiter `{}`", delimiter))),
        }
    }
    match field_delimiter {
        Some(field_delimiter) => Ok(Some(RowFormat { field_delimiter })),
        None => Err(unsupported("ROW FORMAT DELIMITED without FIELDS TERMINATED BY")),
    }
}

fn arithmetic(op: ArithmeticOp, left: ExprId, right: ExprId) -> Expr {
    Expr::Arithmetic {
        op,
        children: vec![left, right],
    }
}

fn comparison(op: BinaryOp, left: ExprId, right: ExprId) -> Expr {
    Expr::Binary { op, left, right }
}

fn compound(op: CompoundOp, left: ExprId, right: ExprId) -> Expr {
    Expr::Compound { op, left, right }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TableRefKind;

    fn select(tree: &StatementTree) -> &SelectStmt {
        match &tree.statement {
            Statement::Select(select) => select,
            other => panic!("expected SELECT, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let parser = QueryParser::new();
        let tree = parser
            .parse("SELECT T1.a, b AS x FROM T1 WHERE T1.a > 1.5")
            .unwrap();
        let stmt = select(&tree);

        assert_eq!(stmt.select_list.len(), 2);
        assert_eq!(stmt.select_list[1].alias.as_deref(), Some("x"));
        let a = tree.arena.field(stmt.select_list[0].expr).unwrap();
        assert_eq!(a.table.as_deref(), Some("T1"));
        assert_eq!(a.column, "a");
        assert!(matches!(
            tree.arena.get(stmt.where_clause.unwrap()),
            Expr::Binary { op: BinaryOp::Gt, .. }
        ));
    }

    #[test]
    fn test_parse_join_chain() {
        let parser = QueryParser::new();
        let tree = parser
            .parse(
                "SELECT T1.a FROM T1 JOIN T2 ON T1.id = T2.id \
                 LEFT JOIN T3 t ON T2.c = t.id2 RIGHT OUTER JOIN T1 u ON u.id = T1.id",
            )
            .unwrap();
        let stmt = select(&tree);

        let ops: Vec<JoinOp> = stmt.table_refs.iter().map(|r| r.join).collect();
        assert_eq!(
            ops,
            vec![JoinOp::Null, JoinOp::Inner, JoinOp::LeftOuter, JoinOp::RightOuter]
        );
        assert_eq!(stmt.table_refs[2].left, Some(1));
        assert_eq!(stmt.table_refs[2].qualifier(), "t");
        assert!(stmt.validate().is_ok());
    }

    #[test]
    fn test_parse_derived_table_and_clauses() {
        let parser = QueryParser::new();
        let tree = parser
            .parse(
                "SELECT v.c, v.cnt FROM (SELECT T1.c, count(*) AS cnt FROM T1 GROUP BY T1.c) v \
                 GROUP BY v.c HAVING v.cnt > 10 ORDER BY v.c DESC LIMIT 3",
            )
            .unwrap();
        let stmt = select(&tree);

        match &stmt.table_refs[0].kind {
            TableRefKind::InlineView { alias, stmt: inner } => {
                assert_eq!(alias, "v");
                assert_eq!(inner.grouping_exprs.len(), 1);
                assert!(matches!(
                    tree.arena.get(inner.select_list[1].expr),
                    Expr::Function { args: FunctionArgs::Star, .. }
                ));
            }
            other => panic!("expected view, got {:?}", other),
        }
        assert!(stmt.having.is_some());
        assert!(!stmt.order_by[0].ascending);
        assert_eq!(stmt.limit, Some(3));
    }

    #[test]
    fn test_parse_negative_and_between() {
        let parser = QueryParser::new();
        let tree = parser
            .parse("SELECT a FROM T1 WHERE a BETWEEN -3 AND 4")
            .unwrap();
        let stmt = select(&tree);
        let root = stmt.where_clause.unwrap();
        assert!(matches!(
            tree.arena.get(root),
            Expr::Compound { op: CompoundOp::And, .. }
        ));
        let literals: Vec<&Value> = tree
            .arena
            .subtree(root)
            .into_iter()
            .filter_map(|id| match tree.arena.get(id) {
                Expr::Literal(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(literals, vec![&Value::Int(-3), &Value::Int(4)]);
    }

    #[test]
    fn test_parse_create_table() {
        let parser = QueryParser::new();
        let tree = parser
            .parse(
                "CREATE TABLE emp (id INT, name VARCHAR(20), \
                 salary BIGINT COMMENT 'sensitive')",
            )
            .unwrap();
        match &tree.statement {
            Statement::Create(create) => {
                assert_eq!(create.table_name, "emp");
                assert_eq!(create.columns[1].data_type, DataType::Varchar(20));
                assert!(!create.columns[0].sensitive);
                assert!(create.columns[2].sensitive);
                assert_eq!(create.columns[2].data_type, DataType::BigInt);
            }
            other => panic!("expected CREATE, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_row_format() {
        let parser = QueryParser::new();
        let tree = parser
            .parse(
                "CREATE TABLE emp (id INT, salary INT COMMENT 'sensitive') \
                 ROW FORMAT DELIMITED FIELDS TERMINATED BY '|'",
            )
            .unwrap();
        match &tree.statement {
            Statement::Create(create) => assert_eq!(
                create.row_format,
                Some(RowFormat {
                    field_delimiter: "|".to_string()
                })
            ),
            other => panic!("expected CREATE, got {:?}", other),
        }

        for sql in [
            "CREATE TABLE emp (id INT) ROW FORMAT DELIMITED LINES TERMINATED BY ';'",
            "CREATE TABLE emp (id INT) ROW FORMAT SERDE 'org.example.Serde'",
            "CREATE TABLE emp (id INT) ROW FORMAT DELIMITED FIELDS TERMINATED BY ',' \
             STORED AS TEXTFILE",
            "CREATE TABLE emp (id INT) LOCATION '/data/emp'",
        ] {
            assert!(
                matches!(parser.parse(sql), Err(Error::Parse(_))),
                "{} should be rejected",
                sql
            );
        }
    }

    #[test]
    fn test_parse_rejects_unsupported() {
        let parser = QueryParser::new();
        for sql in [
            "SELECT * FROM T1",
            "SELECT a FROM T1, T2",
            "SELECT a FROM T1 JOIN T2 USING (id)",
            "DELETE FROM T1",
            "SELECT a FROM T1; SELECT b FROM T2",
            "SELECT a FROM (SELECT a FROM T1)",
            "SELECT",
        ] {
            assert!(
                matches!(parser.parse(sql), Err(Error::Parse(_))),
                "{} should be rejected",
                sql
            );
        }
    }
}
