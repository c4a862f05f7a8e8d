//! Statement model
//!
//! SELECT and CREATE TABLE statements built over an [`ExprArena`]. The table
//! references of a SELECT form a left-deep join chain: the first reference
//! has no left side and the [`JoinOp::Null`] operator, every other reference
//! joins against an earlier one with an ON clause. Nested SELECTs appear as
//! inline views and carry their own chain.

use super::expr::{ExprArena, ExprId};
use crate::catalog::ColumnKey;
use crate::error::{Error, Result};
use crate::types::DataType;
use std::fmt;

/// Item of a selection list
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionItem {
    /// Selected expression
    pub expr: ExprId,

    /// Output alias
    pub alias: Option<String>,
}

impl SelectionItem {
    /// Item without alias
    pub fn new(expr: ExprId) -> Self {
        Self { expr, alias: None }
    }

    /// Item with an output alias
    pub fn aliased(expr: ExprId, alias: &str) -> Self {
        Self {
            expr,
            alias: Some(alias.to_string()),
        }
    }
}

/// Element of an ORDER BY list
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByElement {
    pub expr: ExprId,
    pub ascending: bool,
}

/// Join operator linking a table reference to its left side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinOp {
    /// First reference of a chain, no join
    Null,
    Inner,
    LeftOuter,
    RightOuter,
}

impl JoinOp {
    /// SQL keywords of the join
    pub fn keyword(self) -> &'static str {
        match self {
            JoinOp::Null => "",
            JoinOp::Inner => "JOIN",
            JoinOp::LeftOuter => "LEFT OUTER JOIN",
            JoinOp::RightOuter => "RIGHT OUTER JOIN",
        }
    }
}

impl fmt::Display for JoinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Table reference variants
#[derive(Debug, Clone, PartialEq)]
pub enum TableRefKind {
    /// Catalog table
    Base { name: String, alias: Option<String> },

    /// Nested SELECT consumed as a virtual table
    InlineView { alias: String, stmt: Box<SelectStmt> },
}

/// Element of a join chain
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub kind: TableRefKind,

    /// Join operator, [`JoinOp::Null`] for the first reference
    pub join: JoinOp,

    /// Index of the reference this one joins against
    pub left: Option<usize>,

    /// Join predicate
    pub on_clause: Option<ExprId>,
}

impl TableRef {
    /// Base table reference starting a chain
    pub fn base(name: &str, alias: Option<&str>) -> Self {
        Self {
            kind: TableRefKind::Base {
                name: name.to_string(),
                alias: alias.map(str::to_string),
            },
            join: JoinOp::Null,
            left: None,
            on_clause: None,
        }
    }

    /// Inline view reference starting a chain
    pub fn view(alias: &str, stmt: SelectStmt) -> Self {
        Self {
            kind: TableRefKind::InlineView {
                alias: alias.to_string(),
                stmt: Box::new(stmt),
            },
            join: JoinOp::Null,
            left: None,
            on_clause: None,
        }
    }

    /// Join this reference against the reference at index `left`
    pub fn joined(mut self, join: JoinOp, left: usize, on_clause: ExprId) -> Self {
        self.join = join;
        self.left = Some(left);
        self.on_clause = Some(on_clause);
        self
    }

    /// Name other clauses use to qualify this reference's columns
    pub fn qualifier(&self) -> &str {
        match &self.kind {
            TableRefKind::Base { name, alias } => alias.as_deref().unwrap_or(name),
            TableRefKind::InlineView { alias, .. } => alias.as_str(),
        }
    }

    /// Nested statement of an inline view
    pub fn view_stmt(&self) -> Option<&SelectStmt> {
        match &self.kind {
            TableRefKind::InlineView { stmt, .. } => Some(stmt.as_ref()),
            TableRefKind::Base { .. } => None,
        }
    }
}

/// Check the left-deep join chain invariant of one scope
///
/// Exactly one reference has no left side and the `Null` operator with no ON
/// clause; every other reference has a join operator, an ON clause and a left
/// side appearing earlier in the list. SQL joins each reference against the
/// whole prefix of the chain, so an outer join must name its immediate
/// predecessor as left side; inner joins may point further back.
pub fn validate_join_chain(table_refs: &[TableRef]) -> Result<()> {
    if table_refs.is_empty() {
        return Err(Error::MalformedQuery("empty join chain".to_string()));
    }

    let roots = table_refs.iter().filter(|r| r.left.is_none()).count();
    if roots != 1 {
        return Err(Error::MalformedQuery(format!(
            "join chain must have exactly one root, found {}",
            roots
        )));
    }

    for (index, table_ref) in table_refs.iter().enumerate() {
        let name = table_ref.qualifier();
        match (table_ref.left, table_ref.join) {
            (None, JoinOp::Null) => {
                if table_ref.on_clause.is_some() {
                    return Err(Error::MalformedQuery(format!(
                        "first table `{}` cannot carry an ON clause",
                        name
                    )));
                }
            }
            (None, join) => {
                return Err(Error::MalformedQuery(format!(
                    "table `{}` uses {} without a left side",
                    name, join
                )));
            }
            (Some(_), JoinOp::Null) => {
                return Err(Error::MalformedQuery(format!(
                    "table `{}` has a left side but no join operator",
                    name
                )));
            }
            (Some(left), _) => {
                if left >= index {
                    return Err(Error::MalformedQuery(format!(
                        "table `{}` joins against a later or self reference ({})",
                        name, left
                    )));
                }
                if table_ref.join != JoinOp::Inner && left + 1 != index {
                    return Err(Error::MalformedQuery(format!(
                        "{} of table `{}` must join its predecessor, not reference {}",
                        table_ref.join, name, left
                    )));
                }
                if table_ref.on_clause.is_none() {
                    return Err(Error::MalformedQuery(format!(
                        "join of table `{}` has no ON clause",
                        name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStmt {
    pub select_list: Vec<SelectionItem>,
    pub table_refs: Vec<TableRef>,
    pub where_clause: Option<ExprId>,
    pub grouping_exprs: Vec<ExprId>,
    pub having: Option<ExprId>,
    pub order_by: Vec<OrderByElement>,
    pub limit: Option<u64>,
}

impl SelectStmt {
    /// Create a statement over a validated join chain
    ///
    /// # Returns
    /// `Err(Error::MalformedQuery)` if the chain or a nested view's chain is invalid
    pub fn new(select_list: Vec<SelectionItem>, table_refs: Vec<TableRef>) -> Result<Self> {
        let stmt = Self {
            select_list,
            table_refs,
            ..Self::default()
        };
        stmt.validate()?;
        Ok(stmt)
    }

    /// Validate the join chain of this statement and of every nested view
    pub fn validate(&self) -> Result<()> {
        let mut stack = vec![self];
        while let Some(stmt) = stack.pop() {
            if stmt.select_list.is_empty() {
                return Err(Error::MalformedQuery("empty selection list".to_string()));
            }
            validate_join_chain(&stmt.table_refs)?;
            stack.extend(stmt.views());
        }
        Ok(())
    }

    /// Nested statements of this statement's inline views, in chain order
    pub fn views(&self) -> impl Iterator<Item = &SelectStmt> {
        self.table_refs.iter().filter_map(TableRef::view_stmt)
    }

    /// Output name of a selection item: its alias, else the column name of a
    /// bare column reference
    pub fn output_name<'a>(&'a self, arena: &'a ExprArena, index: usize) -> Option<&'a str> {
        let item = self.select_list.get(index)?;
        match &item.alias {
            Some(alias) => Some(alias.as_str()),
            None => arena.field(item.expr).map(|f| f.column.as_str()),
        }
    }

    /// Expression roots of this statement's own clauses, in clause order
    ///
    /// Nested views are not included.
    pub fn expr_roots(&self) -> Vec<ExprId> {
        let mut roots: Vec<ExprId> = self.select_list.iter().map(|i| i.expr).collect();
        roots.extend(self.table_refs.iter().filter_map(|r| r.on_clause));
        roots.extend(self.where_clause);
        roots.extend(self.grouping_exprs.iter().copied());
        roots.extend(self.having);
        roots.extend(self.order_by.iter().map(|o| o.expr));
        roots
    }
}

/// Column of a CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub sensitive: bool,

    /// Explicit key material; the database domain key is used when absent
    pub key: Option<ColumnKey>,
}

impl ColumnDefinition {
    /// Create a column definition without explicit key material
    pub fn new(name: &str, data_type: DataType, sensitive: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            sensitive,
            key: None,
        }
    }
}

/// Delimited row format of a CREATE TABLE statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFormat {
    pub field_delimiter: String,
}

/// CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct CreateStmt {
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    pub row_format: Option<RowFormat>,
}

/// Supported statements
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStmt),
    Create(CreateStmt),
}

/// A statement with the arena owning its expressions
#[derive(Debug, Clone)]
pub struct StatementTree {
    pub arena: ExprArena,
    pub statement: Statement,
}

impl StatementTree {
    /// Validate structural invariants
    pub fn validate(&self) -> Result<()> {
        match &self.statement {
            Statement::Select(select) => select.validate(),
            Statement::Create(create) => {
                if create.columns.is_empty() {
                    return Err(Error::MalformedQuery(format!(
                        "table `{}` has no columns",
                        create.table_name
                    )));
                }
                Ok(())
            }
        }
    }
}
