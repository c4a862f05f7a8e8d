//! Catalog binding
//!
//! The binder sources the type, sensitivity and key of every base-table
//! column reference from the catalog. It qualifies unqualified references
//! when exactly one table or view in scope provides the column. References
//! to view columns and to select-list aliases are left for the resolver.
//!
//! Each SELECT is its own scope: columns of an enclosing query are not
//! visible inside a nested view.

use crate::ast::{Expr, ExprArena, ExprId, SelectStmt, Statement, StatementTree, TableRefKind};
use crate::catalog::{DatabaseMeta, NameMatch, TableMeta};
use crate::error::{Error, ObjectKind, Result};
use log::debug;

/// How a clause may use select-list aliases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AliasUse {
    /// Only input columns are visible (select list, ON, WHERE)
    Never,

    /// Input columns first, then aliases (GROUP BY, HAVING)
    Fallback,

    /// Aliases first, then input columns (ORDER BY)
    Prefer,
}

enum Source<'s> {
    Table(&'s TableMeta),
    View(&'s SelectStmt),
}

struct ScopeEntry<'s> {
    qualifier: &'s str,
    source: Source<'s>,
}

/// Outcome of binding one column reference
enum Binding {
    /// Base column: canonical qualifier and catalog metadata
    Column { qualifier: String, table: usize },

    /// View column, qualified, linked later by the resolver
    ViewColumn { qualifier: String },

    /// Select-list alias, linked later by the resolver
    Alias,
}

/// Binds column references to catalog metadata
pub struct Binder<'a> {
    database: &'a DatabaseMeta,
    names: NameMatch,
}

impl<'a> Binder<'a> {
    /// Create a binder over one database
    pub fn new(database: &'a DatabaseMeta, names: NameMatch) -> Self {
        Self { database, names }
    }

    /// Bind every column reference of a statement
    ///
    /// # Returns
    /// `Err(Error::NotFound)` for unknown tables or columns, `Err(Error::Resolution)`
    /// for ambiguous references, `Err(Error::Catalog)` when a CREATE names an
    /// existing table
    pub fn bind(&self, tree: &mut StatementTree) -> Result<()> {
        let StatementTree { arena, statement } = tree;
        match statement {
            Statement::Select(select) => {
                let mut stack = vec![&*select];
                while let Some(stmt) = stack.pop() {
                    self.bind_select(arena, stmt)?;
                    stack.extend(stmt.views());
                }
                Ok(())
            }
            Statement::Create(create) => {
                if self.database.has_table(&create.table_name, self.names) {
                    return Err(Error::Catalog(format!(
                        "table {} already exists in database {}",
                        create.table_name, self.database.name
                    )));
                }
                Ok(())
            }
        }
    }

    fn scope<'s>(&'s self, stmt: &'s SelectStmt) -> Result<Vec<ScopeEntry<'s>>> {
        let mut scope: Vec<ScopeEntry<'s>> = Vec::with_capacity(stmt.table_refs.len());
        for table_ref in &stmt.table_refs {
            let qualifier = table_ref.qualifier();
            if scope
                .iter()
                .any(|e| self.names.matches(e.qualifier, qualifier))
            {
                return Err(Error::Resolution(format!(
                    "table qualifier `{}` is used twice",
                    qualifier
                )));
            }
            let source = match &table_ref.kind {
                TableRefKind::Base { name, .. } => {
                    Source::Table(self.database.table(name, self.names)?)
                }
                TableRefKind::InlineView { stmt, .. } => Source::View(stmt),
            };
            scope.push(ScopeEntry { qualifier, source });
        }
        Ok(scope)
    }

    fn bind_select(&self, arena: &mut ExprArena, stmt: &SelectStmt) -> Result<()> {
        let scope = self.scope(stmt)?;

        let mut clauses: Vec<(ExprId, AliasUse)> = Vec::new();
        clauses.extend(stmt.select_list.iter().map(|i| (i.expr, AliasUse::Never)));
        clauses.extend(
            stmt.table_refs
                .iter()
                .filter_map(|r| r.on_clause)
                .map(|id| (id, AliasUse::Never)),
        );
        clauses.extend(stmt.where_clause.map(|id| (id, AliasUse::Never)));
        clauses.extend(stmt.grouping_exprs.iter().map(|id| (*id, AliasUse::Fallback)));
        clauses.extend(stmt.having.map(|id| (id, AliasUse::Fallback)));
        clauses.extend(stmt.order_by.iter().map(|o| (o.expr, AliasUse::Prefer)));

        for (root, alias_use) in clauses {
            for id in arena.subtree(root) {
                let binding = match arena.field(id) {
                    Some(field) if field.referred.is_none() => {
                        self.bind_field(arena, stmt, &scope, id, alias_use)?
                    }
                    _ => continue,
                };
                self.apply(arena, id, &scope, binding);
            }
        }
        debug!(
            "Bound {} table reference(s) and {} selection item(s)",
            scope.len(),
            stmt.select_list.len()
        );
        Ok(())
    }

    fn provides(&self, arena: &ExprArena, entry: &ScopeEntry<'_>, column: &str) -> bool {
        match entry.source {
            Source::Table(table) => table.column(column, self.names).is_some(),
            Source::View(view) => (0..view.select_list.len()).any(|i| {
                view.output_name(arena, i)
                    .is_some_and(|name| self.names.matches(name, column))
            }),
        }
    }

    fn bind_field(
        &self,
        arena: &ExprArena,
        stmt: &SelectStmt,
        scope: &[ScopeEntry<'_>],
        id: ExprId,
        alias_use: AliasUse,
    ) -> Result<Binding> {
        let field = match arena.field(id) {
            Some(field) => field,
            None => return Err(Error::Resolution("not a column reference".to_string())),
        };

        let is_alias = || {
            field.table.is_none()
                && stmt.select_list.iter().any(|item| {
                    item.alias
                        .as_deref()
                        .is_some_and(|alias| self.names.matches(alias, &field.column))
                })
        };
        if alias_use == AliasUse::Prefer && is_alias() {
            return Ok(Binding::Alias);
        }

        let position = match &field.table {
            Some(qualifier) => scope
                .iter()
                .position(|e| self.names.matches(e.qualifier, qualifier))
                .ok_or_else(|| Error::not_found(ObjectKind::Table, qualifier.as_str()))?,
            None => {
                let candidates: Vec<usize> = scope
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| self.provides(arena, e, &field.column))
                    .map(|(i, _)| i)
                    .collect();
                match candidates.as_slice() {
                    [only] => *only,
                    [] if alias_use != AliasUse::Never && is_alias() => return Ok(Binding::Alias),
                    [] => return Err(Error::not_found(ObjectKind::Column, field.column.as_str())),
                    _ => {
                        return Err(Error::Resolution(format!(
                            "column `{}` is ambiguous",
                            field.column
                        )))
                    }
                }
            }
        };

        let entry = &scope[position];
        match entry.source {
            Source::Table(table) => {
                if table.column(&field.column, self.names).is_none() {
                    return Err(Error::not_found(
                        ObjectKind::Column,
                        format!("{}.{}", entry.qualifier, field.column),
                    ));
                }
                Ok(Binding::Column {
                    qualifier: entry.qualifier.to_string(),
                    table: position,
                })
            }
            Source::View(_) => Ok(Binding::ViewColumn {
                qualifier: entry.qualifier.to_string(),
            }),
        }
    }

    fn apply(&self, arena: &mut ExprArena, id: ExprId, scope: &[ScopeEntry<'_>], binding: Binding) {
        let Expr::Field(field) = arena.get_mut(id) else {
            return;
        };
        match binding {
            Binding::Column { qualifier, table } => {
                let Source::Table(meta) = scope[table].source else {
                    return;
                };
                if let Some(column) = meta.column(&field.column, self.names) {
                    field.table = Some(qualifier);
                    field.column = column.name.clone();
                    field.data_type = column.data_type.clone();
                    field.sensitive = column.sensitive;
                    field.key = column.key.clone();
                }
            }
            Binding::ViewColumn { qualifier } => field.table = Some(qualifier),
            Binding::Alias => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::meta::fixtures::{dummy_catalog, key};
    use crate::query::QueryParser;
    use crate::types::DataType;

    fn bind(sql: &str) -> Result<StatementTree> {
        let catalog = dummy_catalog();
        let mut tree = QueryParser::new().parse(sql)?;
        Binder::new(&catalog.databases[0], NameMatch::IgnoreAsciiCase).bind(&mut tree)?;
        Ok(tree)
    }

    fn fields(tree: &StatementTree) -> Vec<crate::ast::FieldLiteral> {
        tree.arena
            .ids()
            .filter_map(|id| tree.arena.field(id).cloned())
            .collect()
    }

    #[test]
    fn test_bind_qualifies_and_types_columns() {
        let tree = bind("SELECT a, T2.c FROM T1 JOIN T2 ON T1.id = T2.id").unwrap();
        let fields = fields(&tree);

        assert_eq!(fields[0].table.as_deref(), Some("T1"));
        assert!(fields[0].sensitive);
        assert_eq!(fields[0].key, Some(key(1, 3)));
        assert_eq!(fields[0].data_type, DataType::Int);

        assert_eq!(fields[1].table.as_deref(), Some("T2"));
        assert!(!fields[1].sensitive);
        assert_eq!(fields[1].key, None);
    }

    #[test]
    fn test_bind_through_alias() {
        let tree = bind("SELECT t.d FROM T3 t WHERE t.ID2 = 4").unwrap();
        let fields = fields(&tree);
        assert_eq!(fields[0].key, Some(key(5, 9)));
        assert_eq!(fields[1].column, "id2");
    }

    #[test]
    fn test_bind_errors() {
        assert!(matches!(
            bind("SELECT a FROM T9"),
            Err(Error::NotFound { kind: ObjectKind::Table, .. })
        ));
        assert!(matches!(
            bind("SELECT T1.zzz FROM T1"),
            Err(Error::NotFound { kind: ObjectKind::Column, .. })
        ));
        assert!(matches!(
            bind("SELECT x.a FROM T1"),
            Err(Error::NotFound { kind: ObjectKind::Table, .. })
        ));
        assert!(matches!(
            bind("SELECT c FROM T1 JOIN T2 ON T1.id = T2.id"),
            Err(Error::Resolution(_))
        ));
        assert!(matches!(
            bind("SELECT a FROM T1 JOIN T1 ON T1.id = T1.id"),
            Err(Error::Resolution(_))
        ));
    }

    #[test]
    fn test_bind_leaves_aliases_and_view_columns() {
        let tree = bind(
            "SELECT v.cnt AS n FROM (SELECT c, count(*) AS cnt FROM T1 GROUP BY c) v \
             GROUP BY v.cnt ORDER BY n",
        )
        .unwrap();
        let fields = fields(&tree);
        let n = fields.iter().find(|f| f.column == "n").unwrap();
        assert_eq!(n.table, None);
        let cnt = fields.iter().find(|f| f.column == "cnt").unwrap();
        assert_eq!(cnt.table.as_deref(), Some("v"));
        assert!(!cnt.sensitive);
        let inner_c: Vec<_> = fields.iter().filter(|f| f.column == "c").collect();
        assert!(inner_c.iter().all(|f| f.table.as_deref() == Some("T1")));
    }

    #[test]
    fn test_alias_not_visible_in_where() {
        assert!(matches!(
            bind("SELECT a AS x FROM T1 WHERE x > 1"),
            Err(Error::NotFound { kind: ObjectKind::Column, .. })
        ));
    }

    #[test]
    fn test_create_existing_table() {
        assert!(matches!(
            bind("CREATE TABLE t1 (x INT)"),
            Err(Error::Catalog(_))
        ));
        assert!(bind("CREATE TABLE t4 (x INT)").is_ok());
    }

    #[test]
    fn test_bind_is_repeatable() {
        let catalog = dummy_catalog();
        let mut tree = QueryParser::new()
            .parse("SELECT a FROM T1 WHERE a > 1")
            .unwrap();
        let binder = Binder::new(&catalog.databases[0], NameMatch::IgnoreAsciiCase);
        binder.bind(&mut tree).unwrap();
        binder.bind(&mut tree).unwrap();
        assert!(tree
            .arena
            .ids()
            .filter_map(|id| match tree.arena.get(id) {
                Expr::Field(f) => Some(f),
                _ => None,
            })
            .all(|f| f.table.as_deref() == Some("T1")));
    }
}
