//! Reference resolution
//!
//! Links every column reference that does not name a base-table column to
//! the expression producing it: view column references to the matching
//! selection item of the inline view, alias references to the selection
//! item of the same statement. Statements are resolved innermost first, so
//! a link always lands on an already resolved subtree.

use crate::ast::{ExprArena, ExprId, SelectStmt, Statement, StatementTree, TableRefKind};
use crate::catalog::NameMatch;
use crate::error::{Error, Result};
use log::debug;

/// Links view-column and alias references to their producing expressions
pub struct Resolver {
    names: NameMatch,
}

impl Resolver {
    /// Create a resolver using the given identifier comparison
    pub fn new(names: NameMatch) -> Self {
        Self { names }
    }

    /// Resolve all references of a statement tree
    ///
    /// Running the resolver again on a resolved tree re-creates the same
    /// links.
    ///
    /// # Returns
    /// `Err(Error::Resolution)` if a view column or alias has no unique match
    pub fn resolve(&self, tree: &mut StatementTree) -> Result<()> {
        let StatementTree { arena, statement } = tree;
        let Statement::Select(root) = &*statement else {
            return Ok(());
        };

        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(stmt) = stack.pop() {
            order.push(stmt);
            stack.extend(stmt.views());
        }

        let mut links = 0;
        for stmt in order.into_iter().rev() {
            links += self.resolve_select(arena, stmt)?;
        }
        debug!("Resolved {} view or alias reference(s)", links);
        Ok(())
    }

    fn resolve_select(&self, arena: &mut ExprArena, stmt: &SelectStmt) -> Result<usize> {
        let views: Vec<(&str, &SelectStmt)> = stmt
            .table_refs
            .iter()
            .filter_map(|r| match &r.kind {
                TableRefKind::InlineView { alias, stmt } => Some((alias.as_str(), stmt.as_ref())),
                TableRefKind::Base { .. } => None,
            })
            .collect();

        let mut links = 0;
        for root in stmt.expr_roots() {
            for id in arena.subtree(root) {
                let target = match arena.field(id) {
                    Some(field) => match &field.table {
                        Some(qualifier) => {
                            match views.iter().find(|(alias, _)| self.names.matches(alias, qualifier)) {
                                Some((alias, view)) => {
                                    Some(self.view_column(arena, alias, view, &field.column)?)
                                }
                                None => None,
                            }
                        }
                        None => Some(self.alias_target(stmt, &field.column)?),
                    },
                    None => None,
                };
                if let Some(target) = target {
                    arena.link(id, target)?;
                    links += 1;
                }
            }
        }
        Ok(links)
    }

    /// Selection item of `view` whose output name is `column`
    fn view_column(
        &self,
        arena: &ExprArena,
        alias: &str,
        view: &SelectStmt,
        column: &str,
    ) -> Result<ExprId> {
        let matches: Vec<ExprId> = (0..view.select_list.len())
            .filter(|i| {
                view.output_name(arena, *i)
                    .is_some_and(|name| self.names.matches(name, column))
            })
            .map(|i| view.select_list[i].expr)
            .collect();
        match matches.as_slice() {
            [target] => Ok(*target),
            [] => Err(Error::Resolution(format!(
                "view `{}` has no column `{}`",
                alias, column
            ))),
            _ => Err(Error::Resolution(format!(
                "column `{}` of view `{}` is ambiguous",
                column, alias
            ))),
        }
    }

    /// Selection item of `stmt` aliased `name`
    fn alias_target(&self, stmt: &SelectStmt, name: &str) -> Result<ExprId> {
        let matches: Vec<ExprId> = stmt
            .select_list
            .iter()
            .filter(|item| {
                item.alias
                    .as_deref()
                    .is_some_and(|alias| self.names.matches(alias, name))
            })
            .map(|item| item.expr)
            .collect();
        match matches.as_slice() {
            [target] => Ok(*target),
            [] => Err(Error::Resolution(format!(
                "unqualified reference `{}` matches no selection alias",
                name
            ))),
            _ => Err(Error::Resolution(format!("alias `{}` is ambiguous", name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::catalog::meta::fixtures::dummy_catalog;
    use crate::query::{Binder, QueryParser};
    use crate::types::DataType;

    fn analyze(sql: &str) -> Result<StatementTree> {
        let catalog = dummy_catalog();
        let mut tree = QueryParser::new().parse(sql)?;
        Binder::new(&catalog.databases[0], NameMatch::IgnoreAsciiCase).bind(&mut tree)?;
        Resolver::new(NameMatch::IgnoreAsciiCase).resolve(&mut tree)?;
        Ok(tree)
    }

    fn find_field(tree: &StatementTree, table: Option<&str>, column: &str) -> Vec<ExprId> {
        tree.arena
            .ids()
            .filter(|id| {
                tree.arena
                    .field(*id)
                    .is_some_and(|f| f.table.as_deref() == table && f.column == column)
            })
            .collect()
    }

    #[test]
    fn test_view_column_links_to_item() {
        let tree = analyze(
            "SELECT v.cnt FROM (SELECT T1.c, count(*) AS cnt FROM T1 GROUP BY T1.c) v \
             WHERE v.cnt > 10",
        )
        .unwrap();

        let refs = find_field(&tree, Some("v"), "cnt");
        assert_eq!(refs.len(), 2);
        let target = tree.arena.field(refs[0]).unwrap().referred.unwrap();
        assert!(matches!(tree.arena.get(target), Expr::Function { name, .. } if name == "count"));
        assert_eq!(tree.arena.field(refs[0]).unwrap().data_type, DataType::BigInt);
        assert!(!tree.arena.field(refs[0]).unwrap().sensitive);

        let mut referrers = tree.arena.referrers(target);
        referrers.sort();
        assert_eq!(referrers, refs);
    }

    #[test]
    fn test_sensitive_view_column() {
        let tree = analyze("SELECT v.x FROM (SELECT T1.a + T1.c AS x FROM T1) v").unwrap();
        let outer = find_field(&tree, Some("v"), "x")[0];
        let field = tree.arena.field(outer).unwrap();
        assert!(field.sensitive);
        assert!(field.referred.is_some());
    }

    #[test]
    fn test_nested_views_resolve_through_chain() {
        let tree = analyze(
            "SELECT w.a FROM (SELECT v.a FROM (SELECT T1.a FROM T1) v) w",
        )
        .unwrap();
        let outer = find_field(&tree, Some("w"), "a")[0];
        let base = tree.arena.base_field(outer).unwrap();
        assert_eq!(tree.arena.field(base).unwrap().table.as_deref(), Some("T1"));
    }

    #[test]
    fn test_alias_reference() {
        let tree = analyze("SELECT T1.a AS x FROM T1 ORDER BY x").unwrap();
        let alias = find_field(&tree, None, "x")[0];
        let target = tree.arena.field(alias).unwrap().referred.unwrap();
        assert_eq!(tree.arena.field(target).unwrap().column, "a");
    }

    #[test]
    fn test_missing_view_column() {
        assert!(matches!(
            analyze("SELECT v.zz FROM (SELECT T1.a FROM T1) v"),
            Err(Error::Resolution(_))
        ));
    }

    #[test]
    fn test_ambiguous_view_column() {
        assert!(matches!(
            analyze("SELECT v.a FROM (SELECT T1.a, T1.c AS a FROM T1) v"),
            Err(Error::Resolution(_))
        ));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut tree = analyze(
            "SELECT v.cnt FROM (SELECT T1.c, count(*) AS cnt FROM T1 GROUP BY T1.c) v",
        )
        .unwrap();
        let refs = find_field(&tree, Some("v"), "cnt");
        let before = tree.arena.field(refs[0]).unwrap().clone();

        Resolver::new(NameMatch::IgnoreAsciiCase)
            .resolve(&mut tree)
            .unwrap();

        assert_eq!(tree.arena.field(refs[0]).unwrap(), &before);
        let target = before.referred.unwrap();
        assert_eq!(tree.arena.referrers(target), refs);
    }
}
