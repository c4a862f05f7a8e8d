//! Ciphertext rewriting
//!
//! The rewriter maps an analyzed statement tree onto an equivalent tree over
//! the encrypted storage layout. The source tree is never modified; every
//! node is rewritten once into a fresh arena, and a node shared by several
//! references (a view column used in more than one clause) maps to one
//! rewritten node.
//!
//! Each rewritten expression carries a cipher state:
//!
//! - `Plain`: the backend sees plaintext values
//! - `Ordered`: order-preserving ciphertext under one column key, comparable
//!   with other ciphertext of the same key
//! - `Additive`: the result of a ciphertext function; it can be aggregated
//!   or projected but not compared
//!
//! Constructs with no ciphertext-domain equivalent fail with
//! [`Error::UnsupportedRewrite`] naming the operator and its operand.

use crate::ast::{
    ArithmeticOp, BinaryOp, ColumnDefinition, CreateStmt, Expr, ExprArena, ExprId, FieldLiteral,
    FunctionArgs, OrderByElement, SelectStmt, SelectionItem, Statement, StatementTree, TableRef,
    TableRefKind,
};
use crate::catalog::{
    is_reserved_column, ColumnKey, ColumnMeta, DatabaseMeta, TableMeta, RESERVED_COLUMNS,
};
use crate::config::RewriteConfig;
use crate::crypto::{CipherScheme, KeyGenerator};
use crate::error::{Error, Result};
use crate::query::emitter::SqlEmitter;
use crate::types::{DataType, Value, I64_LIMIT};
use log::debug;
use rand::RngCore;
use std::collections::{HashMap, HashSet};

/// Representation of a rewritten value at the backend
#[derive(Debug, Clone, PartialEq, Eq)]
enum CipherState {
    Plain,
    Ordered(ColumnKey),
    Additive(ColumnKey),
}

impl CipherState {
    fn key(&self) -> Option<&ColumnKey> {
        match self {
            CipherState::Plain => None,
            CipherState::Ordered(key) | CipherState::Additive(key) => Some(key),
        }
    }

    fn is_cipher(&self) -> bool {
        !matches!(self, CipherState::Plain)
    }
}

/// A node of the rewritten arena with its cipher state
#[derive(Debug, Clone)]
struct Rewritten {
    id: ExprId,
    state: CipherState,

    /// Plaintext value when the node is a foldable constant
    constant: Option<Value>,
}

impl Rewritten {
    fn plain(id: ExprId, constant: Option<Value>) -> Self {
        Self {
            id,
            state: CipherState::Plain,
            constant,
        }
    }
}

/// Result of rewriting one statement
#[derive(Debug, Clone)]
pub struct RewriteOutput {
    /// Rewritten statement over the storage layout
    pub tree: StatementTree,

    /// Catalog entry of the table a CREATE statement defines
    pub table: Option<TableMeta>,
}

/// Rewrites analyzed statements into their ciphertext form
pub struct Rewriter<'a> {
    config: &'a RewriteConfig,
    database: &'a DatabaseMeta,
    scheme: &'a dyn CipherScheme,
}

impl<'a> Rewriter<'a> {
    /// Create a rewriter
    ///
    /// # Arguments
    /// * `config` - Storage naming and backend function names
    /// * `database` - Database the statement runs against
    /// * `scheme` - Mapping of plaintext constants into ciphertext space
    pub fn new(
        config: &'a RewriteConfig,
        database: &'a DatabaseMeta,
        scheme: &'a dyn CipherScheme,
    ) -> Self {
        Self {
            config,
            database,
            scheme,
        }
    }

    /// Rewrite a statement using the thread-local random source for new keys
    pub fn rewrite(&self, tree: &StatementTree) -> Result<RewriteOutput> {
        self.rewrite_with_rng(tree, &mut rand::rng())
    }

    /// Rewrite a statement
    ///
    /// The random source is only drawn from when a CREATE statement needs the
    /// key of its reserved columns.
    ///
    /// # Arguments
    /// * `tree` - Bound and resolved statement
    /// * `rng` - Random source
    ///
    /// # Returns
    /// The rewritten statement and, for CREATE, the new table's metadata
    pub fn rewrite_with_rng<R: RngCore + ?Sized>(
        &self,
        tree: &StatementTree,
        rng: &mut R,
    ) -> Result<RewriteOutput> {
        match &tree.statement {
            Statement::Select(select) => {
                let mut rewriter = ExprRewriter::new(self, &tree.arena);
                let select = rewriter.select_tree(select)?;
                debug!(
                    "Rewrote SELECT into {} expression node(s)",
                    rewriter.target.len()
                );
                Ok(RewriteOutput {
                    tree: StatementTree {
                        arena: rewriter.target,
                        statement: Statement::Select(select),
                    },
                    table: None,
                })
            }
            Statement::Create(create) => {
                let (create, table) = self.create(create, rng)?;
                Ok(RewriteOutput {
                    tree: StatementTree {
                        arena: ExprArena::new(),
                        statement: Statement::Create(create),
                    },
                    table: Some(table),
                })
            }
        }
    }

    fn create<R: RngCore + ?Sized>(
        &self,
        create: &CreateStmt,
        rng: &mut R,
    ) -> Result<(CreateStmt, TableMeta)> {
        let names = self.config.name_match();
        let mut seen: Vec<&str> = Vec::with_capacity(create.columns.len());
        for column in &create.columns {
            if is_reserved_column(&column.name) {
                return Err(Error::MalformedQuery(format!(
                    "column name `{}` is reserved",
                    column.name
                )));
            }
            if seen.iter().any(|name| names.matches(name, &column.name)) {
                return Err(Error::MalformedQuery(format!(
                    "duplicate column `{}`",
                    column.name
                )));
            }
            seen.push(&column.name);
        }

        let cipher_type = self.config.cipher_type();
        let mut storage = Vec::with_capacity(create.columns.len() + RESERVED_COLUMNS.len());
        let mut meta = Vec::with_capacity(storage.capacity());
        for column in &create.columns {
            if !column.sensitive {
                storage.push(column.clone());
                meta.push(ColumnMeta::plain(column.name.clone(), column.data_type.clone()));
                continue;
            }
            if !column.data_type.is_integral() {
                return Err(Error::unsupported(
                    "sensitive column",
                    format!("{} {}", column.name, column.data_type),
                ));
            }
            let key = column
                .key
                .clone()
                .unwrap_or_else(|| self.database.domain_key.clone());
            storage.push(ColumnDefinition {
                name: self.config.storage_name(&column.name),
                data_type: cipher_type.clone(),
                sensitive: true,
                key: Some(key.clone()),
            });
            meta.push(ColumnMeta::sensitive(
                column.name.clone(),
                column.data_type.clone(),
                key,
            ));
        }

        let slot = self.database.next_slot();
        let row_key = KeyGenerator::reserved_key(rng, self.database, slot);
        for name in RESERVED_COLUMNS {
            storage.push(ColumnDefinition {
                name: name.to_string(),
                data_type: cipher_type.clone(),
                sensitive: true,
                key: Some(row_key.clone()),
            });
            meta.push(ColumnMeta::sensitive(name, DataType::BigInt, row_key.clone()));
        }

        let table = TableMeta::new(create.table_name.clone(), meta);
        table.validate()?;
        debug!(
            "Rewrote CREATE TABLE {} with {} storage column(s) in slot {}",
            create.table_name,
            storage.len(),
            slot
        );

        Ok((
            CreateStmt {
                table_name: create.table_name.clone(),
                columns: storage,
                row_format: create.row_format.clone(),
            },
            table,
        ))
    }
}

/// Rewriting state of one SELECT tree
struct ExprRewriter<'r> {
    config: &'r RewriteConfig,
    scheme: &'r dyn CipherScheme,
    source: &'r ExprArena,
    target: ExprArena,
    memo: HashMap<ExprId, Rewritten>,
}

impl<'r> ExprRewriter<'r> {
    fn new(rules: &Rewriter<'r>, source: &'r ExprArena) -> Self {
        Self {
            config: rules.config,
            scheme: rules.scheme,
            source,
            target: ExprArena::new(),
            memo: HashMap::new(),
        }
    }

    /// Rewrite a statement and its nested views, innermost first
    fn select_tree(&mut self, root: &SelectStmt) -> Result<SelectStmt> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(stmt) = stack.pop() {
            order.push(stmt);
            stack.extend(stmt.views());
        }

        let mut done: Vec<SelectStmt> = Vec::new();
        for stmt in order.into_iter().rev() {
            let count = stmt.views().count();
            let views = done.split_off(done.len() - count);
            let rewritten = self.select(stmt, views)?;
            done.push(rewritten);
        }
        done.pop()
            .ok_or_else(|| Error::MalformedQuery("empty statement".to_string()))
    }

    fn select(&mut self, stmt: &SelectStmt, views: Vec<SelectStmt>) -> Result<SelectStmt> {
        self.check_view_references(stmt)?;

        let mut select_list = Vec::with_capacity(stmt.select_list.len());
        for item in &stmt.select_list {
            let rewritten = self.expr(item.expr)?;
            let alias = item.alias.clone().or_else(|| match self.source.field(item.expr) {
                Some(field)
                    if field.referred.is_none()
                        && field.sensitive
                        && self.config.storage_name(&field.column) != field.column =>
                {
                    Some(field.column.clone())
                }
                _ => None,
            });
            select_list.push(SelectionItem {
                expr: rewritten.id,
                alias,
            });
        }

        let mut views = views.into_iter();
        let mut table_refs = Vec::with_capacity(stmt.table_refs.len());
        for table_ref in &stmt.table_refs {
            let kind = match &table_ref.kind {
                TableRefKind::Base { name, alias } => TableRefKind::Base {
                    name: name.clone(),
                    alias: alias.clone(),
                },
                TableRefKind::InlineView { alias, .. } => TableRefKind::InlineView {
                    alias: alias.clone(),
                    stmt: Box::new(views.next().ok_or_else(|| {
                        Error::MalformedQuery(format!("view `{}` has no statement", alias))
                    })?),
                },
            };
            let on_clause = match table_ref.on_clause {
                Some(on) => Some(self.predicate(on, "ON")?),
                None => None,
            };
            table_refs.push(TableRef {
                kind,
                join: table_ref.join,
                left: table_ref.left,
                on_clause,
            });
        }

        let where_clause = match stmt.where_clause {
            Some(id) => Some(self.predicate(id, "WHERE")?),
            None => None,
        };
        let mut grouping_exprs = Vec::with_capacity(stmt.grouping_exprs.len());
        for id in &stmt.grouping_exprs {
            grouping_exprs.push(self.sort_key(*id, "GROUP BY")?);
        }
        let having = match stmt.having {
            Some(id) => Some(self.predicate(id, "HAVING")?),
            None => None,
        };
        let mut order_by = Vec::with_capacity(stmt.order_by.len());
        for element in &stmt.order_by {
            order_by.push(OrderByElement {
                expr: self.sort_key(element.expr, "ORDER BY")?,
                ascending: element.ascending,
            });
        }

        Ok(SelectStmt {
            select_list,
            table_refs,
            where_clause,
            grouping_exprs,
            having,
            order_by,
            limit: stmt.limit,
        })
    }

    /// View columns must be linked before they can be rewritten
    fn check_view_references(&self, stmt: &SelectStmt) -> Result<()> {
        let names = self.config.name_match();
        let views: Vec<&str> = stmt
            .table_refs
            .iter()
            .filter(|r| r.view_stmt().is_some())
            .map(|r| r.qualifier())
            .collect();
        for root in stmt.expr_roots() {
            for id in self.source.subtree(root) {
                let Some(field) = self.source.field(id) else {
                    continue;
                };
                let unresolved = field.referred.is_none()
                    && field
                        .table
                        .as_deref()
                        .is_some_and(|q| views.iter().any(|v| names.matches(v, q)));
                if unresolved {
                    return Err(Error::Resolution(format!(
                        "view column `{}` is not resolved",
                        field.qualified_name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn text(&self, id: ExprId) -> String {
        SqlEmitter::new(self.source).expr(id)
    }

    /// Rewrite a clause that filters rows; it must evaluate in plaintext
    fn predicate(&mut self, id: ExprId, clause: &str) -> Result<ExprId> {
        let rewritten = self.expr(id)?;
        if rewritten.state.is_cipher() {
            return Err(Error::unsupported(clause, self.text(id)));
        }
        Ok(rewritten.id)
    }

    /// Rewrite a grouping or ordering key; ciphertext must be comparable
    fn sort_key(&mut self, id: ExprId, clause: &str) -> Result<ExprId> {
        let rewritten = self.expr(id)?;
        if let CipherState::Additive(_) = rewritten.state {
            return Err(Error::unsupported(clause, self.text(id)));
        }
        Ok(rewritten.id)
    }

    fn dependencies(&self, id: ExprId) -> Vec<ExprId> {
        let mut deps = self.source.children(id);
        if let Some(referred) = self.source.field(id).and_then(|f| f.referred) {
            deps.push(referred);
        }
        deps
    }

    /// Rewrite an expression, dependencies first
    fn expr(&mut self, root: ExprId) -> Result<Rewritten> {
        let mut visiting = HashSet::new();
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if self.memo.contains_key(&id) {
                continue;
            }
            if expanded {
                let rewritten = self.node(id)?;
                visiting.remove(&id);
                self.memo.insert(id, rewritten);
                continue;
            }
            if !visiting.insert(id) {
                return Err(Error::Resolution(format!(
                    "expression `{}` depends on itself",
                    self.source.describe(id)
                )));
            }
            stack.push((id, true));
            for dep in self.dependencies(id) {
                if !self.memo.contains_key(&dep) {
                    stack.push((dep, false));
                }
            }
        }
        self.rewritten(root)
    }

    fn rewritten(&self, id: ExprId) -> Result<Rewritten> {
        self.memo.get(&id).cloned().ok_or_else(|| {
            Error::Resolution(format!(
                "expression `{}` was not rewritten",
                self.source.describe(id)
            ))
        })
    }

    /// Copy a source node into the target arena with rewritten children
    fn rebuild(&mut self, id: ExprId) -> Result<ExprId> {
        let source = self.source;
        let expr = match source.get(id) {
            Expr::Literal(value) => Expr::Literal(value.clone()),
            Expr::Field(field) => Expr::Field(FieldLiteral {
                referred: None,
                ..field.clone()
            }),
            Expr::Arithmetic { op, children } => Expr::Arithmetic {
                op: *op,
                children: children
                    .iter()
                    .map(|c| self.rewritten(*c).map(|r| r.id))
                    .collect::<Result<_>>()?,
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: self.rewritten(*left)?.id,
                right: self.rewritten(*right)?.id,
            },
            Expr::Compound { op, left, right } => Expr::Compound {
                op: *op,
                left: self.rewritten(*left)?.id,
                right: self.rewritten(*right)?.id,
            },
            Expr::Function { name, args } => Expr::Function {
                name: name.clone(),
                args: match args {
                    FunctionArgs::Star => FunctionArgs::Star,
                    FunctionArgs::List(args) => FunctionArgs::List(
                        args.iter()
                            .map(|a| self.rewritten(*a).map(|r| r.id))
                            .collect::<Result<_>>()?,
                    ),
                },
            },
        };
        Ok(self.target.push(expr))
    }

    fn node(&mut self, id: ExprId) -> Result<Rewritten> {
        let source = self.source;
        match source.get(id) {
            Expr::Literal(value) => {
                let constant = value.clone();
                let new_id = self.rebuild(id)?;
                Ok(Rewritten::plain(new_id, Some(constant)))
            }
            Expr::Field(field) => self.field(id, field),
            Expr::Arithmetic { op, children } => {
                let parts = children
                    .iter()
                    .map(|c| self.rewritten(*c))
                    .collect::<Result<Vec<_>>>()?;
                if parts.iter().all(|p| !p.state.is_cipher()) {
                    let constant = parts
                        .iter()
                        .map(|p| p.constant.clone())
                        .collect::<Option<Vec<_>>>()
                        .and_then(|values| fold_all(*op, &values));
                    let new_id = self.rebuild(id)?;
                    return Ok(Rewritten::plain(new_id, constant));
                }
                let mut parts = parts.into_iter();
                let mut acc = parts
                    .next()
                    .ok_or_else(|| Error::MalformedQuery("empty arithmetic".to_string()))?;
                for part in parts {
                    acc = self.combine(*op, acc, part, id)?;
                }
                Ok(acc)
            }
            Expr::Binary { op, left, right } => {
                let left = self.rewritten(*left)?;
                let right = self.rewritten(*right)?;
                self.compare(*op, left, right, id)
            }
            Expr::Compound { op, left, right } => {
                let cipher = self.rewritten(*left)?.state.is_cipher()
                    || self.rewritten(*right)?.state.is_cipher();
                if cipher {
                    return Err(Error::unsupported(op.keyword(), self.text(id)));
                }
                let new_id = self.rebuild(id)?;
                Ok(Rewritten::plain(new_id, None))
            }
            Expr::Function { name, args } => self.function(id, name, args),
        }
    }

    fn field(&mut self, id: ExprId, field: &FieldLiteral) -> Result<Rewritten> {
        if let Some(referred) = field.referred {
            let target = self.rewritten(referred)?;
            let new_id = self.target.push(Expr::Field(FieldLiteral::new(
                field.table.as_deref(),
                &field.column,
            )));
            self.target.link(new_id, target.id)?;
            let data_type = if target.state.is_cipher() {
                self.config.cipher_type()
            } else {
                self.target.result_type(target.id)
            };
            if let Expr::Field(linked) = self.target.get_mut(new_id) {
                linked.data_type = data_type;
                linked.sensitive = target.state.is_cipher();
                linked.key = target.state.key().cloned();
            }
            return Ok(Rewritten {
                id: new_id,
                state: target.state,
                constant: None,
            });
        }

        if !field.sensitive {
            let new_id = self.rebuild(id)?;
            return Ok(Rewritten::plain(new_id, None));
        }

        let key = field.key.clone().ok_or_else(|| {
            Error::Resolution(format!(
                "sensitive column `{}` has no key",
                field.qualified_name()
            ))
        })?;
        let new_id = self.target.push(Expr::Field(FieldLiteral {
            table: field.table.clone(),
            column: self.config.storage_name(&field.column),
            data_type: self.config.cipher_type(),
            sensitive: true,
            key: Some(key.clone()),
            referred: None,
        }));
        Ok(Rewritten {
            id: new_id,
            state: CipherState::Ordered(key),
            constant: None,
        })
    }

    /// Backend combining function over ciphertexts of `key`
    ///
    /// The key's zero point is appended as the last argument.
    fn udf(&mut self, name: &str, mut args: Vec<ExprId>, key: &ColumnKey) -> Result<ExprId> {
        let zero = self.scheme.zero_point(key)?;
        args.push(self.target.push(Expr::Literal(Value::Cipher(zero))));
        Ok(self.target.push(Expr::call(name, args)))
    }

    /// Map a plaintext constant operand into ciphertext under `key`
    fn encrypt_operand(
        &mut self,
        operand: &Rewritten,
        key: &ColumnKey,
        operator: &str,
        origin: ExprId,
    ) -> Result<ExprId> {
        let Some(constant) = &operand.constant else {
            return Err(Error::unsupported(
                operator,
                format!("{} (encrypted and plaintext columns)", self.text(origin)),
            ));
        };
        let value = constant
            .as_exact_int()
            .ok_or_else(|| Error::unsupported(operator, self.text(origin)))?;
        let cipher = self.scheme.encrypt(value, key)?;
        Ok(self.target.push(Expr::Literal(Value::Cipher(cipher))))
    }

    fn combine(
        &mut self,
        op: ArithmeticOp,
        left: Rewritten,
        right: Rewritten,
        origin: ExprId,
    ) -> Result<Rewritten> {
        let operator = op.symbol();
        match (&left.state, &right.state) {
            (CipherState::Plain, CipherState::Plain) => {
                let constant = match (&left.constant, &right.constant) {
                    (Some(l), Some(r)) => fold(op, l, r),
                    _ => None,
                };
                let id = self.target.push(Expr::Arithmetic {
                    op,
                    children: vec![left.id, right.id],
                });
                Ok(Rewritten::plain(id, constant))
            }
            _ if matches!(op, ArithmeticOp::Divide | ArithmeticOp::Modulo) => {
                Err(Error::unsupported(operator, self.text(origin)))
            }
            (cipher, CipherState::Plain) | (CipherState::Plain, cipher) => {
                let key = cipher
                    .key()
                    .cloned()
                    .ok_or_else(|| Error::unsupported(operator, self.text(origin)))?;
                let cipher_on_left = left.state.is_cipher();
                let (column, constant) = if cipher_on_left {
                    (&left, &right)
                } else {
                    (&right, &left)
                };

                if op == ArithmeticOp::Multiply {
                    let factor = constant
                        .constant
                        .as_ref()
                        .and_then(Value::as_exact_int)
                        .ok_or_else(|| Error::unsupported(operator, self.text(origin)))?;
                    let factor = self.target.push(Expr::Literal(Value::Int(factor)));
                    let name = self.config.udf.scale.clone();
                    let id = self.udf(&name, vec![column.id, factor], &key)?;
                    return Ok(self.additive(id, key));
                }

                let encrypted = self.encrypt_operand(constant, &key, operator, origin)?;
                let args = if cipher_on_left {
                    vec![column.id, encrypted]
                } else {
                    vec![encrypted, column.id]
                };
                let name = self.additive_name(op);
                let id = self.udf(&name, args, &key)?;
                Ok(self.additive(id, key))
            }
            (l, r) => {
                if op == ArithmeticOp::Multiply {
                    return Err(Error::unsupported(operator, self.text(origin)));
                }
                let (Some(lk), Some(rk)) = (l.key(), r.key()) else {
                    return Err(Error::unsupported(operator, self.text(origin)));
                };
                if lk != rk {
                    return Err(Error::unsupported(
                        operator,
                        format!("{} (different key domains)", self.text(origin)),
                    ));
                }
                let key = lk.clone();
                let name = self.additive_name(op);
                let id = self.udf(&name, vec![left.id, right.id], &key)?;
                Ok(self.additive(id, key))
            }
        }
    }

    fn additive_name(&self, op: ArithmeticOp) -> String {
        match op {
            ArithmeticOp::Subtract => self.config.udf.sub.clone(),
            _ => self.config.udf.add.clone(),
        }
    }

    fn additive(&self, id: ExprId, key: ColumnKey) -> Rewritten {
        Rewritten {
            id,
            state: CipherState::Additive(key),
            constant: None,
        }
    }

    fn compare(
        &mut self,
        op: BinaryOp,
        left: Rewritten,
        right: Rewritten,
        origin: ExprId,
    ) -> Result<Rewritten> {
        let operator = op.symbol();
        match (&left.state, &right.state) {
            (CipherState::Plain, CipherState::Plain) => {
                let id = self.target.push(Expr::Binary {
                    op,
                    left: left.id,
                    right: right.id,
                });
                Ok(Rewritten::plain(id, None))
            }
            (CipherState::Ordered(lk), CipherState::Ordered(rk)) => {
                if lk != rk {
                    return Err(Error::unsupported(
                        operator,
                        format!("{} (different key domains)", self.text(origin)),
                    ));
                }
                let id = self.target.push(Expr::Binary {
                    op,
                    left: left.id,
                    right: right.id,
                });
                Ok(Rewritten::plain(id, None))
            }
            (CipherState::Ordered(key), CipherState::Plain) => {
                let key = key.clone();
                self.compare_constant(op, left.id, &key, &right, origin)
            }
            (CipherState::Plain, CipherState::Ordered(key)) => {
                let key = key.clone();
                self.compare_constant(op.mirror(), right.id, &key, &left, origin)
            }
            _ => Err(Error::unsupported(operator, self.text(origin))),
        }
    }

    /// Compare an order-preserving column with a plaintext constant
    ///
    /// A fractional constant is replaced by the integer bound selecting the
    /// same integer rows.
    fn compare_constant(
        &mut self,
        op: BinaryOp,
        column: ExprId,
        key: &ColumnKey,
        constant: &Rewritten,
        origin: ExprId,
    ) -> Result<Rewritten> {
        let operator = op.symbol();
        let bound = match &constant.constant {
            None => {
                return Err(Error::unsupported(
                    operator,
                    format!("{} (encrypted and plaintext columns)", self.text(origin)),
                ))
            }
            Some(Value::Int(v)) => *v,
            Some(Value::Float(v)) if v.is_finite() => match integer_bound(op, *v) {
                IntegerBound::Value(bound) => bound,
                IntegerBound::Fixed(holds) => return Ok(self.constant_predicate(holds)),
            },
            Some(_) => return Err(Error::unsupported(operator, self.text(origin))),
        };

        let cipher = self.scheme.encrypt(bound, key)?;
        let right = self.target.push(Expr::Literal(Value::Cipher(cipher)));
        let id = self.target.push(Expr::Binary {
            op,
            left: column,
            right,
        });
        Ok(Rewritten::plain(id, None))
    }

    /// `1 = 1` or `0 = 1`
    fn constant_predicate(&mut self, holds: bool) -> Rewritten {
        let left = self
            .target
            .push(Expr::Literal(Value::Int(if holds { 1 } else { 0 })));
        let right = self.target.push(Expr::Literal(Value::Int(1)));
        let id = self.target.push(Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        });
        Rewritten::plain(id, None)
    }

    fn function(&mut self, id: ExprId, name: &str, args: &FunctionArgs) -> Result<Rewritten> {
        let parts = match args {
            FunctionArgs::Star => Vec::new(),
            FunctionArgs::List(args) => args
                .iter()
                .map(|a| self.rewritten(*a))
                .collect::<Result<Vec<_>>>()?,
        };
        let Some(cipher) = parts.iter().position(|p| p.state.is_cipher()) else {
            let new_id = self.rebuild(id)?;
            return Ok(Rewritten::plain(new_id, None));
        };

        let lowered = name.to_ascii_lowercase();
        match (lowered.as_str(), parts.as_slice()) {
            ("count", _) => {
                let new_id = self.rebuild(id)?;
                Ok(Rewritten::plain(new_id, None))
            }
            ("sum", [arg]) => {
                let key = arg.state.key().cloned().ok_or_else(|| {
                    Error::unsupported(name, self.text(id))
                })?;
                let udf = self.config.udf.sum.clone();
                let new_id = self.udf(&udf, vec![arg.id], &key)?;
                Ok(self.additive(new_id, key))
            }
            ("min" | "max", [arg]) => match &arg.state {
                CipherState::Ordered(key) => {
                    let key = key.clone();
                    let new_id = self.rebuild(id)?;
                    Ok(Rewritten {
                        id: new_id,
                        state: CipherState::Ordered(key),
                        constant: None,
                    })
                }
                _ => Err(Error::unsupported(name, self.operand_text(args, cipher))),
            },
            _ => Err(Error::unsupported(name, self.operand_text(args, cipher))),
        }
    }

    fn operand_text(&self, args: &FunctionArgs, position: usize) -> String {
        match args {
            FunctionArgs::List(args) => args
                .get(position)
                .map(|a| self.text(*a))
                .unwrap_or_default(),
            FunctionArgs::Star => "*".to_string(),
        }
    }
}

/// Integer form of `column op constant` over an integer column
enum IntegerBound {
    /// Compare against this integer instead
    Value(i64),

    /// The comparison holds for every integer, or for none
    Fixed(bool),
}

/// Integer bound selecting the same integer rows as a float constant
///
/// Fractional constants round towards the rows they admit; constants beyond
/// the `i64` range decide the comparison outright.
fn integer_bound(op: BinaryOp, constant: f64) -> IntegerBound {
    if constant >= I64_LIMIT {
        return IntegerBound::Fixed(matches!(
            op,
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::NotEq
        ));
    }
    if constant < -I64_LIMIT {
        return IntegerBound::Fixed(matches!(
            op,
            BinaryOp::Gt | BinaryOp::GtEq | BinaryOp::NotEq
        ));
    }
    if constant.fract() == 0.0 {
        return IntegerBound::Value(constant as i64);
    }
    match op {
        BinaryOp::Gt | BinaryOp::LtEq => IntegerBound::Value(constant.floor() as i64),
        BinaryOp::GtEq | BinaryOp::Lt => IntegerBound::Value(constant.ceil() as i64),
        BinaryOp::Eq => IntegerBound::Fixed(false),
        BinaryOp::NotEq => IntegerBound::Fixed(true),
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        _ => None,
    }
}

/// Evaluate a plaintext arithmetic step
fn fold(op: ArithmeticOp, left: &Value, right: &Value) -> Option<Value> {
    if let (Value::Int(l), Value::Int(r)) = (left, right) {
        return match op {
            ArithmeticOp::Add => l.checked_add(*r).map(Value::Int),
            ArithmeticOp::Subtract => l.checked_sub(*r).map(Value::Int),
            ArithmeticOp::Multiply => l.checked_mul(*r).map(Value::Int),
            ArithmeticOp::Divide => (*r != 0).then(|| Value::Float(*l as f64 / *r as f64)),
            ArithmeticOp::Modulo => l.checked_rem(*r).map(Value::Int),
        };
    }
    let (l, r) = (as_float(left)?, as_float(right)?);
    let result = match op {
        ArithmeticOp::Add => l + r,
        ArithmeticOp::Subtract => l - r,
        ArithmeticOp::Multiply => l * r,
        ArithmeticOp::Divide => l / r,
        ArithmeticOp::Modulo => l % r,
    };
    result.is_finite().then_some(Value::Float(result))
}

fn fold_all(op: ArithmeticOp, values: &[Value]) -> Option<Value> {
    let (first, rest) = values.split_first()?;
    rest.iter()
        .try_fold(first.clone(), |acc, value| fold(op, &acc, value))
}
