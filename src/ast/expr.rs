//! Expression and predicate model
//!
//! Expressions of one statement live in an [`ExprArena`] and are addressed by
//! [`ExprId`]. Child links always point at nodes pushed earlier, so the child
//! graph is acyclic. View resolution adds a second kind of edge: a
//! [`FieldLiteral`] may refer to the expression producing it inside a nested
//! view. Those edges, and the reverse index from a target to the literals
//! referring to it, are owned by the arena rather than by the nodes.
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::ast::{BinaryOp, Expr, ExprArena, FieldLiteral};
//! use sdb_proxy::types::Value;
//!
//! let mut arena = ExprArena::new();
//! let a = arena.push(Expr::Field(FieldLiteral::new(Some("T1"), "a")));
//! let one = arena.push(Expr::Literal(Value::Int(1)));
//! let pred = arena.push(Expr::Binary { op: BinaryOp::Gt, left: a, right: one });
//! ```

use crate::catalog::ColumnKey;
use crate::error::{Error, Result};
use crate::types::{DataType, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Stable index of an expression node in its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(usize);

impl ExprId {
    /// Position of the node in the arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl ArithmeticOp {
    /// SQL symbol of the operator
    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
            ArithmeticOp::Modulo => "%",
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    /// SQL symbol of the operator
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        }
    }

    /// Operator with swapped operands: `a op b` iff `b op.mirror() a`
    pub fn mirror(self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::LtEq => BinaryOp::GtEq,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::GtEq => BinaryOp::LtEq,
            other => other,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Boolean connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompoundOp {
    And,
    Or,
}

impl CompoundOp {
    /// SQL keyword of the connective
    pub fn keyword(self) -> &'static str {
        match self {
            CompoundOp::And => "AND",
            CompoundOp::Or => "OR",
        }
    }
}

impl fmt::Display for CompoundOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Reference to a column, either of a base table or of a view
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLiteral {
    /// Table qualifier (table name, table alias or view alias)
    pub table: Option<String>,

    /// Column name
    pub column: String,

    /// Resolved type
    pub data_type: DataType,

    /// Whether the referenced value is stored encrypted
    pub sensitive: bool,

    /// Key material of a sensitive base column
    pub key: Option<ColumnKey>,

    /// Expression producing this column inside a view, set by resolution
    pub referred: Option<ExprId>,
}

impl FieldLiteral {
    /// Create an unresolved column reference
    pub fn new(table: Option<&str>, column: &str) -> Self {
        Self {
            table: table.map(str::to_string),
            column: column.to_string(),
            data_type: DataType::Unknown,
            sensitive: false,
            key: None,
            referred: None,
        }
    }

    /// Qualified display name, `table.column` or `column`
    pub fn qualified_name(&self) -> String {
        match &self.table {
            Some(table) => format!("{}.{}", table, self.column),
            None => self.column.clone(),
        }
    }
}

/// Arguments of a function call
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArgs {
    /// `f(*)`
    Star,

    /// Positional arguments
    List(Vec<ExprId>),
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Typed constant
    Literal(Value),

    /// Column reference
    Field(FieldLiteral),

    /// N-ary arithmetic, evaluated left to right
    Arithmetic {
        op: ArithmeticOp,
        children: Vec<ExprId>,
    },

    /// Comparison predicate
    Binary {
        op: BinaryOp,
        left: ExprId,
        right: ExprId,
    },

    /// Boolean combination of two predicates
    Compound {
        op: CompoundOp,
        left: ExprId,
        right: ExprId,
    },

    /// Function call, aggregates included
    Function { name: String, args: FunctionArgs },
}

impl Expr {
    /// Function call helper
    pub fn call(name: &str, args: Vec<ExprId>) -> Self {
        Expr::Function {
            name: name.to_string(),
            args: FunctionArgs::List(args),
        }
    }
}

/// Whether a function name is the insensitive `count` aggregate
pub(crate) fn is_count(name: &str) -> bool {
    name.eq_ignore_ascii_case("count")
}

/// Arena of expression nodes with the referrers index
#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
    referrers: HashMap<ExprId, BTreeSet<ExprId>>,
}

impl ExprArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena holds no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a node
    ///
    /// Child ids must already belong to this arena.
    pub fn push(&mut self, expr: Expr) -> ExprId {
        debug_assert!(self
            .child_ids(&expr)
            .iter()
            .all(|child| child.0 < self.nodes.len()));
        self.nodes.push(expr);
        ExprId(self.nodes.len() - 1)
    }

    /// Node by id
    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.0]
    }

    /// Mutable node by id
    pub fn get_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.nodes[id.0]
    }

    /// Field literal by id, if the node is one
    pub fn field(&self, id: ExprId) -> Option<&FieldLiteral> {
        match self.get(id) {
            Expr::Field(field) => Some(field),
            _ => None,
        }
    }

    /// All ids in push order
    pub fn ids(&self) -> impl Iterator<Item = ExprId> {
        (0..self.nodes.len()).map(ExprId)
    }

    fn child_ids(&self, expr: &Expr) -> Vec<ExprId> {
        match expr {
            Expr::Literal(_) | Expr::Field(_) => Vec::new(),
            Expr::Arithmetic { children, .. } => children.clone(),
            Expr::Binary { left, right, .. } | Expr::Compound { left, right, .. } => {
                vec![*left, *right]
            }
            Expr::Function { args, .. } => match args {
                FunctionArgs::Star => Vec::new(),
                FunctionArgs::List(args) => args.clone(),
            },
        }
    }

    /// Children of a node, in order
    ///
    /// Referred links of field literals are not children.
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        self.child_ids(self.get(id))
    }

    /// Every node reachable from `root` through child links, root included,
    /// in pre-order
    pub fn subtree(&self, root: ExprId) -> Vec<ExprId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.push(id);
            stack.extend(self.children(id).into_iter().rev());
        }
        out
    }

    /// Link a field literal to the expression producing it
    ///
    /// Re-linking replaces the previous link, so the literal is recorded once
    /// in the referrers of exactly one target. The literal takes the target's
    /// type, sensitivity and key.
    ///
    /// # Returns
    /// `Err(Error::Resolution)` if `literal` is not a field literal or the link
    /// would close a cycle
    pub fn link(&mut self, literal: ExprId, target: ExprId) -> Result<()> {
        let previous = match self.get(literal) {
            Expr::Field(field) => field.referred,
            other => {
                return Err(Error::Resolution(format!(
                    "cannot link non-column expression {:?}",
                    other
                )))
            }
        };
        if self.reaches(target, literal) {
            return Err(Error::Resolution(format!(
                "reference `{}` would refer to itself",
                self.describe(literal)
            )));
        }

        if let Some(old) = previous {
            if let Some(set) = self.referrers.get_mut(&old) {
                set.remove(&literal);
                if set.is_empty() {
                    self.referrers.remove(&old);
                }
            }
        }
        self.referrers.entry(target).or_default().insert(literal);

        let data_type = self.result_type(target);
        let sensitive = self.is_sensitive(target);
        let key = self.key_of(target);
        if let Expr::Field(field) = self.get_mut(literal) {
            field.referred = Some(target);
            field.data_type = data_type;
            field.sensitive = sensitive;
            field.key = key;
        }
        Ok(())
    }

    /// Literals currently referring to `target`
    pub fn referrers(&self, target: ExprId) -> Vec<ExprId> {
        self.referrers
            .get(&target)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `to` is reachable from `from` through child and referred links
    fn reaches(&self, from: ExprId, to: ExprId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            stack.extend(self.children(id));
            if let Some(next) = self.field(id).and_then(|f| f.referred) {
                stack.push(next);
            }
        }
        false
    }

    /// Base field reached by following referred links from `id`
    ///
    /// Returns `None` when the chain ends at a non-column expression or loops.
    pub fn base_field(&self, id: ExprId) -> Option<ExprId> {
        let mut seen = HashSet::new();
        let mut current = id;
        loop {
            if !seen.insert(current) {
                return None;
            }
            match self.field(current)?.referred {
                Some(next) => current = next,
                None => return Some(current),
            }
        }
    }

    /// Key material carried by an expression, if it is a column
    fn key_of(&self, id: ExprId) -> Option<ColumnKey> {
        self.field(id).and_then(|f| f.key.clone())
    }

    /// Whether an expression transitively depends on a sensitive column
    ///
    /// `count` is insensitive regardless of its argument.
    pub fn is_sensitive(&self, id: ExprId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            match self.get(current) {
                Expr::Literal(_) => {}
                Expr::Field(field) => match field.referred {
                    Some(next) => stack.push(next),
                    None if field.sensitive => return true,
                    None => {}
                },
                Expr::Function { name, .. } if is_count(name) => {}
                _ => stack.extend(self.children(current)),
            }
        }
        false
    }

    /// Result type of an expression
    pub fn result_type(&self, id: ExprId) -> DataType {
        let mut seen = HashSet::new();
        self.result_type_guarded(id, &mut seen)
    }

    fn result_type_guarded(&self, id: ExprId, seen: &mut HashSet<ExprId>) -> DataType {
        if !seen.insert(id) {
            return DataType::Unknown;
        }
        let data_type = match self.get(id) {
            Expr::Literal(value) => value.data_type(),
            Expr::Field(field) => match (field.referred, &field.data_type) {
                (Some(next), DataType::Unknown) => self.result_type_guarded(next, seen),
                (_, data_type) => data_type.clone(),
            },
            Expr::Arithmetic { children, .. } => {
                let mut types = children.iter().map(|c| self.result_type_guarded(*c, seen));
                match types.next() {
                    Some(first) => types.fold(first, |acc, t| acc.widen(&t)),
                    None => DataType::Unknown,
                }
            }
            Expr::Binary { .. } | Expr::Compound { .. } => DataType::Boolean,
            Expr::Function { name, args } => {
                let first = match args {
                    FunctionArgs::List(args) => args.first().copied(),
                    FunctionArgs::Star => None,
                };
                let arg_type = first.map(|a| self.result_type_guarded(a, seen));
                match (name.to_ascii_lowercase().as_str(), arg_type) {
                    ("count", _) => DataType::BigInt,
                    ("avg", _) => DataType::Double,
                    ("sum", Some(t)) if t.is_integral() => DataType::BigInt,
                    ("sum" | "min" | "max", Some(t)) => t,
                    _ => DataType::Unknown,
                }
            }
        };
        seen.remove(&id);
        data_type
    }

    /// Short human-readable description of a node for error messages
    pub fn describe(&self, id: ExprId) -> String {
        match self.get(id) {
            Expr::Literal(value) => value.to_string(),
            Expr::Field(field) => field.qualified_name(),
            Expr::Arithmetic { op, .. } => format!("{} expression", op),
            Expr::Binary { op, .. } => format!("{} predicate", op),
            Expr::Compound { op, .. } => format!("{} predicate", op),
            Expr::Function { name, .. } => format!("{}()", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn sensitive_field(arena: &mut ExprArena, table: &str, column: &str) -> ExprId {
        let mut field = FieldLiteral::new(Some(table), column);
        field.data_type = DataType::Int;
        field.sensitive = true;
        field.key = Some(ColumnKey::new(BigUint::from(1u32), BigUint::from(3u32)));
        arena.push(Expr::Field(field))
    }

    #[test]
    fn test_children_arity() {
        let mut arena = ExprArena::new();
        let a = sensitive_field(&mut arena, "T1", "a");
        let one = arena.push(Expr::Literal(Value::Int(1)));
        let add = arena.push(Expr::Arithmetic {
            op: ArithmeticOp::Add,
            children: vec![a, one],
        });
        let pred = arena.push(Expr::Binary {
            op: BinaryOp::Gt,
            left: add,
            right: one,
        });
        let star = arena.push(Expr::Function {
            name: "count".into(),
            args: FunctionArgs::Star,
        });

        assert!(arena.children(a).is_empty());
        assert_eq!(arena.children(add), vec![a, one]);
        assert_eq!(arena.children(pred), vec![add, one]);
        assert!(arena.children(star).is_empty());
        assert_eq!(arena.subtree(pred), vec![pred, add, a, one]);
    }

    #[test]
    fn test_sensitivity_propagates_except_count() {
        let mut arena = ExprArena::new();
        let a = sensitive_field(&mut arena, "T1", "a");
        let sum = arena.push(Expr::call("sum", vec![a]));
        let count = arena.push(Expr::call("COUNT", vec![a]));
        let one = arena.push(Expr::Literal(Value::Int(1)));

        assert!(arena.is_sensitive(a));
        assert!(arena.is_sensitive(sum));
        assert!(!arena.is_sensitive(count));
        assert!(!arena.is_sensitive(one));
    }

    #[test]
    fn test_link_is_idempotent() {
        let mut arena = ExprArena::new();
        let a = sensitive_field(&mut arena, "T1", "a");
        let outer = arena.push(Expr::Field(FieldLiteral::new(Some("v"), "a")));

        arena.link(outer, a).unwrap();
        arena.link(outer, a).unwrap();

        assert_eq!(arena.referrers(a), vec![outer]);
        let field = arena.field(outer).unwrap();
        assert_eq!(field.referred, Some(a));
        assert!(field.sensitive);
        assert_eq!(field.data_type, DataType::Int);
        assert_eq!(arena.base_field(outer), Some(a));
    }

    #[test]
    fn test_relink_moves_back_link() {
        let mut arena = ExprArena::new();
        let a = sensitive_field(&mut arena, "T1", "a");
        let count = arena.push(Expr::Function {
            name: "count".into(),
            args: FunctionArgs::Star,
        });
        let outer = arena.push(Expr::Field(FieldLiteral::new(Some("v"), "x")));

        arena.link(outer, a).unwrap();
        arena.link(outer, count).unwrap();

        assert!(arena.referrers(a).is_empty());
        assert_eq!(arena.referrers(count), vec![outer]);
        assert!(!arena.is_sensitive(outer));
        assert_eq!(arena.result_type(outer), DataType::BigInt);
        assert_eq!(arena.base_field(outer), None);
    }

    #[test]
    fn test_link_rejects_cycles() {
        let mut arena = ExprArena::new();
        let x = arena.push(Expr::Field(FieldLiteral::new(None, "x")));
        let y = arena.push(Expr::Field(FieldLiteral::new(None, "y")));
        arena.link(x, y).unwrap();

        assert!(matches!(arena.link(y, x), Err(Error::Resolution(_))));
        assert!(matches!(arena.link(x, x), Err(Error::Resolution(_))));

        let one = arena.push(Expr::Literal(Value::Int(1)));
        assert!(matches!(arena.link(one, x), Err(Error::Resolution(_))));
    }

    #[test]
    fn test_result_types() {
        let mut arena = ExprArena::new();
        let a = sensitive_field(&mut arena, "T1", "a");
        let half = arena.push(Expr::Literal(Value::Float(0.5)));
        let mul = arena.push(Expr::Arithmetic {
            op: ArithmeticOp::Multiply,
            children: vec![a, half],
        });
        let sum = arena.push(Expr::call("sum", vec![a]));
        let avg = arena.push(Expr::call("avg", vec![a]));

        assert_eq!(arena.result_type(mul), DataType::Double);
        assert_eq!(arena.result_type(sum), DataType::BigInt);
        assert_eq!(arena.result_type(avg), DataType::Double);
    }

    #[test]
    fn test_mirror() {
        assert_eq!(BinaryOp::Lt.mirror(), BinaryOp::Gt);
        assert_eq!(BinaryOp::GtEq.mirror(), BinaryOp::LtEq);
        assert_eq!(BinaryOp::Eq.mirror(), BinaryOp::Eq);
    }
}
