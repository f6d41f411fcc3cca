// SPDX-License-Identifier: Apache-2.0

//! Owned statement tree consumed by the jumbler.
//!
//! The tree keeps only what contributes to a statement's shape: structure,
//! identifiers, operators and the *kind* of each literal. Literal values are
//! dropped; their byte offsets in the source text are kept so the normalizer
//! can mask them.
//!
//! Constructs the adapter cannot map are represented by an `Unrecognized`
//! variant carrying the foreign node name. Fingerprinting a tree that
//! contains one fails instead of silently skipping the subtree.

/// A statement that has a tree form. Anything else is a utility statement
/// and is fingerprinted from its raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(Query),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    /// A DML form the adapter does not map, such as `DELETE ... LIMIT`.
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// `WITH RECURSIVE`
    pub recursive: bool,
    pub ctes: Vec<Cte>,
    pub body: SetExpr,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
    /// Row locking clauses (`FOR UPDATE OF t NOWAIT`), as rendered text.
    pub locks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub query: Query,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetExpr {
    Select(Box<Select>),
    Query(Box<Query>),
    SetOperation {
        op: String,
        quantifier: String,
        left: Box<SetExpr>,
        right: Box<SetExpr>,
    },
    Values(Vec<Vec<Expr>>),
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Distinct {
    None,
    All,
    On(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub distinct: Distinct,
    pub projection: Vec<SelectItem>,
    /// `SELECT ... INTO` target, as rendered text.
    pub into: Option<String>,
    pub from: Vec<TableWithJoins>,
    pub selection: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub named_windows: Vec<NamedWindow>,
    pub qualify: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedWindow {
    pub name: String,
    pub spec: WindowSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Expr(Expr),
    /// `*` or `t.*`, kept as its rendered text.
    Wildcard(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableWithJoins {
    pub relation: TableRef,
    pub joins: Vec<Join>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Table { name: String },
    Derived {
        lateral: bool,
        query: Box<Query>,
    },
    Nested(Box<TableWithJoins>),
    Unrecognized(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub relation: TableRef,
    pub constraint: JoinConstraint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinConstraint {
    None,
    On(Expr),
    Using(Vec<String>),
    Natural,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub asc: Option<bool>,
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub source: Option<Box<Query>>,
    pub on: Option<OnInsert>,
    pub returning: Vec<SelectItem>,
    /// Keywords changing what the insert does: `ignore`, `overwrite`,
    /// `replace`, `or replace`, priorities.
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OnInsert {
    DuplicateKeyUpdate(Vec<Assignment>),
    Conflict {
        /// Conflict columns or constraint, as rendered text.
        target: Option<String>,
        action: ConflictAction,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    Nothing,
    Update {
        assignments: Vec<Assignment>,
        selection: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub target: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: TableWithJoins,
    pub assignments: Vec<Assignment>,
    pub from: Vec<TableWithJoins>,
    pub selection: Option<Expr>,
    pub returning: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub from: Vec<TableWithJoins>,
    pub using: Vec<TableWithJoins>,
    pub selection: Option<Expr>,
    pub returning: Vec<SelectItem>,
}

/// Literal kinds. Two literals of the same kind are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstKind {
    Number,
    String,
    Boolean,
    Null,
    /// `DATE '2024-01-01'` and friends, keyed by the type name.
    Typed(String),
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Const {
    pub kind: ConstKind,
    /// Byte offset of the literal (including a leading sign) in the source.
    pub location: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub name: Option<String>,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub distinct: bool,
    pub args: Vec<FunctionArg>,
    /// `ORDER BY` inside the argument list, as in `string_agg(a, ',' ORDER BY b)`.
    pub order_by: Vec<OrderItem>,
    pub within_group: Vec<OrderItem>,
    pub filter: Option<Box<Expr>>,
    pub over: Option<WindowSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArg {
    Positional(Expr),
    Named { name: String, value: Expr },
    Subquery(Box<Query>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(Vec<String>),
    Const(Const),
    Param(String),
    BinaryOp {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: String,
        expr: Box<Expr>,
    },
    Function(Function),
    Cast {
        /// `cast`, `try_cast` or `safe_cast`. `a::t` is a plain cast.
        kind: String,
        expr: Box<Expr>,
        data_type: String,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    IsBool {
        expr: Box<Expr>,
        value: bool,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<Query>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    /// `LIKE`, `ILIKE` and `SIMILAR TO`, told apart by `op`.
    Like {
        op: String,
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        /// `LIKE ANY (...)`
        any: bool,
        /// The escape character is kept verbatim.
        escape: Option<String>,
    },
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_result: Option<Box<Expr>>,
    },
    Exists {
        subquery: Box<Query>,
        negated: bool,
    },
    Subquery(Box<Query>),
    Tuple(Vec<Expr>),
    /// Keyword-syntax forms such as `EXTRACT(YEAR FROM d)`, `a = ANY(b)`,
    /// `INTERVAL '1 day'` or `ARRAY[...]`. `name` carries every literal-free
    /// attribute of the form.
    Special {
        name: String,
        args: Vec<Expr>,
    },
    Wildcard(String),
    Unrecognized(String),
}

impl Expr {
    pub fn constant(kind: ConstKind, location: Option<usize>) -> Self {
        Expr::Const(Const { kind, location })
    }

    pub fn special(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Special {
            name: name.into(),
            args,
        }
    }
}
